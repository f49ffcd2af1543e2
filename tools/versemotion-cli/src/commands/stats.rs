//! Show storage statistics.

use versemotion_common::AppConfig;
use versemotion_frame_store::FrameStore;

pub async fn run(session: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load();
    let store = FrameStore::new(config.storage).await?;
    let stats = store.storage_stats(session.as_deref()).await?;

    match &session {
        Some(id) => println!("Storage usage for session '{id}':"),
        None => println!("Storage usage for store root {}:", store.root().display()),
    }
    println!("  Used:        {} bytes", stats.used_bytes);
    println!("  Free space:  {} bytes", stats.free_space);
    println!("  Total space: {} bytes", stats.total_space);
    println!("  Usage:       {:.2}%", stats.usage_percent);
    Ok(())
}
