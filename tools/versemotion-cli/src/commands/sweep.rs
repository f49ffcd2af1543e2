//! Run one orphan sweep over the staging root.

use versemotion_common::AppConfig;
use versemotion_frame_store::FrameStore;

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load();
    let retention_hours = config.storage.retention_hours;
    let store = FrameStore::new(config.storage).await?;

    let removed = store.sweep_orphans().await?;
    println!(
        "Swept {} orphaned session(s) older than {}h from {}",
        removed,
        retention_hours,
        store.root().display()
    );
    Ok(())
}
