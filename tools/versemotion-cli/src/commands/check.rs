//! Check encoder availability and staging storage.

use versemotion_common::AppConfig;
use versemotion_encoder::{EncoderBackend, FfmpegEncoder};
use versemotion_frame_store::FrameStore;

pub async fn run() -> anyhow::Result<()> {
    println!("Versemotion System Check");
    println!("{}", "=".repeat(50));

    let encoder = FfmpegEncoder::new();
    match encoder.verify_available().await {
        Ok(()) => println!("[OK] Encoder: ffmpeg reachable"),
        Err(e) => {
            println!("[FAIL] Encoder: {e}");
            println!();
            println!("Install ffmpeg and make sure it is on PATH.");
            return Ok(());
        }
    }

    let config = AppConfig::load();
    println!(
        "[OK] Staging root: {}",
        config.storage.temp_root.display()
    );

    let store = FrameStore::new(config.storage).await?;
    let stats = store.storage_stats(None).await?;
    println!(
        "[OK] Storage: {:.1} MiB staged, {:.1} GiB free of {:.1} GiB ({:.1}% used by store)",
        stats.used_bytes as f64 / (1024.0 * 1024.0),
        stats.free_space as f64 / (1024.0 * 1024.0 * 1024.0),
        stats.total_space as f64 / (1024.0 * 1024.0 * 1024.0),
        stats.usage_percent,
    );

    println!();
    println!("Versemotion is ready to export.");
    Ok(())
}
