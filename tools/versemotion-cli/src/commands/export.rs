//! Export a directory of rendered frames to a video file.

use std::path::PathBuf;
use std::sync::Arc;

use versemotion_common::AppConfig;
use versemotion_encoder::{EncoderBackend, FfmpegEncoder, QualityTier};
use versemotion_export::{ExportEvent, ExportOptions, ExportRequest, ExportService};
use versemotion_frame_store::frame_file_name;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    frames_dir: PathBuf,
    session: String,
    output: PathBuf,
    fps: u32,
    quality: String,
    audio: Option<PathBuf>,
    batch_size: Option<u32>,
) -> anyhow::Result<()> {
    let quality: QualityTier = quality.parse().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Anchor the deliverable outside the session staging tree, which is
    // removed when the service is disposed.
    let output = if output.is_absolute() {
        output
    } else {
        std::env::current_dir()?.join(output)
    };

    let frame_files = collect_frame_files(&frames_dir)?;
    if frame_files.is_empty() {
        return Err(anyhow::anyhow!(
            "no .png frames found in {}",
            frames_dir.display()
        ));
    }
    println!("Exporting {} frames from {}", frame_files.len(), frames_dir.display());

    let encoder: Arc<dyn EncoderBackend> = Arc::new(FfmpegEncoder::new());
    let service = ExportService::new(AppConfig::load(), encoder).await?;
    service.initialize().await?;

    // Bridge observer notifications onto a channel we can await.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    service.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    // Stage every frame through the store (validating and converting as the
    // renderer collaborator would).
    service.create_session(&session).await?;
    let mut width = 0u32;
    let mut height = 0u32;
    for (index, file) in frame_files.iter().enumerate() {
        let decoded = image::open(file)
            .map_err(|e| anyhow::anyhow!("failed to decode {}: {e}", file.display()))?
            .to_rgba8();
        if index == 0 {
            width = decoded.width();
            height = decoded.height();
            println!("  Resolution: {width}x{height} @ {fps}fps, quality: {quality}");
        }
        service
            .save_frame_image(
                &session,
                &frame_file_name(index as u64),
                decoded.into_raw(),
                width,
                height,
            )
            .await?;
    }

    service.queue_video_export(ExportRequest {
        session_id: session.clone(),
        options: ExportOptions {
            width,
            height,
            fps,
            quality,
            total_frames: frame_files.len() as u64,
            batch_size,
            audio_path: audio,
            output_path: output,
        },
    });

    // Follow progress until our session completes or fails.
    let result = loop {
        let Some(event) = rx.recv().await else {
            break Err(anyhow::anyhow!("export service stopped unexpectedly"));
        };
        match event {
            ExportEvent::Progress(update) if update.session_id == session => {
                match (update.current_batch, update.total_batches) {
                    (Some(current), Some(total)) => print!(
                        "\r  [{:>5.1}%] {} (batch {current}/{total})   ",
                        update.percent,
                        update.phase.as_str()
                    ),
                    _ => print!("\r  [{:>5.1}%] {}                    ", update.percent, update.phase.as_str()),
                }
                use std::io::Write as _;
                let _ = std::io::stdout().flush();
            }
            ExportEvent::Completed {
                session_id,
                output_path,
            } if session_id == session => {
                println!("\nExport complete: {}", output_path.display());
                break Ok(());
            }
            ExportEvent::Failed {
                session_id,
                code,
                message,
            } if session_id == session => {
                break Err(anyhow::anyhow!("export failed ({code}): {message}"));
            }
            _ => {}
        }
    };

    service.dispose().await;
    result
}

/// All .png files in the directory, sorted by filename.
fn collect_frame_files(dir: &PathBuf) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("png"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}
