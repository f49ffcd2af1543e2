//! Versemotion CLI — stage rendered frames and drive batch video exports.
//!
//! Usage:
//!   versemotion export <FRAMES_DIR> [OPTIONS]   Export staged frames to video
//!   versemotion check                           Check encoder availability
//!   versemotion stats [--session <ID>]          Show storage statistics
//!   versemotion sweep                           Reclaim orphaned sessions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "versemotion",
    about = "Lyrics-video batch export pipeline",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a directory of rendered PNG frames to a video file
    Export {
        /// Directory containing the rendered frames (PNG, sorted by name)
        frames_dir: PathBuf,

        /// Session identifier for the staging area
        #[arg(short, long, default_value = "cli")]
        session: String,

        /// Output file path
        #[arg(short, long, default_value = "output.mp4")]
        output: PathBuf,

        /// Output frame rate
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Quality tier: low|medium|high|ultra
        #[arg(long, default_value = "medium")]
        quality: String,

        /// Optional audio track to mux into the final output
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Frames per intermediate segment (defaults to configuration)
        #[arg(long)]
        batch_size: Option<u32>,
    },

    /// Check that the external encoder is reachable
    Check,

    /// Show storage statistics for the store or one session
    Stats {
        /// Session identifier (whole store when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Run one orphan sweep over the staging root
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    versemotion_common::logging::init_logging(&versemotion_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
        file: None,
    });

    match cli.command {
        Commands::Export {
            frames_dir,
            session,
            output,
            fps,
            quality,
            audio,
            batch_size,
        } => {
            commands::export::run(frames_dir, session, output, fps, quality, audio, batch_size)
                .await
        }
        Commands::Check => commands::check::run().await,
        Commands::Stats { session } => commands::stats::run(session).await,
        Commands::Sweep => commands::sweep::run().await,
    }
}
