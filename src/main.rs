// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use dualcam::Config;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "dualcam")]
#[command(about = "Paired RGB/IR camera preview and frame processing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream both cameras through the pairing pipeline, printing stats
    Run {
        /// Run time in seconds (default: until Ctrl+C)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Preview surface width
        #[arg(long, default_value = "1080")]
        width: u32,

        /// Preview surface height
        #[arg(long, default_value = "1920")]
        height: u32,

        /// Display rotation in degrees (0, 90, 180, 270)
        #[arg(short, long, default_value = "0")]
        rotation: i32,
    },

    /// Capture a still from the RGB camera
    Still {
        /// Output file path (default: ~/Pictures/dualcam/still_TIMESTAMP.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the preview size each camera would pick for a display
    Sizes {
        /// Display width
        #[arg(long, default_value = "1080")]
        width: u32,

        /// Display height
        #[arg(long, default_value = "1920")]
        height: u32,

        /// Display rotation in degrees
        #[arg(short, long, default_value = "0")]
        rotation: i32,
    },

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let loaded = Config::load_default();
    let config = loaded.as_ref().ok().cloned().unwrap_or_default();

    // RUST_LOG wins over the config file, e.g. RUST_LOG=dualcam=debug
    let fallback = config.log_filter.as_deref().unwrap_or("warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    if let Err(e) = &loaded {
        tracing::warn!(error = %e, "Ignoring config file, using defaults");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration,
            width,
            height,
            rotation,
        } => cli::run(&config, duration, width, height, rotation),
        Commands::Still { output } => cli::take_still(&config, output),
        Commands::Sizes {
            width,
            height,
            rotation,
        } => cli::show_sizes(&config, width, height, rotation),
        Commands::Config { save } => cli::show_config(&config, save),
    }
}
