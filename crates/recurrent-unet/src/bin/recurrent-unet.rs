use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use recurrent_unet::{
    backend::{backend_name, create_device},
    model::ModelArch,
    training::{run_training, TrainingCliArgs},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recurrent-unet")]
#[command(about = "Recurrent U-Net and ConvGRU models for semantic segmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model
    Train {
        /// JSON experiment configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Checkpoint prefix to resume from
        #[arg(short, long)]
        resume: Option<PathBuf>,
    },

    /// Show backend and architecture information
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { config, resume } => {
            let summary = run_training(TrainingCliArgs::new(config, resume))?;
            println!(
                "Finished after {} iterations, best mean IoU {:.4}",
                summary.iterations, summary.best_iou
            );
            println!("Best model: {}", summary.checkpoint.prefix().display());
            Ok(())
        }

        Commands::Info => {
            println!("Recurrent U-Net information:");
            println!("  Backend: {}", backend_name());
            println!("  Device: {:?}", create_device());
            println!("  Architectures:");
            for arch in ModelArch::ALL {
                println!("    - {arch}");
            }
            Ok(())
        }
    }
}
