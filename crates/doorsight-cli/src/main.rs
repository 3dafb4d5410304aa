use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doorsight_core::gallery::FaceRegistry;
use doorsight_core::image_io;
use doorsight_core::{Config, FacePipeline, Gallery, Image};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "doorsight", about = "Doorsight face identity diagnostics")]
struct Cli {
    /// TOML config file; DOORSIGHT_* environment variables still apply
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force the mock tier regardless of installed models
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the selected tier and threshold
    Status,
    /// Locate faces in an image
    Detect {
        image: PathBuf,
    },
    /// Encode a single face and print the gallery with it enrolled
    Register {
        /// Display name for the face
        #[arg(short, long)]
        name: String,
        image: PathBuf,
        /// Existing gallery JSON to extend
        #[arg(short, long)]
        gallery: Option<PathBuf>,
    },
    /// Verify an image against an enrolled gallery
    Verify {
        image: PathBuf,
        #[arg(short, long)]
        gallery: PathBuf,
    },
}

#[derive(Serialize)]
struct Status {
    tier: String,
    synthetic: bool,
    threshold: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if cli.mock {
        config.force_mock = true;
    }
    let pipeline = FacePipeline::from_config(&config).context("failed to initialize backend")?;

    match cli.command {
        Commands::Status => {
            let status = Status {
                tier: pipeline.tier().to_string(),
                synthetic: pipeline.backend().is_synthetic(),
                threshold: pipeline.threshold(),
            };
            print_json(&status)?;
        }
        Commands::Detect { image } => {
            let regions = pipeline.backend().locate(&read_image(&image)?)?;
            tracing::info!(faces = regions.len(), "detection complete");
            print_json(&regions)?;
        }
        Commands::Register {
            name,
            image,
            gallery,
        } => {
            let mut faces = match gallery {
                Some(path) => read_gallery(&path)?,
                None => Gallery::new(),
            };
            let registration = pipeline.register_image(&name, &read_image(&image)?)?;
            faces.enroll(&registration.name, registration.encoding);
            println!("{}", faces.to_json()?);
        }
        Commands::Verify { image, gallery } => {
            let faces = read_gallery(&gallery)?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let decision = pipeline.verify_bytes(&bytes, &faces.snapshot());
            print_json(&decision)?;
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Image> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    image_io::decode_image(&bytes).with_context(|| format!("invalid image {}", path.display()))
}

fn read_gallery(path: &Path) -> Result<Gallery> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gallery {}", path.display()))?;
    Ok(Gallery::from_json(&text)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
