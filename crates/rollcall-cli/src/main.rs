use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{DetectionMethod, EngineConfig, FaceEngine, LoadOutcome};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face identity matching CLI")]
struct Cli {
    /// Path to the gallery blob.
    #[arg(long, default_value = "gallery.json")]
    gallery: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person from a photo
    Register {
        /// Name to register the face under
        #[arg(short, long)]
        name: String,
        /// Photo containing the face
        image: PathBuf,
    },
    /// Identify every face in a photo against the gallery
    Identify { image: PathBuf },
    /// Detect faces without identifying them
    Detect {
        image: PathBuf,
        /// Detection method: primary, secondary, or both
        #[arg(short, long)]
        method: Option<String>,
    },
    /// List registered identities
    List,
    /// Remove every registered identity
    Clear,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    let mut engine = FaceEngine::new(&config).context("failed to initialize the face engine")?;

    match engine.load_gallery(&cli.gallery)? {
        LoadOutcome::Loaded(count) => tracing::info!(count, "gallery loaded"),
        LoadOutcome::NotFound => tracing::info!("no gallery yet; starting empty"),
    }

    match cli.command {
        Commands::Register { name, image } => {
            engine
                .register_identity(&name, &image)
                .with_context(|| format!("failed to register {name}"))?;
            engine.save_gallery(&cli.gallery)?;
            println!("registered {name} ({} identities total)", engine.gallery_len());
        }
        Commands::Identify { image } => {
            let results = engine.identify_file(&image)?;
            if results.is_empty() {
                println!("no faces found");
            }
            for result in results {
                println!(
                    "{}  confidence {:.2}  {}",
                    result.name, result.confidence, result.location
                );
            }
        }
        Commands::Detect { image, method } => {
            let method = method
                .as_deref()
                .map(DetectionMethod::parse_lenient)
                .unwrap_or_else(|| engine.method());
            let faces = engine.detect_file(&image, method)?;
            if faces.is_empty() {
                println!("no faces found");
            }
            for face in faces {
                println!("face  score {:.2}  {}", face.confidence, face.location);
            }
        }
        Commands::List => {
            let names = engine.gallery_names();
            if names.is_empty() {
                println!("no identities registered");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Clear => {
            engine.clear_gallery();
            engine.save_gallery(&cli.gallery)?;
            println!("gallery cleared");
        }
    }

    Ok(())
}
