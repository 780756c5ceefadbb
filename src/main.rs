//! plate-reader - Multi-image license plate reading
//!
//! Fetches several photos of the same vehicle, locates the plate in each,
//! recognizes the text, repairs common OCR confusions, and picks the
//! consensus reading across images.

mod config;
mod fetch;
mod plate;
mod reader;
mod vision;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::AppConfig;
use crate::fetch::ImageFetcher;
use crate::reader::PlateReader;
use crate::vision::{ModelManager, ModelType, OnnxPlateDetector, OnnxTextRecognizer, RecognizerOptions};

/// plate-reader - consensus license plate reading across images
#[derive(Parser, Debug)]
#[command(name = "plate-reader")]
#[command(about = "Reads a license plate from multiple photos of the same vehicle")]
struct Args {
    /// Image URLs to process
    urls: Vec<String>,

    /// File with one image URL per line
    #[arg(long)]
    urls_file: Option<PathBuf>,

    /// Configuration file path (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model cache directory (defaults to the user data directory)
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Download the detection and recognition models, then exit
    #[arg(long)]
    download_models: bool,
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let model_manager = match &args.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };

    if args.download_models {
        model_manager.ensure_all_models()?;
        info!("All models available in {:?}", model_manager.models_dir());
        return Ok(());
    }

    let urls = collect_urls(&args)?;
    if urls.is_empty() {
        anyhow::bail!("No image URLs given; pass URLs as arguments or via --urls-file");
    }

    let config = load_or_create_config(args.config.as_deref());

    info!("Processing {} image sources", urls.len());

    let det_path = model_manager.ensure_model(ModelType::Detection)?;
    let rec_path = model_manager.ensure_model(ModelType::Recognition)?;
    let dict_path = model_manager.ensure_model(ModelType::Charset)?;

    let detector = OnnxPlateDetector::new(&det_path, config.detection.input_size)?;
    let recognizer = OnnxTextRecognizer::new(&rec_path, &dict_path)?;
    let fetcher = ImageFetcher::new(&config.fetch.user_agent, config.fetch.timeout_secs)?;

    let options = RecognizerOptions {
        allowlist: config.recognition.allowlist.clone(),
        decoder: config.recognition.decoder,
        beam_width: config.recognition.beam_width,
    };

    let mut reader = PlateReader::new(
        fetcher,
        detector,
        recognizer,
        config.detection.confidence_threshold,
        options,
    );

    match reader.run(&urls) {
        Some(plate) => println!("Final detected plate: {}", plate),
        None => println!("No valid plate detected."),
    }

    Ok(())
}

/// Gather URLs from the command line and the optional URL file
fn collect_urls(args: &Args) -> Result<Vec<String>> {
    let mut urls = args.urls.clone();

    if let Some(path) = &args.urls_file {
        let content = std::fs::read_to_string(path)?;
        urls.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    Ok(urls)
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(override_path: Option<&std::path::Path>) -> AppConfig {
    if let Some(path) = override_path {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => {
                tracing::warn!("Failed to load {:?}: {}; using defaults", path, e);
                return AppConfig::default();
            }
        }
    }

    if let Ok(config_dir) = config::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(config) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return config;
            }
        }
    }

    info!("Using default configuration");
    AppConfig::default()
}
