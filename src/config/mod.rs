//! Application Configuration
//!
//! User settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::DecoderMode;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Image source fetching
    pub fetch: FetchSettings,
    /// Plate detection
    pub detection: DetectionSettings,
    /// Text recognition
    pub recognition: RecognitionSettings,
}

/// Fetch-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// User agent sent with image requests
    pub user_agent: String,
    /// Per-request timeout in seconds; None blocks until the server answers
    pub timeout_secs: Option<u64>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("plate-reader/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: None,
        }
    }
}

/// Detection-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Boxes at or below this confidence are discarded
    pub confidence_threshold: f32,
    /// Square input edge for the detection model
    pub input_size: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            input_size: 640,
        }
    }
}

/// Recognition-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// Characters the decoder may emit
    pub allowlist: String,
    /// CTC decoding strategy
    pub decoder: DecoderMode,
    /// Beam width for beam-search decoding
    pub beam_width: usize,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            allowlist: "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string(),
            decoder: DecoderMode::BeamSearch,
            beam_width: 5,
        }
    }
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "cashea", "plate-reader")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Get the application data directory (model cache lives here)
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "cashea", "plate-reader")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
