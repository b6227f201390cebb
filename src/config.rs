use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from config.toml or environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub voting: VotingSettings,
    pub processing: ProcessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub extractions_dir: PathBuf,
    pub output_dir: PathBuf,
    pub annotations_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSettings {
    pub threshold: f64,
    pub min_sources: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub workers: usize,
}

impl AppConfig {
    /// Load configuration from config.toml file and environment variables
    /// Environment variables take precedence over file configuration
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("paths.extractions_dir", "./extractions")?
            .set_default("paths.output_dir", "./canonical")?
            .set_default("voting.threshold", 0.75)?
            .set_default("voting.min_sources", 3)?
            .set_default("processing.workers", 4)?
            // Load from config.toml if it exists
            .add_source(File::with_name("config").required(false))
            // MSGC_* env variables can override any setting
            .add_source(config::Environment::with_prefix("MSGC").separator("__"))
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;

        // Convenience variables with flat names
        if let Ok(dir) = env::var("MSGC_EXTRACTIONS_DIR") {
            app_config.paths.extractions_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("MSGC_OUTPUT_DIR") {
            app_config.paths.output_dir = PathBuf::from(dir);
        }
        if let Ok(file) = env::var("MSGC_ANNOTATIONS_FILE") {
            app_config.paths.annotations_file = Some(PathBuf::from(file));
        }

        if !(0.5..=1.0).contains(&app_config.voting.threshold) {
            return Err(ConfigError::Message(format!(
                "voting.threshold must be within [0.5, 1.0], got {}",
                app_config.voting.threshold
            )));
        }
        if app_config.voting.min_sources == 0 {
            return Err(ConfigError::Message(
                "voting.min_sources must be at least 1".to_string(),
            ));
        }

        Ok(app_config)
    }

    /// Get default config values for CLI argument defaults
    pub fn get_defaults() -> Result<Self, ConfigError> {
        // Try to load config for defaults, but don't fail if not found
        match Self::load() {
            Ok(config) => Ok(config),
            Err(_) => Ok(Self {
                paths: PathsConfig {
                    extractions_dir: PathBuf::from("./extractions"),
                    output_dir: PathBuf::from("./canonical"),
                    annotations_file: None,
                },
                voting: VotingSettings {
                    threshold: 0.75,
                    min_sources: 3,
                },
                processing: ProcessingConfig { workers: 4 },
            }),
        }
    }
}
