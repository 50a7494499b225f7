//! Configuration management for placescout
//!
//! All configuration is loaded from `./config/placescout.toml`.
//! No hardcoded defaults exist in source code - all defaults are in the
//! config template.

use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::export::ExportFormat;
use crate::session::SessionConfig;

/// Configuration file path relative to working directory
pub const CONFIG_PATH: &str = "./config/placescout.toml";

/// Default configuration file content - this is the ONLY place defaults exist
pub const DEFAULT_CONFIG: &str = include_str!("../config/placescout.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration field '{field}' cannot be empty")]
    EmptyRequired { field: String },

    #[error("Configuration field '{field}' must be greater than zero")]
    ZeroNotAllowed { field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub delays: DelaysConfig,
    pub recovery: RecoveryConfig,
    pub browser: BrowserConfig,
    pub output: OutputConfig,
}

/// Worker pool and task sizing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    pub num_workers: usize,
    pub max_results_per_task: usize,
    pub headless: bool,
    pub use_proxy: bool,
    pub session_timeout_secs: u64,
}

/// Inter-action delay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DelaysConfig {
    pub request_delay_min_secs: f64,
    pub request_delay_max_secs: f64,
}

/// Interface recovery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    pub max_recreate_attempts: u32,
    pub user_agents: Vec<String>,
}

/// Browser engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub nav_timeout_secs: u64,
}

/// Result sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub directory: String,
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scraper.max_results_per_task == 0 {
            return Err(ConfigError::ZeroNotAllowed {
                field: "scraper.max_results_per_task".to_string(),
            });
        }
        if self.scraper.session_timeout_secs == 0 {
            return Err(ConfigError::ZeroNotAllowed {
                field: "scraper.session_timeout_secs".to_string(),
            });
        }

        if self.delays.request_delay_min_secs < 0.0 || self.delays.request_delay_max_secs < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "delays".to_string(),
                reason: "delays cannot be negative".to_string(),
            });
        }
        if self.delays.request_delay_min_secs > self.delays.request_delay_max_secs {
            return Err(ConfigError::InvalidValue {
                field: "delays.request_delay_min_secs".to_string(),
                reason: "minimum delay exceeds maximum delay".to_string(),
            });
        }

        if self.recovery.max_recreate_attempts == 0 {
            return Err(ConfigError::ZeroNotAllowed {
                field: "recovery.max_recreate_attempts".to_string(),
            });
        }
        if self.recovery.user_agents.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "recovery.user_agents".to_string(),
            });
        }

        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(ConfigError::ZeroNotAllowed {
                field: "browser.viewport_width/viewport_height".to_string(),
            });
        }
        if self.browser.nav_timeout_secs == 0 {
            return Err(ConfigError::ZeroNotAllowed {
                field: "browser.nav_timeout_secs".to_string(),
            });
        }

        if self.output.directory.is_empty() {
            return Err(ConfigError::EmptyRequired {
                field: "output.directory".to_string(),
            });
        }
        self.output.format.parse::<ExportFormat>().map_err(|reason| {
            ConfigError::InvalidValue { field: "output.format".to_string(), reason }
        })?;

        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper.session_timeout_secs)
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.browser.nav_timeout_secs)
    }

    pub fn export_format(&self) -> ExportFormat {
        // validate() already proved the string parses.
        self.output.format.parse().unwrap_or(ExportFormat::Csv)
    }

    /// Derive the per-session policy from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            recreate_budget: self.recovery.max_recreate_attempts,
            user_agents: self.recovery.user_agents.clone(),
            delay_min_secs: self.delays.request_delay_min_secs,
            delay_max_secs: self.delays.request_delay_max_secs,
            viewport: (self.browser.viewport_width, self.browser.viewport_height),
            proxy: None,
        }
    }

    /// Create default configuration file at the standard location
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        let path = Path::new(CONFIG_PATH);

        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write default config
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;

        Ok(path.to_path_buf())
    }

    /// Check if stdin is a TTY (interactive terminal)
    pub fn is_interactive() -> bool {
        atty::is(atty::Stream::Stdin)
    }

    /// Prompt user to create default config (only in interactive mode)
    pub fn prompt_create_config() -> Result<Option<PathBuf>, ConfigError> {
        if !Self::is_interactive() {
            return Ok(None);
        }

        print!("Configuration file not found. Create default config? [Y/n] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() || input == "y" || input == "yes" {
            let path = Self::create_default_config()?;
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }
}
