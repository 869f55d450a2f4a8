//! Configuration management for the consultation data core.
//!
//! This module handles loading and saving application configuration
//! to/from a JSON file. The config directory can be customized.
//!
//! Includes sync-related configuration:
//! - device_id: UUID7 identifying this device (generated on first run)
//! - device_name: Human-readable device name
//! - sync: retry cap, backoff base, recording flush interval

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConsultError, ConsultResult};
use crate::sync_queue::RetryPolicy;

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Attempts before a queue entry is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base for exponential retry backoff, in seconds
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// How often the recording buffer is polled for extractable chunks
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    8
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_flush_interval_secs() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl From<&SyncSettings> for RetryPolicy {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_secs: settings.backoff_secs,
        }
    }
}

fn default_transcription_config() -> serde_json::Value {
    serde_json::json!({
        "preferred_languages": [],
        "providers": {}
    })
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the local store database file
    #[serde(default)]
    pub database_file: String,
    /// Base URL of the portal REST API
    #[serde(default)]
    pub api_base_url: String,
    /// Device ID (UUID7 hex)
    #[serde(default = "generate_device_id")]
    pub device_id: String,
    /// Human-readable device name
    #[serde(default = "get_default_device_name")]
    pub device_name: String,
    /// Sync configuration
    #[serde(default)]
    pub sync: SyncSettings,
    /// Transcription configuration (stored as generic JSON - this crate
    /// doesn't interpret it)
    #[serde(default = "default_transcription_config")]
    pub transcription: serde_json::Value,
}

fn generate_device_id() -> String {
    Uuid::now_v7().simple().to_string()
}

fn get_default_device_name() -> String {
    #[cfg(feature = "desktop")]
    {
        match hostname::get() {
            Ok(name) => format!("Consult on {}", name.to_string_lossy()),
            Err(_) => "Consult Device".to_string(),
        }
    }
    #[cfg(not(feature = "desktop"))]
    {
        "Consult Client".to_string()
    }
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            database_file: String::new(),
            api_base_url: String::new(),
            device_id: generate_device_id(),
            device_name: get_default_device_name(),
            sync: SyncSettings::default(),
            transcription: default_transcription_config(),
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager
    ///
    /// Without the `desktop` feature, `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> ConsultResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("consult")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(ConsultError::Config(
                        "config_dir is required without the desktop feature".to_string(),
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let defaults = |dir: &Path| {
            let mut default = ConfigData::default();
            default.database_file = dir.join("consult.db").to_string_lossy().to_string();
            default
        };

        let data = if config_file.exists() {
            match fs::read_to_string(&config_file) {
                Ok(content) => {
                    serde_json::from_str(&content).unwrap_or_else(|_| defaults(&config_dir))
                }
                Err(_) => defaults(&config_dir),
            }
        } else {
            defaults(&config_dir)
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> ConsultResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the local store database file path
    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    /// Get the portal API base URL
    pub fn api_base_url(&self) -> &str {
        &self.data.api_base_url
    }

    /// Set the portal API base URL
    pub fn set_api_base_url(&mut self, url: &str) -> ConsultResult<()> {
        self.data.api_base_url = url.trim_end_matches('/').to_string();
        self.save()
    }

    /// Get the device ID as hex string
    pub fn device_id_hex(&self) -> &str {
        &self.data.device_id
    }

    /// Get the human-readable device name
    pub fn device_name(&self) -> &str {
        &self.data.device_name
    }

    /// Set the device name
    pub fn set_device_name(&mut self, name: &str) -> ConsultResult<()> {
        self.data.device_name = name.to_string();
        self.save()
    }

    /// Get sync configuration
    pub fn sync_settings(&self) -> &SyncSettings {
        &self.data.sync
    }

    /// Check if sync is enabled
    pub fn is_sync_enabled(&self) -> bool {
        self.data.sync.enabled
    }

    /// Enable or disable sync
    pub fn set_sync_enabled(&mut self, enabled: bool) -> ConsultResult<()> {
        self.data.sync.enabled = enabled;
        self.save()
    }

    /// Get transcription configuration as raw JSON
    ///
    /// This crate stores the data but doesn't interpret it - the
    /// transcription layer is responsible for understanding the structure.
    pub fn transcription_json(&self) -> &serde_json::Value {
        &self.data.transcription
    }

    /// Set transcription configuration from raw JSON
    pub fn set_transcription_json(&mut self, value: serde_json::Value) -> ConsultResult<()> {
        self.data.transcription = value;
        self.save()
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "database_file" => Some(self.data.database_file.clone()),
            "api_base_url" => Some(self.data.api_base_url.clone()),
            "device_id" => Some(self.data.device_id.clone()),
            "device_name" => Some(self.data.device_name.clone()),
            _ => None,
        }
    }

    /// Set a configuration value
    pub fn set(&mut self, key: &str, value: &str) -> ConsultResult<()> {
        match key {
            "database_file" => self.data.database_file = value.to_string(),
            "api_base_url" => self.data.api_base_url = value.trim_end_matches('/').to_string(),
            "device_name" => self.data.device_name = value.to_string(),
            _ => return Err(ConsultError::Config(format!("Unknown config key: {}", key))),
        }
        self.save()
    }
}
