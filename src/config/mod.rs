//! Configuration management for Quarry
//!
//! Handles loading, validation, and environment overrides of the TOML
//! configuration file.

use crate::error::{QuarryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Directory holding the folder registry log
    pub fn state_dir(&self) -> PathBuf {
        expand_tilde(&self.data_dir).join("state")
    }

    /// Directory holding the chunk database and keyword index
    pub fn store_dir(&self) -> PathBuf {
        expand_tilde(&self.data_dir).join("store")
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub similarity_threshold: f32,
    pub rrf_k: usize,
    pub vector_weight: f64,
    pub keyword_weight: f64,
    pub default_mode: String,
}

/// Reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub provider: String, // "cross-encoder" or "ollama"
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub top_k_multiplier: usize,
    pub max_candidates: usize,
}

impl RerankerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Number of first-stage candidates to fetch for a final `top_k`
    pub fn stage1_top_k(&self, top_k: usize) -> usize {
        top_k
            .saturating_mul(self.top_k_multiplier)
            .min(self.max_candidates)
            .max(top_k)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QuarryError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            QuarryError::io(e, format!("Failed to read config file: {:?}", path))
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load the configuration at `path`, or defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                QuarryError::io(e, format!("Failed to create config directory: {:?}", parent))
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            QuarryError::io(e, format!("Failed to write config file: {:?}", path))
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: QUARRY_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("QUARRY_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "RETRIEVAL__DEFAULT_MODE" => {
                self.retrieval.default_mode = value.to_string();
            }
            "RETRIEVAL__RRF_K" => {
                self.retrieval.rrf_k = parse_value(path, value)?;
            }
            "RERANKER__ENABLED" => {
                self.reranker.enabled = parse_value(path, value)?;
            }
            "RERANKER__PROVIDER" => {
                self.reranker.provider = value.to_string();
            }
            "RERANKER__MODEL" => {
                self.reranker.model = value.to_string();
            }
            "RERANKER__BASE_URL" => {
                self.reranker.base_url = Some(value.to_string());
            }
            "RERANKER__TIMEOUT_SECS" => {
                self.reranker.timeout_secs = parse_value(path, value)?;
            }
            "LOGGING__LEVEL" => {
                self.logging.level = value.to_string();
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| QuarryError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("quarry").join("config.toml"))
    }
}

fn parse_value<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| QuarryError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.quarry"),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
                max_concurrent: 4,
            },
            retrieval: RetrievalConfig {
                default_top_k: 5,
                similarity_threshold: 0.0,
                rrf_k: 60,
                vector_weight: 0.5,
                keyword_weight: 0.5,
                default_mode: "hybrid".to_string(),
            },
            reranker: RerankerConfig {
                enabled: false,
                provider: "cross-encoder".to_string(),
                model: "BAAI/bge-reranker-base".to_string(),
                base_url: None,
                timeout_secs: 30,
                max_concurrent: 5,
                top_k_multiplier: 10,
                max_candidates: 100,
            },
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
        assert!(!config.reranker.enabled);
        assert_eq!(config.retrieval.rrf_k, 60);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.retrieval.default_top_k = 12;
        config.reranker.provider = "ollama".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.default_top_k, 12);
        assert_eq!(loaded.reranker.provider, "ollama");
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = Config::load(&temp.path().join("absent.toml"));
        assert!(matches!(result, Err(QuarryError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_stage1_top_k() {
        let reranker = Config::default().reranker;
        assert_eq!(reranker.stage1_top_k(5), 50);
        assert_eq!(reranker.stage1_top_k(15), 100);
        assert_eq!(reranker.stage1_top_k(500), 500);
    }

    #[test]
    fn test_storage_dirs() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/var/lib/quarry"),
        };
        assert_eq!(storage.state_dir(), PathBuf::from("/var/lib/quarry/state"));
        assert_eq!(storage.store_dir(), PathBuf::from("/var/lib/quarry/store"));
    }
}
