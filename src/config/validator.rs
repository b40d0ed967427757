use crate::config::Config;
use crate::error::{QuarryError, Result, ValidationError};

const RERANKER_PROVIDERS: &[&str] = &["cross-encoder", "ollama"];
const QUERY_MODES: &[&str] = &["vector", "keyword", "hybrid"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_reranker(config, &mut errors);
        Self::validate_logging(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QuarryError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Embedding model cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Max concurrency must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.default_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                "Default top_k must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.similarity_threshold) {
            errors.push(ValidationError::new(
                "retrieval.similarity_threshold",
                format!(
                    "Similarity threshold must be between 0.0 and 1.0, got {}",
                    retrieval.similarity_threshold
                ),
            ));
        }

        if retrieval.rrf_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                "RRF k must be greater than 0",
            ));
        }

        for (path, weight) in [
            ("retrieval.vector_weight", retrieval.vector_weight),
            ("retrieval.keyword_weight", retrieval.keyword_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be a non-negative number, got {}", weight),
                ));
            }
        }

        if retrieval.vector_weight + retrieval.keyword_weight <= 0.0 {
            errors.push(ValidationError::new(
                "retrieval.keyword_weight",
                "At least one fusion weight must be positive",
            ));
        }

        if !QUERY_MODES.contains(&retrieval.default_mode.as_str()) {
            errors.push(ValidationError::new(
                "retrieval.default_mode",
                format!(
                    "Invalid mode: {}. Must be one of {:?}",
                    retrieval.default_mode, QUERY_MODES
                ),
            ));
        }
    }

    fn validate_reranker(config: &Config, errors: &mut Vec<ValidationError>) {
        let reranker = &config.reranker;

        if !RERANKER_PROVIDERS.contains(&reranker.provider.as_str()) {
            errors.push(ValidationError::new(
                "reranker.provider",
                format!(
                    "Invalid provider: {}. Must be one of {:?}",
                    reranker.provider, RERANKER_PROVIDERS
                ),
            ));
        }

        if reranker.model.is_empty() {
            errors.push(ValidationError::new(
                "reranker.model",
                "Reranker model cannot be empty",
            ));
        }

        if reranker.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "reranker.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }

        if reranker.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "reranker.max_concurrent",
                "Max concurrency must be greater than 0",
            ));
        }

        if reranker.top_k_multiplier == 0 {
            errors.push(ValidationError::new(
                "reranker.top_k_multiplier",
                "Multiplier must be greater than 0",
            ));
        }

        if reranker.max_candidates == 0 {
            errors.push(ValidationError::new(
                "reranker.max_candidates",
                "Max candidates must be greater than 0",
            ));
        }

        if let Some(url) = &reranker.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(ValidationError::new(
                    "reranker.base_url",
                    format!("Base URL must start with http:// or https://, got {}", url),
                ));
            }
        }
    }

    fn validate_logging(config: &Config, errors: &mut Vec<ValidationError>) {
        let level = config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!("Invalid log level: {}", config.logging.level),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_schema_version() {
        let mut config = Config::default();
        config.meta.schema_version = "2.0.0".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.retrieval.rrf_k = 0;
        config.reranker.provider = "cohere".to_string();
        config.reranker.timeout_secs = 0;

        match ConfigValidator::validate(&config) {
            Err(QuarryError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert!(paths.contains(&"retrieval.rrf_k"));
                assert!(paths.contains(&"reranker.provider"));
                assert!(paths.contains(&"reranker.timeout_secs"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_weights() {
        let mut config = Config::default();
        config.retrieval.vector_weight = -1.0;
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = Config::default();
        config.retrieval.vector_weight = 0.0;
        config.retrieval.keyword_weight = 0.0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_mode_and_level() {
        let mut config = Config::default();
        config.retrieval.default_mode = "graph".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = Config::default();
        config.reranker.base_url = Some("localhost:11434".to_string());
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
