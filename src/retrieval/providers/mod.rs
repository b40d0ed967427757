//! Reranker provider implementations and the registry that builds them

mod cross_encoder;
mod ollama;

pub use cross_encoder::CrossEncoderReranker;
pub use ollama::OllamaReranker;

use crate::config::RerankerConfig;
use crate::retrieval::reranker::{RerankError, RerankerProvider, RerankerSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Supported reranker backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RerankerKind {
    CrossEncoder,
    Ollama,
}

impl RerankerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerankerKind::CrossEncoder => "cross-encoder",
            RerankerKind::Ollama => "ollama",
        }
    }
}

impl FromStr for RerankerKind {
    type Err = RerankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cross-encoder" | "cross_encoder" | "crossencoder" => Ok(RerankerKind::CrossEncoder),
            "ollama" => Ok(RerankerKind::Ollama),
            other => Err(RerankError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for RerankerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a provider from reranker settings; may block on model loading
pub type RerankerConstructor =
    fn(&RerankerConfig) -> Result<Arc<dyn RerankerProvider>, RerankError>;

fn build_cross_encoder(config: &RerankerConfig) -> Result<Arc<dyn RerankerProvider>, RerankError> {
    let model = if config.model.is_empty() {
        cross_encoder::DEFAULT_MODEL
    } else {
        config.model.as_str()
    };
    Ok(Arc::new(CrossEncoderReranker::new(model)?))
}

fn build_ollama(config: &RerankerConfig) -> Result<Arc<dyn RerankerProvider>, RerankError> {
    Ok(Arc::new(OllamaReranker::new(
        config.model.clone(),
        config.base_url.as_deref(),
        config.timeout(),
        config.max_concurrent,
    )?))
}

/// Maps provider kinds to constructors and caches what it builds
///
/// Providers are keyed by `kind:model`, so repeated queries reuse a loaded
/// model. `clear()` drops the cache.
pub struct RerankerRegistry {
    config: RerankerConfig,
    constructors: HashMap<RerankerKind, RerankerConstructor>,
    cache: Mutex<HashMap<String, Arc<dyn RerankerProvider>>>,
}

impl RerankerRegistry {
    /// Registry with the built-in providers registered
    pub fn new(config: RerankerConfig) -> Self {
        let mut registry = Self::empty(config);
        registry.register(RerankerKind::CrossEncoder, build_cross_encoder);
        registry.register(RerankerKind::Ollama, build_ollama);
        registry
    }

    /// Registry with no constructors
    pub fn empty(config: RerankerConfig) -> Self {
        Self {
            config,
            constructors: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the constructor for `kind`
    pub fn register(&mut self, kind: RerankerKind, constructor: RerankerConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn config(&self) -> &RerankerConfig {
        &self.config
    }

    /// Get the configured provider, building it on first use
    pub async fn get(&self) -> Result<Arc<dyn RerankerProvider>, RerankError> {
        let kind: RerankerKind = self.config.provider.parse()?;
        let key = format!("{}:{}", kind, self.config.model);

        // Held across construction so concurrent queries load a model once
        let mut cache = self.cache.lock().await;
        if let Some(provider) = cache.get(&key) {
            return Ok(provider.clone());
        }

        let constructor = *self
            .constructors
            .get(&kind)
            .ok_or_else(|| RerankError::UnknownProvider(kind.to_string()))?;

        let config = self.config.clone();
        let provider = tokio::task::spawn_blocking(move || constructor(&config))
            .await
            .map_err(|e| RerankError::InitializationError(e.to_string()))??;

        tracing::info!("Loaded reranker {} ({})", provider.provider_name(), key);
        cache.insert(key, provider.clone());

        Ok(provider)
    }

    /// Drop all cached providers
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl RerankerSource for RerankerRegistry {
    async fn acquire(&self) -> Result<Arc<dyn RerankerProvider>, RerankError> {
        self.get().await
    }
}
