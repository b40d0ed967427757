//! Prompt-based reranking through a local Ollama server

use crate::retrieval::reranker::{RerankError, RerankerProvider};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Documents longer than this are cut before prompting
const MAX_DOCUMENT_CHARS: usize = 2000;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

const SCORE_PATTERN: &str = r"(\d+(?:\.\d+)?)";

const RERANK_PROMPT: &str = "You are a relevance scoring system. \
Score how relevant the document is to the query.\n\n\
Query: {query}\n\n\
Document: {document}\n\n\
Instructions:\n\
- Output ONLY a single number from 0 to 10\n\
- 10 = perfectly relevant, directly answers the query\n\
- 5 = somewhat relevant, related topic\n\
- 0 = completely irrelevant\n\
- Do not output any other text, just the number\n\n\
Score:";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

/// Scores each candidate with a 0-10 chat completion
///
/// Works with any chat model Ollama serves. Candidates are scored
/// concurrently, at most `max_concurrent` requests in flight.
pub struct OllamaReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
    semaphore: Arc<Semaphore>,
    score_pattern: Regex,
}

impl OllamaReranker {
    pub fn new(
        model: impl Into<String>,
        base_url: Option<&str>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Result<Self, RerankError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        let score_pattern = Regex::new(SCORE_PATTERN)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            score_pattern,
        })
    }

    async fn score_document(&self, query: &str, document: &str) -> Result<f64, RerankError> {
        let prompt = build_prompt(query, document);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let content = body.message.map(|m| m.content).unwrap_or_default();
        Ok(parse_score(&self.score_pattern, &content))
    }
}

#[async_trait]
impl RerankerProvider for OllamaReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f64)>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let tasks = documents.iter().enumerate().map(|(index, document)| {
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| RerankError::RerankingError(e.to_string()))?;

                // A single failed request scores zero rather than failing the batch
                let score = match self.score_document(query, document).await {
                    Ok(score) => score,
                    Err(e) => {
                        tracing::warn!("Ollama request failed for doc {}: {}", index, e);
                        0.0
                    }
                };
                Ok::<_, RerankError>((index, score))
            }
        });

        let mut scored = futures::future::join_all(tasks)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        tracing::debug!(
            "Ollama reranked {} documents, returning top {}",
            documents.len(),
            scored.len()
        );

        Ok(scored)
    }

    fn provider_name(&self) -> &str {
        "Ollama"
    }

    async fn is_available(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama not available: {}", e);
                false
            }
        }
    }
}

fn build_prompt(query: &str, document: &str) -> String {
    let document = match document.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((end, _)) => &document[..end],
        None => document,
    };

    RERANK_PROMPT
        .replace("{query}", query)
        .replace("{document}", document)
}

/// First number in the model output, clamped to [0, 10]; 0.0 if none
fn parse_score(pattern: &Regex, content: &str) -> f64 {
    pattern
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 10.0))
        .unwrap_or(0.0)
}
