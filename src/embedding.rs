//! Embedding provider abstraction.
//!
//! - **[`DisabledProvider`]**: no vectors; the index falls back to keyword scoring.
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible `/embeddings` endpoint
//!   with batching, retry, and backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! # Environment Variables
//!
//! - `OPENAI_API_KEY`: required for the `openai` provider
//! - `OPENAI_API_BASE`: optional base URL (default `https://api.openai.com/v1`)

use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{CacheError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// An embedding backend.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`), `"disabled"` when off.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    fn is_enabled(&self) -> bool {
        self.dims() > 0
    }
}

pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    api_base: String,
}

impl OpenAIProvider {
    /// Create a provider from config plus `OPENAI_API_KEY` / `OPENAI_API_BASE`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            CacheError::Configuration("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            CacheError::Configuration("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            CacheError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let api_base = std::env::var("OPENAI_API_BASE")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            model,
            dims,
            api_key,
            api_base,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.api_base.trim_end_matches('/'))
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Configured embedding client: the provider plus its batching and retry policy.
pub struct Embedder {
    openai: Option<OpenAIProvider>,
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl Embedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        match config.provider.as_str() {
            "disabled" => Ok(Self {
                openai: None,
                config: config.clone(),
                client,
            }),
            "openai" => Ok(Self {
                openai: Some(OpenAIProvider::new(config)?),
                config: config.clone(),
                client,
            }),
            other => Err(CacheError::Configuration(format!(
                "Unknown embedding provider: {}",
                other
            ))),
        }
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        match &self.openai {
            Some(p) => p,
            None => &DisabledProvider,
        }
    }

    /// Embed texts in config-sized batches, preserving input order.
    ///
    /// Returns `None` when embeddings are disabled.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(openai) = &self.openai else {
            return Ok(None);
        };
        let batch_size = self.config.batch_size.max(1);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let vectors = self.embed_openai(openai, batch).await?;
            if vectors.len() != batch.len() {
                return Err(CacheError::Transport(format!(
                    "embedding response has {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            out.extend(vectors);
        }
        Ok(Some(out))
    }

    pub async fn embed_one(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let result = self.embed_all(&[text.to_string()]).await?;
        Ok(result.and_then(|v| v.into_iter().next()))
    }

    async fn embed_openai(&self, provider: &OpenAIProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": provider.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(provider.endpoint())
                .bearer_auth(&provider.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = CacheError::Transport(format!(
                        "embeddings API error {}: {}",
                        status,
                        body_text.chars().take(500).collect::<String>()
                    ));
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(attempt, %status, "embeddings request failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "embeddings request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CacheError::Transport("embedding failed after retries".to_string())))
    }
}

/// Extract `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| CacheError::Transport("invalid embeddings response: missing data".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                CacheError::Transport("invalid embeddings response: missing embedding".into())
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
