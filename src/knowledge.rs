//! Knowledge-base artifacts and the queryable index built from them.
//!
//! An [`IndexArtifact`] is everything needed to answer queries without the
//! source text: the chunks, their hashes, and (when embeddings are enabled)
//! one vector per chunk. It is persisted as `index.json` in the cache
//! directory, written through a temp file and rename so a reader sees
//! either the old artifact or the new one.
//!
//! [`KnowledgeIndex`] wraps an artifact with precomputed term statistics and
//! ranks chunks either by cosine similarity (query vector + chunk vectors)
//! or by TF-IDF keyword overlap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{CacheError, Result};
use crate::models::{Chunk, Passage};
use crate::store::write_atomic;
use crate::traits::KnowledgeBuilder;

pub const INDEX_FILE: &str = "index.json";
/// Artifact layout version written by this build.
pub const ARTIFACT_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub id: String,
    pub index: i64,
    pub text: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub format: u32,
    pub model: String,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    /// Length in bytes of the text the index was built from.
    pub source_bytes: usize,
    pub chunks: Vec<IndexedChunk>,
}

impl IndexArtifact {
    /// Assemble an artifact; `vectors`, when present, pairs with `chunks` by position.
    pub fn new(
        chunks: Vec<Chunk>,
        vectors: Option<Vec<Vec<f32>>>,
        model: &str,
        dims: usize,
        source_bytes: usize,
    ) -> Self {
        let mut vectors = vectors.map(|v| v.into_iter());
        let chunks = chunks
            .into_iter()
            .map(|c| IndexedChunk {
                id: c.id,
                index: c.chunk_index,
                text: c.text,
                hash: c.hash,
                vector: vectors.as_mut().and_then(|it| it.next()),
            })
            .collect();

        Self {
            format: ARTIFACT_FORMAT,
            model: model.to_string(),
            dims,
            built_at: Utc::now(),
            source_bytes,
            chunks,
        }
    }

    pub fn has_vectors(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(|c| c.vector.is_some())
    }
}

pub fn write_artifact(cache_dir: &Path, artifact: &IndexArtifact) -> Result<()> {
    std::fs::create_dir_all(cache_dir)?;
    let bytes = serde_json::to_vec(artifact)?;
    write_atomic(&cache_dir.join(INDEX_FILE), &bytes)
}

pub fn read_artifact(cache_dir: &Path) -> Result<Option<IndexArtifact>> {
    let bytes = match std::fs::read(cache_dir.join(INDEX_FILE)) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let artifact: IndexArtifact = serde_json::from_slice(&bytes)?;
    if artifact.format > ARTIFACT_FORMAT {
        return Err(CacheError::UnsupportedFormat(format!(
            "index artifact format {} is newer than supported {}",
            artifact.format, ARTIFACT_FORMAT
        )));
    }
    Ok(Some(artifact))
}

/// A queryable index reconstructed from an [`IndexArtifact`].
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    artifact: IndexArtifact,
    term_counts: Vec<HashMap<String, usize>>,
    doc_freq: HashMap<String, usize>,
}

impl KnowledgeIndex {
    pub fn from_artifact(artifact: IndexArtifact) -> Self {
        let term_counts: Vec<HashMap<String, usize>> = artifact
            .chunks
            .iter()
            .map(|c| {
                let mut counts = HashMap::new();
                for term in tokenize(&c.text) {
                    *counts.entry(term).or_insert(0) += 1;
                }
                counts
            })
            .collect();

        let mut doc_freq = HashMap::new();
        for counts in &term_counts {
            for term in counts.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        Self {
            artifact,
            term_counts,
            doc_freq,
        }
    }

    pub fn artifact(&self) -> &IndexArtifact {
        &self.artifact
    }

    pub fn len(&self) -> usize {
        self.artifact.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifact.chunks.is_empty()
    }

    /// Rank chunks for a question.
    ///
    /// Uses cosine similarity when a query vector is given and every chunk
    /// has a vector of the same length; keyword scoring otherwise. Chunks
    /// scoring zero or below are dropped.
    pub fn search(&self, question: &str, query_vector: Option<&[f32]>, limit: usize) -> Vec<Passage> {
        let semantic = query_vector.filter(|q| {
            self.artifact.has_vectors()
                && self
                    .artifact
                    .chunks
                    .iter()
                    .all(|c| c.vector.as_ref().map(|v| v.len()) == Some(q.len()))
        });

        let scores: Vec<f64> = match semantic {
            Some(q) => self
                .artifact
                .chunks
                .iter()
                .map(|c| {
                    c.vector
                        .as_deref()
                        .map(|v| cosine_similarity(q, v) as f64)
                        .unwrap_or(0.0)
                })
                .collect(),
            None => self.keyword_scores(question),
        };

        let mut passages: Vec<Passage> = self
            .artifact
            .chunks
            .iter()
            .zip(scores)
            .filter(|(_, s)| *s > 0.0)
            .map(|(c, score)| Passage {
                chunk_index: c.index,
                score,
                text: c.text.clone(),
            })
            .collect();

        passages.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        passages.truncate(limit);
        passages
    }

    fn keyword_scores(&self, question: &str) -> Vec<f64> {
        let mut terms = tokenize(question);
        terms.sort();
        terms.dedup();

        let n = self.term_counts.len() as f64;
        self.term_counts
            .iter()
            .map(|counts| {
                terms
                    .iter()
                    .filter_map(|t| {
                        let tf = *counts.get(t)? as f64;
                        let df = *self.doc_freq.get(t).unwrap_or(&1) as f64;
                        Some((1.0 + tf.ln()) * (1.0 + n / df).ln())
                    })
                    .sum()
            })
            .collect()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Default builder: paragraph chunking plus optional embeddings.
pub struct ChunkingBuilder {
    max_tokens: usize,
    embedder: Embedder,
}

impl ChunkingBuilder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            max_tokens: config.chunking.max_tokens,
            embedder: Embedder::from_config(&config.embedding)?,
        })
    }
}

#[async_trait]
impl KnowledgeBuilder for ChunkingBuilder {
    async fn build(&self, text: &str) -> Result<IndexArtifact> {
        let chunks = chunk_text(text, self.max_tokens);
        if chunks.is_empty() {
            return Err(CacheError::Extraction("no text to index".to_string()));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_all(&texts).await?;
        let provider = self.embedder.provider();
        tracing::info!(
            chunks = chunks.len(),
            model = provider.model_name(),
            "knowledge base built"
        );

        Ok(IndexArtifact::new(
            chunks,
            vectors,
            provider.model_name(),
            provider.dims(),
            text.len(),
        ))
    }

    async fn embed_query(&self, question: &str) -> Result<Option<Vec<f32>>> {
        self.embedder.embed_one(question).await
    }
}
