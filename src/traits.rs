//! Extension traits at the two collaborator boundaries of the sync core.
//!
//! ```text
//! ┌──────────────┐  list/download  ┌──────────────┐  build/persist  ┌──────────────────┐
//! │ RemoteSource │ ──────────────▶ │ Orchestrator │ ──────────────▶ │ KnowledgeBuilder │
//! │ (SharePoint) │                 │   (sync)     │                 │ (chunk + embed)  │
//! └──────────────┘                 └──────────────┘                 └──────────────────┘
//! ```
//!
//! The built-in implementations are [`SharePointClient`](crate::sharepoint::SharePointClient)
//! and [`ChunkingBuilder`](crate::knowledge::ChunkingBuilder). Tests swap in
//! in-memory doubles.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::knowledge::{self, IndexArtifact};
use crate::models::FileDescriptor;

/// A remote folder provider.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Short identifier used in logs (e.g. `"sharepoint"`).
    fn name(&self) -> &str;

    /// Enumerate every leaf file reachable from a sharing link.
    ///
    /// Must either return the complete listing or fail: a partial listing
    /// would look like deletions to the change detector.
    async fn list_files(&self, link: &str) -> Result<Vec<FileDescriptor>>;

    /// Fetch raw bytes through the file's download reference.
    async fn download(&self, file: &FileDescriptor) -> Result<Vec<u8>>;
}

/// Turns text into a persistable, self-sufficient index artifact.
///
/// Every change goes through a full [`build`](KnowledgeBuilder::build);
/// there is no incremental update path.
#[async_trait]
pub trait KnowledgeBuilder: Send + Sync {
    async fn build(&self, text: &str) -> Result<IndexArtifact>;

    /// Write the artifact into the cache directory.
    fn persist(&self, artifact: &IndexArtifact, cache_dir: &Path) -> Result<()> {
        knowledge::write_artifact(cache_dir, artifact)
    }

    /// Read a previously persisted artifact, `None` if there is none.
    fn load(&self, cache_dir: &Path) -> Result<Option<IndexArtifact>> {
        knowledge::read_artifact(cache_dir)
    }

    /// Vector for a question, when the builder produces embeddings.
    async fn embed_query(&self, _question: &str) -> Result<Option<Vec<f32>>> {
        Ok(None)
    }
}
