//! Sync orchestration: session state, autosync, and cache creation.
//!
//! # State Machine
//!
//! ```text
//! IDLE ──activate──▶ ACTIVE ──(sharepoint ∧ autosync ∧ link)──▶ SYNCING
//!                      ▲                                           │
//!                      ├────────── unchanged / rebuilt ────────────┤
//!                      └────────── failure (nothing touched) ──────┘
//! ```
//!
//! # Rebuild Protocol
//!
//! A changed remote goes through list → manifest → fetch → build →
//! persist artifact → write config → swap the session's index. The config
//! (and its manifest) is only written after the artifact is on disk, so a
//! crash in between leaves the old manifest in place and the next check
//! rebuilds again. Any error before the swap leaves the session as it was.
//!
//! Every step is awaited in order; there is no background sync.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::LocalSourceConfig;
use crate::error::{CacheError, Result};
use crate::fetch::fetch_and_extract_text;
use crate::knowledge::{IndexArtifact, KnowledgeIndex};
use crate::local::read_local;
use crate::manifest::{build_manifest, manifests_equal, Manifest};
use crate::models::Passage;
use crate::store::{CacheConfig, CacheStore};
use crate::traits::{KnowledgeBuilder, RemoteSource};

/// The cache currently answering questions.
#[derive(Debug)]
pub struct ActiveCache {
    pub name: String,
    pub index: KnowledgeIndex,
}

/// Operator session. Holds at most one active cache.
#[derive(Debug, Default)]
pub struct Session {
    active: Option<ActiveCache>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ActiveCache> {
        self.active.as_ref()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    fn replace(&mut self, name: &str, artifact: IndexArtifact) {
        self.active = Some(ActiveCache {
            name: name.to_string(),
            index: KnowledgeIndex::from_artifact(artifact),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoActiveCache,
    NoConfig,
    NotSharePoint,
    AutosyncOff,
    NoLink,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NoActiveCache => "no active cache",
            SkipReason::NoConfig => "cache has no config",
            SkipReason::NotSharePoint => "not a sharepoint cache",
            SkipReason::AutosyncOff => "autosync is off",
            SkipReason::NoLink => "no sharing link",
        };
        f.write_str(s)
    }
}

/// Result of one remote check.
#[derive(Debug)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Unchanged,
    Rebuilt { files: usize },
    /// The check failed after the cache was loaded; the loaded index stays active.
    Failed(CacheError),
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Skipped(reason) => write!(f, "sync skipped ({})", reason),
            SyncOutcome::Unchanged => write!(f, "remote unchanged"),
            SyncOutcome::Rebuilt { files } => write!(f, "rebuilt from {} files", files),
            SyncOutcome::Failed(err) => write!(f, "sync failed: {}", err),
        }
    }
}

/// Summary of a cache creation.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub cache: String,
    pub files: usize,
    pub chunks: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache '{}' built: {} files, {} chunks",
            self.cache, self.files, self.chunks
        )
    }
}

pub struct Orchestrator {
    store: CacheStore,
    remote: Arc<dyn RemoteSource>,
    builder: Arc<dyn KnowledgeBuilder>,
    local: LocalSourceConfig,
}

impl Orchestrator {
    pub fn new(
        store: CacheStore,
        remote: Arc<dyn RemoteSource>,
        builder: Arc<dyn KnowledgeBuilder>,
    ) -> Self {
        Self {
            store,
            remote,
            builder,
            local: LocalSourceConfig::default(),
        }
    }

    pub fn with_local_config(mut self, local: LocalSourceConfig) -> Self {
        self.local = local;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Load a cache's artifact into the session, then run autosync.
    ///
    /// Fails without touching the session if the artifact is missing or
    /// unreadable. Once loaded, a failed sync is reported as
    /// [`SyncOutcome::Failed`] and the freshly loaded index stays active.
    pub async fn activate(&self, session: &mut Session, name: &str) -> Result<SyncOutcome> {
        let dir = self.store.cache_dir(name)?;
        let artifact = self
            .builder
            .load(&dir)?
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        tracing::info!(cache = name, chunks = artifact.chunks.len(), "cache loaded");
        session.replace(name, artifact);

        match self.maybe_autosync(session).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(cache = name, error = %e, "autosync failed, keeping loaded index");
                Ok(SyncOutcome::Failed(e))
            }
        }
    }

    /// Check the active cache against its remote if autosync is enabled.
    pub async fn maybe_autosync(&self, session: &mut Session) -> Result<SyncOutcome> {
        self.check_remote(session, true).await
    }

    /// Check the active sharepoint cache regardless of its autosync flag.
    pub async fn resync(&self, session: &mut Session) -> Result<SyncOutcome> {
        self.check_remote(session, false).await
    }

    async fn check_remote(&self, session: &mut Session, respect_autosync: bool) -> Result<SyncOutcome> {
        let Some(name) = session.active_name().map(str::to_string) else {
            return Ok(SyncOutcome::Skipped(SkipReason::NoActiveCache));
        };
        let Some(config) = self.store.read_config(&name) else {
            return Ok(SyncOutcome::Skipped(SkipReason::NoConfig));
        };
        if !config.is_sharepoint() {
            return Ok(SyncOutcome::Skipped(SkipReason::NotSharePoint));
        }
        if respect_autosync && !config.autosync {
            return Ok(SyncOutcome::Skipped(SkipReason::AutosyncOff));
        }
        let Some(link) = config.share_link().map(str::to_string) else {
            return Ok(SyncOutcome::Skipped(SkipReason::NoLink));
        };

        tracing::info!(cache = %name, source = self.remote.name(), "checking remote for changes");
        let files = self.remote.list_files(&link).await?;
        let current = build_manifest(&files);
        let anomaly = report_anomalies(&name, &current);

        if !anomaly && manifests_equal(&config.manifest, &current) {
            tracing::info!(cache = %name, files = current.count, "remote unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        tracing::info!(
            cache = %name,
            previous = config.manifest.count,
            current = current.count,
            "remote changed, rebuilding"
        );
        let text = fetch_and_extract_text(self.remote.as_ref(), &files).await?;
        let artifact = self.builder.build(&text).await?;

        let mut updated = config;
        updated.manifest = current;
        self.commit(&name, &artifact, &updated)?;
        session.replace(&name, artifact);

        Ok(SyncOutcome::Rebuilt { files: files.len() })
    }

    /// Build a cache from a local file or directory.
    pub async fn create_from_local(&self, name: &str, path: &Path) -> Result<SyncReport> {
        self.store.cache_dir(name)?;
        let local = read_local(path, &self.local)?;
        if local.text.trim().is_empty() {
            return Err(CacheError::Extraction(format!(
                "no text extracted from {}",
                path.display()
            )));
        }

        let artifact = self.builder.build(&local.text).await?;
        let report = SyncReport {
            cache: name.to_string(),
            files: local.files,
            chunks: artifact.chunks.len(),
        };
        self.commit(name, &artifact, &CacheConfig::local(local.source))?;
        tracing::info!(cache = name, files = report.files, "local cache created");
        Ok(report)
    }

    /// Build a cache from a SharePoint sharing link and record its manifest.
    pub async fn create_from_sharepoint(
        &self,
        name: &str,
        link: &str,
        autosync: bool,
    ) -> Result<SyncReport> {
        self.store.cache_dir(name)?;
        let link = link.trim();
        if link.is_empty() {
            return Err(CacheError::Configuration("sharing link is empty".to_string()));
        }

        let files = self.remote.list_files(link).await?;
        let manifest = build_manifest(&files);
        report_anomalies(name, &manifest);

        let text = fetch_and_extract_text(self.remote.as_ref(), &files).await?;
        if text.trim().is_empty() {
            return Err(CacheError::Extraction(format!(
                "no text extracted from {} remote files",
                files.len()
            )));
        }

        let artifact = self.builder.build(&text).await?;
        let report = SyncReport {
            cache: name.to_string(),
            files: files.len(),
            chunks: artifact.chunks.len(),
        };
        self.commit(name, &artifact, &CacheConfig::sharepoint(link, autosync, manifest))?;
        tracing::info!(cache = name, files = report.files, autosync, "sharepoint cache created");
        Ok(report)
    }

    /// Toggle autosync on a sharepoint cache.
    pub fn set_autosync(&self, name: &str, enabled: bool) -> Result<()> {
        let mut config = self
            .store
            .read_config(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        if !config.is_sharepoint() {
            return Err(CacheError::Configuration(format!(
                "autosync applies to sharepoint caches only; '{}' is not one",
                name
            )));
        }
        config.autosync = enabled;
        self.store.write_config(name, &config)?;
        tracing::info!(cache = name, enabled, "autosync updated");
        Ok(())
    }

    /// Top passages from the active cache.
    pub async fn ask(&self, session: &Session, question: &str, limit: usize) -> Result<Vec<Passage>> {
        let active = session
            .active()
            .ok_or_else(|| CacheError::NotFound("no active cache".to_string()))?;
        let query_vector = if active.index.artifact().has_vectors() {
            self.builder.embed_query(question).await?
        } else {
            None
        };
        Ok(active.index.search(question, query_vector.as_deref(), limit))
    }

    /// Artifact first, config second.
    fn commit(&self, name: &str, artifact: &IndexArtifact, config: &CacheConfig) -> Result<()> {
        let dir = self.store.cache_dir(name)?;
        std::fs::create_dir_all(&dir)?;
        self.builder.persist(artifact, &dir)?;
        self.store.write_config(name, config)
    }
}

/// Log duplicate ids. Returns true when the listing is anomalous.
fn report_anomalies(name: &str, manifest: &Manifest) -> bool {
    let dups = manifest.duplicate_ids();
    if !dups.is_empty() {
        tracing::warn!(cache = name, ids = ?dups, "duplicate file ids in remote listing");
    }
    !dups.is_empty() || manifest.has_count_divergence()
}
