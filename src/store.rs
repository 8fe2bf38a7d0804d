//! Durable per-cache storage.
//!
//! Each cache is a directory under the store root:
//!
//! ```text
//! <root>/
//!   policies/
//!     config.json   # CacheConfig
//!     index.json    # index artifact (owned by the knowledge builder)
//! ```
//!
//! Existence of the directory is what makes a cache visible to
//! [`CacheStore::list_caches`]. There is no ledger and no locking; two
//! writers on the same name race and the last rename wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CacheError, Result};
use crate::manifest::Manifest;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    SharePoint,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::File => write!(f, "file"),
            SourceKind::SharePoint => write!(f, "sharepoint"),
        }
    }
}

/// Origin of a locally built cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharePointSource {
    #[serde(default)]
    pub link: Option<String>,
}

/// Persisted configuration record of one cache.
///
/// Missing keys default: no type, `autosync = false`, empty manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SourceKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<LocalSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharepoint: Option<SharePointSource>,
    #[serde(default)]
    pub autosync: bool,
    #[serde(default)]
    pub manifest: Manifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CacheConfig {
    pub fn local(source: LocalSource) -> Self {
        Self {
            kind: Some(SourceKind::File),
            source: Some(source),
            sharepoint: None,
            autosync: false,
            manifest: Manifest::default(),
            updated_at: None,
        }
    }

    pub fn sharepoint(link: &str, autosync: bool, manifest: Manifest) -> Self {
        Self {
            kind: Some(SourceKind::SharePoint),
            source: None,
            sharepoint: Some(SharePointSource {
                link: Some(link.to_string()),
            }),
            autosync,
            manifest,
            updated_at: None,
        }
    }

    pub fn is_sharepoint(&self) -> bool {
        self.kind == Some(SourceKind::SharePoint)
    }

    /// The sharing link, if present and non-blank.
    pub fn share_link(&self) -> Option<&str> {
        self.sharepoint
            .as_ref()
            .and_then(|s| s.link.as_deref())
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// File-backed mapping from cache name to its directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn config_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.cache_dir(name)?.join(CONFIG_FILE))
    }

    /// Read a cache's config. Missing, unreadable, or corrupt records are `None`.
    pub fn read_config(&self, name: &str) -> Option<CacheConfig> {
        let path = self.config_path(name).ok()?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(cache = name, error = %e, "cannot read cache config");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                tracing::warn!(cache = name, error = %e, "corrupt cache config, treating as absent");
                None
            }
        }
    }

    /// Overwrite a cache's config wholesale, creating its directory if needed.
    pub fn write_config(&self, name: &str, config: &CacheConfig) -> Result<()> {
        let dir = self.cache_dir(name)?;
        std::fs::create_dir_all(&dir)?;
        let mut record = config.clone();
        record.updated_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&record)?;
        write_atomic(&dir.join(CONFIG_FILE), &bytes)?;
        tracing::debug!(cache = name, "config written");
        Ok(())
    }

    /// Names of all cache directories under the root, sorted.
    pub fn list_caches(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_missing_config_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        assert!(store.read_config("nope").is_none());
    }

    #[test]
    fn write_then_read() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("data"));
        let cfg = CacheConfig::sharepoint("https://contoso.sharepoint.com/x", true, Manifest::default());
        store.write_config("policies", &cfg).unwrap();

        let back = store.read_config("policies").unwrap();
        assert_eq!(back.kind, Some(SourceKind::SharePoint));
        assert_eq!(back.share_link(), Some("https://contoso.sharepoint.com/x"));
        assert!(back.autosync);
        assert!(back.updated_at.is_some());
        assert!(!tmp.path().join("data/policies/config.json.tmp").exists());
    }

    #[test]
    fn legacy_record_with_missing_keys_parses() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("old")).unwrap();
        std::fs::write(
            tmp.path().join("old/config.json"),
            r#"{"type": "file", "source": {"filename": "handbook.pdf"}, "manifest": {}}"#,
        )
        .unwrap();

        let cfg = store.read_config("old").unwrap();
        assert_eq!(cfg.kind, Some(SourceKind::File));
        assert!(!cfg.autosync);
        assert!(cfg.manifest.is_empty());
        assert_eq!(
            cfg.source.unwrap().filename.as_deref(),
            Some("handbook.pdf")
        );
    }

    #[test]
    fn corrupt_config_degrades_to_absent() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("broken")).unwrap();
        std::fs::write(tmp.path().join("broken/config.json"), "{ not json").unwrap();
        assert!(store.read_config("broken").is_none());
        assert_eq!(store.list_caches().unwrap(), vec!["broken".to_string()]);
    }

    #[test]
    fn list_caches_only_directories_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        store.write_config("zeta", &CacheConfig::default()).unwrap();
        store.write_config("alpha", &CacheConfig::default()).unwrap();
        std::fs::write(tmp.path().join("stray.txt"), "x").unwrap();
        assert_eq!(store.list_caches().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn missing_root_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path().join("absent"));
        assert!(store.list_caches().unwrap().is_empty());
    }

    #[test]
    fn rejects_path_like_names() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        for bad in ["", "..", "a/b", "a\\b", " padded "] {
            assert!(matches!(
                store.write_config(bad, &CacheConfig::default()),
                Err(CacheError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn blank_link_is_treated_as_missing() {
        let cfg = CacheConfig::sharepoint("   ", true, Manifest::default());
        assert_eq!(cfg.share_link(), None);
    }
}
