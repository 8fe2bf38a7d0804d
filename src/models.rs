//! Core data models used throughout knowledge-cache.
//!
//! These types represent remote files, index chunks, and query results that
//! flow between the remote source, the knowledge builder, and the session.

use serde::{Deserialize, Serialize};

/// One leaf file as reported by a remote source at listing time.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    /// Stable identifier, unique within the remote source.
    pub id: String,
    pub name: String,
    /// Opaque content-version token.
    pub etag: Option<String>,
    pub size: Option<u64>,
    pub last_modified_date_time: Option<String>,
    /// Short-lived pre-authenticated download reference. Never persisted.
    pub download_url: Option<String>,
}

impl FileDescriptor {
    /// File extension, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

pub(crate) fn file_extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// The persisted projection of a [`FileDescriptor`], without the download URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "lastModifiedDateTime")]
    pub last_modified_date_time: Option<String>,
}

impl From<&FileDescriptor> for ManifestEntry {
    fn from(f: &FileDescriptor) -> Self {
        Self {
            id: f.id.clone(),
            name: f.name.clone(),
            etag: f.etag.clone(),
            size: f.size,
            last_modified_date_time: f.last_modified_date_time.clone(),
        }
    }
}

/// A chunk of the concatenated knowledge-base text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A ranked passage returned from a knowledge-base query.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub chunk_index: i64,
    pub score: f64,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Report.PDF").as_deref(), Some("pdf"));
        assert_eq!(file_extension("archive.tar.zip").as_deref(), Some("zip"));
    }

    #[test]
    fn extension_absent() {
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn manifest_entry_drops_download_url() {
        let f = FileDescriptor {
            id: "A".to_string(),
            name: "a.docx".to_string(),
            etag: Some("v1".to_string()),
            size: Some(10),
            last_modified_date_time: Some("2024-01-01T00:00:00Z".to_string()),
            download_url: Some("https://example.invalid/tmp?token=abc".to_string()),
        };
        let entry = ManifestEntry::from(&f);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("token"));
        assert!(json.contains("lastModifiedDateTime"));
    }
}
