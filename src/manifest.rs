//! Manifest construction and change detection.
//!
//! A [`Manifest`] is the canonical snapshot of a remote folder: the reduced
//! file list in traversal order, an `id → etag` map used as the identity,
//! and the number of files seen. Two manifests are equal when both the map
//! and the count match, so a listing with duplicate ids never compares equal
//! to a clean one even if the maps collapse to the same content.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{FileDescriptor, ManifestEntry};

/// Snapshot of a remote source's file identities and content versions.
///
/// Serialized as `{"files": [...], "map": {...}, "count": n}`. Every key is
/// optional on read, so `{}` is the empty manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub map: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub count: usize,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.count == 0
    }

    /// Ids that appear more than once in `files`, sorted.
    pub fn duplicate_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut dups = BTreeSet::new();
        for entry in &self.files {
            if !seen.insert(entry.id.as_str()) {
                dups.insert(entry.id.clone());
            }
        }
        dups.into_iter().collect()
    }

    /// True when `count` and the map size disagree.
    pub fn has_count_divergence(&self) -> bool {
        self.count != self.map.len()
    }
}

/// Build a manifest from a remote listing.
///
/// Later files overwrite earlier ones in `map` when ids repeat; `count` is
/// always the input length.
pub fn build_manifest(files: &[FileDescriptor]) -> Manifest {
    let mut map = BTreeMap::new();
    for f in files {
        map.insert(f.id.clone(), f.etag.clone());
    }

    Manifest {
        files: files.iter().map(ManifestEntry::from).collect(),
        map,
        count: files.len(),
    }
}

/// Equality under the sync relation: same `id → etag` map and same count.
pub fn manifests_equal(a: &Manifest, b: &Manifest) -> bool {
    a.map == b.map && a.count == b.count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, etag: &str) -> FileDescriptor {
        FileDescriptor {
            id: id.to_string(),
            name: format!("{}.docx", id.to_lowercase()),
            etag: Some(etag.to_string()),
            size: Some(1024),
            last_modified_date_time: Some("2024-05-01T10:00:00Z".to_string()),
            download_url: Some(format!("https://dl.example.invalid/{}", id)),
        }
    }

    #[test]
    fn reflexive_for_unique_ids() {
        let files = vec![file("A", "v1"), file("B", "v1"), file("C", "v3")];
        let m = build_manifest(&files);
        assert!(manifests_equal(&m, &m));
        assert!(manifests_equal(&m, &build_manifest(&files)));
    }

    #[test]
    fn single_etag_change_is_detected() {
        let before = build_manifest(&[file("A", "v1"), file("B", "v1")]);
        let after = build_manifest(&[file("A", "v2"), file("B", "v1")]);
        assert!(!manifests_equal(&before, &after));
    }

    #[test]
    fn added_or_removed_file_is_detected() {
        let two = build_manifest(&[file("A", "v1"), file("B", "v1")]);
        let three = build_manifest(&[file("A", "v1"), file("B", "v1"), file("C", "v1")]);
        let one = build_manifest(&[file("A", "v1")]);
        assert!(!manifests_equal(&two, &three));
        assert!(!manifests_equal(&two, &one));
    }

    #[test]
    fn order_does_not_matter() {
        let a = build_manifest(&[file("A", "v1"), file("B", "v2"), file("C", "v3")]);
        let b = build_manifest(&[file("C", "v3"), file("A", "v1"), file("B", "v2")]);
        assert!(manifests_equal(&a, &b));
        assert_ne!(a.files, b.files);
    }

    #[test]
    fn empty_prior_manifest_forces_sync() {
        let prior = Manifest::default();
        let current = build_manifest(&[file("A", "v1")]);
        assert!(prior.is_empty());
        assert!(!manifests_equal(&prior, &current));
        assert!(manifests_equal(&prior, &build_manifest(&[])));
    }

    #[test]
    fn duplicate_ids_last_write_wins_and_count_diverges() {
        let m = build_manifest(&[file("A", "v1"), file("B", "v1"), file("A", "v2")]);
        assert_eq!(m.count, 3);
        assert_eq!(m.map.len(), 2);
        assert_eq!(m.map["A"].as_deref(), Some("v2"));
        assert_eq!(m.duplicate_ids(), vec!["A".to_string()]);
        assert!(m.has_count_divergence());

        let clean = build_manifest(&[file("B", "v1"), file("A", "v2")]);
        assert_eq!(clean.map, m.map);
        assert!(!manifests_equal(&clean, &m));
    }

    #[test]
    fn missing_etag_is_part_of_identity() {
        let mut no_tag = file("A", "v1");
        no_tag.etag = None;
        let a = build_manifest(&[no_tag.clone()]);
        let b = build_manifest(&[file("A", "v1")]);
        assert!(!manifests_equal(&a, &b));
        assert!(manifests_equal(&a, &build_manifest(&[no_tag])));
    }

    #[test]
    fn empty_json_object_is_empty_manifest() {
        let m: Manifest = serde_json::from_str("{}").unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn persisted_shape_round_trips_through_json() {
        let m = build_manifest(&[file("A", "v2"), file("B", "v1")]);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["map"], serde_json::json!({"A": "v2", "B": "v1"}));
        assert_eq!(json["count"], 2);
        assert!(json["files"][0].get("downloadUrl").is_none());
        let back: Manifest = serde_json::from_value(json).unwrap();
        assert!(manifests_equal(&m, &back));
    }
}
