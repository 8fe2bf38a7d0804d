//! End-to-end sync behaviour through the public orchestrator API.
//!
//! The remote folder and the knowledge builder are in-memory doubles; the
//! cache store is a real directory so the on-disk config and artifact are
//! observed exactly as the CLI would leave them.

use async_trait::async_trait;
use knowledge_cache::config::Config;
use knowledge_cache::error::{CacheError, Result};
use knowledge_cache::knowledge::{ChunkingBuilder, IndexArtifact};
use knowledge_cache::manifest::Manifest;
use knowledge_cache::models::FileDescriptor;
use knowledge_cache::store::{CacheConfig, CacheStore, CONFIG_FILE};
use knowledge_cache::sync::{Orchestrator, Session, SyncOutcome};
use knowledge_cache::traits::{KnowledgeBuilder, RemoteSource};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ─── Remote double ──────────────────────────────────────────────────

#[derive(Default)]
struct MockDrive {
    files: Mutex<Vec<(FileDescriptor, String)>>,
    fail_listing: AtomicBool,
    fail_download: AtomicBool,
    listings: AtomicUsize,
}

impl MockDrive {
    fn put(&self, id: &str, etag: &str, text: &str) {
        self.put_named(id, &format!("{}.txt", id.to_lowercase()), etag, text);
    }

    fn put_named(&self, id: &str, name: &str, etag: &str, text: &str) {
        let mut files = self.files.lock().unwrap();
        let descriptor = FileDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            etag: Some(etag.to_string()),
            size: Some(text.len() as u64),
            last_modified_date_time: Some("2024-05-01T10:00:00Z".to_string()),
            download_url: Some(format!("https://download.example/{}", id)),
        };
        match files.iter_mut().find(|(f, _)| f.id == id) {
            Some(slot) => *slot = (descriptor, text.to_string()),
            None => files.push((descriptor, text.to_string())),
        }
    }
}

#[async_trait]
impl RemoteSource for MockDrive {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_files(&self, _link: &str) -> Result<Vec<FileDescriptor>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("listing failed (HTTP 503)".to_string()));
        }
        Ok(self.files.lock().unwrap().iter().map(|(f, _)| f.clone()).collect())
    }

    async fn download(&self, file: &FileDescriptor) -> Result<Vec<u8>> {
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("download failed (HTTP 500)".to_string()));
        }
        let files = self.files.lock().unwrap();
        files
            .iter()
            .find(|(f, _)| f.id == file.id)
            .map(|(_, text)| text.clone().into_bytes())
            .ok_or_else(|| CacheError::Transport(format!("no such file: {}", file.id)))
    }
}

// ─── Builder double ─────────────────────────────────────────────────

/// Wraps the real builder and records what the store looked like at persist time.
struct RecordingBuilder {
    inner: ChunkingBuilder,
    builds: AtomicUsize,
    persists: AtomicUsize,
    config_at_persist: Mutex<Vec<Option<Manifest>>>,
}

impl RecordingBuilder {
    fn new() -> Self {
        Self {
            inner: ChunkingBuilder::new(&Config::default()).unwrap(),
            builds: AtomicUsize::new(0),
            persists: AtomicUsize::new(0),
            config_at_persist: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl KnowledgeBuilder for RecordingBuilder {
    async fn build(&self, text: &str) -> Result<IndexArtifact> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build(text).await
    }

    fn persist(&self, artifact: &IndexArtifact, cache_dir: &Path) -> Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        let on_disk = std::fs::read(cache_dir.join(CONFIG_FILE))
            .ok()
            .and_then(|b| serde_json::from_slice::<CacheConfig>(&b).ok())
            .map(|c| c.manifest);
        self.config_at_persist.lock().unwrap().push(on_disk);
        self.inner.persist(artifact, cache_dir)
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    _tmp: TempDir,
    store: CacheStore,
    drive: Arc<MockDrive>,
    builder: Arc<RecordingBuilder>,
    orch: Orchestrator,
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let store = CacheStore::new(tmp.path().join("persisted_data"));
    let drive = Arc::new(MockDrive::default());
    let builder = Arc::new(RecordingBuilder::new());
    let orch = Orchestrator::new(store.clone(), drive.clone(), builder.clone());
    Harness {
        _tmp: tmp,
        store,
        drive,
        builder,
        orch,
    }
}

fn stored_map(store: &CacheStore, name: &str) -> BTreeMap<String, Option<String>> {
    store.read_config(name).unwrap().manifest.map
}

fn map_of(pairs: &[(&str, &str)]) -> BTreeMap<String, Option<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Some(v.to_string())))
        .collect()
}

const LINK: &str = "https://contoso.sharepoint.com/:f:/s/hr/policies";

async fn policies(h: &Harness) -> Session {
    h.drive.put("A", "v1", "Vacation policy: employees receive 25 days of paid leave.");
    h.drive.put("B", "v1", "Expense policy: receipts are required for every claim.");
    h.orch.create_from_sharepoint("policies", LINK, true).await.unwrap();
    let mut session = Session::new();
    let outcome = h.orch.activate(&mut session, "policies").await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Unchanged));
    session
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn policies_scenario_ends_with_updated_manifest() {
    let h = harness();
    let mut session = policies(&h).await;
    assert_eq!(stored_map(&h.store, "policies"), map_of(&[("A", "v1"), ("B", "v1")]));

    h.drive.put("A", "v2", "Vacation policy: employees receive 30 days of paid leave.");
    let outcome = h.orch.maybe_autosync(&mut session).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Rebuilt { files: 2 }));

    let config = h.store.read_config("policies").unwrap();
    assert_eq!(config.manifest.map, map_of(&[("A", "v2"), ("B", "v1")]));
    assert_eq!(config.manifest.count, 2);
    assert!(config.autosync);

    let passages = h.orch.ask(&session, "vacation days", 3).await.unwrap();
    assert!(passages[0].text.contains("30 days"));
}

#[tokio::test]
async fn unchanged_remote_touches_nothing() {
    let h = harness();
    let mut session = policies(&h).await;
    let config_path = h.store.cache_dir("policies").unwrap().join(CONFIG_FILE);
    let before = std::fs::read(&config_path).unwrap();
    let builds = h.builder.builds.load(Ordering::SeqCst);
    let persists = h.builder.persists.load(Ordering::SeqCst);

    let outcome = h.orch.maybe_autosync(&mut session).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::Unchanged));
    assert_eq!(h.builder.builds.load(Ordering::SeqCst), builds);
    assert_eq!(h.builder.persists.load(Ordering::SeqCst), persists);
    assert_eq!(std::fs::read(&config_path).unwrap(), before);
}

#[tokio::test]
async fn changed_remote_persists_artifact_before_config() {
    let h = harness();
    let mut session = policies(&h).await;
    h.drive.put("C", "v1", "Travel policy: book economy class.");

    let outcome = h.orch.maybe_autosync(&mut session).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Rebuilt { files: 3 }));

    // one build at creation, one for the change
    assert_eq!(h.builder.builds.load(Ordering::SeqCst), 2);
    let seen = h.builder.config_at_persist.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].is_none(), "creation persisted before any config existed");
    let at_rebuild = seen[1].as_ref().unwrap();
    assert_eq!(at_rebuild.map, map_of(&[("A", "v1"), ("B", "v1")]));

    assert_eq!(
        stored_map(&h.store, "policies"),
        map_of(&[("A", "v1"), ("B", "v1"), ("C", "v1")])
    );
}

#[tokio::test]
async fn listing_failure_keeps_previous_index() {
    let h = harness();
    let mut session = policies(&h).await;
    let before = h.orch.ask(&session, "expense receipts", 5).await.unwrap();

    h.drive.put("B", "v2", "Expense policy: receipts are optional.");
    h.drive.fail_listing.store(true, Ordering::SeqCst);

    let err = h.orch.maybe_autosync(&mut session).await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(session.active_name(), Some("policies"));
    assert_eq!(h.orch.ask(&session, "expense receipts", 5).await.unwrap(), before);
    assert_eq!(stored_map(&h.store, "policies"), map_of(&[("A", "v1"), ("B", "v1")]));
}

#[tokio::test]
async fn download_failure_mid_rebuild_keeps_previous_index() {
    let h = harness();
    let mut session = policies(&h).await;
    let before = h.orch.ask(&session, "vacation", 5).await.unwrap();

    h.drive.put("A", "v2", "Vacation policy changed.");
    h.drive.fail_download.store(true, Ordering::SeqCst);

    assert!(h.orch.maybe_autosync(&mut session).await.is_err());
    assert_eq!(h.orch.ask(&session, "vacation", 5).await.unwrap(), before);
    assert_eq!(stored_map(&h.store, "policies"), map_of(&[("A", "v1"), ("B", "v1")]));
    // nothing reached the builder
    assert_eq!(h.builder.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupt_document_fails_rebuild_and_keeps_manifest() {
    let h = harness();
    let mut session = policies(&h).await;
    let config_path = h.store.cache_dir("policies").unwrap().join(CONFIG_FILE);
    let before_config = std::fs::read(&config_path).unwrap();
    let before = h.orch.ask(&session, "vacation", 5).await.unwrap();

    h.drive.put_named("H", "handbook.pdf", "v1", "not a pdf");

    let err = h.orch.maybe_autosync(&mut session).await.unwrap_err();
    match err {
        CacheError::Extraction(msg) => assert!(msg.contains("handbook.pdf")),
        other => panic!("expected extraction error, got {other:?}"),
    }
    assert_eq!(std::fs::read(&config_path).unwrap(), before_config);
    assert_eq!(h.orch.ask(&session, "vacation", 5).await.unwrap(), before);
    assert_eq!(h.builder.builds.load(Ordering::SeqCst), 1);

    // the next check sees the same change and tries again
    h.drive.put_named("H", "handbook.txt", "v2", "Handbook: badges are required.");
    let outcome = h.orch.maybe_autosync(&mut session).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Rebuilt { files: 3 }));
}

#[tokio::test]
async fn activate_reports_sync_failure_and_stays_loaded() {
    let h = harness();
    policies(&h).await;
    h.drive.fail_listing.store(true, Ordering::SeqCst);

    let mut session = Session::new();
    let outcome = h.orch.activate(&mut session, "policies").await.unwrap();
    match outcome {
        SyncOutcome::Failed(e) => assert!(e.is_transport()),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(session.active_name(), Some("policies"));
}

#[tokio::test]
async fn autosync_toggle_controls_remote_checks() {
    let h = harness();
    policies(&h).await;
    h.orch.set_autosync("policies", false).unwrap();
    let listings = h.drive.listings.load(Ordering::SeqCst);

    let mut session = Session::new();
    let outcome = h.orch.activate(&mut session, "policies").await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Skipped(_)));
    assert_eq!(h.drive.listings.load(Ordering::SeqCst), listings);

    h.drive.put("A", "v3", "Vacation policy: unlimited.");
    let outcome = h.orch.resync(&mut session).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Rebuilt { .. }));
    assert!(!h.store.read_config("policies").unwrap().autosync);
}

#[tokio::test]
async fn local_docx_cache_is_queryable() {
    let h = harness();
    let docs = TempDir::new().unwrap();
    let path = docs.path().join("handbook.docx");
    std::fs::write(&path, docx_with(&["Parking is free for staff.", "Badges are required."])).unwrap();

    let report = h.orch.create_from_local("handbook", &path).await.unwrap();
    assert_eq!(report.files, 1);
    assert_eq!(h.store.list_caches().unwrap(), vec!["handbook".to_string()]);

    let mut session = Session::new();
    h.orch.activate(&mut session, "handbook").await.unwrap();
    let passages = h.orch.ask(&session, "parking", 3).await.unwrap();
    assert_eq!(passages.len(), 1);
    assert!(passages[0].text.contains("Parking is free"));
}

fn docx_with(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );

    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}
