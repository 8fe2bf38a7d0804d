//! Local file and directory sources.
//!
//! A single file is extracted directly. A directory is walked recursively,
//! filtered through the `[local]` include/exclude globs, and extracted in
//! relative-path order so the same tree always yields the same text.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::LocalSourceConfig;
use crate::error::{CacheError, Result};
use crate::extract::{extract_text, is_supported};
use crate::store::LocalSource;

/// Text gathered from a local path plus the origin to record in the config.
#[derive(Debug)]
pub struct LocalText {
    pub text: String,
    pub source: LocalSource,
    pub files: usize,
}

pub fn read_local(path: &Path, config: &LocalSourceConfig) -> Result<LocalText> {
    if !path.exists() {
        return Err(CacheError::NotFound(format!(
            "local source does not exist: {}",
            path.display()
        )));
    }

    let files = if path.is_dir() {
        scan_directory(path, config)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut text = String::new();
    let mut used = 0usize;
    for file in &files {
        let name = display_name(file);
        if !is_supported(&name) {
            tracing::warn!(file = %file.display(), "skipping unsupported file type");
            continue;
        }
        let bytes = std::fs::read(file)?;
        let t = extract_text(&bytes, &name)
            .map_err(|e| CacheError::Extraction(format!("{}: {}", name, e)))?;
        text.push_str(&t);
        text.push_str("\n\n");
        used += 1;
    }
    tracing::debug!(path = %path.display(), used, found = files.len(), "local source read");

    Ok(LocalText {
        text,
        source: LocalSource {
            filename: Some(display_name(path)),
            path: Some(path.display().to_string()),
        },
        files: used,
    })
}

/// Matching files under `root`, sorted by relative path.
fn scan_directory(root: &Path, config: &LocalSourceConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut found: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        found.push((rel_str, path.to_path_buf()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| CacheError::Configuration(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CacheError::Configuration(format!("invalid glob set: {}", e)))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
