//! Content fetching: remote bytes → concatenated knowledge-base text.

use crate::error::{CacheError, Result};
use crate::extract::{extract_text, is_supported};
use crate::models::FileDescriptor;
use crate::traits::RemoteSource;

/// Download every retrievable file and join the extracted text.
///
/// Each file's text is followed by a blank line, in listing order. Files
/// without a download reference are skipped, and unsupported formats are
/// skipped without being downloaded. A failed download or a supported file
/// that fails extraction aborts the whole fetch.
pub async fn fetch_and_extract_text(
    remote: &dyn RemoteSource,
    files: &[FileDescriptor],
) -> Result<String> {
    let mut all_text = String::new();
    let mut used = 0usize;
    let mut skipped = 0usize;

    for file in files {
        if file.download_url.as_deref().map_or(true, str::is_empty) {
            skipped += 1;
            continue;
        }
        if !is_supported(&file.name) {
            tracing::warn!(file = %file.name, "skipping unsupported file type");
            skipped += 1;
            continue;
        }

        let bytes = remote.download(file).await?;
        let text = extract_text(&bytes, &file.name)
            .map_err(|e| CacheError::Extraction(format!("{}: {}", file.name, e)))?;
        all_text.push_str(&text);
        all_text.push_str("\n\n");
        used += 1;
    }

    tracing::debug!(used, skipped, bytes = all_text.len(), "content fetched");
    Ok(all_text)
}
