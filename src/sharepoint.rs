//! SharePoint / OneDrive remote source over Microsoft Graph.
//!
//! Resolves a sharing link to its drive item, then enumerates every leaf
//! file beneath it. Folders are expanded from an explicit worklist rather
//! than by recursion, and every children listing follows `@odata.nextLink`
//! to the last page. Any failure aborts the listing: a partial listing is
//! never returned.
//!
//! # Environment Variables
//!
//! App-only (client credentials) access:
//! - `TENANT_ID`: required
//! - `CLIENT_ID`: required
//! - `CLIENT_SECRET`: required
//!
//! A bearer token is acquired once per listing; expiry is not tracked.
//!
//! # Content Versions
//!
//! A file's etag is the Graph `eTag`, else its `cTag`, else a token built
//! from size and last-modified time. The pre-authenticated download URL is
//! never used as a version because it changes on every request.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

use crate::config::SharePointConfig;
use crate::error::{CacheError, Result};
use crate::models::FileDescriptor;
use crate::traits::RemoteSource;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Client credentials loaded from the environment.
pub struct GraphCredentials {
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl GraphCredentials {
    pub fn from_env() -> Result<Self> {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let (tenant_id, client_id, client_secret) =
            (read("TENANT_ID"), read("CLIENT_ID"), read("CLIENT_SECRET"));

        let missing: Vec<&str> = [
            ("TENANT_ID", tenant_id.is_none()),
            ("CLIENT_ID", client_id.is_none()),
            ("CLIENT_SECRET", client_secret.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(k, _)| *k)
        .collect();

        match (tenant_id, client_id, client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Ok(Self {
                tenant_id,
                client_id,
                client_secret,
            }),
            _ => Err(CacheError::Configuration(format!(
                "SharePoint credentials not set: {}",
                missing.join(", ")
            ))),
        }
    }
}

// ============ Graph payloads ============

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "eTag", default)]
    pub e_tag: Option<String>,
    #[serde(rename = "cTag", default)]
    pub c_tag: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "lastModifiedDateTime", default)]
    pub last_modified: Option<String>,
    #[serde(rename = "@microsoft.graph.downloadUrl", default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub file: Option<serde_json::Value>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
    #[serde(rename = "parentReference", default)]
    pub parent_reference: Option<ItemReference>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ItemReference {
    #[serde(rename = "driveId", default)]
    pub drive_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl DriveItem {
    fn drive_id(&self) -> Option<&str> {
        self.parent_reference
            .as_ref()
            .and_then(|p| p.drive_id.as_deref())
            .filter(|d| !d.is_empty())
    }

    fn content_version(&self) -> Option<String> {
        if let Some(tag) = self.e_tag.as_ref().or(self.c_tag.as_ref()) {
            return Some(tag.clone());
        }
        match (self.size, self.last_modified.as_deref()) {
            (None, None) => None,
            (size, modified) => Some(format!(
                "size:{}|modified:{}",
                size.map(|s| s.to_string()).unwrap_or_default(),
                modified.unwrap_or_default()
            )),
        }
    }

    fn to_descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            etag: self.content_version(),
            size: self.size,
            last_modified_date_time: self.last_modified.clone(),
            download_url: self.download_url.clone(),
        }
    }
}

/// Graph `shares` id for a sharing URL: `u!` + unpadded base64url.
pub fn encode_share_link(link: &str) -> String {
    format!("u!{}", URL_SAFE_NO_PAD.encode(link.trim().as_bytes()))
}

// ============ Traversal ============

/// Something that can list the direct children of a folder item.
#[async_trait]
pub(crate) trait FolderLister: Send + Sync {
    async fn children(&self, folder: &DriveItem, inherited_drive: Option<&str>)
        -> Result<Vec<DriveItem>>;
}

/// Fetches one page of a children listing by URL.
#[async_trait]
pub(crate) trait PageFetcher: Send + Sync {
    async fn page(&self, url: &str) -> Result<ChildrenPage>;
}

/// Follow `@odata.nextLink` from `first_url` until a page has none.
pub(crate) async fn list_all_pages(
    first_url: String,
    fetcher: &dyn PageFetcher,
) -> Result<Vec<DriveItem>> {
    let mut url = first_url;
    let mut items = Vec::new();
    loop {
        let page = fetcher.page(&url).await?;
        items.extend(page.value);
        match page.next_link {
            Some(next) => url = next,
            None => break,
        }
    }
    Ok(items)
}

/// Enumerate leaf files under `root` in depth-first pre-order.
///
/// Items are processed from a stack; children are pushed in reverse so the
/// output matches the order a recursive walk would produce. Items that are
/// neither files nor folders (notebooks, remote shortcuts) are skipped.
pub(crate) async fn collect_files(
    root: DriveItem,
    lister: &dyn FolderLister,
) -> Result<Vec<FileDescriptor>> {
    let root_drive = root.drive_id().map(str::to_string);
    let mut pending: Vec<(DriveItem, Option<String>)> = vec![(root, root_drive)];
    let mut files = Vec::new();
    let mut folders_seen = 0usize;

    while let Some((item, drive)) = pending.pop() {
        if item.file.is_some() {
            files.push(item.to_descriptor());
        } else if item.folder.is_some() {
            folders_seen += 1;
            let drive = item.drive_id().map(str::to_string).or(drive);
            let children = lister.children(&item, drive.as_deref()).await?;
            tracing::debug!(folder = %item.name, children = children.len(), "expanded folder");
            for child in children.into_iter().rev() {
                pending.push((child, drive.clone()));
            }
        } else {
            tracing::debug!(item = %item.name, "skipping item that is neither file nor folder");
        }
    }

    tracing::debug!(files = files.len(), folders = folders_seen, "traversal complete");
    Ok(files)
}

// ============ Client ============

/// Microsoft Graph implementation of [`RemoteSource`].
pub struct SharePointClient {
    config: SharePointConfig,
    client: reqwest::Client,
}

impl SharePointClient {
    pub fn new(config: &SharePointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), path)
    }

    async fn acquire_token(&self, creds: &GraphCredentials) -> Result<String> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.login_base.trim_end_matches('/'),
            creds.tenant_id
        );
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| CacheError::Transport(format!("token request failed: {}", e)))?;
        let token: TokenResponse = check_status(resp, "token request").await?.json().await?;
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        what: &str,
    ) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CacheError::Transport(format!("{} failed: {}", what, e)))?;
        Ok(check_status(resp, what).await?.json().await?)
    }

    async fn resolve_share(&self, link: &str, token: &str) -> Result<DriveItem> {
        let url = self.graph_url(&format!("shares/{}/driveItem", encode_share_link(link)));
        self.get_json(&url, token, "share link resolution").await
    }

    async fn lookup_drive_id(&self, item_id: &str, token: &str) -> Result<String> {
        let url = self.graph_url(&format!("drive/items/{}", item_id));
        let item: DriveItem = self.get_json(&url, token, "drive lookup").await?;
        item.drive_id().map(str::to_string).ok_or_else(|| {
            CacheError::Transport(format!("no drive id for item {}", item_id))
        })
    }
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(CacheError::Transport(format!(
        "{} failed (HTTP {}): {}",
        what,
        status,
        body.chars().take(500).collect::<String>()
    )))
}

/// Binds a client to one bearer token for the duration of a traversal.
struct TokenLister<'a> {
    client: &'a SharePointClient,
    token: String,
}

#[async_trait]
impl<'a> FolderLister for TokenLister<'a> {
    async fn children(
        &self,
        folder: &DriveItem,
        inherited_drive: Option<&str>,
    ) -> Result<Vec<DriveItem>> {
        let drive_id = match inherited_drive {
            Some(d) => d.to_string(),
            None => self.client.lookup_drive_id(&folder.id, &self.token).await?,
        };

        let url = self
            .client
            .graph_url(&format!("drives/{}/items/{}/children", drive_id, folder.id));
        list_all_pages(url, self).await
    }
}

#[async_trait]
impl<'a> PageFetcher for TokenLister<'a> {
    async fn page(&self, url: &str) -> Result<ChildrenPage> {
        self.client.get_json(url, &self.token, "folder listing").await
    }
}

#[async_trait]
impl RemoteSource for SharePointClient {
    fn name(&self) -> &str {
        "sharepoint"
    }

    async fn list_files(&self, link: &str) -> Result<Vec<FileDescriptor>> {
        let creds = GraphCredentials::from_env()?;
        let token = self.acquire_token(&creds).await?;
        let root = self.resolve_share(link, &token).await?;
        tracing::debug!(root = %root.name, "resolved sharing link");
        let lister = TokenLister {
            client: self,
            token,
        };
        collect_files(root, &lister).await
    }

    async fn download(&self, file: &FileDescriptor) -> Result<Vec<u8>> {
        let url = file.download_url.as_deref().ok_or_else(|| {
            CacheError::Transport(format!("no download reference for {}", file.name))
        })?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::Transport(format!("download of {} failed: {}", file.name, e)))?;
        let resp = check_status(resp, &format!("download of {}", file.name)).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}
