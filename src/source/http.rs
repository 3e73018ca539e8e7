//! Default HTTP implementation of the data-source collaborator.

use crate::source::{FetchPriority, TileDataSource};
use crate::tile::id::TileId;
use crate::{Result, TileError};
use once_cell::sync::Lazy;

/// Shared async HTTP client with a custom User-Agent so that public tile
/// servers don't reject the request. Building the client once avoids TLS and
/// connection pool setup per tile.
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent("tilepipe/0.1.0")
        .timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .expect("failed to build reqwest async client")
});

/// Fetches tiles from a `{z}/{x}/{y}` URL template, rotating `{s}` through
/// subdomains so requests spread across the server's aliases.
pub struct HttpTileSource {
    url_template: String,
    subdomains: Vec<String>,
}

impl HttpTileSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            subdomains: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        }
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    /// Build the URL for `id`.
    pub fn url(&self, id: TileId) -> String {
        let mut url = self
            .url_template
            .replace("{z}", &id.z.to_string())
            .replace("{x}", &id.x.to_string())
            .replace("{y}", &id.y.to_string());
        if url.contains("{s}") {
            let sub = if self.subdomains.is_empty() {
                ""
            } else {
                self.subdomains[((id.x + id.y) as usize) % self.subdomains.len()].as_str()
            };
            url = url.replace("{s}", sub);
        }
        url
    }
}

/// Map a response status to the error taxonomy; `None` means success.
/// 404 is terminal, everything else non-success is worth retrying.
fn status_error(status: reqwest::StatusCode) -> Option<TileError> {
    if status == reqwest::StatusCode::NOT_FOUND {
        Some(TileError::NotFound)
    } else if !status.is_success() {
        Some(TileError::Transient(format!("HTTP {status}")))
    } else {
        None
    }
}

#[async_trait::async_trait]
impl TileDataSource for HttpTileSource {
    async fn fetch(&self, id: TileId, priority: FetchPriority) -> Result<Vec<u8>> {
        // No local store behind a plain URL template; a cache-only attempt
        // reports not-found and the owning source escalates.
        if priority == FetchPriority::CacheOnly {
            return Err(TileError::NotFound);
        }

        let url = self.url(id);
        log::debug!("fetching tile {} from {}", id, url);
        let resp = HTTP_CLIENT.get(&url).send().await?;
        if let Some(err) = status_error(resp.status()) {
            return Err(err);
        }
        let bytes = resp.bytes().await?;
        log::debug!("fetched tile {} ({} bytes)", id, bytes.len());
        Ok(bytes.to_vec())
    }
}
