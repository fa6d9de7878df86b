//!
//! src/catalog.rs  Oct 2026
//!
//! Client for the di.fm public api: single channel/track/artist lookups
//! and the currently playing feed. Every lookup is paced and bounded by
//! a hard timeout, failures are returned to the owning loop which leaves
//! the id pending for its next sweep.
//!

use std::time::Duration;

use reqwest::{Client, header, redirect};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use url::Url;

use crate::config::{CatalogConfig, HttpConfig};
use crate::types::{Entity, EntityKind, NowPlaying};
use crate::CrawlerError;

/// Client building functionality
pub(crate) fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

fn json_client(http: &HttpConfig) -> Result<Client, CrawlerError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| CrawlerError::Http(format!("build client: {e}")))
}

#[derive(Clone, Debug)]
pub struct CatalogClient {
    http: Client,
    base: Url,
    request_timeout: Duration,
    pacing: Duration
}

impl CatalogClient {
    pub fn new(http_config: &HttpConfig, cfg: &CatalogConfig) ->
        Result<Self, CrawlerError> {
        Ok( Self {
            http: json_client(http_config)?,
            base: cfg.api_base.clone(),
            request_timeout: cfg.request_timeout,
            pacing: cfg.pacing
        })
    }

    /// GET {base}/{channels|tracks|artists}/{id}
    pub fn entity_url(&self, kind: EntityKind, id: i64) -> Result<Url, CrawlerError> {
        Ok(self.base.join(&format!("{}/{id}", kind.path()))?)
    }

    /// Paced, time bounded lookup of a single entity
    pub async fn fetch(&self, kind: EntityKind, id: i64) -> Result<Entity, CrawlerError> {
        let url = self.entity_url(kind, id)?;
        sleep(self.pacing).await;

        timeout(self.request_timeout, self.get_entity(kind, url))
            .await
            .map_err(|_| CrawlerError::Timeout(self.request_timeout))?
    }

    async fn get_entity(&self, kind: EntityKind, url: Url) -> Result<Entity, CrawlerError> {
        let check_status = kind.checks_status();
        let entity = match kind {
            EntityKind::Channel => Entity::Channel(self.get_json(url, check_status).await?),
            EntityKind::Track => Entity::Track(self.get_json(url, check_status).await?),
            EntityKind::Artist => Entity::Artist(self.get_json(url, check_status).await?),
        };
        Ok(entity)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, check_status: bool) ->
        Result<T, CrawlerError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            if check_status {
                return Err(CrawlerError::Status {
                    status: status.as_u16(), url: url.to_string()
                });
            }
            debug!(status = %status, url = %url, "catalog.status.unchecked");
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// GET {base}/currently_playing
    /// Entries that fail to decode are dropped, the rest of the snapshot is kept
    pub async fn currently_playing(&self) -> Result<Vec<NowPlaying>, CrawlerError> {
        let url = self.base.join("currently_playing")?;
        let entries: Vec<serde_json::Value> = timeout(
            self.request_timeout, self.get_json(url, true)
        )
        .await
        .map_err(|_| CrawlerError::Timeout(self.request_timeout))??;

        Ok(entries.into_iter().filter_map(|entry| {
            serde_json::from_value::<NowPlaying>(entry)
                .map_err(|e| warn!(error = %e, "catalog.playing.entry.skipped"))
                .ok()
        }).collect())
    }
}
