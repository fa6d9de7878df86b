//!
//! src/crawler.rs  Oct 2026
//!
//! Background loops of the crawler. Backfill loops ask the store what is
//! missing and fetch all of it concurrently, the watch loop records what
//! every channel is playing, the link loop resolves played tracks to
//! youtube links one at a time. The orchestrator (`Crawler::run`) starts
//! the selected loops and joins them on shutdown.
//!

use std::{sync::Arc, time::Duration};

use tokio::{task::{JoinHandle, JoinSet}, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogClient;
use crate::config::{AppConfig, LoopConfig, TaskFlags};
use crate::errors::CrawlerError;
use crate::persistent::Persistent;
use crate::search::LinkSearcher;
use crate::types::{Entity, EntityKind, NowPlaying, TrackRow};

#[derive(Clone)]
pub struct Clients {
    pub catalog: Arc<CatalogClient>,
    pub search: Arc<dyn LinkSearcher>
}

impl Clients {
    pub fn new(catalog: CatalogClient, search: Arc<dyn LinkSearcher>) -> Self {
        Self { catalog: Arc::new(catalog), search }
    }
}

/// Outcome of one backfill sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pending: usize,
    pub stored: usize,
    pub known: usize,    // fetched but another writer got there first
    pub failed: usize
}

/// Outcome of one link sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub searched: usize,
    pub linked: usize,
    pub links: u64
}

/// Fetches one entity and stores it with its associations.
/// Returns false when the row was already there.
pub async fn ingest(
    db: &Persistent,
    catalog: &CatalogClient,
    kind: EntityKind,
    id: i64
) -> Result<bool, CrawlerError> {
    let stored = match catalog.fetch(kind, id).await? {
        Entity::Channel(channel) => {
            debug!(channel = id, name = %channel.name, "store.channel");
            db.insert_channel(id, &channel).await?
        }
        Entity::Track(track) => {
            debug!(track = id, title = ?track.title, "store.track");
            let artists: Vec<i64> = track.artists.iter().filter_map(|a| a.id).collect();
            db.insert_track(&TrackRow::from_payload(id, &track), &artists).await?
        }
        Entity::Artist(artist) => {
            debug!(artist = id, name = %artist.name, "store.artist");
            db.insert_artist(id, &artist).await?
        }
    };
    Ok(stored)
}

pub struct Crawler {
    loops: LoopConfig,
    tasks: TaskFlags,
    db: Arc<Persistent>,
    clients: Clients,

    // handles daemon exit
    shutdown: CancellationToken
}

impl Crawler {
    pub fn new(cfg: &AppConfig, db: Arc<Persistent>, clients: Clients) -> Self {
        Self {
            loops: cfg.loops.clone(),
            tasks: cfg.tasks,
            db,
            clients,
            shutdown: CancellationToken::new()
        }
    }

    #[cfg(test)]
    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn store(&self) -> &Persistent {
        &self.db
    }

    fn clone_for_task(&self) -> Self {
        Self {
            loops: self.loops.clone(),
            tasks: self.tasks,
            db: self.db.clone(),
            clients: self.clients.clone(),
            shutdown: self.shutdown.clone()
        }
    }

    pub async fn run(self) -> Result<(), CrawlerError> {
        if !self.tasks.any() {
            warn!("crawler.idle no loop selected, nothing to do");
            return Ok(());
        }

        match self.db.stats().await {
            Ok(stats) => info!(
                channels = stats.channels, tracks = stats.tracks,
                artists = stats.artists, plays = stats.plays,
                channel_artists = stats.channel_artists,
                track_artists = stats.track_artists,
                links = stats.links, attempts = stats.attempts,
                tasks = ?self.tasks, "crawler.start"
            ),
            Err(e) => warn!(error = %e, "crawler.start.stats"),
        }

        let handles = self.spawn_selected();

        let shutdown = self.shutdown.clone();
        let trigger = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(msg = "shutting crawler daemon down", "crawler.signal");
                shutdown.cancel();
            }
        });

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!(task = name, error = ?e, "crawler task found error");
            }
        }

        trigger.abort();
        info!("crawler.exit");
        Ok(())
    }

    fn spawn_selected(&self) -> Vec<(&'static str, JoinHandle<()>)> {
        let mut handles = Vec::new();
        if self.tasks.links {
            let this = self.clone_for_task();
            handles.push(("links", tokio::spawn(async move { this.link_loop().await })));
        }
        if self.tasks.artists {
            let this = self.clone_for_task();
            handles.push(("artists", tokio::spawn(async move {
                this.backfill_loop(EntityKind::Artist).await
            })));
        }
        if self.tasks.channels {
            let this = self.clone_for_task();
            handles.push(("channels", tokio::spawn(async move {
                this.channel_backfill().await
            })));
        }
        if self.tasks.tracks {
            let this = self.clone_for_task();
            handles.push(("tracks", tokio::spawn(async move {
                this.backfill_loop(EntityKind::Track).await
            })));
        }
        if self.tasks.watch {
            let this = self.clone_for_task();
            handles.push(("watch", tokio::spawn(async move { this.watch_loop().await })));
        }
        handles
    }

    /// Sleeps unless shut down first, false means stop
    async fn idle(&self, period: Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = sleep(period) => true,
        }
    }

    async fn pending_ids(&self, kind: EntityKind) -> Result<Vec<i64>, CrawlerError> {
        match kind {
            EntityKind::Channel => self.db.pending_channel_ids().await,
            EntityKind::Track => self.db.pending_track_ids().await,
            EntityKind::Artist => self.db.pending_artist_ids().await,
        }
    }

    /// Fetches every pending id of `kind` at once and waits for all of them
    pub async fn backfill_sweep(&self, kind: EntityKind) -> Result<SweepReport, CrawlerError> {
        let ids = self.pending_ids(kind).await?;
        let mut report = SweepReport { pending: ids.len(), ..SweepReport::default() };
        if ids.is_empty() {
            return Ok(report);
        }
        info!(kind = kind.as_str(), pending = ids.len(), "backfill.sweep.start");

        let mut batch = JoinSet::new();
        for id in ids {
            let db = self.db.clone();
            let catalog = self.clients.catalog.clone();
            batch.spawn(async move { (id, ingest(&db, &catalog, kind, id).await) });
        }

        while let Some(joined) = batch.join_next().await {
            match joined {
                Ok((_, Ok(true))) => report.stored += 1,
                Ok((_, Ok(false))) => report.known += 1,
                Ok((id, Err(e))) => {
                    report.failed += 1;
                    if e.is_transient() {
                        warn!(kind = kind.as_str(), id, error = %e, "backfill.fetch.retry_later");
                    } else {
                        error!(kind = kind.as_str(), id, error = %e, "backfill.fetch.failed");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(kind = kind.as_str(), error = ?e, "backfill.fetch.panicked");
                }
            }
        }

        info!(
            kind = kind.as_str(), pending = report.pending, stored = report.stored,
            known = report.known, failed = report.failed, "backfill.sweep.done"
        );
        Ok(report)
    }

    /// Channels barely change, one pass per process is enough
    async fn channel_backfill(&self) {
        info!("crawler.channels.start");
        if let Err(e) = self.backfill_sweep(EntityKind::Channel).await {
            error!(error = %e, "crawler.channels.sweep failed");
        }
        info!("crawler.channels.stop");
    }

    async fn backfill_loop(&self, kind: EntityKind) {
        info!(kind = kind.as_str(), "crawler.backfill.loop.start");
        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.backfill_sweep(kind).await {
                error!(kind = kind.as_str(), error = %e, "backfill sweep failed");
            }
            if !self.idle(self.loops.backfill_period).await {
                break;
            }
        }
        info!(kind = kind.as_str(), "crawler.backfill.loop.stop");
    }

    /// One snapshot of what every channel plays, returns new pairs
    pub async fn watch_once(&self) -> Result<u64, CrawlerError> {
        let playing = self.clients.catalog.currently_playing().await?;
        let plays: Vec<_> = playing.iter().filter_map(NowPlaying::play).collect();
        info!(channels = playing.len(), plays = plays.len(), "watch.snapshot");

        let inserted = self.db.insert_plays(&plays).await?;
        debug!(inserted, "watch.stored");
        Ok(inserted)
    }

    async fn watch_loop(&self) {
        info!("crawler.watch.loop.start");
        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.watch_once().await {
                warn!(error = %e, "watch snapshot failed");
            }
            if !self.idle(self.loops.watch_period).await {
                break;
            }
        }
        info!("crawler.watch.loop.stop");
    }

    /// Searches links for every played track without an attempt on record.
    /// The attempt is committed before the search, a track is never tried twice.
    pub async fn link_sweep(&self) -> Result<LinkReport, CrawlerError> {
        let mut report = LinkReport::default();
        let pending = self.db.pending_link_candidates().await?.len();
        if pending > 0 {
            info!(pending, "links.sweep.start");
        }

        while !self.shutdown.is_cancelled() {
            let Some(candidate) = self.db.next_link_candidate().await? else {
                break;
            };

            self.db.record_link_attempt(candidate.track_id).await?;
            debug!(track = candidate.track_id, name = %candidate.display_name, "links.search");

            let links = self.clients.search.search(&candidate.display_name).await;
            report.searched += 1;
            if !links.is_empty() {
                report.linked += 1;
                match self.db.insert_track_links(candidate.track_id, &links).await {
                    Ok(inserted) => report.links += inserted,
                    Err(e) => error!(
                        track = candidate.track_id, error = %e, "links.store failed"
                    ),
                }
            }
            debug!(track = candidate.track_id, found = links.len(), "links.result");

            if !self.idle(self.loops.link_pacing).await {
                break;
            }
        }

        if report.searched > 0 {
            info!(
                searched = report.searched, linked = report.linked,
                links = report.links, "links.sweep.done"
            );
        }
        Ok(report)
    }

    async fn link_loop(&self) {
        info!("crawler.links.loop.start");
        while !self.shutdown.is_cancelled() {
            if let Err(e) = self.link_sweep().await {
                error!(error = %e, "link sweep aborted");
            }
            if !self.idle(self.loops.link_period).await {
                break;
            }
        }
        info!("crawler.links.loop.stop");
    }
}
