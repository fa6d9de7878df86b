//!
//! src/main.rs  Oct 2026
//!
//! Entry point of the di.fm crawler. Parses the task switches, sets up
//! logging and the store, then hands control to the orchestrator until
//! every selected loop has stopped.
//!

mod config;
mod errors;
mod logging;
mod types;

mod catalog;
mod crawler;
mod persistent;
mod search;

use std::sync::Arc;

use clap::Parser;

use crate::catalog::CatalogClient;
use crate::config::TaskFlags;
use crate::crawler::{Clients, Crawler};
use crate::errors::CrawlerError;
use crate::persistent::Persistent;
use crate::search::SearchClient;

#[derive(Parser, Debug)]
#[clap(version, about = "Mirrors the di.fm catalog and what its channels play")]
struct CliArgs {
    /// Search youtube links for every played track
    #[clap(short, long)]
    pub links: bool,

    /// Fetch artists referenced by stored tracks
    #[clap(short, long)]
    pub artists: bool,

    /// Fetch tracks seen playing
    #[clap(short, long)]
    pub tracks: bool,

    /// Fetch channels seen playing, once
    #[clap(short, long)]
    pub channels: bool,

    /// Record what every channel is currently playing
    #[clap(short, long)]
    pub watch: bool,

    /// Create the database schema before starting
    #[clap(short, long)]
    pub init: bool,

    /// Verbose logging for the crawler modules
    #[clap(short, long)]
    pub debug: bool,

    /// Database url, overrides DATABASE_URL
    #[clap(long)]
    pub db: Option<String>
}

impl CliArgs {
    fn tasks(&self) -> TaskFlags {
        TaskFlags {
            links: self.links,
            artists: self.artists,
            tracks: self.tracks,
            channels: self.channels,
            watch: self.watch
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CrawlerError> {
    let args = CliArgs::parse();

    let mut cfgs = config::load_config()?;
    cfgs.apply_overrides(args.tasks(), args.init, args.debug, args.db.clone());
    let _guard = logging::init_logging(&cfgs.logging)?;

    tracing::info!(
        service = "difm-crawler",
        version = %env!("CARGO_PKG_VERSION"),
        db = %cfgs.persistence.db_url,
        "starting"
    );
    tracing::debug!(config = ?cfgs, "configuration");

    let db = Persistent::init(&cfgs.persistence.db_url).await?;
    if cfgs.persistence.init_schema {
        db.ensure_schema().await?;
        tracing::info!("schema.ready");
    }

    let catalog = CatalogClient::new(&cfgs.http, &cfgs.catalog)?;
    let search  = SearchClient::new(&cfgs.http, &cfgs.search)?;
    let clients = Clients::new(catalog, Arc::new(search));

    let db = Arc::new(db);
    Crawler::new(&cfgs, db.clone(), clients).run().await?;
    db.close().await;
    Ok(())
}
