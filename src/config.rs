//!
//! src/config.rs  Oct 2026
//!
//! Environment backed configuration for the catalog client, the link
//! search client, the update loops and the sqlite store
//!

use std::{str::FromStr, time};
use url::Url;
use crate::CrawlerError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 10_000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const FETCH_PACING: u64 = 1000;
pub const SEARCH_RETRY_SLEEP: u64 = 5000;
pub const LOOP_PERIOD: u64 = 60_000;
pub const LINK_PACING: u64 = 1000;

pub const DIFM_API_BASE: &str = "https://www.di.fm/_papi/v1/di/";
pub const SEARCH_BASE_URL: &str = "https://duckduckgo.com/";
pub const DATABASE_URL: &str = "sqlite:di-fm.db";

/// Reads an env var and parses it, falling back to default when unset or bad
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> time::Duration {
    time::Duration::from_millis(env_or(key, default_ms))
}

fn env_secs(key: &str, default_ms: u64) -> time::Duration {
    match std::env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(secs) => time::Duration::from_secs(secs),
        None => time::Duration::from_millis(default_ms)
    }
}

/// Ensures that url speaks http(s)
fn ensure_web_scheme(url: &Url) -> Result<(), String> {
    match url.scheme() {
        "https" | "http" => Ok(()),
        other => Err(format!("URL must be http(s), got {other}: {url}"))
    }
}

/// Parses a base url and guarantees a trailing slash so `join` appends
pub fn parse_base_url(raw: &str) -> Result<Url, CrawlerError> {
    let mut url = Url::parse(raw)
        .map_err(|e| CrawlerError::Config(format!("invalid url {raw}: {e}")))?;

    ensure_web_scheme(&url).map_err(CrawlerError::Config)?;
    if url.host_str().is_none() {
        return Err(CrawlerError::Config(format!("URL missing host: {url}")));
    }

    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
    Ok(url)
}

///
/// Configuration for the di.fm public api
///
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub api_base: Url,                // https://www.di.fm/_papi/v1/di/
    pub request_timeout: time::Duration,
    pub pacing: time::Duration        // courtesy delay before every fetch
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            // constant is a valid url
            api_base: Url::parse(DIFM_API_BASE).expect("static url"),
            request_timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            pacing: time::Duration::from_millis(FETCH_PACING)
        }
    }
}

fn build_catalog() -> Result<CatalogConfig, CrawlerError> {
    let api_base = std::env::var("DIFM_API_BASE")
        .unwrap_or_else(|_| DIFM_API_BASE.to_string());

    Ok( CatalogConfig {
        api_base: parse_base_url(&api_base)?,
        request_timeout: env_secs("HTTP_TIMEOUT_SECS", HTTP_TIMEOUT),
        pacing: env_millis("FETCH_PACING_MS", FETCH_PACING)
    })
}

///
/// Configuration for the video link search provider
///
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: Url,
    pub retry_sleep: time::Duration,
    pub max_attempts: Option<u32>     // None retries forever
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(SEARCH_BASE_URL).expect("static url"),
            retry_sleep: time::Duration::from_millis(SEARCH_RETRY_SLEEP),
            max_attempts: None
        }
    }
}

fn build_search() -> Result<SearchConfig, CrawlerError> {
    let base_url = std::env::var("SEARCH_BASE_URL")
        .unwrap_or_else(|_| SEARCH_BASE_URL.to_string());

    let max_attempts = std::env::var("SEARCH_MAX_ATTEMPTS")
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0);

    Ok( SearchConfig {
        base_url: parse_base_url(&base_url)?,
        retry_sleep: env_secs("SEARCH_RETRY_SECS", SEARCH_RETRY_SLEEP),
        max_attempts
    })
}

///
/// Configuration for Http connection handling
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

///
/// Cadence of the background loops
///
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub backfill_period: time::Duration,  // idle between track/artist sweeps
    pub watch_period: time::Duration,     // idle between now playing snapshots
    pub link_period: time::Duration,      // idle between link sweeps
    pub link_pacing: time::Duration       // delay between two searches
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            backfill_period: time::Duration::from_millis(LOOP_PERIOD),
            watch_period: time::Duration::from_millis(LOOP_PERIOD),
            link_period: time::Duration::from_millis(LOOP_PERIOD),
            link_pacing: time::Duration::from_millis(LINK_PACING)
        }
    }
}

fn build_loops() -> LoopConfig {
    LoopConfig {
        backfill_period: env_secs("BACKFILL_PERIOD_SECS", LOOP_PERIOD),
        watch_period: env_secs("WATCH_PERIOD_SECS", LOOP_PERIOD),
        link_period: env_secs("LINK_PERIOD_SECS", LOOP_PERIOD),
        link_pacing: env_millis("LINK_PACING_MS", LINK_PACING)
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub db_url: String,
    pub init_schema: bool
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_url: DATABASE_URL.to_string(),
            init_schema: false
        }
    }
}

///
/// Configuration for Logger
///

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

impl FromStr for LogFormat {
    type Err = CrawlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(CrawlerError::Config(format!("unknown LOG_FORMAT {other}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

pub const DEBUG_DIRECTIVES: &str = "debug,difm_crawler=debug,sqlx=warn,hyper=info,reqwest=info";

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,difm_crawler=info,sqlx=warn,reqwest=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> Result<LoggingConfig, CrawlerError> {
    let mut logging = LoggingConfig::default();
    if let Ok(format) = std::env::var("LOG_FORMAT") {
        logging.format = format.parse()?;
    }
    Ok(logging)
}

///
/// Which background loops the orchestrator starts
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFlags {
    pub links: bool,
    pub artists: bool,
    pub tracks: bool,
    pub channels: bool,
    pub watch: bool
}

impl TaskFlags {
    pub fn any(&self) -> bool {
        self.links || self.artists || self.tracks || self.channels || self.watch
    }
}

///
/// AppConfig which holds everything the crawler needs at start
///
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub catalog: CatalogConfig,
    pub search: SearchConfig,
    pub loops: LoopConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub tasks: TaskFlags
}

impl AppConfig {
    /// Command line switches take priority over the environment
    pub fn apply_overrides(&mut self, tasks: TaskFlags, init: bool, debug: bool,
        db_url: Option<String>) {
        self.tasks = tasks;
        self.persistence.init_schema = init;
        if let Some(url) = db_url {
            self.persistence.db_url = url;
        }
        if debug {
            self.logging.filter_directives = DEBUG_DIRECTIVES.to_string();
        }
    }
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, CrawlerError> {
    dotenvy::dotenv().ok();

    let http        = HttpConfig::default();
    let catalog     = build_catalog()?;
    let search      = build_search()?;
    let loops       = build_loops();
    let persistence = PersistenceConfig {
        db_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| DATABASE_URL.to_string()),
        init_schema: false
    };
    let logging     = build_logging()?;

    Ok( AppConfig {
        http, catalog, search, loops, persistence, logging,
        tasks: TaskFlags::default()
    } )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = parse_base_url("https://www.di.fm/_papi/v1/di").unwrap();
        assert_eq!(url.as_str(), "https://www.di.fm/_papi/v1/di/");
        assert_eq!(url.join("tracks/42").unwrap().path(), "/_papi/v1/di/tracks/42");
    }

    #[test]
    fn base_url_rejects_other_schemes() {
        assert!(matches!(parse_base_url("ftp://di.fm/"), Err(CrawlerError::Config(_))));
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn unset_env_falls_back_to_default() {
        assert_eq!(env_or("DIFM_CRAWLER_TEST_NEVER_SET", 7_u32), 7);
        assert_eq!(
            env_secs("DIFM_CRAWLER_TEST_NEVER_SET", 1500),
            time::Duration::from_millis(1500)
        );
    }

    #[test]
    fn overrides_replace_tasks_and_filter() {
        let mut cfg = AppConfig::default();
        assert!(!cfg.tasks.any());

        let tasks = TaskFlags { tracks: true, watch: true, ..TaskFlags::default() };
        cfg.apply_overrides(tasks, true, true, Some("sqlite::memory:".into()));

        assert!(cfg.tasks.any());
        assert!(cfg.persistence.init_schema);
        assert_eq!(cfg.persistence.db_url, "sqlite::memory:");
        assert_eq!(cfg.logging.filter_directives, DEBUG_DIRECTIVES);
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
