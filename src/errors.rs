//!
//! src/errors.rs  Oct 2026
//!
//! Defines enums and methods of error conversion
//! for errors the crawler uses
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl CrawlerError {
    /// Network level failures that are worth another attempt later
    pub fn is_transient(&self) -> bool {
        match self {
            CrawlerError::Http(_) | CrawlerError::Timeout(_) => true,
            CrawlerError::Status { status, .. } =>
                *status == 429 || *status >= 500,
            _ => false
        }
    }
}

impl From<reqwest::Error> for CrawlerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CrawlerError::Parse(e.to_string())
        } else {
            CrawlerError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CrawlerError {
    fn from(e: serde_json::Error) -> Self { CrawlerError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for CrawlerError {
    fn from(e: sqlx::Error) -> Self { CrawlerError::Db(e.to_string()) }
}

impl From<url::ParseError> for CrawlerError {
    fn from(e: url::ParseError) -> Self { CrawlerError::Config(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_are_transient() {
        let status = |status| CrawlerError::Status {
            status, url: "https://www.di.fm/".into()
        };
        assert!(CrawlerError::Timeout(std::time::Duration::from_secs(10)).is_transient());
        assert!(CrawlerError::Http("connection reset".into()).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(!CrawlerError::Parse("missing field".into()).is_transient());
        assert!(!CrawlerError::Db("locked".into()).is_transient());
    }
}
