//!
//! src/search.rs  Oct 2026
//!
//! Best effort youtube link lookup through the duckduckgo html frontend.
//! Every search first negotiates a short lived `vqd` token, then queries
//! the script endpoint with it. Network failures are slept on and retried,
//! a page without a token is given up on.
//!

use std::{future::Future, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, header};
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

use crate::catalog::client_helper;
use crate::config::{HttpConfig, SearchConfig};
use crate::CrawlerError;

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/55.0.2883.87 Safari/537.36";

static VQD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)vqd=(\d-\d+-\d+)").expect("vqd pattern")
});

static YOUTUBE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?:https?://)?(?:www\.)?(?:youtube|youtu)\.(?:com|be)/(?:watch\?v=)?",
        r"(?:[0-z]{11}|[0-9a-zA-Z]{4}[-_][0-z]{4}|.[-_][0-z]{9})"
    )).expect("youtube pattern")
});

/// Pulls the `vqd` token out of the landing page
pub fn extract_token(body: &str) -> Option<String> {
    VQD_RE.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Every youtube link in the body, first occurrence order, no repeats
pub fn extract_links(body: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for m in YOUTUBE_RE.find_iter(body) {
        if !links.iter().any(|l| l == m.as_str()) {
            links.push(m.as_str().to_string());
        }
    }
    links
}

/// Anything that turns "artist - title" into video links, never fails
#[async_trait]
pub trait LinkSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Vec<String>;
}

#[derive(Clone, Debug)]
pub struct SearchClient {
    http: Client,
    base: Url,
    retry_sleep: Duration,
    max_attempts: Option<u32>
}

impl SearchClient {
    pub fn new(http_config: &HttpConfig, cfg: &SearchConfig) -> Result<Self, CrawlerError> {
        let http = client_helper(http_config)
            .user_agent(BROWSER_AGENT)
            .build()
            .map_err(|e| CrawlerError::Http(format!("build client: {e}")))?;

        Ok( Self {
            http,
            base: cfg.base_url.clone(),
            retry_sleep: cfg.retry_sleep,
            max_attempts: cfg.max_attempts
        })
    }

    /// Body of a response, 429 and 5xx count as request failures
    async fn body_of(request: reqwest::RequestBuilder) -> Result<String, CrawlerError> {
        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(CrawlerError::Status {
                status: status.as_u16(),
                url: response.url().to_string()
            });
        }
        if !status.is_success() {
            debug!(status = %status, "search.status.unexpected");
        }
        Ok(response.text().await?)
    }

    /// POST {base} q=...
    async fn token_page(&self, query: &str) -> Result<String, CrawlerError> {
        Self::body_of(
            self.http.post(self.base.clone()).form(&[("q", query)])
        ).await
    }

    /// GET {base}d.js?...&q=...&vqd=...
    async fn results_script(&self, query: &str, vqd: &str) -> Result<String, CrawlerError> {
        let url = self.base.join("d.js")?;
        let request = self.http.get(url)
            .header("dnt", "1")
            .header("x-requested-with", "XMLHttpRequest")
            .header(header::ACCEPT_LANGUAGE, "en-GB,en-US;q=0.8,en;q=0.6,ms;q=0.4")
            .header(header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(header::REFERER, self.base.as_str())
            .header("authority", self.base.host_str().unwrap_or_default())
            .query(&[
                ("l", "wt-wt"),
                ("p", "-2"),
                ("s", "30"),
                ("ex", "-2"),
                ("ct", "EN"),
                ("ss_mkt", "us"),
                ("sp", "0"),
                ("ext", "1"),
                ("q", query),
                ("vqd", vqd),
            ]);
        Self::body_of(request).await
    }

    /// Runs `attempt` until it yields a body, sleeping between failures.
    /// Gives up only when a max attempt count is configured.
    async fn with_retry<F, Fut>(&self, phase: &'static str, mut attempt: F) -> Option<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, CrawlerError>>,
    {
        let mut tries: u32 = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(body) => return Some(body),
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| tries >= max) {
                        error!(phase, tries, error = %e, "search.retry.exhausted");
                        return None;
                    }
                    warn!(
                        phase, tries, error = %e,
                        retry_in_ms = self.retry_sleep.as_millis() as u64,
                        "search.retry"
                    );
                    sleep(self.retry_sleep).await;
                }
            }
        }
    }

    /// Token handshake; None when the page has no token or retries ran out
    pub async fn acquire_token(&self, query: &str) -> Option<String> {
        let page = self.with_retry("token", move || self.token_page(query)).await?;
        let token = extract_token(&page);
        if token.is_none() {
            warn!(query, "search.token.missing");
        }
        token
    }
}

#[async_trait]
impl LinkSearcher for SearchClient {
    async fn search(&self, query: &str) -> Vec<String> {
        let Some(vqd) = self.acquire_token(query).await else {
            return Vec::new();
        };
        debug!(query, vqd = %vqd, "search.token");

        let vqd = vqd.as_str();
        let Some(script) = self.with_retry(
            "results", move || self.results_script(query, vqd)
        ).await else {
            return Vec::new();
        };
        extract_links(&script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_base_url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LANDING: &str =
        r#"<html><script>nrje('/d.js?q=x&t=D&l=us-en&s=0&vqd=4-211862316-157462101&p_ent=');</script></html>"#;

    const RESULTS: &str = concat!(
        r#"DDG.pageLayout.load('d',[{"u":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"},"#,
        r#"{"u":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"},"#,
        r#"{"u":"https://youtu.be/oHg5SJYRHA0"},{"u":"https://example.com/x"}]);"#
    );

    fn client_for(server: &MockServer, max_attempts: Option<u32>) -> SearchClient {
        let cfg = SearchConfig {
            base_url: parse_base_url(&server.uri()).unwrap(),
            retry_sleep: Duration::ZERO,
            max_attempts
        };
        SearchClient::new(&HttpConfig::default(), &cfg).unwrap()
    }

    #[test]
    fn token_is_found_in_landing_page() {
        assert_eq!(extract_token(LANDING).as_deref(), Some("4-211862316-157462101"));
        assert_eq!(extract_token("VQD=3-1-2").as_deref(), Some("3-1-2"));
        assert_eq!(extract_token("<html>captcha</html>"), None);
    }

    #[test]
    fn links_are_deduplicated_in_order() {
        assert_eq!(extract_links(RESULTS), vec![
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            "https://youtu.be/oHg5SJYRHA0".to_string(),
        ]);
        assert!(extract_links("https://vimeo.com/123456789").is_empty());
    }

    #[tokio::test]
    async fn token_failures_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LANDING))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/d.js"))
            .and(query_param("q", "Seven - Song"))
            .and(query_param("vqd", "4-211862316-157462101"))
            .and(query_param("l", "wt-wt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let links = client.search("Seven - Song").await;
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn missing_token_returns_empty_without_searching() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/d.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        assert!(client.search("Nobody - Nothing").await.is_empty());
    }

    #[tokio::test]
    async fn search_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LANDING))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/d.js"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/d.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        assert_eq!(client.search("Seven - Song").await.len(), 2);
    }

    #[tokio::test]
    async fn bounded_retries_give_up_with_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, Some(3));
        assert!(client.search("Seven - Song").await.is_empty());
    }
}
