use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::config::{DEFAULT_LOGIN_PATH, WikiConfig};

/// HTML-level access to a PmWiki installation.
///
/// `path` is relative to the wiki base URL (for example `Main/HomePage`).
pub trait WikiSession {
    fn get_page(&mut self, path: &str, query: &[(&str, String)]) -> Result<String>;
    fn post_form(
        &mut self,
        path: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<String>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct PmWikiClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub login_path: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl PmWikiClientConfig {
    pub fn from_config(config: &WikiConfig) -> Self {
        Self {
            base_url: config.wiki_url().unwrap_or_default(),
            user_agent: config.user_agent(),
            login_path: config
                .wiki
                .login_path
                .clone()
                .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("WIKI_RATE_LIMIT_MS", 300),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Blocking PmWiki client with a cookie-backed login session.
pub struct PmWikiClient {
    client: Client,
    base_url: Url,
    config: PmWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl PmWikiClient {
    pub fn new(config: PmWikiClientConfig) -> Result<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build PmWiki HTTP client")?;

        Ok(Self {
            client,
            base_url,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_path = self.config.login_path.clone();
        self.post_form(
            &login_path,
            &[("action", "login".to_string())],
            &[
                ("username", username.to_string()),
                ("password", password.to_string()),
            ],
        )
        .with_context(|| format!("PmWiki login as {username} failed"))?;
        debug!(username, "logged in");
        Ok(())
    }

    fn page_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid page path: {path}"))
    }

    fn send_with_retries<F>(&mut self, url: &Url, build: F) -> Result<String>
    where
        F: Fn(&Client, Url) -> reqwest::blocking::RequestBuilder,
    {
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = build(&self.client, url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if should_retry_status(status, attempt, self.config.max_retries) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("PmWiki request to {url} failed with HTTP {status}");
                    }
                    return response
                        .text()
                        .with_context(|| format!("failed to read response body from {url}"));
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {url}"));
                }
            }
        }

        bail!("PmWiki request to {url} exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(backoff_delay(self.config.retry_delay_ms, attempt, jitter));
    }
}

impl WikiSession for PmWikiClient {
    fn get_page(&mut self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = self.page_url(path)?;
        self.send_with_retries(&url, |client, url| client.get(url).query(query))
    }

    fn post_form(
        &mut self,
        path: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<String> {
        let url = self.page_url(path)?;
        self.send_with_retries(&url, |client, url| client.post(url).query(query).form(form))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Parse the wiki base URL, making sure relative page paths join below it.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("wiki base URL is not configured (set WIKI_URL or [wiki].url)");
    }
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalized).with_context(|| format!("invalid wiki base URL: {trimmed}"))
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn should_retry_status(status: StatusCode, attempt: usize, max_retries: usize) -> bool {
    attempt < max_retries && is_retryable_status(status)
}

/// Exponential backoff: `retry_delay_ms * 2^attempt` plus jitter, saturating.
fn backoff_delay(retry_delay_ms: u64, attempt: usize, jitter_ms: u64) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
    let base = retry_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(base.saturating_add(jitter_ms))
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}


/// In-memory PmWiki used by the fetcher and orchestrator tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::BTreeMap;

    use anyhow::Result;

    use super::WikiSession;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedPost {
        pub path: String,
        pub query: Vec<(String, String)>,
        pub form: Vec<(String, String)>,
    }

    /// Serves edit forms for known `(page path, diff)` pairs and renders
    /// submitted markup inside `#wikitext`.
    #[derive(Debug, Default)]
    pub struct MockWiki {
        /// Markup per `(page path, diff)`; `None` serves a form without markup.
        pub revisions: BTreeMap<(String, String), Option<String>>,
        pub session_expired: bool,
        pub posts: Vec<RecordedPost>,
        pub gets: Vec<(String, Vec<(String, String)>)>,
        pub request_count: usize,
    }

    impl MockWiki {
        pub fn with_revision(mut self, page_path: &str, diff: u64, markup: Option<&str>) -> Self {
            self.revisions.insert(
                (page_path.to_string(), diff.to_string()),
                markup.map(ToString::to_string),
            );
            self
        }
    }

    fn owned(pairs: &[(&str, String)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    impl WikiSession for MockWiki {
        fn get_page(&mut self, path: &str, query: &[(&str, String)]) -> Result<String> {
            self.request_count += 1;
            self.gets.push((path.to_string(), owned(query)));
            let diff = query
                .iter()
                .find(|(key, _)| *key == "restore")
                .and_then(|(_, value)| value.strip_prefix("diff:"))
                .and_then(|value| value.split(':').next())
                .unwrap_or_default()
                .to_string();
            let page = match self.revisions.get(&(path.to_string(), diff.clone())) {
                Some(Some(markup)) => format!(
                    "<html><body><form method=\"post\"><input type=\"hidden\" name=\"basetime\" value=\"17{diff}\"><textarea id=\"text\" name=\"text\">{markup}</textarea></form></body></html>"
                ),
                Some(None) => format!(
                    "<html><body><form method=\"post\"><input type=\"hidden\" name=\"basetime\" value=\"17{diff}\"><textarea id=\"text\" name=\"text\"></textarea></form></body></html>"
                ),
                None => "<html><body><div id=\"wikitext\"><p>Page not found</p></div></body></html>"
                    .to_string(),
            };
            Ok(page)
        }

        fn post_form(
            &mut self,
            path: &str,
            query: &[(&str, String)],
            form: &[(&str, String)],
        ) -> Result<String> {
            self.request_count += 1;
            self.posts.push(RecordedPost {
                path: path.to_string(),
                query: owned(query),
                form: owned(form),
            });
            if self.session_expired {
                return Ok(
                    "<html><body><form action=\"?action=login\"><input name=\"authpw\"></form></body></html>"
                        .to_string(),
                );
            }
            let text = form
                .iter()
                .find(|(key, _)| *key == "text")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            Ok(format!(
                "<html><body><div id=\"wikitext\"><p>{text}</p></div></body></html>"
            ))
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }
}
