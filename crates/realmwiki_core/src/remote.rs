use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::RealmWikiConfig;

/// Proof of a completed login. The cookies it stands for live in the client;
/// the core only passes it through to token and write calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSession {
    user: String,
}

impl WikiSession {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageExistence {
    pub title: String,
    pub missing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistenceResponse {
    pub pages: Vec<PageExistence>,
    /// `(requested, canonical)` pairs the wiki rewrote before answering.
    pub normalized: Vec<(String, String)>,
}

/// The remote wiki as the core sees it. Implementations are shared by
/// reference across worker threads.
pub trait RemotePageStore: Sync {
    fn query_existence(&self, titles: &[String]) -> Result<ExistenceResponse>;
    fn fetch_content(&self, title: &str) -> Result<Option<String>>;
    fn edit_token(&self, session: &WikiSession) -> Result<String>;
    fn write_page(
        &self,
        session: &WikiSession,
        title: &str,
        text: &str,
        token: &str,
        summary: &str,
    ) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Existence,
    Content,
    Write,
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub existence_timeout_ms: u64,
    pub content_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &RealmWikiConfig) -> Self {
        let api_default = config.api_url().unwrap_or_default();
        Self {
            api_url: api_default,
            user_agent: config.user_agent(),
            existence_timeout_ms: config.existence_timeout_ms(),
            content_timeout_ms: config.content_timeout_ms(),
            write_timeout_ms: config.write_timeout_ms(),
            rate_limit_read_ms: env_value_u64("REALMWIKI_RATE_LIMIT_READ", 100),
            rate_limit_write_ms: env_value_u64("REALMWIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("REALMWIKI_HTTP_RETRIES", 0),
            retry_delay_ms: env_value_u64("REALMWIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }

    fn timeout(&self, kind: RequestKind) -> Duration {
        Duration::from_millis(match kind {
            RequestKind::Existence => self.existence_timeout_ms,
            RequestKind::Content => self.content_timeout_ms,
            RequestKind::Write => self.write_timeout_ms,
        })
    }
}

#[derive(Debug, Default)]
struct RateLimitSlots {
    next_read_at: Option<Instant>,
    next_write_at: Option<Instant>,
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    slots: Mutex<RateLimitSlots>,
    request_count: AtomicUsize,
    csrf_token: Mutex<Option<String>>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("wiki API URL is not configured (set REALMWIKI_API_URL or [wiki].api_url)");
        }
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            slots: Mutex::new(RateLimitSlots::default()),
            request_count: AtomicUsize::new(0),
            csrf_token: Mutex::new(None),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    /// Bot-password login. The returned session is what every write needs.
    pub fn login(&self, username: &str, password: &str) -> Result<WikiSession> {
        let token_response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            RequestKind::Content,
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            RequestKind::Write,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                *lock(&self.csrf_token) = None;
                debug!(user = %username, "logged in");
                Ok(WikiSession::new(username))
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn request_json(&self, params: &[(&str, String)], kind: RequestKind) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", self.config.api_url))?;
        let is_write = kind == RequestKind::Write;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(is_write);
            let request = if is_write {
                self.client.post(base_url.clone()).form(&pairs)
            } else {
                self.client.get(base_url.clone()).query(&pairs)
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .timeout(self.config.timeout(kind))
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("MediaWiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    /// Reserves the next request slot under the lock and sleeps outside it,
    /// so concurrent workers queue up without blocking each other's bookkeeping.
    fn apply_rate_limit(&self, is_write: bool) {
        let delay = Duration::from_millis(if is_write {
            self.config.rate_limit_write_ms
        } else {
            self.config.rate_limit_read_ms
        });
        let now = Instant::now();
        let scheduled = {
            let mut slots = lock(&self.slots);
            let slot = if is_write {
                &mut slots.next_write_at
            } else {
                &mut slots.next_read_at
            };
            let scheduled = slot.map_or(now, |next| next.max(now));
            *slot = Some(scheduled + delay);
            scheduled
        };
        if scheduled > now {
            sleep(scheduled - now);
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

impl RemotePageStore for MediaWikiClient {
    fn query_existence(&self, titles: &[String]) -> Result<ExistenceResponse> {
        if titles.is_empty() {
            return Ok(ExistenceResponse::default());
        }
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("titles", titles.join("|")),
            ],
            RequestKind::Existence,
        )?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page existence response")?;

        Ok(ExistenceResponse {
            pages: parsed
                .query
                .pages
                .into_iter()
                .map(|page| PageExistence {
                    title: page.title,
                    missing: page.missing || page.invalid,
                })
                .collect(),
            normalized: parsed
                .query
                .normalized
                .into_iter()
                .map(|entry| (entry.from, entry.to))
                .collect(),
        })
    }

    fn fetch_content(&self, title: &str) -> Result<Option<String>> {
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content".to_string()),
                ("rvslots", "main".to_string()),
            ],
            RequestKind::Content,
        )?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content response")?;

        let Some(page) = parsed.query.pages.into_iter().next() else {
            return Ok(None);
        };
        if page.missing || page.invalid {
            return Ok(None);
        }
        Ok(page
            .revisions
            .into_iter()
            .next()
            .and_then(|revision| revision.slots)
            .and_then(|slots| slots.main)
            .map(|slot| slot.content))
    }

    fn edit_token(&self, _session: &WikiSession) -> Result<String> {
        if let Some(token) = lock(&self.csrf_token).clone() {
            return Ok(token);
        }
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            RequestKind::Content,
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        *lock(&self.csrf_token) = Some(token.clone());
        Ok(token)
    }

    fn write_page(
        &self,
        _session: &WikiSession,
        title: &str,
        text: &str,
        token: &str,
        summary: &str,
    ) -> Result<()> {
        let response = self.request_json(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", text.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token.to_string()),
            ],
            RequestKind::Write,
        )?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
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

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    normalized: Vec<NormalizedItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
}

#[derive(Debug, Deserialize)]
struct NormalizedItem {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    slots: Option<RevisionSlots>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: Option<RevisionSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
