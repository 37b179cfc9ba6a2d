use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value};
use tracing::trace;

use crate::config::{DEFAULT_API_URL_TEMPLATE, DEFAULT_USER_AGENT, LuppConfig};

pub type QueryParams = Vec<(String, String)>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid API URL for language `{lang}`: {url}")]
    InvalidUrl { lang: String, url: String },
    #[error("failed to call MediaWiki API")]
    Transport(#[source] reqwest::Error),
    #[error("MediaWiki API request failed with HTTP {0}")]
    Status(StatusCode),
    #[error("failed to decode MediaWiki API JSON response: {0}")]
    Decode(String),
    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },
}

impl ApiError {
    pub fn api(code: &str, info: &str) -> Self {
        Self::Api {
            code: code.to_string(),
            info: info.to_string(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_invalid_category(&self) -> bool {
        self.code() == Some("invalidcategory")
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(error) => is_retryable_error(error),
            Self::Status(status) => is_retryable_status(*status),
            Self::Api { code, .. } => matches!(code.as_str(), "maxlag" | "ratelimited"),
            Self::InvalidUrl { .. } | Self::Decode(_) => false,
        }
    }

    /// Arguments recorded in the error log for this failure.
    pub fn payload(&self) -> Vec<String> {
        match self {
            Self::Api { code, info } => vec![code.clone(), info.clone()],
            Self::Status(status) => vec![status.as_u16().to_string()],
            other => vec![other.to_string()],
        }
    }
}

/// One MediaWiki endpoint per language edition.
pub trait WikiQueryApi: Send + Sync {
    /// Issue a single request and return the decoded JSON payload.
    fn request(&self, lang: &str, params: &[(String, String)]) -> Result<Value, ApiError>;
    fn request_count(&self) -> usize;
}

/// Lazily iterate every response page of a query, following `continue` tokens.
pub fn query<'a, A>(api: &'a A, lang: &str, params: QueryParams) -> QueryPages<'a, A>
where
    A: WikiQueryApi + ?Sized,
{
    QueryPages {
        api,
        lang: lang.to_string(),
        base: params,
        continuation: None,
        finished: false,
    }
}

pub fn params(pairs: &[(&str, &str)]) -> QueryParams {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

pub struct QueryPages<'a, A: ?Sized> {
    api: &'a A,
    lang: String,
    base: QueryParams,
    continuation: Option<Map<String, Value>>,
    finished: bool,
}

impl<A: WikiQueryApi + ?Sized> QueryPages<'_, A> {
    fn next_params(&self) -> QueryParams {
        let Some(continuation) = &self.continuation else {
            return self.base.clone();
        };
        let mut merged = self
            .base
            .iter()
            .filter(|(key, _)| !continuation.contains_key(key))
            .cloned()
            .collect::<Vec<_>>();
        for (key, value) in continuation {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            merged.push((key.clone(), value));
        }
        merged
    }
}

impl<A: WikiQueryApi + ?Sized> Iterator for QueryPages<'_, A> {
    type Item = Result<Value, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let params = self.next_params();
        match self.api.request(&self.lang, &params) {
            Ok(payload) => {
                self.continuation = payload
                    .get("continue")
                    .and_then(Value::as_object)
                    .cloned();
                if self.continuation.is_none() {
                    self.finished = true;
                }
                Some(Ok(payload))
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    /// Endpoint with a `{lang}` placeholder.
    pub api_url_template: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
}

impl Default for MediaWikiClientConfig {
    fn default() -> Self {
        Self {
            api_url_template: DEFAULT_API_URL_TEMPLATE.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            rate_limit_read_ms: 50,
        }
    }
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &LuppConfig) -> Self {
        Self {
            api_url_template: config.api_url_template(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            rate_limit_read_ms: config.rate_limit_ms(),
        }
    }

    pub fn endpoint(&self, lang: &str) -> String {
        self.api_url_template.replace("{lang}", lang)
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    next_slot: Mutex<HashMap<String, Instant>>,
    request_count: AtomicUsize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            next_slot: Mutex::new(HashMap::new()),
            request_count: AtomicUsize::new(0),
        })
    }

    /// Reserve the next request slot for `lang` and sleep until it opens.
    fn apply_rate_limit(&self, lang: &str) {
        let spacing = Duration::from_millis(self.config.rate_limit_read_ms);
        let wait = {
            let mut slots = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = slots.get(lang).copied().unwrap_or(now).max(now);
            slots.insert(lang.to_string(), slot + spacing);
            slot - now
        };
        if !wait.is_zero() {
            sleep(wait);
        }
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl WikiQueryApi for MediaWikiClient {
    fn request(&self, lang: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
        let endpoint = self.config.endpoint(lang);
        let base_url = Url::parse(&endpoint).map_err(|_| ApiError::InvalidUrl {
            lang: lang.to_string(),
            url: endpoint.clone(),
        })?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push((key.clone(), value.clone()));
            }
        }

        self.apply_rate_limit(lang);
        trace!(lang, params = ?pairs, "MediaWiki request");
        let response = self
            .client
            .get(base_url)
            .query(&pairs)
            .send()
            .map_err(ApiError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }

        let payload: Value = response
            .json()
            .map_err(|error| ApiError::Decode(error.to_string()))?;
        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            return Err(ApiError::api(code, info));
        }
        Ok(payload)
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
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

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{Value, json};

    use super::{ApiError, MediaWikiClientConfig, QueryParams, WikiQueryApi, params, query};

    struct ScriptedApi {
        responses: Mutex<Vec<Result<Value, ApiError>>>,
        seen: Mutex<Vec<QueryParams>>,
    }

    impl ScriptedApi {
        fn new(mut responses: Vec<Result<Value, ApiError>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl WikiQueryApi for ScriptedApi {
        fn request(&self, _lang: &str, params: &[(String, String)]) -> Result<Value, ApiError> {
            self.seen.lock().expect("lock").push(params.to_vec());
            self.responses
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Ok(json!({})))
        }

        fn request_count(&self) -> usize {
            self.seen.lock().expect("lock").len()
        }
    }

    #[test]
    fn query_follows_continuation_until_exhausted() {
        let api = ScriptedApi::new(vec![
            Ok(json!({"continue": {"cmcontinue": "page|2", "continue": "-||"}, "query": {}})),
            Ok(json!({"continue": {"cmcontinue": "page|3", "continue": "-||"}, "query": {}})),
            Ok(json!({"query": {}})),
        ]);
        let pages = query(
            &api,
            "sv",
            params(&[("action", "query"), ("list", "categorymembers")]),
        )
        .collect::<Vec<_>>();
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(Result::is_ok));

        let seen = api.seen.lock().expect("lock");
        assert!(!seen[0].iter().any(|(key, _)| key == "cmcontinue"));
        assert!(
            seen[2]
                .iter()
                .any(|(key, value)| key == "cmcontinue" && value == "page|3")
        );
        assert_eq!(
            seen[2].iter().filter(|(key, _)| key == "continue").count(),
            1
        );
    }

    #[test]
    fn query_stops_after_error() {
        let api = ScriptedApi::new(vec![
            Err(ApiError::api("invalidcategory", "The category name you entered is not valid.")),
            Ok(json!({"query": {}})),
        ]);
        let mut pages = query(&api, "sv", params(&[("action", "query")]));
        let first = pages.next().expect("first item");
        assert!(first.expect_err("error").is_invalid_category());
        assert!(pages.next().is_none());
        assert_eq!(api.request_count(), 1);
    }

    #[test]
    fn error_payload_and_transience() {
        let error = ApiError::api("maxlag", "Waiting for a database server");
        assert!(error.is_transient());
        assert_eq!(error.payload(), vec!["maxlag", "Waiting for a database server"]);
        assert!(!ApiError::api("invalidtitle", "Bad title").is_transient());
        assert!(ApiError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(!ApiError::Status(reqwest::StatusCode::NOT_FOUND).is_transient());
    }

    #[test]
    fn endpoint_substitutes_language() {
        let config = MediaWikiClientConfig::default();
        assert_eq!(config.endpoint("fi"), "https://fi.wikipedia.org/w/api.php");
    }
}
