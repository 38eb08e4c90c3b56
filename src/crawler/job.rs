use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::crawler::record::STATUS_BAD_REQUEST;
use crate::crawler::strategy::Strategy;

/// Default cap on pages for paginated jobs
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Default number of adaptive scroll iterations
pub const DEFAULT_MAX_SCROLLS: u32 = 20;

/// Default pause between scroll steps, in milliseconds
pub const DEFAULT_SCROLL_DELAY_MS: u64 = 100;

/// A job that failed validation. Nothing has been acquired when this is
/// returned, and nothing is delivered to the collector for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Missing crawler type")]
    MissingStrategy,

    #[error("Unknown crawler type: {0}")]
    UnknownStrategy(String),

    #[error("Missing or invalid urls (must be a non-empty array of strings)")]
    InvalidUrls,

    #[error("Missing or invalid meta (must be a non-empty object)")]
    InvalidMeta,

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Missing next_page_selector")]
    MissingNextPageSelector,

    #[error("limit must be at least 1")]
    InvalidLimit,

    #[error("Missing login info")]
    MissingLoginInfo,
}

impl Rejection {
    /// Every rejection is a malformed job
    pub fn status_code(&self) -> u16 {
        STATUS_BAD_REQUEST
    }
}

/// Inbound job exactly as the intake layer hands it over
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "type", default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub urls: Option<Value>,

    #[serde(default)]
    pub meta: Option<Value>,

    #[serde(default)]
    pub options: Option<Value>,

    #[serde(default)]
    pub auth: Option<AuthRequest>,
}

/// Field extraction rule. Rules missing a key or a selector are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selector {
    pub key: Option<String>,
    pub selector: Option<String>,
    pub full_html: bool,
}

impl Selector {
    pub fn new(key: &str, selector: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            selector: Some(selector.to_string()),
            full_html: false,
        }
    }

    pub fn html(key: &str, selector: &str) -> Self {
        Self {
            full_html: true,
            ..Self::new(key, selector)
        }
    }

    /// The `(field, css)` pair, if both are present and non-empty
    pub fn usable(&self) -> Option<(&str, &str)> {
        match (self.key.as_deref(), self.selector.as_deref()) {
            (Some(key), Some(css)) if !key.is_empty() && !css.is_empty() => Some((key, css)),
            _ => None,
        }
    }
}

/// Per-job crawl options. Fields that only one strategy reads are ignored
/// by the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Seconds to settle after each page load
    pub crawl_delay: Option<u64>,
    pub headers: BTreeMap<String, String>,
    pub selectors: Vec<Selector>,

    /// Page cap for paginated and seed jobs
    pub limit: Option<u32>,

    // seed
    pub max_depth: Option<u32>,
    #[serde(alias = "selector")]
    pub link_selector: Option<String>,
    pub link_filter_rules: Vec<String>,

    // dynamic
    pub click_selector: Option<String>,
    pub click_times: u32,
    pub scroll: bool,
    #[serde(alias = "scroll_steps")]
    pub max_scrolls: Option<u32>,
    /// Milliseconds between scroll steps
    pub scroll_delay: Option<u64>,

    // paginated
    pub next_page_selector: Option<String>,
}

impl Options {
    pub fn crawl_delay(&self) -> Duration {
        Duration::from_secs(self.crawl_delay.unwrap_or(0))
    }

    pub fn max_scrolls(&self) -> u32 {
        self.max_scrolls.unwrap_or(DEFAULT_MAX_SCROLLS)
    }

    pub fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay.unwrap_or(DEFAULT_SCROLL_DELAY_MS))
    }

    /// Container scoping seed link discovery; `"null"` means unscoped
    pub fn link_scope(&self) -> Option<&str> {
        self.link_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "null")
    }
}

/// Target-site login configuration as sent by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRequest {
    pub login_url: Option<String>,
    pub login_selector: Option<String>,
    pub password_selector: Option<String>,
    pub submit_selector: Option<String>,
    pub credentials: Option<Credentials>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A complete, validated login
#[derive(Clone)]
pub struct LoginPlan {
    pub login_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: Option<String>,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginPlan")
            .field("login_url", &self.login_url)
            .field("username_selector", &self.username_selector)
            .field("password_selector", &self.password_selector)
            .field("submit_selector", &self.submit_selector)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AuthRequest {
    fn into_plan(self) -> Result<LoginPlan, Rejection> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        let credentials = self.credentials.unwrap_or_default();

        match (
            non_empty(self.login_url),
            non_empty(self.login_selector),
            non_empty(self.password_selector),
            non_empty(credentials.username),
            non_empty(credentials.password),
        ) {
            (Some(login_url), Some(username_selector), Some(password_selector), Some(username), Some(password)) => {
                Ok(LoginPlan {
                    login_url,
                    username_selector,
                    password_selector,
                    submit_selector: non_empty(self.submit_selector),
                    username,
                    password,
                })
            }
            _ => Err(Rejection::MissingLoginInfo),
        }
    }
}

/// A validated job, owned by the one worker executing it
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub strategy: Strategy,
    pub urls: Vec<String>,
    /// Caller correlation data, echoed on every record
    pub meta: Map<String, Value>,
    pub options: Options,
    pub login: Option<LoginPlan>,
}

impl Job {
    /// First requested URL, used for records not tied to a specific page
    pub fn first_url(&self) -> &str {
        self.urls.first().map(String::as_str).unwrap_or_default()
    }
}

impl JobRequest {
    /// Validate the request for an already resolved strategy.
    ///
    /// Fills per-strategy defaults: the settle delay (0s for static, 1s
    /// otherwise), a `User-Agent` header when none is given, and the
    /// paginated page limit.
    pub fn into_job(self, strategy: Strategy, user_agent: &str) -> Result<Job, Rejection> {
        let urls = match self.urls {
            Some(Value::Array(items)) if !items.is_empty() => items
                .into_iter()
                .map(|item| match item {
                    Value::String(url) if !url.trim().is_empty() => Ok(url.trim().to_string()),
                    _ => Err(Rejection::InvalidUrls),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(Rejection::InvalidUrls),
        };

        let meta = match self.meta {
            Some(Value::Object(meta)) if !meta.is_empty() => meta,
            _ => return Err(Rejection::InvalidMeta),
        };

        let mut options: Options = match self.options {
            None | Some(Value::Null) => Options::default(),
            Some(value) => {
                serde_json::from_value(value).map_err(|e| Rejection::InvalidOptions(e.to_string()))?
            }
        };

        if options.crawl_delay.is_none() {
            options.crawl_delay = Some(strategy.default_crawl_delay());
        }

        if !options.headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
            options.headers.insert("User-Agent".to_string(), user_agent.to_string());
        }

        if options.limit == Some(0) {
            return Err(Rejection::InvalidLimit);
        }

        let login = match strategy {
            Strategy::Paginated => {
                if options
                    .next_page_selector
                    .as_deref()
                    .map_or(true, |s| s.trim().is_empty())
                {
                    return Err(Rejection::MissingNextPageSelector);
                }
                if options.limit.is_none() {
                    options.limit = Some(DEFAULT_PAGE_LIMIT);
                }
                None
            }
            Strategy::Authenticated => Some(self.auth.unwrap_or_default().into_plan()?),
            _ => None,
        };

        Ok(Job {
            id: Uuid::new_v4(),
            strategy,
            urls,
            meta,
            options,
            login,
        })
    }
}
