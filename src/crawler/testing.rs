//! In-memory browser used by the crawler tests.
//!
//! A `FakeSite` maps URLs to HTML fixtures and answers CSS queries with
//! `scraper`. Every interaction is written to a shared `Journal` so tests
//! can assert on what the strategies did.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector as Css};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::browser::{BrowserError, Fragment, FragmentKind, Launcher, Page};
use tokio_util::sync::CancellationToken;

use crate::crawler::job::{Job, JobRequest};
use crate::crawler::navigator::Navigator;
use crate::crawler::record::ResultRecord;
use crate::crawler::strategy::{CrawlContext, Strategy, StrategyError};
use crate::delivery::{Collector, DeliveryChannel, DeliveryError};

/// Everything the fake browser was asked to do
#[derive(Debug, Default, Clone)]
pub struct Journal {
    pub launches: usize,
    pub closes: usize,
    pub headers: Vec<BTreeMap<String, String>>,
    pub visits: Vec<String>,
    pub clicks: Vec<String>,
    pub fills: Vec<(String, String)>,
    pub enters: Vec<String>,
    pub scrolls: Vec<i64>,
}

/// Scroll behaviour of a lazy-loading page: each scroll of at least
/// `min_step` pixels grows the document by `grow_by`, `growths` times.
#[derive(Debug, Clone, Copy)]
pub struct LazyScroll {
    pub initial_height: i64,
    pub min_step: i64,
    pub grow_by: i64,
    pub growths: u32,
}

#[derive(Debug, Clone)]
struct FakeLogin {
    username: String,
    password: String,
    landing: String,
}

#[derive(Debug, Clone)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    hanging: HashSet<String>,
    never_idle: HashSet<String>,
    protected: HashSet<String>,
    login_url: Option<String>,
    login: Option<FakeLogin>,
    vanishing: HashMap<String, usize>,
    lazy: Option<LazyScroll>,
    fail_launch: bool,
    journal: Arc<Mutex<Journal>>,
}

impl Default for FakeSite {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSite {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            redirects: HashMap::new(),
            hanging: HashSet::new(),
            never_idle: HashSet::new(),
            protected: HashSet::new(),
            login_url: None,
            login: None,
            vanishing: HashMap::new(),
            lazy: None,
            fail_launch: false,
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }

    /// Loading `url` never completes
    pub fn hanging(mut self, url: &str) -> Self {
        self.hanging.insert(url.to_string());
        self
    }

    /// `url` loads but keeps the network busy
    pub fn never_idle(mut self, url: &str) -> Self {
        self.never_idle.insert(url.to_string());
        self
    }

    /// `url` redirects to the login page until a login succeeded
    pub fn protected(mut self, url: &str) -> Self {
        self.protected.insert(url.to_string());
        self
    }

    /// Submitting `username`/`password` from `login_url` lands on `landing`
    pub fn login(mut self, login_url: &str, username: &str, password: &str, landing: &str) -> Self {
        self.login_url = Some(login_url.to_string());
        self.login = Some(FakeLogin {
            username: username.to_string(),
            password: password.to_string(),
            landing: landing.to_string(),
        });
        self
    }

    /// Elements matching `selector` disappear after `clicks` clicks
    pub fn vanishing(mut self, selector: &str, clicks: usize) -> Self {
        self.vanishing.insert(selector.to_string(), clicks);
        self
    }

    pub fn lazy_scroll(mut self, lazy: LazyScroll) -> Self {
        self.lazy = Some(lazy);
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.lock().unwrap().clone()
    }

    pub fn open(&self) -> FakePage {
        FakePage {
            site: self.clone(),
            state: Mutex::new(PageState {
                url: None,
                html: String::new(),
                height: self.lazy.map_or(1000, |lazy| lazy.initial_height),
                growths_left: self.lazy.map_or(0, |lazy| lazy.growths),
                logged_in: false,
            }),
        }
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher { site: self.clone() }
    }
}

#[derive(Debug)]
struct PageState {
    url: Option<String>,
    html: String,
    height: i64,
    growths_left: u32,
    logged_in: bool,
}

pub struct FakePage {
    site: FakeSite,
    state: Mutex<PageState>,
}

impl FakePage {
    fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.site.journal.lock().unwrap()
    }

    fn parse(css: &str) -> Result<Css, BrowserError> {
        Css::parse(css).map_err(|e| BrowserError::InvalidSelector(format!("{}: {:?}", css, e)))
    }

    /// Run `f` over the elements matching `css` in the current document
    fn query<T>(&self, css: &str, f: impl FnOnce(Vec<ElementRef<'_>>, &str) -> T) -> Result<T, BrowserError> {
        let selector = Self::parse(css)?;
        let state = self.state.lock().unwrap();
        let document = Html::parse_document(&state.html);
        let elements = document.select(&selector).collect();
        let base = state.url.clone().unwrap_or_else(|| "about:blank".to_string());
        Ok(f(elements, &base))
    }

    fn vanished(&self, css: &str) -> bool {
        match self.site.vanishing.get(css) {
            Some(limit) => self.journal().clicks.iter().filter(|c| c.as_str() == css).count() >= *limit,
            None => false,
        }
    }

    /// Resolve redirects and login walls, then load the document
    fn load(&self, url: &str) -> Result<(), BrowserError> {
        let mut target = self.site.redirects.get(url).cloned().unwrap_or_else(|| url.to_string());

        let logged_in = self.state.lock().unwrap().logged_in;
        if self.site.protected.contains(&target) && !logged_in {
            if let Some(login_url) = &self.site.login_url {
                target = login_url.clone();
            }
        }

        let html = self
            .site
            .pages
            .get(&target)
            .cloned()
            .ok_or_else(|| BrowserError::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {}", target)))?;

        let mut state = self.state.lock().unwrap();
        state.url = Some(target);
        state.html = html;
        Ok(())
    }

    fn try_login(&self) {
        let Some(login) = &self.site.login else {
            return;
        };
        let submitted = {
            let journal = self.journal();
            let values: Vec<&str> = journal.fills.iter().map(|(_, v)| v.as_str()).collect();
            values.contains(&login.username.as_str()) && values.contains(&login.password.as_str())
        };
        if submitted {
            self.state.lock().unwrap().logged_in = true;
            let landing = login.landing.clone();
            if let Err(e) = self.load(&landing) {
                panic!("fake login landing page missing: {}", e);
            }
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        self.journal().visits.push(url.to_string());
        if self.site.hanging.contains(url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Err(BrowserError::Navigation("hung".to_string()));
        }
        self.load(url)
    }

    async fn wait_for_idle(&self, timeout: Duration) -> Result<(), BrowserError> {
        let url = self.state.lock().unwrap().url.clone().unwrap_or_default();
        if self.site.never_idle.contains(&url) {
            tokio::time::sleep(timeout).await;
            return Err(BrowserError::Timeout(timeout));
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .url
            .clone()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn source(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn fragments(&self, selector: &str, kind: FragmentKind) -> Result<Vec<Fragment>, BrowserError> {
        self.query(selector, |elements, _| {
            elements
                .into_iter()
                .map(|element| {
                    if element.value().attr("data-detached").is_some() {
                        return Err(BrowserError::ElementNotFound("stale element reference".to_string()));
                    }
                    Ok(Some(match kind {
                        FragmentKind::Text => element.text().collect::<String>(),
                        FragmentKind::InnerHtml => element.inner_html(),
                    }))
                })
                .collect()
        })
    }

    async fn link_targets(&self, selector: &str) -> Result<Vec<String>, BrowserError> {
        self.query(selector, |elements, base| {
            let base = Url::parse(base).ok();
            elements
                .into_iter()
                .filter_map(|element| element.value().attr("href"))
                .filter_map(|href| match &base {
                    Some(base) => base.join(href).ok().map(|u| u.to_string()),
                    None => Some(href.to_string()),
                })
                .collect()
        })
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        if self.vanished(selector) {
            return Ok(false);
        }
        self.query(selector, |elements, _| !elements.is_empty())
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        if self.vanished(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }

        // (href to follow, markup to append, is broken)
        let (href, append, broken) = self.query(selector, |elements, base| {
            elements.first().map(|element| {
                let attrs = element.value();
                let href = if attrs.attr("data-no-nav").is_some() {
                    None
                } else {
                    attrs
                        .attr("href")
                        .and_then(|href| Url::parse(base).ok().and_then(|b| b.join(href).ok()))
                        .map(|u| u.to_string())
                };
                (
                    href,
                    attrs.attr("data-append").map(str::to_string),
                    attrs.attr("data-broken").is_some(),
                )
            })
        })?
        .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))?;

        self.journal().clicks.push(selector.to_string());

        if broken {
            return Err(BrowserError::Navigation("element not interactable".to_string()));
        }
        if let Some(markup) = append {
            self.state.lock().unwrap().html.push_str(&markup);
        }
        if let Some(href) = href {
            self.load(&href)?;
        }
        if self.state.lock().unwrap().url == self.site.login_url {
            self.try_login();
        }
        Ok(())
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>, BrowserError> {
        self.query(selector, |elements, _| {
            elements
                .first()
                .map(|element| element.value().attr(name).map(str::to_string))
        })?
        .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), BrowserError> {
        if !self.query(selector, |elements, _| !elements.is_empty())? {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.journal().fills.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError> {
        if !self.query(selector, |elements, _| !elements.is_empty())? {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.journal().enters.push(selector.to_string());
        self.try_login();
        Ok(())
    }

    async fn scroll_height(&self) -> Result<i64, BrowserError> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn scroll_by(&self, delta: i64) -> Result<(), BrowserError> {
        self.journal().scrolls.push(delta);
        if let Some(lazy) = self.site.lazy {
            let mut state = self.state.lock().unwrap();
            if delta >= lazy.min_step && state.growths_left > 0 {
                state.height += lazy.grow_by;
                state.growths_left -= 1;
            }
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.journal().closes += 1;
        Ok(())
    }
}

pub struct FakeLauncher {
    site: FakeSite,
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, headers: &BTreeMap<String, String>) -> Result<Box<dyn Page>, BrowserError> {
        if self.site.fail_launch {
            return Err(BrowserError::Launch("chrome not reachable".to_string()));
        }
        {
            let mut journal = self.site.journal.lock().unwrap();
            journal.launches += 1;
            journal.headers.push(headers.clone());
        }
        Ok(Box::new(self.site.open()))
    }
}

/// Collector that keeps every record in memory
#[derive(Default)]
pub struct MemoryCollector {
    records: Mutex<Vec<ResultRecord>>,
}

impl MemoryCollector {
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Collector for MemoryCollector {
    async fn deliver(&self, record: &ResultRecord) -> Result<(), DeliveryError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Build a validated job from JSON
pub fn job(strategy: Strategy, request: serde_json::Value) -> Job {
    let request: JobRequest = serde_json::from_value(request).unwrap();
    request.into_job(strategy, "TestAgent/1.0").unwrap()
}

/// Navigator with the default load, idle and click-wait timeouts
pub fn navigator() -> Navigator {
    Navigator::new(Duration::from_secs(15), Duration::from_secs(10), Duration::from_secs(10))
}

/// Run one strategy over a fresh page of `site` and collect its records
pub async fn run_strategy(
    site: &FakeSite,
    strategy: Strategy,
    request: serde_json::Value,
    cancel: CancellationToken,
) -> (Result<(), StrategyError>, Vec<ResultRecord>) {
    let job = job(strategy, request);
    let collector = Arc::new(MemoryCollector::default());
    let mut channel = DeliveryChannel::new(collector.clone(), job.strategy, job.meta.clone());
    let page = site.open();
    let navigator = navigator();

    let result = {
        let mut ctx = CrawlContext::new(&job, &page, &navigator, &mut channel, &cancel);
        strategy.execute(&mut ctx).await
    };
    (result, collector.records())
}

/// Exactly one record is terminal, and it is the last one delivered
pub fn assert_single_terminal(records: &[ResultRecord]) {
    let terminal: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_last)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![records.len() - 1], "records: {:#?}", records);
}
