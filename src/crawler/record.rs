use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::crawler::strategy::Strategy;

/// Page processed and content captured
pub const STATUS_OK: u16 = 200;

/// Job rejected as malformed
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Work unit failed
pub const STATUS_FAILED: u16 = 500;

/// Extracted fields in selector order. Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, Vec<String>)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. A repeated key replaces the earlier value in place.
    pub fn insert(&mut self, key: &str, values: Vec<String>) {
        match self.0.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, slot)) => *slot = values,
            None => self.0.push((key.to_string(), values)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, values) in &self.0 {
            map.serialize_entry(key, values)?;
        }
        map.end()
    }
}

/// Structured page content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Content {
    /// Selector results keyed by field name
    Fields(Fields),
    /// Discovered links (seed traversal)
    Links(Vec<String>),
}

/// What a successful work unit captured from the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    Content(Content),
    Html(String),
}

/// The unit streamed to the collector, one per processed URL or page.
/// Exactly one of `content`, `html`, `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    #[serde(rename = "type")]
    pub strategy: Strategy,

    pub original_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub meta: Map<String, Value>,

    pub is_last: bool,

    pub status_code: u16,
}

impl ResultRecord {
    pub fn success(
        strategy: Strategy,
        meta: Map<String, Value>,
        original_url: &str,
        final_url: Option<String>,
        capture: Capture,
        is_last: bool,
    ) -> Self {
        let (content, html) = match capture {
            Capture::Content(content) => (Some(content), None),
            Capture::Html(html) => (None, Some(html)),
        };

        Self {
            strategy,
            original_url: original_url.to_string(),
            final_url,
            content,
            html,
            error: None,
            meta,
            is_last,
            status_code: STATUS_OK,
        }
    }

    pub fn failure(
        strategy: Strategy,
        meta: Map<String, Value>,
        original_url: &str,
        error: String,
        is_last: bool,
    ) -> Self {
        Self {
            strategy,
            original_url: original_url.to_string(),
            final_url: None,
            content: None,
            html: None,
            error: Some(error),
            meta,
            is_last,
            status_code: STATUS_FAILED,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Field values of a successful selector extraction
    pub fn field(&self, key: &str) -> Option<&[String]> {
        match &self.content {
            Some(Content::Fields(fields)) => fields.get(key),
            _ => None,
        }
    }

    pub fn links(&self) -> Option<&[String]> {
        match &self.content {
            Some(Content::Links(links)) => Some(links),
            _ => None,
        }
    }
}
