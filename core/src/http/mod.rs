pub mod client;
pub mod executor;
pub mod validator;

pub use client::{BlockingTransport, HttpTransport};
pub use validator::validate_url;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use rand::prelude::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

/// Headers sent with every probe unless the caller overrides them.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "DENY"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Content-Security-Policy", "default-src 'self'"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
];

/// Rotated client identifiers.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
];

/// Which scheduling model executes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Suspends on network I/O, retry delays and rate-limit waits.
    #[default]
    Cooperative,
    /// Runs to completion on a worker thread.
    Blocking,
}

/// A validated GET request with its effective headers.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: String,
    headers: HeaderMap,
    use_cache: bool,
    mode: ExecutionMode,
}

impl RequestDescriptor {
    /// Validates `url` and assembles the header set: security defaults, then a
    /// random User-Agent from the pool, then `overrides` (which win on collision).
    /// Overrides that are not valid header names or values are skipped.
    pub fn new(url: &str, overrides: &[(String, String)]) -> Result<Self> {
        let url = validate_url(url)?.to_string();

        let mut headers = HeaderMap::new();
        for (name, value) in SECURITY_HEADERS {
            insert_header(&mut headers, name, value);
        }
        headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));

        for (key, val) in overrides {
            if !insert_header(&mut headers, key, val) {
                warn!("Skipping invalid header override '{}'", key);
            }
        }

        Ok(Self {
            url,
            headers,
            use_cache: true,
            mode: ExecutionMode::default(),
        })
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

/// Replaces any existing value under `key`. Returns false if the pair is not a valid header.
fn insert_header(headers: &mut HeaderMap, key: &str, val: &str) -> bool {
    match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(val)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
            true
        }
        _ => false,
    }
}

fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    *USER_AGENTS.choose(&mut rng).unwrap_or(&"Mozilla/5.0")
}

/// Status, headers and body of one completed round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ResponseSnapshot {
    /// Flattens a header map; repeated names are joined with ", ".
    pub fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers.iter() {
            let value = String::from_utf8_lossy(value.as_bytes()).to_string();
            out.entry(name.to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        out
    }
}

/// Why a single network attempt failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0}")]
    Other(String),
}

/// One network call plus the pause between retries.
///
/// The executor's retry logic is written once against this trait; the
/// cooperative and blocking scheduling models only differ in the adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> std::result::Result<ResponseSnapshot, TransportError>;

    async fn pause(&self, delay: Duration);
}
