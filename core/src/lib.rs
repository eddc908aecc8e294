pub mod core;
pub mod error;
pub mod http;
pub mod modules;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use crate::core::cache::ResponseCache;
pub use crate::core::config_store::ConfigStore;
pub use crate::core::engine::{run_campaign, AttackOrchestrator, RESULTS_FILE};
pub use crate::core::mutator::{expand_probes, AttackKind, Mutation, Probe, MUTATIONS};
pub use crate::core::result_aggregator::{load_results, save_results, AttackResult, ProbeStatus};
pub use crate::core::throttle::{RateLimiter, RateSlot};
pub use crate::error::{ReconError, Result};
pub use crate::http::executor::{print_snapshot, Analyzer, RequestExecutor, RetryPolicy};
pub use crate::http::{
    validate_url, BlockingTransport, ExecutionMode, HttpTransport, RequestDescriptor,
    ResponseSnapshot, Transport, TransportError,
};
pub use crate::modules::llm::LlmAnnotator;
pub use crate::utils::classifier::{classify, classify_file, Behavior};
pub use crate::utils::scenario::{Scenario, Step, StepOutcome};

/// Per-run configuration shared by the CLI, scenarios and the probing core.
///
/// Built once per run and handed by reference to every component that needs
/// it. Keys missing from a config file fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconConfig {
    pub llm_api_key: String,
    pub timeout: u64,
    pub max_retries: u32,
    pub retry_delay: f64,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub log_level: String,
    pub output_dir: String,
    pub allowed_domains: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub target: String,
    #[serde(rename = "async")]
    pub async_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: usize,
    /// Accepted for compatibility with existing config files. The fixed-window
    /// limiter only uses `requests_per_second`.
    pub burst: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub verify_ssl: bool,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    /// Seconds.
    pub ttl: f64,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            timeout: 30,
            max_retries: 3,
            retry_delay: 1.0,
            user_agent: "DNARecon/1.0".to_string(),
            proxy: None,
            log_level: "info".to_string(),
            output_dir: ConfigStore::default_dir()
                .join("outputs")
                .to_string_lossy()
                .to_string(),
            allowed_domains: Vec::new(),
            excluded_paths: vec!["/logout".to_string(), "/admin".to_string()],
            rate_limit: RateLimitConfig::default(),
            security: SecurityConfig::default(),
            cache: CacheConfig::default(),
            target: String::new(),
            async_mode: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst: 5,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            verify_ssl: true,
            follow_redirects: true,
            max_redirects: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl: 300.0,
        }
    }
}

impl ReconConfig {
    pub fn proxy_ref(&self) -> Option<&str> {
        self.proxy.as_deref().filter(|p| !p.is_empty())
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.async_mode {
            ExecutionMode::Cooperative
        } else {
            ExecutionMode::Blocking
        }
    }
}

/// Seconds from the config file as a `Duration`. Negative and NaN values
/// become zero, values too large to represent saturate at `Duration::MAX`.
pub(crate) fn config_seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Splits `Name: value` strings into header pairs, skipping entries without a name.
pub fn parse_custom_headers(raw: &[String]) -> Vec<(String, String)> {
    raw.iter().filter_map(|h| {
        let mut parts = h.splitn(2, ':');
        let key = parts.next()?.trim().to_string();
        let val = parts.next().unwrap_or("").trim().to_string();
        if key.is_empty() { return None; }
        Some((key, val))
    }).collect()
}

/// Output abstraction for attack campaigns.
/// The CLI renders it with a progress bar, tests capture it.
pub trait ProbeEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_result(&self, result: &AttackResult);
    fn on_progress(&self, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn ProbeEventSink>;

/// Sink that discards everything.
pub struct SilentSink;

impl SilentSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self)
    }
}

impl ProbeEventSink for SilentSink {
    fn on_log(&self, _level: &str, _message: &str) {}
    fn on_result(&self, _result: &AttackResult) {}
    fn on_progress(&self, _current: usize, _total: usize) {}
}
