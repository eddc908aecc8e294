use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use super::{
    BlockingTransport, ExecutionMode, HttpTransport, RequestDescriptor, ResponseSnapshot,
    Transport, TransportError,
};
use crate::core::cache::ResponseCache;
use crate::error::{ReconError, Result};
use crate::{config_seconds, ReconConfig};

/// How many attempts a request gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReconConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: config_seconds(config.retry_delay),
        }
    }
}

/// Last retryable failure seen by the executor.
enum Failure {
    Status { status: u16, body: String },
    Timeout,
    Connection(String),
}

impl Failure {
    fn describe(&self) -> String {
        match self {
            Failure::Status { status, .. } => format!("HTTP error {}", status),
            Failure::Timeout => "timeout".to_string(),
            Failure::Connection(msg) => msg.clone(),
        }
    }

    fn into_error(self, url: &str) -> ReconError {
        match self {
            Failure::Status { status, body } => {
                ReconError::Request(format!("HTTP error {}: {}", status, body))
            }
            Failure::Timeout => ReconError::Timeout(format!("timed out requesting {}", url)),
            Failure::Connection(msg) => ReconError::Request(format!("client error: {}", msg)),
        }
    }
}

/// Validate-cache-retry pipeline for a single GET, generic over the transport.
pub struct RequestExecutor<T: Transport> {
    transport: T,
    cache: Arc<ResponseCache>,
    policy: RetryPolicy,
}

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T, cache: Arc<ResponseCache>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            cache,
            policy,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Serves `request` from the cache or the network.
    ///
    /// Status >= 400, timeouts and connection failures are retried up to the
    /// policy's attempt budget; anything else fails on the spot with
    /// `ReconError::Internal`. A 200 response is cached when the request asks
    /// for caching.
    pub async fn execute(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        let url = request.url();

        if request.use_cache() {
            if let Some(cached) = self.cache.get(url) {
                debug!("Serving {} from cache", url);
                return Ok(cached);
            }
        }

        let attempts = self.policy.max_attempts;
        let mut last_failure = None;

        for attempt in 1..=attempts {
            let failure = match self.transport.fetch(url, request.headers()).await {
                Ok(snapshot) if snapshot.status >= 400 => Failure::Status {
                    status: snapshot.status,
                    body: snapshot.body,
                },
                Ok(snapshot) => {
                    if request.use_cache() && snapshot.status == 200 {
                        self.cache.set(url, snapshot.clone());
                    }
                    return Ok(snapshot);
                }
                Err(TransportError::Timeout(_)) => Failure::Timeout,
                Err(TransportError::Connection(msg)) => Failure::Connection(msg),
                Err(TransportError::Other(msg)) => {
                    error!("Unexpected failure requesting {}: {}", url, msg);
                    return Err(ReconError::Internal(msg));
                }
            };

            if attempt < attempts {
                warn!(
                    "Attempt {}/{} failed for {}: {}",
                    attempt,
                    attempts,
                    url,
                    failure.describe()
                );
                self.transport.pause(self.policy.delay).await;
            }
            last_failure = Some(failure);
        }

        let err = match last_failure {
            Some(failure) => failure.into_error(url),
            None => ReconError::Internal(format!("no attempt made for {}", url)),
        };
        error!("Giving up on {}: {}", url, err);
        Err(err)
    }

    /// Same contract as [`execute`](Self::execute), run to completion on the
    /// calling thread. Only meaningful for transports whose futures do not
    /// need an async reactor, such as [`BlockingTransport`].
    pub fn execute_blocking(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
        futures::executor::block_on(self.execute(request))
    }
}

/// Entry point for one-off requests in either execution model.
///
/// Both executors share one cache, so a response fetched cooperatively is a
/// cache hit for the blocking path and vice versa.
pub struct Analyzer<C: Transport = HttpTransport, B: Transport = BlockingTransport> {
    cooperative: RequestExecutor<C>,
    blocking: Arc<RequestExecutor<B>>,
}

impl Analyzer {
    pub fn from_config(config: &ReconConfig, cache: Arc<ResponseCache>) -> Result<Self> {
        let policy = RetryPolicy::from_config(config);
        Ok(Self::new(
            RequestExecutor::new(HttpTransport::from_config(config)?, Arc::clone(&cache), policy),
            RequestExecutor::new(BlockingTransport::from_config(config)?, cache, policy),
        ))
    }
}

impl<C: Transport, B: Transport + 'static> Analyzer<C, B> {
    pub fn new(cooperative: RequestExecutor<C>, blocking: RequestExecutor<B>) -> Self {
        Self {
            cooperative,
            blocking: Arc::new(blocking),
        }
    }

    /// Validates `url`, builds the request and runs it in `mode`.
    pub async fn run(
        &self,
        url: &str,
        overrides: &[(String, String)],
        mode: ExecutionMode,
        use_cache: bool,
    ) -> Result<ResponseSnapshot> {
        let request = RequestDescriptor::new(url, overrides)?
            .with_cache(use_cache)
            .with_mode(mode);
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: RequestDescriptor) -> Result<ResponseSnapshot> {
        match request.mode() {
            ExecutionMode::Cooperative => self.cooperative.execute(&request).await,
            ExecutionMode::Blocking => {
                let executor = Arc::clone(&self.blocking);
                tokio::task::spawn_blocking(move || executor.execute_blocking(&request))
                    .await
                    .map_err(|e| ReconError::Internal(format!("blocking worker failed: {}", e)))?
            }
        }
    }
}

/// Prints a response with credentials-bearing headers removed and the body
/// cut to 300 characters.
pub fn print_snapshot(url: &str, snapshot: &ResponseSnapshot) {
    println!("[*] Behaviour analysis for: {}", url);
    println!("Status: {}", snapshot.status);
    let visible: Vec<String> = snapshot
        .headers
        .iter()
        .filter(|(k, _)| {
            let k = k.to_lowercase();
            !k.starts_with("cookie") && !k.starts_with("authorization")
        })
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();
    println!("Headers: {{{}}}", visible.join(", "));
    println!("Body: {}", truncate_chars(&snapshot.body, 300));
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
