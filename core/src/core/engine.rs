use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use futures::future::join_all;
use log::warn;

use crate::core::cache::ResponseCache;
use crate::core::mutator::{expand_probes, Probe};
use crate::core::result_aggregator::AttackResult;
use crate::core::throttle::RateLimiter;
use crate::error::{ReconError, Result};
use crate::http::executor::{RequestExecutor, RetryPolicy};
use crate::http::{
    validate_url, BlockingTransport, ExecutionMode, HttpTransport, RequestDescriptor,
    ResponseSnapshot, Transport,
};
use crate::{ReconConfig, SilentSink, SinkRef};

/// Default results file written by campaigns.
pub const RESULTS_FILE: &str = "dna_results.json";

/// Drives the mutation catalog against one target.
///
/// For every payload URL the orchestrator:
/// 1. Takes a rate-limit slot
/// 2. Sends the request through the executor
/// 3. Releases the slot, whatever the outcome
/// 4. Records an `AttackResult`, turning errors into `ERROR` rows
///
/// A failing payload never stops the others.
pub struct AttackOrchestrator<T: Transport> {
    executor: Arc<RequestExecutor<T>>,
    limiter: Arc<RateLimiter>,
    headers: Vec<(String, String)>,
    use_cache: bool,
    sink: SinkRef,
}

impl<T: Transport> AttackOrchestrator<T> {
    pub fn new(executor: Arc<RequestExecutor<T>>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            executor,
            limiter,
            headers: Vec::new(),
            use_cache: true,
            sink: SilentSink::new_ref(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_sink(mut self, sink: SinkRef) -> Self {
        self.sink = sink;
        self
    }

    fn describe(&self, probe: &Probe) -> Result<RequestDescriptor> {
        Ok(RequestDescriptor::new(&probe.url, &self.headers)?.with_cache(self.use_cache))
    }

    fn record(&self, probe: &Probe, outcome: Result<ResponseSnapshot>, done: &AtomicUsize, total: usize) -> AttackResult {
        if let Err(ref e) = outcome {
            warn!("Payload {} for {} failed: {}", probe.url, probe.kind, e);
        }
        let result = AttackResult::from_outcome(probe, outcome);
        self.sink.on_result(&result);
        let current = done.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.on_progress(current, total);
        result
    }

    /// Cooperative campaign: every payload is in flight at once, bounded only
    /// by the rate limiter. Results come back in dispatch order.
    pub async fn run(&self, target: &str) -> Vec<AttackResult> {
        let probes = expand_probes(target);
        let total = probes.len();
        let done = AtomicUsize::new(0);
        self.sink.on_log("phase", &format!("[*] Dispatching {} payload(s) to {}", total, target));

        let dispatches = probes.iter().map(|probe| {
            let done = &done;
            async move {
                let slot = self.limiter.acquire().await;
                let outcome = match self.describe(probe) {
                    Ok(request) => self.executor.execute(&request).await,
                    Err(e) => Err(e),
                };
                slot.release();
                self.record(probe, outcome, done, total)
            }
        });

        join_all(dispatches).await
    }

    /// Blocking campaign: one worker thread per payload, results in
    /// submission order. Must be called off the async runtime, with a
    /// transport that does not need one.
    pub fn run_blocking(&self, target: &str) -> Vec<AttackResult> {
        let probes = expand_probes(target);
        let total = probes.len();
        let done = AtomicUsize::new(0);
        self.sink.on_log("phase", &format!("[*] Dispatching {} payload(s) to {}", total, target));

        thread::scope(|scope| {
            let workers: Vec<_> = probes
                .iter()
                .map(|probe| {
                    let done = &done;
                    let worker = scope.spawn(move || {
                        let slot = self.limiter.acquire_blocking();
                        let outcome = match self.describe(probe) {
                            Ok(request) => self.executor.execute_blocking(&request),
                            Err(e) => Err(e),
                        };
                        slot.release();
                        self.record(probe, outcome, done, total)
                    });
                    (probe, worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(probe, worker)| {
                    worker.join().unwrap_or_else(|_| {
                        AttackResult::failed(
                            probe,
                            &ReconError::Internal("payload worker panicked".to_string()),
                        )
                    })
                })
                .collect()
        })
    }
}

/// Runs the full catalog against `target` with transports, cache, limiter
/// and retry policy built from `config`.
///
/// The target is validated up front. After that every payload failure is
/// recorded as an `ERROR` row and never aborts the campaign.
pub async fn run_campaign(
    config: &ReconConfig,
    target: &str,
    headers: Vec<(String, String)>,
    use_cache: bool,
    sink: SinkRef,
) -> Result<Vec<AttackResult>> {
    let target = validate_url(target)?.to_string();
    let cache = Arc::new(ResponseCache::from_config(config));
    let limiter = Arc::new(RateLimiter::from_config(config));
    let policy = RetryPolicy::from_config(config);

    match config.execution_mode() {
        ExecutionMode::Cooperative => {
            let executor = RequestExecutor::new(HttpTransport::from_config(config)?, cache, policy);
            let orchestrator = AttackOrchestrator::new(Arc::new(executor), limiter)
                .with_headers(headers)
                .with_cache(use_cache)
                .with_sink(sink);
            Ok(orchestrator.run(&target).await)
        }
        ExecutionMode::Blocking => {
            let executor = RequestExecutor::new(BlockingTransport::from_config(config)?, cache, policy);
            let orchestrator = AttackOrchestrator::new(Arc::new(executor), limiter)
                .with_headers(headers)
                .with_cache(use_cache)
                .with_sink(sink);
            tokio::task::spawn_blocking(move || orchestrator.run_blocking(&target))
                .await
                .map_err(|e| ReconError::Internal(format!("campaign worker failed: {}", e)))
        }
    }
}
