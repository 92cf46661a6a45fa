//! Deterministic partition-source simulation.
//!
//! [`SimulatedPartitionSource`] wraps any [`PartitionSource`] and adds seeded
//! latency and fault injection, so concurrency and cancellation scenarios can
//! be reproduced exactly. Combine it with `#[tokio::test(start_paused = true)]`
//! to make simulated latency cost no wall-clock time.
//!
//! # Key Features
//!
//! - **Deterministic RNG**: the same seed yields the same latencies and faults
//! - **Fault Injection**: fail specific calls or a fraction of all calls
//! - **Latency Shaping**: a custom latency function to force arrival orders
//! - **Request Recording**: every chunk request is kept for assertions
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use arco_test_utils::{FaultConfig, PartitionSetFactory, SimulatedPartitionSource};
//!
//! let inner = PartitionSetFactory::source(PartitionSetFactory::daily("daily", 200));
//! let source = SimulatedPartitionSource::with_seed(inner, 7)
//!     .with_faults(FaultConfig::fail_on_call(3));
//! ```

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use arco_partitions::error::FetchError;
use arco_partitions::model::Cursor;
use arco_partitions::source::{ChunkRequest, PartitionSource, PartitionsPage};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a network failure per call (0.0 - 1.0).
    pub network_failure_rate: f64,

    /// 1-based call numbers that always fail with a network error.
    pub fail_calls: BTreeSet<usize>,

    /// Simulated latency range (min, max) in milliseconds.
    pub latency_range_ms: Option<(u64, u64)>,
}

impl FaultConfig {
    /// Creates a config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Creates a config with random latency and no failures.
    #[must_use]
    pub fn jittery(min_ms: u64, max_ms: u64) -> Self {
        Self {
            latency_range_ms: Some((min_ms, max_ms)),
            ..Self::default()
        }
    }

    /// Creates a config that fails exactly call `call`.
    #[must_use]
    pub fn fail_on_call(call: usize) -> Self {
        Self {
            fail_calls: BTreeSet::from([call]),
            ..Self::default()
        }
    }

    /// Creates a config simulating a flaky network.
    #[must_use]
    pub fn flaky_network() -> Self {
        Self {
            network_failure_rate: 0.1,
            latency_range_ms: Some((10, 500)),
            ..Self::default()
        }
    }
}

/// A chunk request seen by the simulated source.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    /// 1-based call number.
    pub call: usize,
    /// The request as received.
    pub request: ChunkRequest,
    /// Latency applied before answering.
    pub latency: Duration,
    /// Whether a network failure was injected.
    pub injected_failure: bool,
}

type LatencyFn = Box<dyn Fn(usize, &ChunkRequest) -> Duration + Send + Sync>;

/// Partition source with deterministic latency and fault injection.
pub struct SimulatedPartitionSource<S> {
    inner: S,
    seed: u64,
    rng: Mutex<StdRng>,
    faults: Mutex<FaultConfig>,
    latency_fn: Option<LatencyFn>,
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedFetch>>,
}

impl<S> SimulatedPartitionSource<S> {
    /// Wraps `inner` with a seeded simulation and no faults.
    ///
    /// The seed ensures deterministic behavior - the same seed will produce
    /// the same sequence of latencies and failures.
    #[must_use]
    pub fn with_seed(inner: S, seed: u64) -> Self {
        Self {
            inner,
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            faults: Mutex::new(FaultConfig::no_faults()),
            latency_fn: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the fault configuration.
    #[must_use]
    pub fn with_faults(self, config: FaultConfig) -> Self {
        *self.faults.lock().expect("lock poisoned") = config;
        self
    }

    /// Overrides the latency of each call.
    ///
    /// The function receives the 1-based call number and the request. It
    /// replaces `latency_range_ms`.
    #[must_use]
    pub fn with_latency_fn<F>(mut self, latency: F) -> Self
    where
        F: Fn(usize, &ChunkRequest) -> Duration + Send + Sync + 'static,
    {
        self.latency_fn = Some(Box::new(latency));
        self
    }

    /// Replaces the fault configuration.
    pub fn configure_faults(&self, config: FaultConfig) {
        *self.faults.lock().expect("lock poisoned") = config;
    }

    /// Returns the seed used for this simulation.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the wrapped source.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns every request received so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedFetch> {
        let mut requests = self.requests.lock().expect("lock poisoned").clone();
        requests.sort_by_key(|fetch| fetch.call);
        requests
    }

    /// Decides latency and failure for one call.
    fn plan_call(&self, call: usize, request: &ChunkRequest) -> (Duration, bool) {
        let faults = self.faults.lock().expect("lock poisoned");
        let mut rng = self.rng.lock().expect("lock poisoned");

        let latency = match (&self.latency_fn, faults.latency_range_ms) {
            (Some(latency), _) => latency(call, request),
            (None, Some((min, max))) => Duration::from_millis(rng.gen_range(min..=max)),
            (None, None) => Duration::ZERO,
        };
        let fail = faults.fail_calls.contains(&call)
            || (faults.network_failure_rate > 0.0
                && rng.r#gen::<f64>() < faults.network_failure_rate);
        (latency, fail)
    }
}

#[async_trait]
impl<S: PartitionSource> PartitionSource for SimulatedPartitionSource<S> {
    async fn fetch_partitions(&self, request: &ChunkRequest) -> Result<PartitionsPage, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let (latency, fail) = self.plan_call(call, request);
        self.requests
            .lock()
            .expect("lock poisoned")
            .push(RecordedFetch {
                call,
                request: request.clone(),
                latency,
                injected_failure: fail,
            });

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(FetchError::network(format!(
                "simulated network failure on call {call}"
            )));
        }
        self.inner.fetch_partitions(request).await
    }

    fn seek(&self, partition_set: &str, from: Option<&Cursor>, skip: usize) -> Option<Cursor> {
        self.inner.seek(partition_set, from, skip)
    }
}

impl<S> std::fmt::Debug for SimulatedPartitionSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPartitionSource")
            .field("seed", &self.seed)
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}
