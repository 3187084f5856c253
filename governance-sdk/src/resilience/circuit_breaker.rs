//! Circuit breaker state machine for one governed key
//!
//! One breaker owns the fault state of one (endpoint, service, method).
//! Counters are recorded into a sliding window; state transitions are
//! linearizable per breaker instance behind a single transition mutex, with
//! no lock shared across breakers.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::EndpointOptions;
use crate::resilience::window::{SlidingWindow, BUCKET_WIDTH_MS};
use crate::resilience::BreakerState;

/// Default number of buckets in a breaker's sliding window
pub const DEFAULT_WINDOW_BUCKETS: usize = 10;

/// Tunable breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Minimum calls in the window before the breaker may open
    pub request_volume_threshold: u64,

    /// How long an open breaker rejects calls before trial calls start
    pub sleep_window_ms: u64,

    /// Error-rate percentage above which the breaker opens
    pub error_threshold_percentage: u64,

    /// Consecutive successful trial calls required to close
    pub consecutive_success_threshold: u32,

    /// Buckets in the sliding window
    pub window_buckets: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            request_volume_threshold: crate::config::DEFAULT_REQUEST_VOLUME_THRESHOLD,
            sleep_window_ms: crate::config::DEFAULT_SLEEP_WINDOW_MS,
            error_threshold_percentage: crate::config::DEFAULT_ERROR_THRESHOLD_PCT,
            consecutive_success_threshold: crate::config::DEFAULT_CONSECUTIVE_SUCCESS_THRESHOLD,
            window_buckets: DEFAULT_WINDOW_BUCKETS,
        }
    }
}

impl From<&EndpointOptions> for BreakerConfig {
    fn from(options: &EndpointOptions) -> Self {
        Self {
            request_volume_threshold: options.request_volume_threshold,
            sleep_window_ms: options.sleep_window_ms,
            error_threshold_percentage: options.error_threshold_percentage,
            consecutive_success_threshold: options.consecutive_success_threshold,
            window_buckets: DEFAULT_WINDOW_BUCKETS,
        }
    }
}

/// Per-key circuit breaker built on a sliding window
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Current state
    state: RwLock<BreakerState>,

    /// Serializes state transitions and config replacement
    transition: Mutex<()>,

    /// Time-bucketed call statistics
    window: SlidingWindow,

    /// When the breaker last opened
    opened_at_ms: AtomicU64,

    /// Successful trial calls since entering half-open
    consecutive_success: AtomicU32,

    /// Construction time; opening is suppressed until one full window has
    /// passed, to avoid false positives on cold start
    created_at_ms: u64,

    /// Thresholds, replaced wholesale on operator changes
    config: RwLock<BreakerConfig>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state
    pub fn new(config: BreakerConfig, now_ms: u64) -> Self {
        Self {
            state: RwLock::new(BreakerState::Closed),
            transition: Mutex::new(()),
            window: SlidingWindow::new(config.window_buckets, now_ms),
            opened_at_ms: AtomicU64::new(0),
            consecutive_success: AtomicU32::new(0),
            created_at_ms: now_ms,
            config: RwLock::new(config),
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        *self.state.read()
    }

    /// Snapshot of the current thresholds
    pub fn config(&self) -> BreakerConfig {
        self.config.read().clone()
    }

    /// Replace the stored config wholesale if it changed.
    ///
    /// Taken under the transition lock so readers never observe a
    /// half-updated config.
    pub fn update_config(&self, config: BreakerConfig) {
        if *self.config.read() == config {
            return;
        }
        let _guard = self.transition.lock();
        *self.config.write() = config;
    }

    /// Record one call attempt
    pub fn record_call(&self, now_ms: u64) {
        self.window.record_call(now_ms);
    }

    /// Record one failed call; any failure voids a half-open success run
    pub fn record_failure(&self, now_ms: u64) {
        self.window.record_failure(now_ms);
        self.consecutive_success.store(0, Ordering::SeqCst);
    }

    /// Calls in the current window
    pub fn total_requests(&self) -> u64 {
        self.window.total_requests()
    }

    /// Error rate percentage over the current window
    pub fn error_rate(&self) -> u64 {
        self.window.error_rate()
    }

    /// Evaluate the Closed -> Open condition; returns true if this caller
    /// performed the transition.
    ///
    /// Requires the settle period to have elapsed since construction, then
    /// both the volume and error-rate thresholds to be exceeded.
    pub fn try_open(&self, now_ms: u64) -> bool {
        let config = self.config();
        let settle_ms = self.window.bucket_count() as u64 * BUCKET_WIDTH_MS;
        if now_ms.saturating_sub(self.created_at_ms) < settle_ms {
            return false;
        }
        if self.window.total_requests() <= config.request_volume_threshold {
            return false;
        }
        if self.window.error_rate() <= config.error_threshold_percentage {
            return false;
        }

        let _guard = self.transition.lock();
        if *self.state.read() != BreakerState::Closed {
            return false;
        }
        *self.state.write() = BreakerState::Open;
        self.opened_at_ms.store(now_ms, Ordering::SeqCst);
        log::warn!(
            "circuit breaker opened: error rate {}% over {} calls",
            self.window.error_rate(),
            self.window.total_requests()
        );
        true
    }

    /// Evaluate the Open -> HalfOpen condition; returns true if this caller
    /// performed the transition.
    pub fn try_half_open(&self, now_ms: u64) -> bool {
        if self.state() != BreakerState::Open {
            return false;
        }
        let sleep_window = self.config().sleep_window_ms;
        if now_ms.saturating_sub(self.opened_at_ms.load(Ordering::SeqCst)) < sleep_window {
            return false;
        }

        let _guard = self.transition.lock();
        if *self.state.read() != BreakerState::Open {
            return false;
        }
        *self.state.write() = BreakerState::HalfOpen;
        self.consecutive_success.store(0, Ordering::SeqCst);
        log::info!("circuit breaker half-open: sleep window elapsed");
        true
    }

    /// Record a successful trial call; closes the breaker once enough
    /// consecutive successes accumulate in half-open.
    pub fn on_success(&self) -> bool {
        if self.state() != BreakerState::HalfOpen {
            return false;
        }
        let successes = self.consecutive_success.fetch_add(1, Ordering::SeqCst) + 1;
        if successes < self.config().consecutive_success_threshold {
            return false;
        }

        let _guard = self.transition.lock();
        if *self.state.read() != BreakerState::HalfOpen {
            return false;
        }
        *self.state.write() = BreakerState::Closed;
        self.consecutive_success.store(0, Ordering::SeqCst);
        log::info!("circuit breaker closed: trial calls recovered");
        true
    }

    /// Re-open immediately after a failed trial call in half-open
    pub fn reopen(&self, now_ms: u64) -> bool {
        let _guard = self.transition.lock();
        if *self.state.read() != BreakerState::HalfOpen {
            return false;
        }
        *self.state.write() = BreakerState::Open;
        self.opened_at_ms.store(now_ms, Ordering::SeqCst);
        self.consecutive_success.store(0, Ordering::SeqCst);
        log::warn!("circuit breaker re-opened: trial call failed");
        true
    }

    /// Whether an open breaker is still inside its sleep window
    pub fn is_sleeping(&self, now_ms: u64) -> bool {
        self.state() == BreakerState::Open
            && now_ms.saturating_sub(self.opened_at_ms.load(Ordering::SeqCst))
                < self.config().sleep_window_ms
    }
}
