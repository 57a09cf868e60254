//! Progress Model — `spec.md` §4.5.
//!
//! Thread-safe weighted counter with monotonic update, rate-limited percent emission, and
//! moving-window ETA. Uses `parking_lot::Mutex` for the small locked regions (sampling ring,
//! phase) since it is uncontended and non-poisoning, with an explicit `Phase` state machine
//! per `spec.md` §9.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Ring buffer size for the ETA sampling window (`spec.md` §4.5, "K ≈ 10").
const RING_CAPACITY: usize = 10;

/// Build/level lifecycle state. Transitions out of `Running` are one-way and idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Receives `(percent_int, eta_seconds_or_null, status_message)` updates. Called from the
/// coordinator thread, never from workers directly (`spec.md` §6). Must be non-blocking.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u32, eta_seconds: Option<f64>, message: &str);
}

/// A [`ProgressSink`] that does nothing, used when the caller does not care about progress.
pub struct NoOpSink;
impl ProgressSink for NoOpSink {
    fn on_progress(&self, _percent: u32, _eta_seconds: Option<f64>, _message: &str) {}
}

struct Sampling {
    ring: VecDeque<(Instant, f64)>,
    is_sampling: bool,
}

/// Shared progress state for one build. Cheap to `Clone` (internally `Arc`-backed).
#[derive(Clone)]
pub struct ProgressState {
    inner: Arc<Inner>,
}

struct Inner {
    total: f64,
    sample_size: usize,
    current_bits: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    sampling: Mutex<Sampling>,
    phase: Mutex<Phase>,
    cancel_requested: AtomicBool,
    last_emitted_percent: AtomicU64,
}

impl ProgressState {
    pub fn new(total: f64, sample_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                total,
                sample_size,
                current_bits: AtomicU64::new(0f64.to_bits()),
                started_at: Mutex::new(None),
                sampling: Mutex::new(Sampling {
                    ring: VecDeque::with_capacity(RING_CAPACITY),
                    is_sampling: false,
                }),
                phase: Mutex::new(Phase::Idle),
                cancel_requested: AtomicBool::new(false),
                last_emitted_percent: AtomicU64::new(u64::MAX),
            }),
        }
    }

    /// Initializes `current = 0`, records `started_at`, enters `Running`.
    pub fn start(&self) {
        *self.inner.started_at.lock() = Some(Instant::now());
        self.inner.current_bits.store(0f64.to_bits(), Ordering::SeqCst);
        self.set_phase(Phase::Running);
        debug!(total = self.inner.total, "progress started");
    }

    fn current(&self) -> f64 {
        f64::from_bits(self.inner.current_bits.load(Ordering::SeqCst))
    }

    /// Atomically adds `delta` to `current`, clamping at `total`, pushes a sample into the
    /// ETA ring buffer, and emits `progress_updated` through `sink` if the integer
    /// percentage changed.
    pub fn advance(&self, delta: f64, sink: &dyn ProgressSink) {
        debug_assert!(delta >= 0.0, "advance delta must be non-negative");
        let total = self.inner.total;
        let new_current = loop {
            let before_bits = self.inner.current_bits.load(Ordering::SeqCst);
            let before = f64::from_bits(before_bits);
            let after = (before + delta).min(total);
            let after_bits = after.to_bits();
            if self
                .inner
                .current_bits
                .compare_exchange(before_bits, after_bits, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break after;
            }
        };

        self.note_elapsed(new_current);

        let percent = if total > 0.0 {
            ((new_current / total) * 100.0).floor().clamp(0.0, 100.0) as u32
        } else {
            100
        };
        let last = self.inner.last_emitted_percent.load(Ordering::SeqCst);
        if last == u64::MAX || percent as u64 != last {
            self.inner.last_emitted_percent.store(percent as u64, Ordering::SeqCst);
            let eta = self.eta_seconds(new_current);
            info!(percent, ?eta, "progress_updated");
            sink.on_progress(percent, eta, "");
        }
    }

    /// Push `(now, current)` into the bounded ring buffer and flip into the sampling state
    /// once `current >= sample_size`.
    fn note_elapsed(&self, current: f64) {
        let mut sampling = self.inner.sampling.lock();
        if sampling.ring.len() == RING_CAPACITY {
            sampling.ring.pop_front();
        }
        sampling.ring.push_back((Instant::now(), current));
        if current >= self.inner.sample_size as f64 {
            sampling.is_sampling = true;
        }
    }

    /// Smoothed speed (units/sec) over the ring buffer, or `None` before sampling begins or
    /// while the slope is non-positive.
    fn smoothed_speed(&self) -> Option<f64> {
        let sampling = self.inner.sampling.lock();
        if !sampling.is_sampling || sampling.ring.len() < 2 {
            return None;
        }
        let (t0, c0) = *sampling.ring.front().unwrap();
        let (t1, c1) = *sampling.ring.back().unwrap();
        let dt = t1.duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            return None;
        }
        let speed = (c1 - c0) / dt;
        (speed > 0.0).then_some(speed)
    }

    fn eta_seconds(&self, current: f64) -> Option<f64> {
        let speed = self.smoothed_speed()?;
        let remaining = (self.inner.total - current).max(0.0);
        Some(remaining / speed)
    }

    pub fn percent(&self) -> u32 {
        let total = self.inner.total;
        if total <= 0.0 {
            return 100;
        }
        ((self.current() / total) * 100.0).floor().clamp(0.0, 100.0) as u32
    }

    pub fn request_cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    /// One-way, idempotent transition out of `Running`.
    pub fn set_phase(&self, phase: Phase) {
        let mut current_phase = self.inner.phase.lock();
        if *current_phase == Phase::Idle || *current_phase == Phase::Running {
            *current_phase = phase;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.inner
            .started_at
            .lock()
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    pub fn total(&self) -> f64 {
        self.inner.total
    }

    pub fn sample_size(&self) -> usize {
        self.inner.sample_size
    }
}

/// A cheap, shareable handle for cooperative cancellation (`spec.md` §6).
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recording {
        events: StdMutex<Vec<(u32, Option<f64>)>>,
    }
    impl ProgressSink for Recording {
        fn on_progress(&self, percent: u32, eta_seconds: Option<f64>, _message: &str) {
            self.events.lock().unwrap().push((percent, eta_seconds));
        }
    }

    #[test]
    fn advance_is_monotonic_and_clamped() {
        let state = ProgressState::new(10.0, 20);
        state.start();
        let sink = NoOpSink;
        state.advance(3.0, &sink);
        assert!((state.current() - 3.0).abs() < 1e-9);
        state.advance(100.0, &sink);
        assert!((state.current() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn emits_only_on_integer_percent_change() {
        let state = ProgressState::new(1000.0, 20);
        state.start();
        let sink = Recording {
            events: StdMutex::new(Vec::new()),
        };
        for _ in 0..5 {
            state.advance(1.0, &sink);
        }
        // 5 advances of 0.1% each never cross an integer boundary.
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn reaches_100_percent_exactly_at_total() {
        let state = ProgressState::new(50.0, 20);
        state.start();
        let sink = NoOpSink;
        state.advance(50.0, &sink);
        assert_eq!(state.percent(), 100);
    }

    #[test]
    fn cancel_token_is_observed_after_set() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn phase_transition_out_of_running_is_one_way() {
        let state = ProgressState::new(10.0, 5);
        state.start();
        assert_eq!(state.phase(), Phase::Running);
        state.set_phase(Phase::Cancelled);
        assert_eq!(state.phase(), Phase::Cancelled);
        state.set_phase(Phase::Completed);
        assert_eq!(state.phase(), Phase::Cancelled, "transition out of terminal phase must be ignored");
    }
}
