//! Closed-loop quantization step control
//!
//! The audio path records what it sends and receives into [`RateCounters`];
//! once per control period the [`RateController`] drains the counters,
//! applies a [`ControlLaw`] and publishes the new step through an atomic
//! that the encoder reads on every chunk.

use crossbeam::utils::CachePadded;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Send/receive/loss counters for one control period.
///
/// Written by the audio and receive threads, drained by the controller.
#[derive(Debug, Default)]
pub struct RateCounters {
    sent_chunks: CachePadded<AtomicU64>,
    sent_bytes: CachePadded<AtomicU64>,
    received_chunks: CachePadded<AtomicU64>,
    lost_packets: CachePadded<AtomicU64>,
    rms_sum: CachePadded<AtomicU64>,
    rms_square_sum: CachePadded<AtomicU64>,
    rms_count: CachePadded<AtomicU64>,
}

impl RateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A packet of `bytes` left for the network
    pub fn record_sent(&self, bytes: usize) {
        self.sent_chunks.fetch_add(1, Ordering::Relaxed);
        self.sent_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A valid packet arrived
    pub fn record_received(&self) {
        self.received_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// `count` packets were detected missing
    pub fn record_lost(&self, count: u64) {
        self.lost_packets.fetch_add(count, Ordering::Relaxed);
    }

    /// RMS level of a captured chunk
    pub fn record_level(&self, rms: f64) {
        let rms = rms.round().clamp(0.0, u32::MAX as f64) as u64;
        self.rms_sum.fetch_add(rms, Ordering::Relaxed);
        self.rms_square_sum.fetch_add(rms * rms, Ordering::Relaxed);
        self.rms_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Read without resetting
    pub fn peek(&self) -> CounterSnapshot {
        CounterSnapshot {
            sent_chunks: self.sent_chunks.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            received_chunks: self.received_chunks.load(Ordering::Relaxed),
            lost_packets: self.lost_packets.load(Ordering::Relaxed),
            rms_sum: self.rms_sum.load(Ordering::Relaxed),
            rms_square_sum: self.rms_square_sum.load(Ordering::Relaxed),
            rms_count: self.rms_count.load(Ordering::Relaxed),
        }
    }

    /// Read and reset to zero
    pub fn take(&self) -> CounterSnapshot {
        CounterSnapshot {
            sent_chunks: self.sent_chunks.swap(0, Ordering::AcqRel),
            sent_bytes: self.sent_bytes.swap(0, Ordering::AcqRel),
            received_chunks: self.received_chunks.swap(0, Ordering::AcqRel),
            lost_packets: self.lost_packets.swap(0, Ordering::AcqRel),
            rms_sum: self.rms_sum.swap(0, Ordering::AcqRel),
            rms_square_sum: self.rms_square_sum.swap(0, Ordering::AcqRel),
            rms_count: self.rms_count.swap(0, Ordering::AcqRel),
        }
    }
}

/// Counter values drained at the end of a control period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub sent_chunks: u64,
    pub sent_bytes: u64,
    pub received_chunks: u64,
    pub lost_packets: u64,
    pub rms_sum: u64,
    pub rms_square_sum: u64,
    pub rms_count: u64,
}

impl CounterSnapshot {
    /// Variance of the per-chunk RMS level over the period
    pub fn level_variance(&self) -> f64 {
        if self.rms_count == 0 {
            return 0.0;
        }
        let n = self.rms_count as f64;
        let mean = self.rms_sum as f64 / n;
        (self.rms_square_sum as f64 / n - mean * mean).max(0.0)
    }

    /// Outgoing bit rate over `period`, in kbit/s
    pub fn sent_kbps(&self, period: Duration) -> f64 {
        let secs = period.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.sent_bytes as f64 * 8.0 / 1000.0 / secs
    }
}

/// State shared between the audio path and the controller thread
#[derive(Debug)]
pub struct RateState {
    pub counters: RateCounters,
    step: AtomicU32,
}

impl RateState {
    pub fn new(initial_step: u32) -> Self {
        Self {
            counters: RateCounters::new(),
            step: AtomicU32::new(initial_step.max(1)),
        }
    }

    /// Current global quantization step
    pub fn step(&self) -> u32 {
        self.step.load(Ordering::Acquire)
    }

    pub fn set_step(&self, step: u32) {
        self.step.store(step.max(1), Ordering::Release);
    }
}

/// Inclusive range the controller keeps the step in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBounds {
    pub minimal: u32,
    pub max: u32,
}

impl StepBounds {
    pub fn new(minimal: u32, max: u32) -> Self {
        let minimal = minimal.max(1);
        Self {
            minimal,
            max: max.max(minimal),
        }
    }

    pub fn clamp(&self, step: i64) -> u32 {
        step.clamp(self.minimal as i64, self.max as i64) as u32
    }
}

/// A rule deriving the next step from one period of counters.
///
/// Returns an unclamped proposal; the controller clamps it.
pub trait ControlLaw: Send {
    fn next_step(&mut self, step: u32, counters: &CounterSnapshot, period: Duration) -> i64;

    fn name(&self) -> &'static str;
}

/// `step += sent − received − 1`
#[derive(Debug, Clone, Default)]
pub struct LossAdditive;

impl ControlLaw for LossAdditive {
    fn next_step(&mut self, step: u32, counters: &CounterSnapshot, _period: Duration) -> i64 {
        step as i64 + counters.sent_chunks as i64 - counters.received_chunks as i64 - 1
    }

    fn name(&self) -> &'static str {
        "loss-additive"
    }
}

/// Double on heavy loss, otherwise decay by a factor every period
#[derive(Debug, Clone)]
pub struct ConservativeExponential {
    pub loss_threshold: u64,
    pub decay: f64,
}

impl ControlLaw for ConservativeExponential {
    fn next_step(&mut self, step: u32, counters: &CounterSnapshot, _period: Duration) -> i64 {
        let mut step = step as f64;
        if counters.lost_packets > self.loss_threshold {
            step *= 2.0;
        }
        (step / self.decay.max(1.0)).floor() as i64
    }

    fn name(&self) -> &'static str {
        "conservative-exponential"
    }
}

/// Track a target outgoing bit rate
#[derive(Debug, Clone)]
pub struct TargetBitrate {
    pub target_kbps: f64,
    /// Weight of the history in the moving average, in `[0, 1)`
    pub smoothing: f64,
    /// Minimum RMS-level variance before the step may shrink
    pub min_level_variance: f64,
    average_kbps: Option<f64>,
}

impl TargetBitrate {
    pub fn new(target_kbps: f64, smoothing: f64, min_level_variance: f64) -> Self {
        Self {
            target_kbps,
            smoothing: smoothing.clamp(0.0, 0.99),
            min_level_variance,
            average_kbps: None,
        }
    }

    pub fn average_kbps(&self) -> Option<f64> {
        self.average_kbps
    }
}

impl ControlLaw for TargetBitrate {
    fn next_step(&mut self, step: u32, counters: &CounterSnapshot, period: Duration) -> i64 {
        let observed = counters.sent_kbps(period);
        let average = match self.average_kbps {
            Some(avg) => self.smoothing * avg + (1.0 - self.smoothing) * observed,
            None => observed,
        };
        self.average_kbps = Some(average);

        let error = average - self.target_kbps;
        let step = step as i64;
        if error > 0.0 {
            step + error.sqrt().ceil() as i64
        } else if counters.level_variance() >= self.min_level_variance {
            step - (-error).sqrt().floor() as i64
        } else {
            step
        }
    }

    fn name(&self) -> &'static str {
        "target-bitrate"
    }
}

/// Configurable choice of control law
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateLaw {
    LossAdditive,
    ConservativeExponential {
        #[serde(default = "default_loss_threshold")]
        loss_threshold: u64,
        #[serde(default = "default_decay")]
        decay: f64,
    },
    TargetBitrate {
        target_kbps: f64,
        #[serde(default = "default_smoothing")]
        smoothing: f64,
        #[serde(default)]
        min_level_variance: f64,
    },
}

fn default_loss_threshold() -> u64 {
    0
}

fn default_decay() -> f64 {
    1.1
}

fn default_smoothing() -> f64 {
    0.8
}

impl Default for RateLaw {
    fn default() -> Self {
        RateLaw::LossAdditive
    }
}

impl RateLaw {
    pub fn build(&self) -> Box<dyn ControlLaw> {
        match self {
            RateLaw::LossAdditive => Box::new(LossAdditive),
            RateLaw::ConservativeExponential {
                loss_threshold,
                decay,
            } => Box::new(ConservativeExponential {
                loss_threshold: *loss_threshold,
                decay: *decay,
            }),
            RateLaw::TargetBitrate {
                target_kbps,
                smoothing,
                min_level_variance,
            } => Box::new(TargetBitrate::new(*target_kbps, *smoothing, *min_level_variance)),
        }
    }
}

/// One control decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub previous: u32,
    pub step: u32,
    pub counters: CounterSnapshot,
}

/// Periodic step controller
pub struct RateController {
    state: Arc<RateState>,
    law: Box<dyn ControlLaw>,
    bounds: StepBounds,
    period: Duration,
}

impl RateController {
    pub fn new(state: Arc<RateState>, law: Box<dyn ControlLaw>, bounds: StepBounds, period: Duration) -> Self {
        state.set_step(bounds.clamp(state.step() as i64));
        Self {
            state,
            law,
            bounds,
            period,
        }
    }

    pub fn state(&self) -> &Arc<RateState> {
        &self.state
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one control period: drain counters, apply the law, publish the step.
    pub fn tick(&mut self) -> RateDecision {
        let counters = self.state.counters.take();
        let previous = self.state.step();
        let proposal = self.law.next_step(previous, &counters, self.period);
        let step = self.bounds.clamp(proposal);
        self.state.set_step(step);

        if step != previous {
            info!(
                "Rate control ({}): step {} -> {} (sent {}, received {}, lost {})",
                self.law.name(),
                previous,
                step,
                counters.sent_chunks,
                counters.received_chunks,
                counters.lost_packets
            );
        } else {
            debug!("Rate control ({}): step stays {}", self.law.name(), step);
        }

        RateDecision {
            previous,
            step,
            counters,
        }
    }

    /// Run the controller on its own thread until the handle is stopped or dropped.
    pub fn spawn(mut self) -> Result<RateControllerHandle> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let period = self.period;

        let handle = thread::Builder::new()
            .name("rate-control".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.tick();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(Error::Io)?;

        Ok(RateControllerHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(handle),
        })
    }
}

/// Owner of a running controller thread
pub struct RateControllerHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RateControllerHandle {
    /// Stop the controller and wait for its thread
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RateControllerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(1);

    fn controller(law: RateLaw, initial: u32, bounds: StepBounds) -> RateController {
        RateController::new(Arc::new(RateState::new(initial)), law.build(), bounds, PERIOD)
    }

    fn record(state: &RateState, sent: u64, received: u64, lost: u64) {
        for _ in 0..sent {
            state.counters.record_sent(1000);
        }
        for _ in 0..received {
            state.counters.record_received();
        }
        state.counters.record_lost(lost);
    }

    #[test]
    fn test_loss_additive_grows_with_loss() {
        let mut rc = controller(RateLaw::LossAdditive, 1, StepBounds::new(1, 1000));
        record(rc.state(), 43, 34, 9);

        let decision = rc.tick();
        assert_eq!(decision.step, 1 + 43 - 34 - 1);
        assert_eq!(rc.state().counters.peek(), CounterSnapshot::default());
    }

    #[test]
    fn test_loss_additive_decays_to_floor_without_loss() {
        let mut rc = controller(RateLaw::LossAdditive, 3, StepBounds::new(2, 1000));
        for _ in 0..5 {
            record(rc.state(), 43, 43, 0);
            rc.tick();
        }
        assert_eq!(rc.state().step(), 2);
    }

    #[test]
    fn test_conservative_exponential() {
        let law = RateLaw::ConservativeExponential {
            loss_threshold: 2,
            decay: 1.1,
        };
        let mut rc = controller(law, 10, StepBounds::new(1, 64));

        record(rc.state(), 0, 0, 5);
        assert_eq!(rc.tick().step, 18); // floor(20 / 1.1)

        record(rc.state(), 0, 0, 1);
        assert_eq!(rc.tick().step, 16); // floor(18 / 1.1)

        for _ in 0..10 {
            record(rc.state(), 0, 0, 100);
            rc.tick();
        }
        assert_eq!(rc.state().step(), 64);
    }

    #[test]
    fn test_target_bitrate_raises_step_when_over_budget() {
        let law = RateLaw::TargetBitrate {
            target_kbps: 100.0,
            smoothing: 0.0,
            min_level_variance: 0.0,
        };
        let mut rc = controller(law, 4, StepBounds::new(1, 1000));

        // 50 packets of 1000 bytes in one second = 400 kbit/s
        record(rc.state(), 50, 0, 0);
        let decision = rc.tick();
        assert_eq!(decision.step, 4 + 18); // ceil(sqrt(300))
    }

    #[test]
    fn test_target_bitrate_needs_variance_to_lower_step() {
        let law = TargetBitrate::new(1000.0, 0.0, 50.0);
        let quiet = CounterSnapshot {
            sent_bytes: 1000,
            ..CounterSnapshot::default()
        };

        let mut law_box: Box<dyn ControlLaw> = Box::new(law);
        assert_eq!(law_box.next_step(20, &quiet, PERIOD), 20);

        let busy = CounterSnapshot {
            rms_sum: 100,
            rms_square_sum: 20_000,
            rms_count: 2,
            ..quiet
        };
        assert!(busy.level_variance() >= 50.0);
        assert!(law_box.next_step(20, &busy, PERIOD) < 20);
    }

    #[test]
    fn test_bounds_are_enforced() {
        let bounds = StepBounds::new(0, 0);
        assert_eq!(bounds.minimal, 1);
        assert_eq!(bounds.max, 1);
        assert_eq!(StepBounds::new(4, 32).clamp(-10), 4);
        assert_eq!(StepBounds::new(4, 32).clamp(1 << 40), 32);
    }

    #[test]
    fn test_counters_record_levels() {
        let counters = RateCounters::new();
        counters.record_level(10.0);
        counters.record_level(30.0);
        let snapshot = counters.take();
        assert_eq!(snapshot.rms_count, 2);
        assert!((snapshot.level_variance() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_spawned_controller_stops() {
        let rc = RateController::new(
            Arc::new(RateState::new(1)),
            RateLaw::LossAdditive.build(),
            StepBounds::new(1, 10),
            Duration::from_millis(5),
        );
        let mut handle = rc.spawn().unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_law_config_parses() {
        let law: RateLaw = toml::from_str("kind = \"target_bitrate\"\ntarget_kbps = 256.0").unwrap();
        assert_eq!(
            law,
            RateLaw::TargetBitrate {
                target_kbps: 256.0,
                smoothing: 0.8,
                min_level_variance: 0.0
            }
        );
    }
}
