//! # Tuning Session
//!
//! Lifecycle `idle -> active -> idle` around one capture. While active, an
//! analysis thread owns the [`PitchEstimator`] and is the only writer of the
//! cached [`PitchResult`] and the [`StabilityTracker`]. Callers block in
//! [`TuningSession::wait_for_pitch`] until the same string has been held for
//! the dwell time, the session is stopped, or the timeout passes.
//!
//! ## Architecture
//! - **Capture**: an [`AudioBackend`] pushes [`AudioEvent`]s into a channel
//! - **Analysis thread**: estimator -> matcher -> shared state, per block
//! - **Waiters**: sleep on a condvar, woken by new results, by `stop()`, or
//!   by the poll interval so a dwell can elapse without new audio

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioBackend, AudioError, AudioEvent, CaptureStream};
use crate::catalog::{self, TuningPreset};
use crate::config::TunerConfig;
use crate::estimator::{EstimatorError, PitchEstimator};
use crate::matcher::{build_pitch_result, PitchResult};
use crate::pitch::{PitchDetector, YinDetector};

/// Number of strings a session tracks.
pub const STRING_COUNT: usize = 6;

/// Longest a single wait may block, whatever timeout the caller asks for.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

pub const TIMEOUT_ADVICE: &str =
    "No stable note detected. Play a single string and hold it until it rings steadily.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown tuning '{id}'; valid tunings: {}", .valid.join(", "))]
    UnknownTuning { id: String, valid: Vec<&'static str> },
    #[error("a tuning session is already active ({tuning}); stop it first")]
    AlreadyActive { tuning: String },
    #[error("no active tuning session")]
    NoActiveSession,
    #[error("the tuning session was stopped while waiting for a pitch")]
    Stopped,
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("failed to initialize pitch estimator: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("failed to start analysis thread: {0}")]
    Worker(String),
}

impl SessionError {
    /// Stable machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::UnknownTuning { .. } => "unknown_tuning",
            SessionError::AlreadyActive { .. } => "already_active",
            SessionError::NoActiveSession => "no_active_session",
            SessionError::Stopped => "session_stopped",
            SessionError::Audio(e) => e.kind(),
            SessionError::Estimator(_) => "estimator",
            SessionError::Worker(_) => "worker",
        }
    }

    /// What the user can do about it, when there is something to do.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            SessionError::Audio(e) => Some(e.guidance()),
            SessionError::NoActiveSession => Some("Start a tuning session first."),
            SessionError::AlreadyActive { .. } => {
                Some("Stop the current session before starting another one.")
            }
            SessionError::Estimator(EstimatorError::WindowTooSmall { .. }) => Some(
                "Raise [estimator] window_size or request a lower [audio] sample_rate \
                 in the config file.",
            ),
            _ => None,
        }
    }
}

/// Tracks how long the same string has been observed without interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityTracker {
    string: Option<u8>,
    since: Instant,
}

impl StabilityTracker {
    /// A tracker that has seen no string yet.
    pub fn new(now: Instant) -> Self {
        Self { string: None, since: now }
    }

    /// Records the string of a new reading. Continuity is kept when the
    /// string is unchanged; any change, including to `None`, restarts it.
    pub fn observe(&mut self, string: Option<u8>, now: Instant) {
        if string != self.string {
            self.string = string;
            self.since = now;
        }
    }

    /// The string of the latest reading.
    pub fn current(&self) -> Option<u8> {
        self.string
    }

    /// The held string once it has lasted at least `dwell`.
    pub fn stable_string(&self, now: Instant, dwell: Duration) -> Option<u8> {
        let string = self.string?;
        (now.saturating_duration_since(self.since) >= dwell).then_some(string)
    }
}

/// Per-session tuning progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TuningProgress {
    /// Positions confirmed in tune, highest position first.
    pub tuned_strings: Vec<u8>,
    pub tuned_count: usize,
    pub total_strings: usize,
    pub all_in_tune: bool,
}

impl TuningProgress {
    fn from_set(tuned: &BTreeSet<u8>) -> Self {
        let tuned_strings: Vec<u8> = tuned.iter().rev().copied().collect();
        Self {
            tuned_count: tuned_strings.len(),
            total_strings: STRING_COUNT,
            all_in_tune: tuned_strings.len() == STRING_COUNT,
            tuned_strings,
        }
    }
}

/// How a wait for a stable pitch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// A string was held for the dwell time.
    Stable {
        result: PitchResult,
        progress: TuningProgress,
    },
    /// Nothing stable before the timeout. Not an error.
    TimedOut(PitchResult),
}

impl WaitOutcome {
    /// The reading the wait ended with.
    pub fn result(&self) -> &PitchResult {
        match self {
            WaitOutcome::Stable { result, .. } => result,
            WaitOutcome::TimedOut(result) => result,
        }
    }

    /// Progress after a stable reading; `None` on timeout.
    pub fn progress(&self) -> Option<&TuningProgress> {
        match self {
            WaitOutcome::Stable { progress, .. } => Some(progress),
            WaitOutcome::TimedOut(_) => None,
        }
    }
}

/// Returned by a successful [`TuningSession::start`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub tuning: &'static TuningPreset,
    pub sample_rate: u32,
}

/// Returned by a successful [`TuningSession::stop`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopSummary {
    pub tuning: &'static str,
    pub name: &'static str,
    pub tuned_strings: Vec<u8>,
}

/// Read-only snapshot of the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub active: bool,
    pub tuning: Option<&'static str>,
    pub elapsed_ms: Option<u64>,
    pub progress: Option<TuningProgress>,
    pub last_result: Option<PitchResult>,
}

struct ActiveSession {
    tuning: &'static TuningPreset,
    started_at: Instant,
    tuned: BTreeSet<u8>,
    last_result: Option<PitchResult>,
    tracker: StabilityTracker,
}

impl ActiveSession {
    fn new(tuning: &'static TuningPreset, now: Instant) -> Self {
        Self {
            tuning,
            started_at: now,
            tuned: BTreeSet::new(),
            last_result: None,
            tracker: StabilityTracker::new(now),
        }
    }

    /// Commits a reading if the tracker has held a string for `dwell` and the
    /// cached result still names that string.
    fn try_commit(&mut self, now: Instant, dwell: Duration) -> Option<WaitOutcome> {
        let string = self.tracker.stable_string(now, dwell)?;
        let result = self
            .last_result
            .as_ref()
            .filter(|result| result.closest_string == Some(string))?
            .clone();
        if result.in_tune {
            self.tuned.insert(string);
        }
        Some(WaitOutcome::Stable {
            result,
            progress: TuningProgress::from_set(&self.tuned),
        })
    }
}

#[derive(Default)]
struct SessionState {
    active: Option<ActiveSession>,
    /// Bumped on every start and stop so waiters notice a session change.
    generation: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Caches a fresh result if `generation` is still the live session.
    fn publish(&self, generation: u64, result: PitchResult, now: Instant) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        if let Some(active) = state.active.as_mut() {
            active.tracker.observe(result.closest_string, now);
            active.last_result = Some(result);
            self.changed.notify_all();
        }
    }
}

struct Worker {
    tuning: &'static TuningPreset,
    capture: Box<dyn CaptureStream>,
    shutdown_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn shutdown(mut self) {
        self.capture.stop();
        let _ = self.shutdown_tx.send(());
        if self.thread.join().is_err() {
            error!("analysis thread panicked");
        }
    }
}

type DetectorFactory = Arc<dyn Fn() -> Box<dyn PitchDetector> + Send + Sync>;

/// A guitar tuning session. One per process, shared by reference between
/// the callers of `start`, `wait_for_pitch`, and `stop`.
pub struct TuningSession {
    backend: Box<dyn AudioBackend>,
    config: TunerConfig,
    detector_factory: DetectorFactory,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl TuningSession {
    /// Creates an idle session that captures from `backend` and detects
    /// pitch with [`YinDetector`].
    pub fn new(backend: impl AudioBackend + 'static, config: TunerConfig) -> Self {
        let threshold = config.estimator.yin_threshold;
        Self {
            backend: Box::new(backend),
            config,
            detector_factory: Arc::new(move || Box::new(YinDetector::new(threshold))),
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    /// Replaces the pitch detection algorithm used by future sessions.
    pub fn with_detector<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PitchDetector> + Send + Sync + 'static,
    {
        self.detector_factory = Arc::new(factory);
        self
    }

    /// Settings the session was created with.
    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts capturing and tracking against `tuning_id`.
    ///
    /// Nothing is left running if any step fails.
    pub fn start(&self, tuning_id: &str) -> Result<SessionInfo, SessionError> {
        let tuning = catalog::get_by_id(tuning_id).ok_or_else(|| SessionError::UnknownTuning {
            id: tuning_id.to_string(),
            valid: catalog::list_ids(),
        })?;

        let mut slot = self.worker_slot();
        if let Some(worker) = slot.as_ref() {
            return Err(SessionError::AlreadyActive {
                tuning: worker.tuning.id.to_string(),
            });
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut capture = self.backend.open(&self.config.audio, events_tx).map_err(|e| {
            warn!(error = %e, kind = e.kind(), "audio capture failed to start");
            SessionError::Audio(e)
        })?;
        let sample_rate = capture.sample_rate();

        let mut estimator =
            PitchEstimator::new((self.detector_factory)(), self.config.estimator.clone());
        if let Err(e) = estimator.initialize(sample_rate) {
            capture.stop();
            return Err(e.into());
        }

        let generation = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.active = Some(ActiveSession::new(tuning, Instant::now()));
            state.generation
        };

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("tuner-analysis".into())
            .spawn(move || {
                run_analysis(estimator, tuning, events_rx, shutdown_rx, shared, generation)
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                capture.stop();
                self.deactivate();
                return Err(SessionError::Worker(e.to_string()));
            }
        };

        *slot = Some(Worker {
            tuning,
            capture,
            shutdown_tx,
            thread,
        });
        info!(tuning = tuning.id, sample_rate, "tuning session started");
        Ok(SessionInfo {
            tuning,
            sample_rate,
        })
    }

    /// Clears the active session and wakes every waiter.
    fn deactivate(&self) -> Option<ActiveSession> {
        let mut state = self.shared.lock();
        let previous = state.active.take();
        state.generation += 1;
        self.shared.changed.notify_all();
        previous
    }

    /// Ends the session, releasing the capture and the estimator.
    pub fn stop(&self) -> Result<StopSummary, SessionError> {
        let mut slot = self.worker_slot();
        let worker = slot.take().ok_or(SessionError::NoActiveSession)?;

        let tuned = self.deactivate().map(|active| active.tuned).unwrap_or_default();
        let tuning = worker.tuning;
        worker.shutdown();

        info!(tuning = tuning.id, tuned = tuned.len(), "tuning session stopped");
        Ok(StopSummary {
            tuning: tuning.id,
            name: tuning.name,
            tuned_strings: tuned.iter().rev().copied().collect(),
        })
    }

    /// True between a successful `start` and the matching `stop`.
    pub fn is_active(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Snapshot of the active session, or an inactive status.
    pub fn status(&self) -> SessionStatus {
        let state = self.shared.lock();
        match state.active.as_ref() {
            Some(active) => SessionStatus {
                active: true,
                tuning: Some(active.tuning.id),
                elapsed_ms: Some(active.started_at.elapsed().as_millis() as u64),
                progress: Some(TuningProgress::from_set(&active.tuned)),
                last_result: active.last_result.clone(),
            },
            None => SessionStatus {
                active: false,
                tuning: None,
                elapsed_ms: None,
                progress: None,
                last_result: None,
            },
        }
    }

    /// Blocks until a stable reading, a stop, or `timeout` (the configured
    /// default when `None`, capped at [`MAX_WAIT`]).
    pub fn wait_for_pitch(&self, timeout: Option<Duration>) -> Result<WaitOutcome, SessionError> {
        let session = &self.config.session;
        let timeout = timeout.unwrap_or_else(|| session.default_timeout()).min(MAX_WAIT);
        let deadline = Instant::now() + timeout;
        let dwell = session.dwell();
        let poll = session.poll_interval();

        let mut state = self.shared.lock();
        if state.active.is_none() {
            return Err(SessionError::NoActiveSession);
        }
        let generation = state.generation;

        loop {
            let now = Instant::now();
            let SessionState {
                active,
                generation: current,
            } = &mut *state;
            let active = match active.as_mut() {
                Some(active) if *current == generation => active,
                _ => {
                    debug!("wait cancelled by session stop");
                    return Err(SessionError::Stopped);
                }
            };

            if let Some(outcome) = active.try_commit(now, dwell) {
                debug!(string = ?outcome.result().closest_string, "stable reading");
                return Ok(outcome);
            }
            if now >= deadline {
                debug!("wait for pitch timed out");
                return Ok(WaitOutcome::TimedOut(PitchResult::empty(TIMEOUT_ADVICE)));
            }

            let wait = poll.min(deadline - now);
            state = match self.shared.changed.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Drop for TuningSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker_slot().take() {
            self.deactivate();
            worker.shutdown();
        }
    }
}

/// Analysis loop: the single writer of estimator and tracker state.
fn run_analysis(
    mut estimator: PitchEstimator,
    tuning: &'static TuningPreset,
    events: Receiver<AudioEvent>,
    shutdown: Receiver<()>,
    shared: Arc<Shared>,
    generation: u64,
) {
    debug!(tuning = tuning.id, "analysis thread running");
    loop {
        crossbeam_channel::select! {
            recv(events) -> msg => match msg {
                Ok(AudioEvent::Block(block)) => {
                    let frequency = match estimator.process(&block) {
                        Ok(frequency) => frequency,
                        Err(e) => {
                            error!(error = %e, "pitch estimation failed");
                            break;
                        }
                    };
                    let result = build_pitch_result(frequency, tuning);
                    shared.publish(generation, result, Instant::now());
                }
                Ok(AudioEvent::Error(message)) => {
                    warn!(%message, "audio stream error");
                }
                Err(_) => {
                    debug!("audio channel closed");
                    break;
                }
            },
            recv(shutdown) -> _ => break,
        }
    }
    estimator.reset();
    debug!("analysis thread finished");
}
