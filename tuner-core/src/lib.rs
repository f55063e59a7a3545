// tuner-core/src/lib.rs

//! The core logic for the guitar tuner.
//! This crate is responsible for pitch estimation, matching frequencies to
//! the strings of a tuning, and the stability-gated tuning session. It is
//! completely headless and contains no transport code.
//!
//! Data flows audio source -> [`estimator`] -> [`matcher`] -> [`session`].

pub mod audio;
pub mod catalog;
pub mod config;
pub mod estimator;
pub mod fft;
pub mod matcher;
pub mod pitch;
pub mod session;
pub mod synthetic;
pub mod tuning;

pub use audio::{AudioBackend, AudioError, AudioEvent, CaptureStream, CpalBackend};
pub use catalog::{GuitarString, TuningPreset, DEFAULT_TUNING_ID};
pub use config::TunerConfig;
pub use matcher::{build_pitch_result, match_string, MatchResult, PitchResult, TuningStatus};
pub use session::{
    SessionError, SessionInfo, SessionStatus, StopSummary, TuningProgress, TuningSession,
    WaitOutcome,
};
pub use synthetic::SyntheticBackend;
