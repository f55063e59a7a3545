//! Maps protocol commands onto the tuning session.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};
use tuner_core::{catalog, SessionError, TuningSession, WaitOutcome, DEFAULT_TUNING_ID};

use crate::protocol::{self, Command, ErrorBody, Response};

impl From<SessionError> for ErrorBody {
    fn from(e: SessionError) -> Self {
        ErrorBody {
            kind: e.kind().to_string(),
            message: e.to_string(),
            guidance: e.guidance().map(str::to_string),
        }
    }
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Value, ErrorBody> {
    serde_json::to_value(value).map_err(|e| ErrorBody::new("internal", e.to_string()))
}

/// Serves requests against one shared [`TuningSession`].
pub struct Dispatcher {
    session: TuningSession,
}

impl Dispatcher {
    /// Takes ownership of the process-wide session.
    pub fn new(session: TuningSession) -> Self {
        Self { session }
    }

    /// The session requests are served against.
    pub fn session(&self) -> &TuningSession {
        &self.session
    }

    /// Parses and executes one request line.
    pub fn handle_line(&self, line: &str) -> Response {
        let (id, command) = protocol::parse_request(line);
        match command.and_then(|command| self.execute(command)) {
            Ok(data) => Response::success(id, data),
            Err(error) => {
                debug!(kind = %error.kind, "request failed");
                Response::failure(id, error)
            }
        }
    }

    /// Runs one command and returns its response payload.
    pub fn execute(&self, command: Command) -> Result<Value, ErrorBody> {
        match command {
            Command::ListTunings => self.list_tunings(),
            Command::StartTuning { tuning } => {
                self.start_tuning(tuning.as_deref().unwrap_or(DEFAULT_TUNING_ID))
            }
            Command::GetPitch { timeout_ms } => {
                self.get_pitch(timeout_ms.map(Duration::from_millis))
            }
            Command::StopTuning => self.stop_tuning(),
            Command::Status => to_data(&self.session.status()),
        }
    }

    fn list_tunings(&self) -> Result<Value, ErrorBody> {
        Ok(json!({
            "default": DEFAULT_TUNING_ID,
            "tunings": to_data(&catalog::all())?,
        }))
    }

    fn start_tuning(&self, id: &str) -> Result<Value, ErrorBody> {
        let info = self.session.start(id)?;
        Ok(json!({
            "tuning": to_data(info.tuning)?,
            "sample_rate": info.sample_rate,
            "message": format!(
                "Tuning session started for {}. Play one string at a time and let it ring.",
                info.tuning.name
            ),
        }))
    }

    fn get_pitch(&self, timeout: Option<Duration>) -> Result<Value, ErrorBody> {
        let outcome = self.session.wait_for_pitch(timeout)?;
        let mut data = json!({
            "stable": matches!(outcome, WaitOutcome::Stable { .. }),
            "result": to_data(outcome.result())?,
        });

        let Some(progress) = outcome.progress() else {
            return Ok(data);
        };
        data["progress"] = to_data(progress)?;

        if progress.all_in_tune {
            // Another request may have stopped the session in the meantime.
            match self.session.stop() {
                Ok(summary) => {
                    info!(tuning = summary.tuning, "all strings in tune, session completed");
                    data["completed"] = json!(true);
                    data["message"] = json!(format!(
                        "All {} strings are in tune for {}. Session finished.",
                        progress.total_strings, summary.name
                    ));
                }
                Err(SessionError::NoActiveSession) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(data)
    }

    fn stop_tuning(&self) -> Result<Value, ErrorBody> {
        let summary = self.session.stop()?;
        let mut data = to_data(&summary)?;
        data["message"] = json!(format!(
            "Tuning session for {} stopped with {} of 6 strings in tune.",
            summary.name,
            summary.tuned_strings.len()
        ));
        Ok(data)
    }
}
