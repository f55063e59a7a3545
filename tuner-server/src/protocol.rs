//! Wire format: one JSON object per line in each direction.
//!
//! Requests look like `{"id": 1, "op": "get_pitch", "timeout_ms": 5000}`.
//! The `id` is echoed back untouched so clients can match responses to
//! requests that complete out of order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operations the server understands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    ListTunings,
    StartTuning {
        #[serde(default)]
        tuning: Option<String>,
    },
    GetPitch {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    StopTuning,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl ErrorBody {
    /// An error without guidance.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            guidance: None,
        }
    }

    /// The request line could not be understood.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// `{"id", "ok": true, "data"}`.
    pub fn success(id: Value, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// `{"id", "ok": false, "error"}`.
    pub fn failure(id: Value, error: ErrorBody) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Splits a request line into its id and command.
///
/// The id is recovered whenever the line is a JSON object, so even a request
/// with a bad `op` gets an answer the client can correlate.
pub fn parse_request(line: &str) -> (Value, Result<Command, ErrorBody>) {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return (
                Value::Null,
                Err(ErrorBody::invalid_request(format!("malformed JSON: {e}"))),
            );
        }
    };
    let Value::Object(mut fields) = value else {
        return (
            Value::Null,
            Err(ErrorBody::invalid_request("request must be a JSON object")),
        );
    };

    let id = fields.remove("id").unwrap_or(Value::Null);
    let command = serde_json::from_value(Value::Object(fields))
        .map_err(|e| ErrorBody::invalid_request(e.to_string()));
    (id, command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_operations_with_optional_params() {
        let (id, command) = parse_request(r#"{"id": 7, "op": "start_tuning", "tuning": "dadgad"}"#);
        assert_eq!(id, json!(7));
        assert_eq!(
            command.unwrap(),
            Command::StartTuning {
                tuning: Some("dadgad".into())
            }
        );

        let (id, command) = parse_request(r#"{"id": "a", "op": "get_pitch"}"#);
        assert_eq!(id, json!("a"));
        assert_eq!(command.unwrap(), Command::GetPitch { timeout_ms: None });

        let (_, command) = parse_request(r#"{"op": "status"}"#);
        assert_eq!(command.unwrap(), Command::Status);
    }

    #[test]
    fn bad_requests_keep_their_id() {
        let (id, command) = parse_request(r#"{"id": 3, "op": "retune_everything"}"#);
        assert_eq!(id, json!(3));
        assert_eq!(command.unwrap_err().kind, "invalid_request");

        let (id, command) = parse_request("{not json");
        assert_eq!(id, Value::Null);
        assert!(command.unwrap_err().message.starts_with("malformed JSON"));

        let (_, command) = parse_request("[1, 2]");
        assert!(command.is_err());
    }

    #[test]
    fn responses_omit_the_unused_half() {
        let ok = serde_json::to_value(Response::success(json!(1), json!({"x": 1}))).unwrap();
        assert_eq!(ok, json!({"id": 1, "ok": true, "data": {"x": 1}}));

        let err = serde_json::to_value(Response::failure(
            json!(2),
            ErrorBody::new("no_active_session", "no active tuning session"),
        ))
        .unwrap();
        assert_eq!(
            err,
            json!({"id": 2, "ok": false, "error": {"kind": "no_active_session", "message": "no active tuning session"}})
        );
    }
}
