//! Error taxonomy shared by every component.
//!
//! Clients translate transport and engine failures into these kinds; the
//! callback dispatcher serializes them into [`ErrorBody`] with a matching
//! HTTP status. No raw transport error crosses a component boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type DskResult<T> = Result<T, DskError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DskError {
    /// Unknown uuid or kind.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stale `spec_version` or an engine-enforced uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing or malformed bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Request body could not be parsed or failed validation.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Invalid kind or procedure registration input.
    #[error("malformed description: {0}")]
    MalformedDescription(String),

    /// A registration precondition was not met. Names exactly one field.
    #[error("Malformed provider description. Missing: {0}")]
    MissingField(&'static str),

    /// Network or timeout failure reaching the engine.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure raised inside a procedure or reconciliation handler. Engine
    /// answers with a status outside the named kinds also land here, with
    /// the status and message they carried.
    #[error("invocation error (status={status_code}): {message}")]
    Invocation {
        message: String,
        status_code: u16,
        details: Option<Value>,
    },
}

impl DskError {
    pub fn invocation(message: impl Into<String>, status_code: u16) -> Self {
        DskError::Invocation {
            message: message.into(),
            status_code,
            details: None,
        }
    }

    /// Prefix the message with the operation that failed. The kind and
    /// status are unchanged.
    pub fn with_context(self, op: &str) -> Self {
        let wrap = |m: String| format!("{op}: {m}");
        match self {
            DskError::NotFound(m) => DskError::NotFound(wrap(m)),
            DskError::Conflict(m) => DskError::Conflict(wrap(m)),
            DskError::Unauthorized(m) => DskError::Unauthorized(wrap(m)),
            DskError::PermissionDenied(m) => DskError::PermissionDenied(wrap(m)),
            DskError::BadRequest(m) => DskError::BadRequest(wrap(m)),
            DskError::MalformedDescription(m) => DskError::MalformedDescription(wrap(m)),
            DskError::MissingField(f) => DskError::MissingField(f),
            DskError::Transport(m) => DskError::Transport(wrap(m)),
            DskError::Invocation {
                message,
                status_code,
                details,
            } => DskError::Invocation {
                message: wrap(message),
                status_code,
                details,
            },
        }
    }

    /// HTTP status used when this error is written to the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            DskError::NotFound(_) => 404,
            DskError::Conflict(_) => 409,
            DskError::Unauthorized(_) => 401,
            DskError::PermissionDenied(_) => 403,
            DskError::BadRequest(_)
            | DskError::MalformedDescription(_)
            | DskError::MissingField(_) => 400,
            DskError::Transport(_) => 500,
            DskError::Invocation { status_code, .. } => *status_code,
        }
    }

    pub fn is_malformed_description(&self) -> bool {
        matches!(
            self,
            DskError::MalformedDescription(_) | DskError::MissingField(_)
        )
    }

    /// The precondition that failed, for `MissingField` errors.
    pub fn missing_field(&self) -> Option<&'static str> {
        match self {
            DskError::MissingField(f) => Some(f),
            _ => None,
        }
    }

    /// Classify a non-success engine answer.
    ///
    /// 400, 401, 403, 404 and 409 map onto their named kinds. Anything else
    /// (a handler's 422, a 500 from a failed callback) is an `Invocation`
    /// that keeps the status and any `error.details`. The message is taken
    /// from `error.message`, then `error.errors[0].message`, then the raw
    /// body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let (message, details) = engine_error_parts(body);
        let message = message.unwrap_or_else(|| {
            let t = body.trim();
            if t.is_empty() {
                format!("http status {status}")
            } else {
                t.to_string()
            }
        });
        match status {
            400 => DskError::BadRequest(message),
            401 => DskError::Unauthorized(message),
            403 => DskError::PermissionDenied(message),
            404 => DskError::NotFound(message),
            409 => DskError::Conflict(message),
            _ => DskError::Invocation {
                message,
                status_code: status,
                details,
            },
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (message, details) = match self {
            DskError::Invocation {
                message, details, ..
            } => (message.clone(), details.clone()),
            other => (other.to_string(), None),
        };
        ErrorBody {
            error: ErrorDetail {
                message,
                status_code: self.status_code(),
                details,
            },
        }
    }
}

fn engine_error_parts(body: &str) -> (Option<String>, Option<Value>) {
    let Some(err) = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned())
    else {
        return (None, None);
    };
    if let Some(s) = err.as_str() {
        return (Some(s.to_string()), None);
    }
    let message = err
        .get("message")
        .or_else(|| err.pointer("/errors/0/message"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let details = err.get("details").filter(|d| !d.is_null()).cloned();
    (message, details)
}

// ---------------------------------------------------------------------------
// Wire error body
// ---------------------------------------------------------------------------

/// `{ "error": { "message", "status_code", "details"? } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
