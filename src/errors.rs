//! Error taxonomy shared across the router, middleware, executor and session.

use serde::Serialize;
use std::fmt;

/// Errors that can surface while handling one HTTP exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed request: {0}")]
    Parse(String),

    #[error("request body too large")]
    BodyTooLarge,

    #[error("route not found: {method} {path}")]
    NotFound { method: String, path: String },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("request blocked (security)")]
    WafRejected,

    #[error("executor rejected task")]
    ExecutorRejected,

    #[error("task panicked")]
    TaskPanic,

    #[error("submit rejected: executor is shutting down")]
    SubmitRejected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Parse(_) => 400,
            Error::BodyTooLarge => 413,
            Error::NotFound { .. } => 404,
            Error::MethodNotAllowed => 405,
            Error::HandlerPanic(_) => 500,
            Error::InvalidStatus(_) => 500,
            Error::WafRejected => 400,
            Error::ExecutorRejected => 503,
            Error::TaskPanic => 500,
            Error::SubmitRejected => 503,
            Error::Io(_) => 500,
        }
    }

    /// Stable machine-readable error code, used in release-mode JSON bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Parse(_) => "E_PARSE",
            Error::BodyTooLarge => "E_BODY_TOO_LARGE",
            Error::NotFound { .. } => "E_NOT_FOUND",
            Error::MethodNotAllowed => "E_METHOD_NOT_ALLOWED",
            Error::HandlerPanic(_) => "E_HANDLER_PANIC",
            Error::InvalidStatus(_) => "E_INVALID_STATUS",
            Error::WafRejected => "E_WAF_REJECTED",
            Error::ExecutorRejected => "E_EXECUTOR_REJECTED",
            Error::TaskPanic => "E_TASK_PANIC",
            Error::SubmitRejected => "E_SUBMIT_REJECTED",
            Error::Io(_) => "E_IO",
        }
    }
}

/// Body shape for the release-mode JSON error response.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub hint: &'static str,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        ErrorBody {
            error: err.to_string(),
            hint: err.error_code(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.hint)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
