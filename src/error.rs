use hyper::StatusCode;
use serde_json::Value;
use thiserror::Error;

use std::fmt;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP transport error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid HTTP request: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("backend URL must use https")]
    InvalidUrl,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    AuthenticationRequired(&'static str),

    #[error("not permitted to modify this record")]
    NotPermitted,

    #[error("backend error: {0}")]
    Response(ErrorBody),

    #[error("upload failed: {0}")]
    Upload(ErrorBody),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend returned no rows")]
    EmptyResponse,

    #[error("refusing to {0} rows of `{1}` without a filter")]
    UnfilteredMutation(&'static str, String),

    #[error("invalid vote value {0}")]
    InvalidVote(i16),

    #[error("OAuth sign-in failed: {0}")]
    OAuth(String),

    #[error("another request is still in flight")]
    Busy,
}

impl Error {
    /// True when the caller should send the user to sign in before retrying.
    pub fn requires_login(&self) -> bool {
        match self {
            Error::AuthenticationRequired(_) => true,
            Error::Response(body) => body.status == StatusCode::UNAUTHORIZED.as_u16(),
            _ => false,
        }
    }
}

/// Error payload returned by the backend.
///
/// The REST, auth and storage endpoints each use a slightly different shape,
/// so the body is picked apart field by field rather than derived.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl ErrorBody {
    pub fn new<M: Into<String>>(status: u16, message: M) -> Self {
        ErrorBody {
            status,
            message: message.into(),
            ..Default::default()
        }
    }

    pub(crate) fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let fallback = || {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text
            }
        };

        let value = match serde_json::from_slice::<Value>(body) {
            Ok(value @ Value::Object(_)) => value,
            _ => return ErrorBody::new(status.as_u16(), fallback()),
        };

        ErrorBody {
            status: status.as_u16(),
            message: first_text(&value, &["message", "msg", "error_description", "error"])
                .unwrap_or_else(fallback),
            code: first_text(&value, &["error_code", "code", "error"]),
            details: first_text(&value, &["details"]),
            hint: first_text(&value, &["hint"]),
        }
    }
}

fn first_text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (status {})", self.message, self.status)?;
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        Ok(())
    }
}
