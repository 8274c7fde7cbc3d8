//! Error types and process exit codes.
//!
//! Component errors (`AuthError`, `SourceApiError`, `FetchError`, `SinkApiError`,
//! `MappingError`, `ConfigError`) are typed so the pipeline can decide how far
//! a failure reaches. `AppError` is what the binary ultimately reports: a
//! message plus the exit code to leave with.

use thiserror::Error;

use crate::domain::FieldName;

/// Usage or configuration problem.
pub const EXIT_USAGE: u8 = 2;
/// Every dataset type finished, but some datapoints were rejected.
pub const EXIT_PARTIAL: u8 = 3;
/// A dataset type was aborted by an error.
pub const EXIT_ABORTED: u8 = 4;
/// A dataset type was declined at a confirmation checkpoint.
pub const EXIT_DECLINED: u8 = 5;
/// The run was interrupted (Ctrl-C).
pub const EXIT_INTERRUPTED: u8 = 130;

/// Response bodies quoted in error messages are cut to this many characters.
const MAX_BODY_CHARS: usize = 500;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Source API authentication failure. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("authentication request failed: {0}")]
    Transport(String),
}

/// Non-2xx (or unreachable) source API call. Fatal for the current dataset type.
#[derive(Debug, Error)]
#[error("source API {endpoint} {}: {body}", describe_status(.status))]
pub struct SourceApiError {
    pub endpoint: String,
    pub status: Option<u16>,
    pub body: String,
}

impl SourceApiError {
    pub fn http(endpoint: impl Into<String>, status: u16, body: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: Some(status),
            body: truncate_body(body),
        }
    }

    pub fn transport(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: None,
            body: message.to_string(),
        }
    }

    /// A 2xx response whose body could not be used.
    pub fn invalid_payload(
        endpoint: impl Into<String>,
        status: u16,
        message: impl std::fmt::Display,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: Some(status),
            body: format!("invalid payload: {message}"),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }
}

/// Failure while fetching records. An `Auth` failure (the single re-login
/// after a 401 was rejected) ends the whole run; `Source` only the current type.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Source(#[from] SourceApiError),
}

/// Non-2xx (or unreachable) sink API call.
#[derive(Debug, Error)]
#[error("sink API {endpoint} {}: {body}", describe_status(.status))]
pub struct SinkApiError {
    pub endpoint: String,
    pub status: Option<u16>,
    pub body: String,
}

impl SinkApiError {
    pub fn http(endpoint: impl Into<String>, status: u16, body: &str) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: Some(status),
            body: truncate_body(body),
        }
    }

    pub fn transport(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: None,
            body: message.to_string(),
        }
    }

    /// A 2xx response whose body could not be used.
    pub fn invalid_payload(
        endpoint: impl Into<String>,
        status: u16,
        message: impl std::fmt::Display,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: Some(status),
            body: format!("invalid payload: {message}"),
        }
    }
}

/// Expected dataset fields the sink did not echo back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unmapped dataset fields: {}", join_fields(.unresolved))]
pub struct MappingError {
    pub unresolved: Vec<FieldName>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {0} in environment (.env)")]
    Missing(&'static str),

    #[error("invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(EXIT_USAGE, err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::new(EXIT_ABORTED, err.to_string())
    }
}

impl From<SourceApiError> for AppError {
    fn from(err: SourceApiError) -> Self {
        AppError::new(EXIT_ABORTED, err.to_string())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        AppError::new(EXIT_ABORTED, err.to_string())
    }
}

impl From<SinkApiError> for AppError {
    fn from(err: SinkApiError) -> Self {
        AppError::new(EXIT_ABORTED, err.to_string())
    }
}

/// Cut a response body down to something that fits in a log line.
pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("returned status {code}"),
        None => "was unreachable".to_string(),
    }
}

fn join_fields(fields: &[FieldName]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
