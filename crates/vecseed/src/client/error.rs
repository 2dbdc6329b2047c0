use crate::schema::SchemaError;

/// Failure reported by a [`VectorDbClient`](super::VectorDbClient) call.
///
/// The service answers every failure with a numeric code and a free-text
/// message, and the codes are not stable across releases. Callers that need
/// to tell a create/drop race from a real failure therefore go through
/// [`ClientError::classify`], which sorts the message into a variant.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

const ALREADY_EXISTS: &[&str] = &["already exist", "duplicate", "alias exist"];
const NOT_FOUND: &[&str] = &["not found", "not exist", "doesn't exist", "can't find"];
const PERMISSION: &[&str] = &[
    "permission deny",
    "permission denied",
    "unauthenticated",
    "authorization",
    "privilege",
];
const UNAVAILABLE: &[&str] = &["not ready", "unavailable", "abnormal code"];

impl ClientError {
    /// Sort a service-side error into a variant by its message
    pub fn classify(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let matches = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if matches(ALREADY_EXISTS) {
            ClientError::AlreadyExists(message)
        } else if matches(NOT_FOUND) {
            ClientError::NotFound(message)
        } else if matches(PERMISSION) {
            ClientError::PermissionDenied(message)
        } else if matches(UNAVAILABLE) {
            ClientError::Unavailable(message)
        } else {
            ClientError::Server { code, message }
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}
