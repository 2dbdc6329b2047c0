use crate::client::ClientError;
use crate::schema::SchemaError;
use serde::Serialize;

/// Errors that abort a seeding run.
///
/// Anything that reaches this type is fatal. Tolerated races and best-effort
/// failures are reported through [`Outcome`] instead.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("service not ready after {attempts} attempts")]
    ServiceNotReady { attempts: u32 },

    #[error("invalid schema for collection '{collection}': {source}")]
    Schema {
        collection: String,
        #[source]
        source: SchemaError,
    },

    #[error("{step} failed for '{target}': {source}")]
    Step {
        step: &'static str,
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("insert into '{collection}/{partition}' failed in phase {phase}: {source}")]
    Insert {
        collection: String,
        partition: String,
        phase: usize,
        #[source]
        source: ClientError,
    },

    #[error("load shape {phases}x{partitions}x{batch_size} for '{collection}' overflows Int64 keys")]
    LoadShape {
        collection: String,
        phases: usize,
        partitions: usize,
        batch_size: usize,
    },
}

impl SeedError {
    pub(crate) fn step(step: &'static str, target: &str, source: ClientError) -> Self {
        SeedError::Step {
            step,
            target: target.to_string(),
            source,
        }
    }
}

/// Which create/drop race is acceptable for a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Create calls: the resource is already there
    AlreadyExists,
    /// Drop calls: the resource is already gone
    NotFound,
}

impl Tolerance {
    fn admits(self, err: &ClientError) -> bool {
        match self {
            Tolerance::AlreadyExists => err.is_already_exists(),
            Tolerance::NotFound => err.is_not_found(),
        }
    }
}

/// Result of a step that is not allowed to abort the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    /// Failed with an error the tolerance admits
    Tolerated(String),
    /// Best-effort step that failed; the run continues
    Failed(String),
}

impl Outcome {
    /// Admit the tolerated race, hand back every other error
    pub fn tolerate(
        result: Result<(), ClientError>,
        tolerance: Tolerance,
        step: &str,
        target: &str,
    ) -> Result<Outcome, ClientError> {
        match result {
            Ok(()) => Ok(Outcome::Applied),
            Err(err) if tolerance.admits(&err) => {
                tracing::info!("{} '{}': {}, continuing", step, target, err);
                Ok(Outcome::Tolerated(err.to_string()))
            },
            Err(err) => Err(err),
        }
    }

    /// Swallow any failure, logging the cause
    pub fn best_effort<T>(result: Result<T, ClientError>, step: &str, target: &str) -> Outcome {
        match result {
            Ok(_) => Outcome::Applied,
            Err(err) => {
                tracing::warn!("{} '{}' failed (best effort): {}", step, target, err);
                Outcome::Failed(err.to_string())
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Applied => write!(f, "applied"),
            Outcome::Tolerated(reason) => write!(f, "tolerated ({})", reason),
            Outcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}
