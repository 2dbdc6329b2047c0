use crate::client::VectorDbClient;
use crate::config::ReadinessConfig;
use crate::error::SeedError;
use std::sync::Arc;
use std::time::Duration;

/// Proof that the service answered a probe. Provisioning requires one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    attempts: u32,
}

impl Ready {
    /// Number of probes it took, including the successful one
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Polls the service with a cheap read until it answers.
///
/// Polling is linear: a fixed pause between attempts, no backoff and no
/// jitter, bounded by the attempt budget.
pub struct ReadinessGate {
    client: Arc<dyn VectorDbClient>,
    interval: Duration,
}

impl ReadinessGate {
    pub fn new(client: Arc<dyn VectorDbClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    pub fn from_config(client: Arc<dyn VectorDbClient>, config: &ReadinessConfig) -> Self {
        Self::new(client, config.interval())
    }

    /// Returns true as soon as a probe succeeds, false once the budget is spent
    pub async fn wait_until_ready(&self, max_attempts: u32) -> bool {
        self.probe(max_attempts).await.is_some()
    }

    /// Like [`wait_until_ready`](Self::wait_until_ready), but an exhausted
    /// budget is a fatal error
    pub async fn wait(&self, max_attempts: u32) -> Result<Ready, SeedError> {
        match self.probe(max_attempts).await {
            Some(attempts) => Ok(Ready { attempts }),
            None => Err(SeedError::ServiceNotReady {
                attempts: max_attempts,
            }),
        }
    }

    async fn probe(&self, max_attempts: u32) -> Option<u32> {
        for attempt in 1..=max_attempts {
            match self.client.list_databases().await {
                Ok(databases) => {
                    tracing::info!(
                        "Service ready after {} attempt(s), databases: {:?}",
                        attempt,
                        databases
                    );
                    return Some(attempt);
                },
                Err(e) => {
                    tracing::info!(
                        "Waiting for service... attempt {}/{}: {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                },
            }
        }
        None
    }
}
