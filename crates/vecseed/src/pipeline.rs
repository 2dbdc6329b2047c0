//! The seeding run, stage by stage.
//!
//! Stages run strictly in order on one task. A stage can only start with the
//! proof value the previous one produced: provisioning needs [`Ready`], and
//! activity needs a [`LoadedCollection`].

use crate::activity::{ActivityGenerator, ActivityStats};
use crate::client::VectorDbClient;
use crate::config::SeedConfig;
use crate::error::{Outcome, SeedError};
use crate::loader::{DataLoader, LoadStats};
use crate::provision::{LoadedCollection, ResourceProvisioner};
use crate::readiness::{ReadinessGate, Ready};
use crate::report::{Report, SummaryReporter};
use crate::topology::{CollectionFixture, Requirement, Topology};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Readiness,
    Databases,
    PrimaryCollection,
    SecondaryCollections,
    Activity,
    Security,
    Summary,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Readiness => "readiness",
            Stage::Databases => "databases",
            Stage::PrimaryCollection => "primary_collection",
            Stage::SecondaryCollections => "secondary_collections",
            Stage::Activity => "activity",
            Stage::Security => "security",
            Stage::Summary => "summary",
        };
        write!(f, "{}", name)
    }
}

fn stage_span(stage: Stage) -> tracing::Span {
    tracing::info_span!("stage", name = %stage)
}

/// One non-fatal step and how it ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub stage: Stage,
    pub step: String,
    pub target: String,
    pub outcome: Outcome,
}

/// Every tolerated and best-effort step of a run, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RunLog {
    entries: Vec<StepRecord>,
}

impl RunLog {
    pub fn record(&mut self, stage: Stage, step: &str, target: &str, outcome: Outcome) {
        self.entries.push(StepRecord {
            stage,
            step: step.to_string(),
            target: target.to_string(),
            outcome,
        });
    }

    pub fn entries(&self) -> &[StepRecord] {
        &self.entries
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.entries.iter().filter(|e| e.outcome.is_failed())
    }

    /// The last record for a step and target
    pub fn find(&self, step: &str, target: &str) -> Option<&StepRecord> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.step == step && e.target == target)
    }
}

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ready_attempts: u32,
    pub primary: LoadStats,
    pub activity: ActivityStats,
    pub log: RunLog,
    pub report: Report,
}

/// Drives a full seeding run against one service
pub struct Pipeline {
    client: Arc<dyn VectorDbClient>,
    config: SeedConfig,
    topology: Topology,
}

impl Pipeline {
    /// Pipeline for the comprehensive topology
    pub fn new(client: Arc<dyn VectorDbClient>, config: SeedConfig) -> Self {
        let topology = Topology::comprehensive(&config.load);
        Self {
            client,
            config,
            topology,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Run every stage in order.
    ///
    /// Returns on the first fatal error; tolerated and best-effort steps are
    /// recorded in the returned [`RunLog`].
    pub async fn run(&self) -> Result<RunSummary, SeedError> {
        let mut log = RunLog::default();

        let ready = ReadinessGate::from_config(self.client.clone(), &self.config.readiness)
            .wait(self.config.readiness.max_attempts)
            .instrument(stage_span(Stage::Readiness))
            .await?;

        let provisioner = ResourceProvisioner::new(self.client.clone(), &ready);
        let mut loader = DataLoader::new(self.client.clone(), self.config.load.seed);

        self.databases(&provisioner, &mut log)
            .instrument(stage_span(Stage::Databases))
            .await?;

        let (primary, primary_stats) = self
            .build_collection(
                &provisioner,
                &mut loader,
                &self.topology.primary,
                Stage::PrimaryCollection,
                &mut log,
            )
            .instrument(stage_span(Stage::PrimaryCollection))
            .await?;

        self.secondary_collections(&provisioner, &mut loader, &mut log)
            .instrument(stage_span(Stage::SecondaryCollections))
            .await?;

        self.settle().await;

        let activity = self
            .activity(&primary, &mut log)
            .instrument(stage_span(Stage::Activity))
            .await;

        self.security(&provisioner, &mut log)
            .instrument(stage_span(Stage::Security))
            .await;

        self.settle().await;

        let report = SummaryReporter::new(self.client.clone())
            .summarize()
            .instrument(stage_span(Stage::Summary))
            .await?;

        let failures = log.failures().count();
        if failures > 0 {
            tracing::warn!("Run finished with {} best-effort failure(s)", failures);
        } else {
            tracing::info!("Run finished");
        }

        Ok(RunSummary {
            ready_attempts: ready.attempts(),
            primary: primary_stats,
            activity,
            log,
            report,
        })
    }

    async fn settle(&self) {
        let wait = self.config.settle();
        if !wait.is_zero() {
            tracing::info!("Waiting {:?} for the service to settle", wait);
            tokio::time::sleep(wait).await;
        }
    }

    async fn databases(
        &self,
        provisioner: &ResourceProvisioner,
        log: &mut RunLog,
    ) -> Result<(), SeedError> {
        for database in &self.topology.databases {
            let outcome = provisioner.ensure_database(database).await?;
            log.record(Stage::Databases, "create database", database, outcome);
        }
        provisioner.use_database(&self.config.service.database).await
    }

    /// Recreate, partition, fill, index, load and alias one collection
    async fn build_collection(
        &self,
        provisioner: &ResourceProvisioner,
        loader: &mut DataLoader,
        fixture: &CollectionFixture,
        stage: Stage,
        log: &mut RunLog,
    ) -> Result<(LoadedCollection, LoadStats), SeedError> {
        let created = provisioner
            .recreate_collection(&fixture.name, &fixture.schema)
            .await?;
        for cleared in created.cleared() {
            log.record(stage, cleared.step, &cleared.target, cleared.outcome.clone());
        }

        for partition in &fixture.partitions {
            let outcome = provisioner.ensure_partition(&created, partition).await?;
            log.record(stage, "create partition", partition, outcome);
        }

        let stats = loader
            .load(
                &created,
                &fixture.load_targets(),
                fixture.phases,
                fixture.batch_size,
            )
            .await?;
        tracing::info!(
            "Loaded {} rows into {} over {} phase(s)",
            stats.rows,
            fixture.name,
            stats.phases
        );

        provisioner.create_index(&created, &fixture.index).await?;
        let loaded = provisioner
            .load_collection(&created, &fixture.index)
            .await?;

        for (alias, outcome) in provisioner.bind_aliases(&loaded, &fixture.aliases).await {
            log.record(stage, "create alias", &alias, outcome);
        }

        Ok((loaded, stats))
    }

    async fn secondary_collections(
        &self,
        provisioner: &ResourceProvisioner,
        loader: &mut DataLoader,
        log: &mut RunLog,
    ) -> Result<(), SeedError> {
        let stage = Stage::SecondaryCollections;
        for fixture in &self.topology.secondary {
            let result = self
                .build_collection(provisioner, loader, fixture, stage, log)
                .await;
            match (result, fixture.requirement) {
                (Ok(_), _) => {
                    log.record(stage, "build collection", &fixture.name, Outcome::Applied);
                },
                (Err(e), Requirement::BestEffort) => {
                    tracing::warn!("Skipping {}: {}", fixture.name, e);
                    log.record(
                        stage,
                        "build collection",
                        &fixture.name,
                        Outcome::Failed(e.to_string()),
                    );
                },
                (Err(e), Requirement::Required) => return Err(e),
            }
        }
        Ok(())
    }

    async fn activity(&self, primary: &LoadedCollection, log: &mut RunLog) -> ActivityStats {
        let mut generator = ActivityGenerator::new(
            self.client.clone(),
            self.config.activity.clone(),
            self.config.load.seed.wrapping_add(1),
        );
        let stats = generator.run_activity(primary).await;
        log.record(
            Stage::Activity,
            "compact",
            primary.name(),
            stats.compaction.clone(),
        );
        log.record(Stage::Activity, "query", primary.name(), stats.query.clone());
        if stats.searches_failed > 0 {
            log.record(
                Stage::Activity,
                "search",
                primary.name(),
                Outcome::Failed(format!(
                    "{} of {} searches failed",
                    stats.searches_failed,
                    stats.searches_ok + stats.searches_failed
                )),
            );
        }
        stats
    }

    async fn security(&self, provisioner: &ResourceProvisioner, log: &mut RunLog) {
        for user in &self.topology.users {
            let outcome = provisioner.create_user(user).await;
            log.record(Stage::Security, "create user", &user.name, outcome);
        }
        for role in &self.topology.roles {
            let outcome = provisioner.create_role(role).await;
            log.record(Stage::Security, "create role", role, outcome);
        }
    }
}

/// Wait for the service only; used by the `wait` command
pub async fn wait_for_service(
    client: Arc<dyn VectorDbClient>,
    config: &SeedConfig,
) -> Result<Ready, SeedError> {
    ReadinessGate::from_config(client, &config.readiness)
        .wait(config.readiness.max_attempts)
        .instrument(stage_span(Stage::Readiness))
        .await
}
