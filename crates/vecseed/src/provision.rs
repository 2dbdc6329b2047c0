use crate::client::VectorDbClient;
use crate::error::{Outcome, SeedError, Tolerance};
use crate::readiness::Ready;
use crate::schema::{CollectionSchema, IndexSpec};
use crate::topology::UserFixture;
use std::sync::Arc;

/// One step taken to clear a name before a collection is created under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearedStep {
    pub step: &'static str,
    pub target: String,
    pub outcome: Outcome,
}

impl ClearedStep {
    fn new(step: &'static str, target: &str, outcome: Outcome) -> Self {
        Self {
            step,
            target: target.to_string(),
            outcome,
        }
    }
}

/// A collection this run created with a known schema
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedCollection {
    name: String,
    schema: CollectionSchema,
    cleared: Vec<ClearedStep>,
}

impl CreatedCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Alias detaches and the drop that preceded creation, in order
    pub fn cleared(&self) -> &[ClearedStep] {
        &self.cleared
    }
}

/// A collection that has been indexed and loaded into memory; searchable
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCollection {
    name: String,
    schema: CollectionSchema,
    vector_field: String,
}

impl LoadedCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// The indexed vector field searches run against
    pub fn vector_field(&self) -> &str {
        &self.vector_field
    }
}

/// Creates and replaces named resources so that re-runs converge.
///
/// Databases are created if missing and never dropped. Collections are
/// always dropped and recreated. Partitions and aliases tolerate existing
/// state. Users and roles are best effort.
pub struct ResourceProvisioner {
    client: Arc<dyn VectorDbClient>,
}

impl ResourceProvisioner {
    /// Provisioning only starts against a service that answered a probe
    pub fn new(client: Arc<dyn VectorDbClient>, _ready: &Ready) -> Self {
        Self { client }
    }

    /// Create a database, accepting one that already exists
    pub async fn ensure_database(&self, name: &str) -> Result<Outcome, SeedError> {
        let result = self.client.create_database(name).await;
        let outcome = Outcome::tolerate(result, Tolerance::AlreadyExists, "create database", name)
            .map_err(|source| SeedError::step("create database", name, source))?;
        if outcome == Outcome::Applied {
            tracing::info!("Created database {}", name);
        }
        Ok(outcome)
    }

    pub async fn use_database(&self, name: &str) -> Result<(), SeedError> {
        self.client
            .use_database(name)
            .await
            .map_err(|source| SeedError::step("use database", name, source))?;
        tracing::info!("Using database {}", name);
        Ok(())
    }

    /// Drop the collection if present; a concurrent disappearance is fine.
    ///
    /// The service refuses to drop a collection that still has aliases, so
    /// those are detached first. Returns every step taken, ending with the
    /// drop itself.
    pub async fn ensure_absent(&self, name: &str) -> Result<Vec<ClearedStep>, SeedError> {
        let existing = self
            .client
            .list_collections()
            .await
            .map_err(|source| SeedError::step("list collections", name, source))?;
        if !existing.iter().any(|c| c == name) {
            let outcome = Outcome::Tolerated(format!("collection {} not present", name));
            return Ok(vec![ClearedStep::new("drop collection", name, outcome)]);
        }

        let description = match self.client.describe_collection(name).await {
            Ok(description) => description,
            Err(e) if e.is_not_found() => {
                let outcome = Outcome::Tolerated(e.to_string());
                return Ok(vec![ClearedStep::new("drop collection", name, outcome)]);
            },
            Err(source) => return Err(SeedError::step("describe collection", name, source)),
        };

        let mut steps = Vec::with_capacity(description.aliases.len() + 1);
        for alias in &description.aliases {
            let result = self.client.drop_alias(alias).await;
            let outcome = Outcome::tolerate(result, Tolerance::NotFound, "drop alias", alias)
                .map_err(|source| SeedError::step("drop alias", alias, source))?;
            tracing::info!("Detached alias {} from {}", alias, name);
            steps.push(ClearedStep::new("drop alias", alias, outcome));
        }

        tracing::info!("Dropping existing collection {}", name);
        let result = self.client.drop_collection(name).await;
        let outcome = Outcome::tolerate(result, Tolerance::NotFound, "drop collection", name)
            .map_err(|source| SeedError::step("drop collection", name, source))?;
        steps.push(ClearedStep::new("drop collection", name, outcome));
        Ok(steps)
    }

    /// Drop-then-create with a fixed schema
    pub async fn recreate_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<CreatedCollection, SeedError> {
        schema.validate().map_err(|source| SeedError::Schema {
            collection: name.to_string(),
            source,
        })?;

        let cleared = self.ensure_absent(name).await?;
        self.client
            .create_collection(name, schema)
            .await
            .map_err(|source| SeedError::step("create collection", name, source))?;
        tracing::info!("Created collection {} ({} fields)", name, schema.fields.len());

        Ok(CreatedCollection {
            name: name.to_string(),
            schema: schema.clone(),
            cleared,
        })
    }

    /// Create a partition, accepting one that already exists
    pub async fn ensure_partition(
        &self,
        collection: &CreatedCollection,
        partition: &str,
    ) -> Result<Outcome, SeedError> {
        let result = self.client.create_partition(collection.name(), partition).await;
        let outcome =
            Outcome::tolerate(result, Tolerance::AlreadyExists, "create partition", partition)
                .map_err(|source| SeedError::step("create partition", partition, source))?;
        if outcome == Outcome::Applied {
            tracing::info!("Created partition {}/{}", collection.name(), partition);
        }
        Ok(outcome)
    }

    /// Submit the index definition; the build itself is not awaited
    pub async fn create_index(
        &self,
        collection: &CreatedCollection,
        index: &IndexSpec,
    ) -> Result<(), SeedError> {
        self.client
            .create_index(collection.name(), index)
            .await
            .map_err(|source| SeedError::step("create index", collection.name(), source))?;
        tracing::info!(
            "Created {} index ({}) on {}.{}",
            index.index_type,
            index.metric_type,
            collection.name(),
            index.field_name
        );
        Ok(())
    }

    /// Load the collection into memory so it can serve searches
    pub async fn load_collection(
        &self,
        collection: &CreatedCollection,
        index: &IndexSpec,
    ) -> Result<LoadedCollection, SeedError> {
        self.client
            .load_collection(collection.name())
            .await
            .map_err(|source| SeedError::step("load collection", collection.name(), source))?;
        tracing::info!("Loaded collection {}", collection.name());

        Ok(LoadedCollection {
            name: collection.name.clone(),
            schema: collection.schema.clone(),
            vector_field: index.field_name.clone(),
        })
    }

    /// Bind each alias independently; a failed alias never stops the others
    pub async fn bind_aliases(
        &self,
        collection: &LoadedCollection,
        aliases: &[String],
    ) -> Vec<(String, Outcome)> {
        let mut outcomes = Vec::with_capacity(aliases.len());
        for alias in aliases {
            let outcome = self.bind_alias(collection.name(), alias).await;
            outcomes.push((alias.clone(), outcome));
        }
        outcomes
    }

    async fn bind_alias(&self, collection: &str, alias: &str) -> Outcome {
        match self.client.create_alias(collection, alias).await {
            Ok(()) => {
                tracing::info!("Alias {} -> {}", alias, collection);
                Outcome::Applied
            },
            Err(err) if err.is_already_exists() => {
                tracing::info!("Alias {} exists, rebinding to {}", alias, collection);
                match self.client.alter_alias(collection, alias).await {
                    Ok(()) => Outcome::Tolerated(err.to_string()),
                    Err(e) => Outcome::best_effort::<()>(Err(e), "alter alias", alias),
                }
            },
            Err(err) => Outcome::best_effort::<()>(Err(err), "create alias", alias),
        }
    }

    pub async fn create_user(&self, user: &UserFixture) -> Outcome {
        let result = self.client.create_user(&user.name, &user.password).await;
        let outcome = Outcome::best_effort(result, "create user", &user.name);
        if outcome == Outcome::Applied {
            tracing::info!("Created user {}", user.name);
        }
        outcome
    }

    pub async fn create_role(&self, role: &str) -> Outcome {
        let result = self.client.create_role(role).await;
        let outcome = Outcome::best_effort(result, "create role", role);
        if outcome == Outcome::Applied {
            tracing::info!("Created role {}", role);
        }
        outcome
    }
}
