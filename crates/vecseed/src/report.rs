use crate::client::{ClientError, VectorDbClient};
use crate::error::SeedError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub kind: String,
    pub primary: bool,
}

/// Everything the reporter could read about one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectionDetail {
    Available {
        row_count: u64,
        fields: Vec<FieldSummary>,
        aliases: Vec<String>,
        indexed_fields: Vec<String>,
        partition_count: usize,
        loaded: bool,
    },
    Unavailable {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    #[serde(flatten)]
    pub detail: CollectionDetail,
}

/// Final state of the service as read back after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub database: String,
    pub databases: Vec<String>,
    pub collections: Vec<CollectionSummary>,
}

impl Report {
    pub fn collection(&self, name: &str) -> Option<&CollectionSummary> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Row count for a collection, if its stats could be read
    pub fn row_count(&self, name: &str) -> Option<u64> {
        match self.collection(name)?.detail {
            CollectionDetail::Available { row_count, .. } => Some(row_count),
            CollectionDetail::Unavailable { .. } => None,
        }
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Fixture summary ({})", self.generated_at.to_rfc3339())?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "  Databases: {}", self.databases.join(", "))?;
        writeln!(f, "  Working database: {}", self.database)?;
        writeln!(f, "  Collections ({}):", self.collections.len())?;
        for collection in &self.collections {
            match &collection.detail {
                CollectionDetail::Available {
                    row_count,
                    fields,
                    aliases,
                    indexed_fields,
                    partition_count,
                    loaded,
                } => {
                    writeln!(
                        f,
                        "    {}: {} rows, {} partitions, {}",
                        collection.name,
                        row_count,
                        partition_count,
                        if *loaded { "loaded" } else { "not loaded" }
                    )?;
                    let fields: Vec<String> = fields
                        .iter()
                        .map(|field| {
                            if field.primary {
                                format!("{}:{} (pk)", field.name, field.kind)
                            } else {
                                format!("{}:{}", field.name, field.kind)
                            }
                        })
                        .collect();
                    writeln!(f, "      fields: {}", fields.join(", "))?;
                    if !indexed_fields.is_empty() {
                        writeln!(f, "      indexed: {}", indexed_fields.join(", "))?;
                    }
                    if !aliases.is_empty() {
                        writeln!(f, "      aliases: {}", aliases.join(", "))?;
                    }
                },
                CollectionDetail::Unavailable { reason } => {
                    writeln!(f, "    {}: unavailable ({})", collection.name, reason)?;
                },
            }
        }
        Ok(())
    }
}

/// Reads back databases and collections without changing anything
pub struct SummaryReporter {
    client: Arc<dyn VectorDbClient>,
}

impl SummaryReporter {
    pub fn new(client: Arc<dyn VectorDbClient>) -> Self {
        Self { client }
    }

    /// List everything; a collection whose details cannot be read is marked unavailable
    pub async fn summarize(&self) -> Result<Report, SeedError> {
        let database = self.client.database();
        let databases = self
            .client
            .list_databases()
            .await
            .map_err(|source| SeedError::step("list databases", &database, source))?;
        let mut names = self
            .client
            .list_collections()
            .await
            .map_err(|source| SeedError::step("list collections", &database, source))?;
        names.sort();

        let mut collections = Vec::with_capacity(names.len());
        for name in names {
            let detail = match self.detail(&name).await {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::warn!("Could not read collection {}: {}", name, e);
                    CollectionDetail::Unavailable {
                        reason: e.to_string(),
                    }
                },
            };
            collections.push(CollectionSummary { name, detail });
        }

        Ok(Report {
            generated_at: Utc::now(),
            database,
            databases,
            collections,
        })
    }

    async fn detail(&self, name: &str) -> Result<CollectionDetail, ClientError> {
        let stats = self.client.collection_stats(name).await?;
        let description = self.client.describe_collection(name).await?;

        Ok(CollectionDetail::Available {
            row_count: stats.row_count,
            fields: description
                .schema
                .fields
                .iter()
                .map(|f| FieldSummary {
                    name: f.name.clone(),
                    kind: f.kind.to_string(),
                    primary: f.is_primary,
                })
                .collect(),
            aliases: description.aliases,
            indexed_fields: description.indexed_fields,
            partition_count: description.partition_count,
            loaded: description.loaded,
        })
    }
}
