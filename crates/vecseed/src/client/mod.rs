pub mod error;
pub mod milvus;

pub use error::ClientError;
pub use milvus::MilvusClient;

use crate::schema::{CollectionSchema, IndexSpec};
use serde::{Deserialize, Serialize};

/// One row to insert: field name to JSON value
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Row count as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub row_count: u64,
}

/// What the service reports about an existing collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub name: String,
    pub schema: CollectionSchema,
    pub aliases: Vec<String>,
    /// Field names that carry an index
    pub indexed_fields: Vec<String>,
    pub partition_count: usize,
    pub loaded: bool,
}

/// Nearest-neighbour search against one vector field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub collection: String,
    pub anns_field: String,
    /// Primary key field; its value becomes [`SearchHit::id`]
    pub primary_field: String,
    pub vectors: Vec<serde_json::Value>,
    pub limit: usize,
    pub output_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: serde_json::Value,
    pub distance: f32,
    #[serde(default)]
    pub fields: Record,
}

/// Scalar-filter query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub collection: String,
    pub filter: String,
    pub output_fields: Vec<String>,
    pub limit: usize,
}

/// Control- and data-plane operations the orchestrator drives.
///
/// Every call is scoped to the working database selected with
/// [`use_database`](VectorDbClient::use_database).
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VectorDbClient: Send + Sync {
    /// Name of the working database
    fn database(&self) -> String;

    async fn list_databases(&self) -> Result<Vec<String>, ClientError>;

    async fn create_database(&self, name: &str) -> Result<(), ClientError>;

    /// Switch the working database; fails if it does not exist
    async fn use_database(&self, name: &str) -> Result<(), ClientError>;

    async fn list_collections(&self) -> Result<Vec<String>, ClientError>;

    async fn describe_collection(&self, name: &str)
        -> Result<CollectionDescription, ClientError>;

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats, ClientError>;

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), ClientError>;

    async fn drop_collection(&self, name: &str) -> Result<(), ClientError>;

    async fn create_partition(&self, collection: &str, partition: &str)
        -> Result<(), ClientError>;

    /// Insert a batch into one partition, returning the inserted count
    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        records: &[Record],
    ) -> Result<u64, ClientError>;

    /// Seal buffered inserts into a persisted segment
    async fn flush(&self, collection: &str) -> Result<(), ClientError>;

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), ClientError>;

    async fn load_collection(&self, collection: &str) -> Result<(), ClientError>;

    async fn create_alias(&self, collection: &str, alias: &str) -> Result<(), ClientError>;

    /// Rebind an existing alias to `collection`
    async fn alter_alias(&self, collection: &str, alias: &str) -> Result<(), ClientError>;

    async fn drop_alias(&self, alias: &str) -> Result<(), ClientError>;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ClientError>;

    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>, ClientError>;

    /// Ask the service to compact; returns once the request is accepted
    async fn compact(&self, collection: &str) -> Result<(), ClientError>;

    async fn create_user(&self, name: &str, password: &str) -> Result<(), ClientError>;

    async fn create_role(&self, name: &str) -> Result<(), ClientError>;
}
