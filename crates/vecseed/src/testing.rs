//! Test utilities for the vecseed crate
//!
//! [`InMemoryService`] implements [`VectorDbClient`] over plain maps. It
//! rejects what the real service rejects, e.g. loading a collection whose
//! vector field has no index.

use crate::client::{
    ClientError, CollectionDescription, CollectionStats, QueryRequest, Record, SearchHit,
    SearchRequest, VectorDbClient,
};
use crate::schema::{CollectionSchema, FieldKind, IndexSpec, DEFAULT_PARTITION};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_DATABASE: &str = "default";

/// Point-in-time copy of one collection's state
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub schema: CollectionSchema,
    /// Sorted, always including the default partition
    pub partitions: Vec<String>,
    pub indexes: Vec<IndexSpec>,
    pub loaded: bool,
    pub row_count: u64,
    pub rows_by_partition: BTreeMap<String, u64>,
    /// Primary key of every stored row, in insertion order
    pub primary_keys: Vec<Value>,
    /// Rows whose key the service generated
    pub generated_keys: u64,
    /// Segments sealed by a flush that had buffered rows
    pub sealed_segments: usize,
    pub flushes: usize,
    pub compactions: usize,
}

struct StoredRow {
    partition: String,
    primary_key: Value,
    scalars: Record,
}

struct StoredCollection {
    schema: CollectionSchema,
    partitions: BTreeSet<String>,
    indexes: BTreeMap<String, IndexSpec>,
    loaded: bool,
    rows: Vec<StoredRow>,
    buffered: usize,
    next_key: i64,
    generated_keys: u64,
    sealed_segments: usize,
    flushes: usize,
    compactions: usize,
}

impl StoredCollection {
    fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            partitions: BTreeSet::from([DEFAULT_PARTITION.to_string()]),
            indexes: BTreeMap::new(),
            loaded: false,
            rows: Vec::new(),
            buffered: 0,
            next_key: 1,
            generated_keys: 0,
            sealed_segments: 0,
            flushes: 0,
            compactions: 0,
        }
    }

    fn snapshot(&self) -> CollectionSnapshot {
        let mut rows_by_partition = BTreeMap::new();
        for row in &self.rows {
            *rows_by_partition.entry(row.partition.clone()).or_insert(0) += 1;
        }
        CollectionSnapshot {
            schema: self.schema.clone(),
            partitions: self.partitions.iter().cloned().collect(),
            indexes: self.indexes.values().cloned().collect(),
            loaded: self.loaded,
            row_count: self.rows.len() as u64,
            rows_by_partition,
            primary_keys: self.rows.iter().map(|r| r.primary_key.clone()).collect(),
            generated_keys: self.generated_keys,
            sealed_segments: self.sealed_segments,
            flushes: self.flushes,
            compactions: self.compactions,
        }
    }

    /// Reject a record the way the service would on insert
    fn check_record(&self, record: &Record) -> Result<(), String> {
        for field in &self.schema.fields {
            let value = record.get(&field.name);
            if field.is_primary && self.schema.auto_id {
                if value.is_some() {
                    return Err(format!(
                        "the primary key field '{}' is auto-generated, do not supply it",
                        field.name
                    ));
                }
                continue;
            }
            let Some(value) = value else {
                return Err(format!("missing value for field '{}'", field.name));
            };
            let fits = match &field.kind {
                FieldKind::FloatVector { dim } => {
                    value.as_array().map(|v| v.len()) == Some(*dim as usize)
                },
                FieldKind::BinaryVector { dim } => {
                    value.as_array().map(|v| v.len()) == Some(*dim as usize / 8)
                },
                FieldKind::SparseFloatVector => value.as_object().is_some_and(|m| !m.is_empty()),
                FieldKind::Int64 | FieldKind::Int32 => value.is_i64() || value.is_u64(),
                FieldKind::Float => value.is_number(),
                FieldKind::Bool => value.is_boolean(),
                FieldKind::VarChar { max_length } => value
                    .as_str()
                    .is_some_and(|s| s.chars().count() <= *max_length as usize),
                FieldKind::Unsupported { .. } => false,
            };
            if !fits {
                return Err(format!(
                    "value for field '{}' does not fit {}",
                    field.name, field.kind
                ));
            }
        }
        if !self.schema.enable_dynamic_field {
            if let Some(extra) = record.keys().find(|k| self.schema.get(k).is_none()) {
                return Err(format!("field '{}' is not in the schema", extra));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct DatabaseState {
    collections: BTreeMap<String, StoredCollection>,
    /// alias -> collection
    aliases: BTreeMap<String, String>,
}

struct State {
    current: String,
    databases: BTreeMap<String, DatabaseState>,
    users: BTreeMap<String, String>,
    roles: BTreeSet<String>,
    /// Calls left to refuse; `usize::MAX` refuses forever
    refusals: usize,
    failures: HashMap<String, String>,
    calls: Vec<String>,
    searches: Vec<SearchRequest>,
}

impl State {
    fn database(&mut self) -> &mut DatabaseState {
        self.databases.entry(self.current.clone()).or_default()
    }

    fn collection(&mut self, name: &str) -> Result<&mut StoredCollection, ClientError> {
        self.database()
            .collections
            .get_mut(name)
            .ok_or_else(|| ClientError::NotFound(format!("collection not found[collection={}]", name)))
    }
}

/// In-memory vector database for testing.
///
/// Thread-safe via Mutex. Failures can be injected per operation with
/// [`fail_on`](Self::fail_on), and the whole service can be made
/// unreachable for a number of calls.
pub struct InMemoryService {
    state: Mutex<State>,
}

impl InMemoryService {
    pub fn new() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(DEFAULT_DATABASE.to_string(), DatabaseState::default());
        Self {
            state: Mutex::new(State {
                current: DEFAULT_DATABASE.to_string(),
                databases,
                users: BTreeMap::new(),
                roles: BTreeSet::new(),
                refusals: 0,
                failures: HashMap::new(),
                calls: Vec::new(),
                searches: Vec::new(),
            }),
        }
    }

    /// Refuse every call, as a service that never comes up
    pub fn unreachable(self) -> Self {
        self.unreachable_for(usize::MAX)
    }

    /// Refuse the next `calls` calls, then answer normally
    pub fn unreachable_for(self, calls: usize) -> Self {
        self.lock().refusals = calls;
        self
    }

    /// Make an operation fail with `message`.
    ///
    /// `key` is either an operation name such as `"search"`, or an operation
    /// and its target such as `"create_alias:test_alias"`. The target is the
    /// collection for collection-level calls, the partition for
    /// `create_partition` and `insert`, the alias for alias calls, and the
    /// name being created for databases, users, and roles. The message is
    /// classified like a real service error.
    pub fn fail_on(&self, key: &str, message: &str) {
        self.lock()
            .failures
            .insert(key.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    /// Operation names in call order, including refused and failed calls
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == op).count()
    }

    pub fn databases(&self) -> Vec<String> {
        self.lock().databases.keys().cloned().collect()
    }

    pub fn current_database(&self) -> String {
        self.lock().current.clone()
    }

    /// Collections in the working database
    pub fn collection_names(&self) -> Vec<String> {
        self.lock().database().collections.keys().cloned().collect()
    }

    /// State of a collection in the working database
    pub fn snapshot(&self, name: &str) -> Option<CollectionSnapshot> {
        self.lock()
            .database()
            .collections
            .get(name)
            .map(StoredCollection::snapshot)
    }

    /// Aliases of the working database, alias to collection
    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.lock().database().aliases.clone()
    }

    pub fn users(&self) -> Vec<String> {
        self.lock().users.keys().cloned().collect()
    }

    pub fn roles(&self) -> Vec<String> {
        self.lock().roles.iter().cloned().collect()
    }

    pub fn last_search(&self) -> Option<SearchRequest> {
        self.lock().searches.last().cloned()
    }

    /// Every search received, oldest first
    pub fn searches(&self) -> Vec<SearchRequest> {
        self.lock().searches.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Record the call and apply refusals and injected failures
    fn enter(&self, op: &str, target: &str) -> Result<MutexGuard<'_, State>, ClientError> {
        let mut state = self.lock();
        state.calls.push(op.to_string());

        if state.refusals > 0 {
            if state.refusals != usize::MAX {
                state.refusals -= 1;
            }
            return Err(ClientError::Unavailable("connection refused".to_string()));
        }

        let targeted = format!("{}:{}", op, target);
        let injected = state
            .failures
            .get(&targeted)
            .or_else(|| state.failures.get(op))
            .cloned();
        if let Some(message) = injected {
            return Err(ClientError::classify(65535, message));
        }
        Ok(state)
    }
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

fn server(code: i64, message: impl Into<String>) -> ClientError {
    ClientError::Server {
        code,
        message: message.into(),
    }
}

fn not_loaded(collection: &str) -> ClientError {
    server(101, format!("collection not loaded: {}", collection))
}

#[async_trait::async_trait]
impl VectorDbClient for InMemoryService {
    fn database(&self) -> String {
        self.current_database()
    }

    async fn list_databases(&self) -> Result<Vec<String>, ClientError> {
        let state = self.enter("list_databases", "")?;
        Ok(state.databases.keys().cloned().collect())
    }

    async fn create_database(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.enter("create_database", name)?;
        if state.databases.contains_key(name) {
            return Err(ClientError::AlreadyExists(format!(
                "database already exist: {}",
                name
            )));
        }
        state
            .databases
            .insert(name.to_string(), DatabaseState::default());
        Ok(())
    }

    async fn use_database(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.enter("use_database", name)?;
        if !state.databases.contains_key(name) {
            return Err(ClientError::NotFound(format!(
                "database:{} doesn't exist",
                name
            )));
        }
        state.current = name.to_string();
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, ClientError> {
        let mut state = self.enter("list_collections", "")?;
        Ok(state.database().collections.keys().cloned().collect())
    }

    async fn describe_collection(
        &self,
        name: &str,
    ) -> Result<CollectionDescription, ClientError> {
        let mut state = self.enter("describe_collection", name)?;
        let aliases: Vec<String> = state
            .database()
            .aliases
            .iter()
            .filter(|(_, target)| *target == name)
            .map(|(alias, _)| alias.clone())
            .collect();
        let collection = state.collection(name)?;
        Ok(CollectionDescription {
            name: name.to_string(),
            schema: collection.schema.clone(),
            aliases,
            indexed_fields: collection.indexes.keys().cloned().collect(),
            partition_count: collection.partitions.len(),
            loaded: collection.loaded,
        })
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats, ClientError> {
        let mut state = self.enter("collection_stats", name)?;
        let collection = state.collection(name)?;
        Ok(CollectionStats {
            row_count: collection.rows.len() as u64,
        })
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), ClientError> {
        let mut state = self.enter("create_collection", name)?;
        schema.validate()?;
        let database = state.database();
        if database.collections.contains_key(name) {
            return Err(ClientError::AlreadyExists(format!(
                "collection already exists: {}",
                name
            )));
        }
        if database.aliases.contains_key(name) {
            return Err(server(
                1100,
                format!("collection name {} conflicts with an existing alias", name),
            ));
        }
        database
            .collections
            .insert(name.to_string(), StoredCollection::new(schema.clone()));
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.enter("drop_collection", name)?;
        let database = state.database();
        if !database.collections.contains_key(name) {
            return Err(ClientError::NotFound(format!(
                "collection not found[collection={}]",
                name
            )));
        }
        let bound: Vec<&String> = database
            .aliases
            .iter()
            .filter(|(_, target)| *target == name)
            .map(|(alias, _)| alias)
            .collect();
        if !bound.is_empty() {
            return Err(server(
                65535,
                format!(
                    "unable to drop the collection [{}] because it has associated aliases {:?}",
                    name, bound
                ),
            ));
        }
        database.collections.remove(name);
        Ok(())
    }

    async fn create_partition(
        &self,
        collection: &str,
        partition: &str,
    ) -> Result<(), ClientError> {
        let mut state = self.enter("create_partition", partition)?;
        let stored = state.collection(collection)?;
        if !stored.partitions.insert(partition.to_string()) {
            return Err(ClientError::AlreadyExists(format!(
                "partition already exists: {}",
                partition
            )));
        }
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        records: &[Record],
    ) -> Result<u64, ClientError> {
        let mut state = self.enter("insert", partition)?;
        let stored = state.collection(collection)?;
        if !stored.partitions.contains(partition) {
            return Err(ClientError::NotFound(format!(
                "partition not found: {}",
                partition
            )));
        }
        for record in records {
            stored
                .check_record(record)
                .map_err(|message| server(1100, message))?;
        }

        let primary = stored
            .schema
            .primary_field()
            .map(|f| f.name.clone())
            .unwrap_or_default();
        let scalar_names: Vec<String> = stored
            .schema
            .fields
            .iter()
            .filter(|f| !f.kind.is_vector() && !f.is_primary)
            .map(|f| f.name.clone())
            .collect();

        for record in records {
            let primary_key = if stored.schema.auto_id {
                let key = stored.next_key;
                stored.next_key += 1;
                stored.generated_keys += 1;
                Value::from(key)
            } else {
                record.get(&primary).cloned().unwrap_or(Value::Null)
            };
            let scalars = record
                .iter()
                .filter(|(name, _)| scalar_names.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            stored.rows.push(StoredRow {
                partition: partition.to_string(),
                primary_key,
                scalars,
            });
        }
        stored.buffered += records.len();
        Ok(records.len() as u64)
    }

    async fn flush(&self, collection: &str) -> Result<(), ClientError> {
        let mut state = self.enter("flush", collection)?;
        let stored = state.collection(collection)?;
        if stored.buffered > 0 {
            stored.sealed_segments += 1;
            stored.buffered = 0;
        }
        stored.flushes += 1;
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), ClientError> {
        let mut state = self.enter("create_index", collection)?;
        let stored = state.collection(collection)?;
        let Some(field) = stored.schema.get(&index.field_name) else {
            return Err(server(
                1100,
                format!("cannot create index on missing field {}", index.field_name),
            ));
        };
        if !field.kind.is_vector() {
            return Err(server(
                1100,
                format!("field {} is not a vector field", index.field_name),
            ));
        }
        match stored.indexes.get(&index.field_name) {
            Some(existing) if existing != index => Err(server(
                65535,
                "at most one distinct index is allowed per field",
            )),
            Some(_) => Ok(()),
            None => {
                stored
                    .indexes
                    .insert(index.field_name.clone(), index.clone());
                Ok(())
            },
        }
    }

    async fn load_collection(&self, collection: &str) -> Result<(), ClientError> {
        let mut state = self.enter("load_collection", collection)?;
        let stored = state.collection(collection)?;
        let unindexed = stored
            .schema
            .vector_fields()
            .find(|f| !stored.indexes.contains_key(&f.name))
            .map(|f| f.name.clone());
        if let Some(field) = unindexed {
            return Err(server(700, format!("there is no vector index on field {}", field)));
        }
        stored.loaded = true;
        Ok(())
    }

    async fn create_alias(&self, collection: &str, alias: &str) -> Result<(), ClientError> {
        let mut state = self.enter("create_alias", alias)?;
        state.collection(collection)?;
        let database = state.database();
        if database.collections.contains_key(alias) {
            return Err(server(
                1100,
                format!("alias {} conflicts with a collection name", alias),
            ));
        }
        match database.aliases.get(alias) {
            Some(target) if target == collection => Ok(()),
            Some(target) => Err(ClientError::AlreadyExists(format!(
                "alias exists and already aliased to another collection, alias: {}, collection: {}",
                alias, target
            ))),
            None => {
                database
                    .aliases
                    .insert(alias.to_string(), collection.to_string());
                Ok(())
            },
        }
    }

    async fn alter_alias(&self, collection: &str, alias: &str) -> Result<(), ClientError> {
        let mut state = self.enter("alter_alias", alias)?;
        state.collection(collection)?;
        let database = state.database();
        match database.aliases.get_mut(alias) {
            Some(target) => {
                *target = collection.to_string();
                Ok(())
            },
            None => Err(ClientError::NotFound(format!("alias not found: {}", alias))),
        }
    }

    async fn drop_alias(&self, alias: &str) -> Result<(), ClientError> {
        let mut state = self.enter("drop_alias", alias)?;
        match state.database().aliases.remove(alias) {
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(format!("alias not found: {}", alias))),
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ClientError> {
        let mut state = self.enter("search", &request.collection)?;
        state.searches.push(request.clone());
        let stored = state.collection(&request.collection)?;
        if !stored.loaded {
            return Err(not_loaded(&request.collection));
        }
        let is_vector = stored
            .schema
            .get(&request.anns_field)
            .is_some_and(|f| f.kind.is_vector());
        if !is_vector || request.vectors.is_empty() {
            return Err(server(
                1100,
                format!("invalid search on field {}", request.anns_field),
            ));
        }

        let hits = stored
            .rows
            .iter()
            .take(request.limit)
            .enumerate()
            .map(|(rank, row)| SearchHit {
                id: row.primary_key.clone(),
                distance: rank as f32,
                fields: row
                    .scalars
                    .iter()
                    .filter(|(name, _)| request.output_fields.contains(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
            })
            .collect();
        Ok(hits)
    }

    /// Filters are accepted but not evaluated; rows come back in insertion order
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>, ClientError> {
        let mut state = self.enter("query", &request.collection)?;
        let stored = state.collection(&request.collection)?;
        if !stored.loaded {
            return Err(not_loaded(&request.collection));
        }
        if request.filter.trim().is_empty() {
            return Err(server(1100, "query requires a filter expression"));
        }

        let primary = stored.schema.primary_field().map(|f| f.name.clone());
        let rows = stored
            .rows
            .iter()
            .take(request.limit)
            .map(|row| {
                let mut record: Record = row
                    .scalars
                    .iter()
                    .filter(|(name, _)| request.output_fields.contains(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                if let Some(primary) = &primary {
                    if request.output_fields.contains(primary) {
                        record.insert(primary.clone(), row.primary_key.clone());
                    }
                }
                record
            })
            .collect();
        Ok(rows)
    }

    async fn compact(&self, collection: &str) -> Result<(), ClientError> {
        let mut state = self.enter("compact", collection)?;
        state.collection(collection)?.compactions += 1;
        Ok(())
    }

    async fn create_user(&self, name: &str, password: &str) -> Result<(), ClientError> {
        let mut state = self.enter("create_user", name)?;
        if state.users.contains_key(name) {
            return Err(ClientError::AlreadyExists(format!(
                "user already exists: {}",
                name
            )));
        }
        state.users.insert(name.to_string(), password.to_string());
        Ok(())
    }

    async fn create_role(&self, name: &str) -> Result<(), ClientError> {
        let mut state = self.enter("create_role", name)?;
        if !state.roles.insert(name.to_string()) {
            return Err(ClientError::AlreadyExists(format!(
                "role already exists: {}",
                name
            )));
        }
        Ok(())
    }
}
