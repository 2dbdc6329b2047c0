use super::{
    ClientError, CollectionDescription, CollectionStats, QueryRequest, Record, SearchHit,
    SearchRequest, VectorDbClient,
};
use crate::config::ServiceConfig;
use crate::schema::{CollectionSchema, FieldKind, FieldSpec, IndexSpec};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;

const API_PREFIX: &str = "v2/vectordb";
const LOADED_STATE: &str = "LoadStateLoaded";

#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsData {
    row_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertData {
    insert_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeData {
    collection_name: String,
    #[serde(default)]
    auto_id: bool,
    #[serde(default)]
    enable_dynamic_field: bool,
    #[serde(default)]
    fields: Vec<DescribeField>,
    #[serde(default)]
    aliases: Option<Vec<String>>,
    #[serde(default)]
    indexes: Option<Vec<DescribeIndex>>,
    #[serde(default)]
    partitions_num: usize,
    #[serde(default)]
    load: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeField {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    auto_id: bool,
    #[serde(default)]
    params: Option<Vec<FieldParam>>,
}

#[derive(Deserialize)]
struct FieldParam {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeIndex {
    field_name: String,
}

impl DescribeField {
    fn param(&self, key: &str) -> Option<u32> {
        let param = self.params.as_ref()?.iter().find(|p| p.key == key)?;
        match &param.value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            _ => None,
        }
    }

    fn into_spec(self) -> FieldSpec {
        let kind = FieldKind::from_wire(
            &self.type_name,
            self.param("dim"),
            self.param("max_length"),
        );
        FieldSpec {
            name: self.name,
            kind,
            is_primary: self.primary_key,
        }
    }
}

impl From<DescribeData> for CollectionDescription {
    fn from(data: DescribeData) -> Self {
        let auto_id = data.auto_id || data.fields.iter().any(|f| f.primary_key && f.auto_id);
        let fields = data.fields.into_iter().map(DescribeField::into_spec).collect();
        Self {
            name: data.collection_name,
            schema: CollectionSchema {
                fields,
                auto_id,
                enable_dynamic_field: data.enable_dynamic_field,
            },
            aliases: data.aliases.unwrap_or_default(),
            indexed_fields: data
                .indexes
                .unwrap_or_default()
                .into_iter()
                .map(|i| i.field_name)
                .collect(),
            partition_count: data.partitions_num,
            loaded: data.load == LOADED_STATE,
        }
    }
}

fn field_json(field: &FieldSpec) -> Value {
    let mut value = json!({
        "fieldName": field.name,
        "dataType": field.kind.type_name(),
        "isPrimary": field.is_primary,
    });
    match &field.kind {
        FieldKind::FloatVector { dim } | FieldKind::BinaryVector { dim } => {
            value["elementTypeParams"] = json!({ "dim": dim.to_string() });
        },
        FieldKind::VarChar { max_length } => {
            value["elementTypeParams"] = json!({ "max_length": max_length.to_string() });
        },
        _ => {},
    }
    value
}

fn index_json(index: &IndexSpec) -> Value {
    let mut params = serde_json::Map::new();
    params.insert("index_type".to_string(), json!(index.index_type));
    for (key, value) in &index.params {
        params.insert(key.clone(), value.clone());
    }
    json!({
        "fieldName": index.field_name,
        "indexName": index.index_name(),
        "metricType": index.metric_type,
        "indexType": index.index_type,
        "params": params,
    })
}

/// Rows carry the primary key under its own field name
fn hit_from_row(mut row: Record, primary_field: &str) -> SearchHit {
    let distance = row
        .remove("distance")
        .and_then(|d| d.as_f64())
        .unwrap_or_default() as f32;
    let id = row.remove(primary_field).unwrap_or(Value::Null);
    SearchHit {
        id,
        distance,
        fields: row,
    }
}

/// Client for the Milvus RESTful v2 API
pub struct MilvusClient {
    base_url: String,
    token: Option<String>,
    database: RwLock<String>,
    client: reqwest::Client,
}

impl MilvusClient {
    /// Create a client from service configuration; no request is made
    pub fn new(config: &ServiceConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.uri.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            database: RwLock::new(config.database.clone()),
            client,
        })
    }

    /// Attach the working database to a request body
    fn scoped(&self, mut body: Value) -> Value {
        if let Value::Object(map) = &mut body {
            map.insert("dbName".to_string(), Value::String(self.database()));
        }
        body
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        let url = format!("{}/{}/{}", self.base_url, API_PREFIX, path);
        tracing::debug!("POST {}", url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, text);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ClientError::PermissionDenied(message)
                },
                StatusCode::SERVICE_UNAVAILABLE => ClientError::Unavailable(message),
                _ => ClientError::Server {
                    code: i64::from(status.as_u16()),
                    message,
                },
            });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        // Older servers report success as 200 instead of 0
        if envelope.code != 0 && envelope.code != 200 {
            return Err(ClientError::classify(
                envelope.code,
                envelope.message.unwrap_or_default(),
            ));
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        let data = self.call(path, body).await?;
        serde_json::from_value(data)
            .map_err(|e| ClientError::InvalidResponse(format!("{}: {}", path, e)))
    }
}

#[async_trait::async_trait]
impl VectorDbClient for MilvusClient {
    fn database(&self) -> String {
        self.database
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn list_databases(&self) -> Result<Vec<String>, ClientError> {
        self.call_as("databases/list", json!({})).await
    }

    async fn create_database(&self, name: &str) -> Result<(), ClientError> {
        self.call("databases/create", json!({ "dbName": name }))
            .await
            .map(|_| ())
    }

    async fn use_database(&self, name: &str) -> Result<(), ClientError> {
        let databases = self.list_databases().await?;
        if !databases.iter().any(|d| d == name) {
            return Err(ClientError::NotFound(format!(
                "database {} doesn't exist",
                name
            )));
        }
        *self
            .database
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = name.to_string();
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, ClientError> {
        // An empty database may answer with no data at all
        let names: Option<Vec<String>> = self
            .call_as("collections/list", self.scoped(json!({})))
            .await?;
        Ok(names.unwrap_or_default())
    }

    async fn describe_collection(
        &self,
        name: &str,
    ) -> Result<CollectionDescription, ClientError> {
        let data: DescribeData = self
            .call_as(
                "collections/describe",
                self.scoped(json!({ "collectionName": name })),
            )
            .await?;
        Ok(data.into())
    }

    async fn collection_stats(&self, name: &str) -> Result<CollectionStats, ClientError> {
        let data: StatsData = self
            .call_as(
                "collections/get_stats",
                self.scoped(json!({ "collectionName": name })),
            )
            .await?;
        Ok(CollectionStats {
            row_count: data.row_count,
        })
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<(), ClientError> {
        schema.validate()?;
        let fields: Vec<Value> = schema.fields.iter().map(field_json).collect();
        let body = json!({
            "collectionName": name,
            "schema": {
                "autoId": schema.auto_id,
                "enableDynamicField": schema.enable_dynamic_field,
                "fields": fields,
            },
        });
        self.call("collections/create", self.scoped(body))
            .await
            .map(|_| ())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), ClientError> {
        self.call(
            "collections/drop",
            self.scoped(json!({ "collectionName": name })),
        )
        .await
        .map(|_| ())
    }

    async fn create_partition(
        &self,
        collection: &str,
        partition: &str,
    ) -> Result<(), ClientError> {
        let body = json!({ "collectionName": collection, "partitionName": partition });
        self.call("partitions/create", self.scoped(body))
            .await
            .map(|_| ())
    }

    async fn insert(
        &self,
        collection: &str,
        partition: &str,
        records: &[Record],
    ) -> Result<u64, ClientError> {
        let body = json!({
            "collectionName": collection,
            "partitionName": partition,
            "data": records,
        });
        let data: InsertData = self.call_as("entities/insert", self.scoped(body)).await?;
        Ok(data.insert_count)
    }

    async fn flush(&self, collection: &str) -> Result<(), ClientError> {
        self.call(
            "collections/flush",
            self.scoped(json!({ "collectionName": collection })),
        )
        .await
        .map(|_| ())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), ClientError> {
        let body = json!({
            "collectionName": collection,
            "indexParams": [index_json(index)],
        });
        self.call("indexes/create", self.scoped(body))
            .await
            .map(|_| ())
    }

    async fn load_collection(&self, collection: &str) -> Result<(), ClientError> {
        self.call(
            "collections/load",
            self.scoped(json!({ "collectionName": collection })),
        )
        .await
        .map(|_| ())
    }

    async fn create_alias(&self, collection: &str, alias: &str) -> Result<(), ClientError> {
        let body = json!({ "collectionName": collection, "aliasName": alias });
        self.call("aliases/create", self.scoped(body))
            .await
            .map(|_| ())
    }

    async fn alter_alias(&self, collection: &str, alias: &str) -> Result<(), ClientError> {
        let body = json!({ "collectionName": collection, "aliasName": alias });
        self.call("aliases/alter", self.scoped(body))
            .await
            .map(|_| ())
    }

    async fn drop_alias(&self, alias: &str) -> Result<(), ClientError> {
        self.call("aliases/drop", self.scoped(json!({ "aliasName": alias })))
            .await
            .map(|_| ())
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ClientError> {
        let body = json!({
            "collectionName": request.collection,
            "annsField": request.anns_field,
            "data": request.vectors,
            "limit": request.limit,
            "outputFields": request.output_fields,
        });
        let rows: Vec<Record> = self.call_as("entities/search", self.scoped(body)).await?;
        Ok(rows
            .into_iter()
            .map(|row| hit_from_row(row, &request.primary_field))
            .collect())
    }

    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>, ClientError> {
        let body = json!({
            "collectionName": request.collection,
            "filter": request.filter,
            "outputFields": request.output_fields,
            "limit": request.limit,
        });
        self.call_as("entities/query", self.scoped(body)).await
    }

    async fn compact(&self, collection: &str) -> Result<(), ClientError> {
        self.call(
            "collections/compact",
            self.scoped(json!({ "collectionName": collection })),
        )
        .await
        .map(|_| ())
    }

    async fn create_user(&self, name: &str, password: &str) -> Result<(), ClientError> {
        self.call(
            "users/create",
            json!({ "userName": name, "password": password }),
        )
        .await
        .map(|_| ())
    }

    async fn create_role(&self, name: &str) -> Result<(), ClientError> {
        self.call("roles/create", json!({ "roleName": name }))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ServiceConfig {
        ServiceConfig {
            uri: format!("{}/", server.uri()),
            ..ServiceConfig::default()
        }
    }

    fn ok(data: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": data }))
    }

    fn failure(code: i64, message: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "code": code, "message": message }))
    }

    #[tokio::test]
    async fn list_databases_parses_names() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/databases/list"))
            .respond_with(ok(json!(["default", "test_db"])))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let databases = client.list_databases().await.unwrap();
        assert_eq!(databases, vec!["default", "test_db"]);
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/databases/list"))
            .and(header("authorization", "Bearer root:Milvus"))
            .respond_with(ok(json!(["default"])))
            .expect(1)
            .mount(&server)
            .await;

        let config = ServiceConfig {
            token: Some("root:Milvus".to_string()),
            ..config_for(&server)
        };
        let client = MilvusClient::new(&config).unwrap();
        client.list_databases().await.unwrap();
    }

    #[tokio::test]
    async fn nonzero_code_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/partitions/create"))
            .respond_with(failure(65535, "partition already exists[partition=part_a]"))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let err = client
            .create_partition("test_collection", "part_a")
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn unauthorized_status_is_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/users/create"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no credentials"))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let err = client.create_user("test_user", "secret").await.unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn use_database_scopes_later_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/databases/list"))
            .respond_with(ok(json!(["default", "test_db"])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/list"))
            .and(body_partial_json(json!({ "dbName": "test_db" })))
            .respond_with(ok(json!(["scoped"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        client.use_database("test_db").await.unwrap();
        assert_eq!(client.database(), "test_db");
        assert_eq!(client.list_collections().await.unwrap(), vec!["scoped"]);
    }

    #[tokio::test]
    async fn use_database_rejects_unknown_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/databases/list"))
            .respond_with(ok(json!(["default"])))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let err = client.use_database("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(client.database(), "default");
    }

    #[tokio::test]
    async fn describe_collection_rebuilds_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/describe"))
            .respond_with(ok(json!({
                "collectionName": "simple_collection",
                "autoId": true,
                "enableDynamicField": false,
                "fields": [
                    { "name": "id", "type": "Int64", "primaryKey": true, "autoId": true },
                    {
                        "name": "vec",
                        "type": "FloatVector",
                        "params": [{ "key": "dim", "value": "64" }]
                    }
                ],
                "aliases": null,
                "indexes": [{ "fieldName": "vec", "indexName": "vec_index", "metricType": "L2" }],
                "load": "LoadStateLoaded",
                "partitionsNum": 1
            })))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let description = client.describe_collection("simple_collection").await.unwrap();

        assert_eq!(description.name, "simple_collection");
        assert!(description.schema.auto_id);
        assert_eq!(
            description.schema.get("vec").unwrap().kind,
            FieldKind::FloatVector { dim: 64 }
        );
        assert!(description.aliases.is_empty());
        assert_eq!(description.indexed_fields, vec!["vec"]);
        assert!(description.loaded);
        assert_eq!(description.partition_count, 1);
    }

    #[tokio::test]
    async fn collection_stats_reads_row_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/get_stats"))
            .and(body_partial_json(json!({ "collectionName": "test_collection" })))
            .respond_with(ok(json!({ "rowCount": 4500 })))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let stats = client.collection_stats("test_collection").await.unwrap();
        assert_eq!(stats.row_count, 4500);
    }

    #[tokio::test]
    async fn create_collection_sends_element_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/create"))
            .and(body_partial_json(json!({
                "collectionName": "simple_collection",
                "dbName": "default",
                "schema": { "autoId": true }
            })))
            .respond_with(ok(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let schema = CollectionSchema::new(true, false)
            .field(FieldSpec::new("id", FieldKind::Int64).primary())
            .field(FieldSpec::new("vec", FieldKind::FloatVector { dim: 64 }));
        let client = MilvusClient::new(&config_for(&server)).unwrap();
        client
            .create_collection("simple_collection", &schema)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_collection_validates_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ok(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let schema = CollectionSchema::new(false, false)
            .field(FieldSpec::new("vec", FieldKind::FloatVector { dim: 64 }));
        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let err = client.create_collection("broken", &schema).await.unwrap_err();
        assert!(matches!(err, ClientError::Schema(_)));
    }

    #[tokio::test]
    async fn search_splits_distance_and_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/search"))
            .respond_with(ok(json!([
                { "id": 7, "distance": 0.25, "name": "entity_7" }
            ])))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let hits = client
            .search(&SearchRequest {
                collection: "test_collection".to_string(),
                anns_field: "embedding".to_string(),
                primary_field: "id".to_string(),
                vectors: vec![json!([0.1, 0.2])],
                limit: 10,
                output_fields: vec!["name".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, json!(7));
        assert_eq!(hits[0].distance, 0.25);
        assert_eq!(hits[0].fields.get("name"), Some(&json!("entity_7")));
    }

    #[tokio::test]
    async fn search_takes_id_from_the_named_primary_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/search"))
            .respond_with(ok(json!([
                { "pk": "doc-3", "distance": 1.5, "id": 99 }
            ])))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let hits = client
            .search(&SearchRequest {
                collection: "docs".to_string(),
                anns_field: "embedding".to_string(),
                primary_field: "pk".to_string(),
                vectors: vec![json!([0.1, 0.2])],
                limit: 1,
                output_fields: vec!["id".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(hits[0].id, json!("doc-3"));
        assert!(!hits[0].fields.contains_key("pk"));
        assert_eq!(hits[0].fields.get("id"), Some(&json!(99)));
    }

    #[tokio::test]
    async fn insert_returns_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/entities/insert"))
            .and(body_partial_json(json!({ "partitionName": "part_a" })))
            .respond_with(ok(json!({ "insertCount": 2, "insertIds": [1, 2] })))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let mut record = Record::new();
        record.insert("id".to_string(), json!(1));
        let count = client
            .insert("test_collection", "part_a", &[record.clone(), record])
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        let config = ServiceConfig {
            uri: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..ServiceConfig::default()
        };
        let client = MilvusClient::new(&config).unwrap();
        let err = client.list_databases().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn empty_collection_list_may_omit_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/collections/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        assert!(client.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drop_alias_missing_alias_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/vectordb/aliases/drop"))
            .and(body_partial_json(json!({ "aliasName": "test_alias", "dbName": "default" })))
            .respond_with(failure(1602, "alias not found: test_alias"))
            .expect(1)
            .mount(&server)
            .await;

        let client = MilvusClient::new(&config_for(&server)).unwrap();
        let err = client.drop_alias("test_alias").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
