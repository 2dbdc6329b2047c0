use crate::client::{QueryRequest, SearchRequest, VectorDbClient};
use crate::config::ActivityConfig;
use crate::error::Outcome;
use crate::loader::RecordGenerator;
use crate::provision::LoadedCollection;
use serde::Serialize;
use std::sync::Arc;

/// What the activity round produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityStats {
    pub compaction: Outcome,
    pub searches_ok: usize,
    pub searches_failed: usize,
    pub query: Outcome,
}

/// Generates runtime telemetry against a loaded collection.
///
/// Every call here is best effort: a failed search or query is logged and
/// the next one still runs.
pub struct ActivityGenerator {
    client: Arc<dyn VectorDbClient>,
    config: ActivityConfig,
    generator: RecordGenerator,
}

impl ActivityGenerator {
    pub fn new(client: Arc<dyn VectorDbClient>, config: ActivityConfig, seed: u64) -> Self {
        Self {
            client,
            config,
            generator: RecordGenerator::new(seed),
        }
    }

    /// Compaction first, then searches, then one filtered query
    pub async fn run_activity(&mut self, collection: &LoadedCollection) -> ActivityStats {
        let compaction = self.trigger_compaction(collection.name()).await;
        let (searches_ok, searches_failed) = self
            .run_searches(collection, self.config.top_k, self.config.search_count)
            .await;
        let filter = self.config.filter.clone();
        let query = self.run_filtered_query(collection, &filter).await;

        ActivityStats {
            compaction,
            searches_ok,
            searches_failed,
            query,
        }
    }

    /// Request a compaction; whether the service accepts it depends on its policy
    pub async fn trigger_compaction(&self, collection: &str) -> Outcome {
        let result = self.client.compact(collection).await;
        let outcome = Outcome::best_effort(result, "compact", collection);
        if outcome == Outcome::Applied {
            tracing::info!("Compaction requested for {}", collection);
        }
        outcome
    }

    /// Run `query_count` independent top-`k` searches with fresh random vectors.
    ///
    /// Returns `(succeeded, failed)`.
    pub async fn run_searches(
        &mut self,
        collection: &LoadedCollection,
        k: usize,
        query_count: usize,
    ) -> (usize, usize) {
        let schema = collection.schema();
        let vector_kind = schema.get(collection.vector_field()).map(|f| f.kind.clone());
        let Some(vector_kind) = vector_kind else {
            tracing::warn!(
                "Collection {} has no field {}, skipping searches",
                collection.name(),
                collection.vector_field()
            );
            return (0, query_count);
        };
        let Some(primary_field) = schema.primary_field().map(|f| f.name.clone()) else {
            tracing::warn!(
                "Collection {} has no primary key, skipping searches",
                collection.name()
            );
            return (0, query_count);
        };
        let output_fields: Vec<String> = schema
            .scalar_fields()
            .map(|f| f.name.clone())
            .collect();

        let (mut ok, mut failed) = (0, 0);
        for i in 0..query_count {
            let request = SearchRequest {
                collection: collection.name().to_string(),
                anns_field: collection.vector_field().to_string(),
                primary_field: primary_field.clone(),
                vectors: vec![self.generator.vector(&vector_kind)],
                limit: k,
                output_fields: output_fields.clone(),
            };
            match self.client.search(&request).await {
                Ok(hits) => {
                    ok += 1;
                    tracing::debug!("Search {}/{}: {} hits", i + 1, query_count, hits.len());
                },
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Search {}/{} failed: {}", i + 1, query_count, e);
                },
            }
        }
        tracing::info!(
            "Ran {} searches on {} ({} failed)",
            query_count,
            collection.name(),
            failed
        );
        (ok, failed)
    }

    /// One scalar-filter query with a fixed page size
    pub async fn run_filtered_query(
        &self,
        collection: &LoadedCollection,
        predicate: &str,
    ) -> Outcome {
        let mut output_fields: Vec<String> = collection
            .schema()
            .primary_field()
            .map(|f| vec![f.name.clone()])
            .unwrap_or_default();
        output_fields.extend(collection.schema().scalar_fields().map(|f| f.name.clone()));

        let request = QueryRequest {
            collection: collection.name().to_string(),
            filter: predicate.to_string(),
            output_fields,
            limit: self.config.query_limit,
        };
        let result = self.client.query(&request).await;
        if let Ok(rows) = &result {
            tracing::info!(
                "Query '{}' on {} returned {} rows",
                predicate,
                collection.name(),
                rows.len()
            );
        }
        Outcome::best_effort(result, "query", collection.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::ResourceProvisioner;
    use crate::readiness::ReadinessGate;
    use crate::schema::{CollectionSchema, FieldKind, FieldSpec, IndexSpec};
    use crate::testing::InMemoryService;
    use std::time::Duration;

    async fn loaded(service: &Arc<InMemoryService>) -> LoadedCollection {
        let client: Arc<dyn VectorDbClient> = service.clone();
        let ready = ReadinessGate::new(client.clone(), Duration::ZERO)
            .wait(1)
            .await
            .unwrap();
        let provisioner = ResourceProvisioner::new(client, &ready);
        let schema = CollectionSchema::new(false, false)
            .field(FieldSpec::new("id", FieldKind::Int64).primary())
            .field(FieldSpec::new("vec", FieldKind::FloatVector { dim: 8 }))
            .field(FieldSpec::new("score", FieldKind::Float));
        let index = IndexSpec::new("vec", "FLAT", "L2");
        let created = provisioner.recreate_collection("c", &schema).await.unwrap();
        provisioner.create_index(&created, &index).await.unwrap();
        provisioner.load_collection(&created, &index).await.unwrap()
    }

    fn generator(service: &Arc<InMemoryService>) -> ActivityGenerator {
        ActivityGenerator::new(service.clone(), ActivityConfig::default(), 7)
    }

    #[tokio::test]
    async fn run_activity_issues_every_call() {
        let service = Arc::new(InMemoryService::new());
        let collection = loaded(&service).await;

        let stats = generator(&service).run_activity(&collection).await;

        assert_eq!(stats.compaction, Outcome::Applied);
        assert_eq!(stats.searches_ok, 10);
        assert_eq!(stats.searches_failed, 0);
        assert_eq!(stats.query, Outcome::Applied);
        assert_eq!(service.call_count("compact"), 1);
        assert_eq!(service.call_count("search"), 10);
        assert_eq!(service.call_count("query"), 1);
    }

    #[tokio::test]
    async fn failed_searches_do_not_stop_the_rest() {
        let service = Arc::new(InMemoryService::new());
        let collection = loaded(&service).await;
        service.fail_on("search", "query node unavailable");

        let (ok, failed) = generator(&service).run_searches(&collection, 5, 4).await;

        assert_eq!((ok, failed), (0, 4));
        assert_eq!(service.call_count("search"), 4);
    }

    #[tokio::test]
    async fn compaction_failure_is_best_effort() {
        let service = Arc::new(InMemoryService::new());
        let collection = loaded(&service).await;
        service.fail_on("compact", "compaction is disabled");

        let stats = generator(&service).run_activity(&collection).await;

        assert!(stats.compaction.is_failed());
        assert_eq!(stats.searches_ok, 10);
        assert_eq!(stats.query, Outcome::Applied);
    }

    #[tokio::test]
    async fn query_failure_is_best_effort() {
        let service = Arc::new(InMemoryService::new());
        let collection = loaded(&service).await;
        service.fail_on("query", "cannot parse expression");

        let outcome = generator(&service)
            .run_filtered_query(&collection, "score >")
            .await;
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn search_requests_scalar_output_fields() {
        let service = Arc::new(InMemoryService::new());
        let collection = loaded(&service).await;

        generator(&service).run_searches(&collection, 3, 1).await;

        let request = service.last_search().unwrap();
        assert_eq!(request.anns_field, "vec");
        assert_eq!(request.limit, 3);
        assert_eq!(request.output_fields, vec!["score"]);
        assert_eq!(request.primary_field, "id");
        assert_eq!(request.vectors[0].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn each_search_uses_a_fresh_vector() {
        let service = Arc::new(InMemoryService::new());
        let collection = loaded(&service).await;

        generator(&service).run_searches(&collection, 3, 10).await;

        let vectors: Vec<_> = service
            .searches()
            .into_iter()
            .map(|request| request.vectors[0].clone())
            .collect();
        assert_eq!(vectors.len(), 10);
        for (i, a) in vectors.iter().enumerate() {
            for b in &vectors[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
