use crate::client::{Record, VectorDbClient};
use crate::error::SeedError;
use crate::provision::CreatedCollection;
use crate::schema::{CollectionSchema, FieldKind, FieldSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Dimension space sparse vectors draw their indices from
pub const SPARSE_DIMENSION: usize = 1000;

/// Upper bound on non-zero entries in one sparse vector
pub const SPARSE_MAX_NONZERO: usize = 16;

/// Primary key for a record, unique across every phase and partition of a load.
///
/// `None` when the id does not fit an Int64 key.
pub fn record_id(
    phase: usize,
    partition_index: usize,
    record_index: usize,
    partition_count: usize,
    batch_size: usize,
) -> Option<i64> {
    let id = phase
        .checked_mul(partition_count)?
        .checked_mul(batch_size)?
        .checked_add(partition_index.checked_mul(batch_size)?)?
        .checked_add(record_index)?;
    i64::try_from(id).ok()
}

/// Whether every id of a `phases x partition_count x batch_size` load fits
fn fits_key_space(phases: usize, partition_count: usize, batch_size: usize) -> bool {
    phases
        .checked_mul(partition_count)
        .and_then(|n| n.checked_mul(batch_size))
        .is_some_and(|total| i64::try_from(total).is_ok())
}

/// Synthesizes field values from a seeded RNG.
///
/// The seed fixes the distribution of vectors; scalar fields are derived
/// from the record id so filters select a predictable slice of rows.
pub struct RecordGenerator {
    rng: StdRng,
}

impl RecordGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A full record for `schema`; an auto-generated primary key is left out
    pub fn record(&mut self, schema: &CollectionSchema, id: i64) -> Record {
        let mut record = Record::new();
        for field in schema.insertable_fields() {
            let value = if field.is_primary {
                primary_value(field, id)
            } else if field.kind.is_vector() {
                self.vector(&field.kind)
            } else {
                scalar_value(field, id)
            };
            record.insert(field.name.clone(), value);
        }
        record
    }

    /// A random vector for a vector field kind, `Null` for anything else
    pub fn vector(&mut self, kind: &FieldKind) -> Value {
        match kind {
            FieldKind::FloatVector { dim } => Value::Array(
                (0..*dim)
                    .map(|_| Value::from(self.rng.gen::<f32>()))
                    .collect(),
            ),
            FieldKind::BinaryVector { dim } => Value::Array(
                (0..dim / 8)
                    .map(|_| Value::from(self.rng.gen::<u8>()))
                    .collect(),
            ),
            FieldKind::SparseFloatVector => {
                let nonzero = self.rng.gen_range(1..=SPARSE_MAX_NONZERO);
                let indices =
                    rand::seq::index::sample(&mut self.rng, SPARSE_DIMENSION, nonzero);
                let mut entries = serde_json::Map::new();
                for index in indices.iter() {
                    let weight: f32 = self.rng.gen_range(0.01..1.0);
                    entries.insert(index.to_string(), Value::from(weight));
                }
                Value::Object(entries)
            },
            _ => Value::Null,
        }
    }
}

fn primary_value(field: &FieldSpec, id: i64) -> Value {
    match field.kind {
        FieldKind::VarChar { .. } => Value::from(format!("pk_{}", id)),
        _ => Value::from(id),
    }
}

fn scalar_value(field: &FieldSpec, id: i64) -> Value {
    match &field.kind {
        FieldKind::Int64 => Value::from(id),
        FieldKind::Int32 => Value::from(18 + (id % 60) as i32),
        FieldKind::Float => Value::from(id as f32 * 0.1),
        FieldKind::Bool => Value::from(id % 2 == 0),
        FieldKind::VarChar { max_length } => {
            let text: String = format!("{}_{}", field.name, id)
                .chars()
                .take(*max_length as usize)
                .collect();
            Value::from(text)
        },
        _ => Value::Null,
    }
}

/// Counters for one completed load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub phases: usize,
    pub batches: usize,
    pub rows: u64,
    pub flushes: usize,
}

/// Inserts shaped batches and flushes once per phase.
///
/// Each phase writes one batch to every partition and then flushes the
/// collection, so every phase seals at least one new segment while flush
/// calls stay at one per phase.
pub struct DataLoader {
    client: Arc<dyn VectorDbClient>,
    generator: RecordGenerator,
}

impl DataLoader {
    pub fn new(client: Arc<dyn VectorDbClient>, seed: u64) -> Self {
        Self {
            client,
            generator: RecordGenerator::new(seed),
        }
    }

    /// Load `phases` rounds of `batch_size` records into each partition.
    ///
    /// An insert or flush failure aborts the load: later stages need the data.
    pub async fn load(
        &mut self,
        collection: &CreatedCollection,
        partitions: &[String],
        phases: usize,
        batch_size: usize,
    ) -> Result<LoadStats, SeedError> {
        let mut stats = LoadStats::default();
        if partitions.is_empty() || batch_size == 0 {
            tracing::info!(
                "Nothing to load into {}: {} partitions, batch size {}",
                collection.name(),
                partitions.len(),
                batch_size
            );
            return Ok(stats);
        }
        let shape_error = || SeedError::LoadShape {
            collection: collection.name().to_string(),
            phases,
            partitions: partitions.len(),
            batch_size,
        };
        if !fits_key_space(phases, partitions.len(), batch_size) {
            return Err(shape_error());
        }

        for phase in 0..phases {
            for (partition_index, partition) in partitions.iter().enumerate() {
                let records: Vec<Record> = (0..batch_size)
                    .map(|record_index| {
                        record_id(
                            phase,
                            partition_index,
                            record_index,
                            partitions.len(),
                            batch_size,
                        )
                        .map(|id| self.generator.record(collection.schema(), id))
                    })
                    .collect::<Option<_>>()
                    .ok_or_else(shape_error)?;

                let inserted = self
                    .client
                    .insert(collection.name(), partition, &records)
                    .await
                    .map_err(|source| SeedError::Insert {
                        collection: collection.name().to_string(),
                        partition: partition.clone(),
                        phase,
                        source,
                    })?;

                stats.batches += 1;
                stats.rows += inserted;
                tracing::info!(
                    "Phase {}/{}: inserted {} records into {}/{}",
                    phase + 1,
                    phases,
                    inserted,
                    collection.name(),
                    partition
                );
            }

            self.client
                .flush(collection.name())
                .await
                .map_err(|source| SeedError::step("flush", collection.name(), source))?;
            stats.flushes += 1;
            stats.phases += 1;
            tracing::info!("Phase {}/{}: flushed {}", phase + 1, phases, collection.name());
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn full_schema() -> CollectionSchema {
        CollectionSchema::new(false, true)
            .field(FieldSpec::new("id", FieldKind::Int64).primary())
            .field(FieldSpec::new("embedding", FieldKind::FloatVector { dim: 16 }))
            .field(FieldSpec::new("name", FieldKind::VarChar { max_length: 8 }))
            .field(FieldSpec::new("score", FieldKind::Float))
            .field(FieldSpec::new("age", FieldKind::Int32))
            .field(FieldSpec::new("is_active", FieldKind::Bool))
    }

    mod ids {
        use super::*;

        #[test]
        fn record_ids_are_unique_across_phases_and_partitions() {
            let (phases, partitions, batch) = (3, 3, 500);
            let mut seen = HashSet::new();
            for phase in 0..phases {
                for partition in 0..partitions {
                    for record in 0..batch {
                        let id = record_id(phase, partition, record, partitions, batch).unwrap();
                        assert!(seen.insert(id), "duplicate id {}", id);
                    }
                }
            }
            assert_eq!(seen.len(), phases * partitions * batch);
        }

        #[test]
        fn record_ids_are_dense_from_zero() {
            assert_eq!(record_id(0, 0, 0, 3, 500), Some(0));
            assert_eq!(record_id(0, 1, 0, 3, 500), Some(500));
            assert_eq!(record_id(1, 0, 0, 3, 500), Some(1500));
            assert_eq!(record_id(2, 2, 499, 3, 500), Some(4499));
        }

        #[test]
        fn oversized_shapes_have_no_id() {
            assert_eq!(record_id(usize::MAX, 0, 0, 2, 1), None);
            assert_eq!(record_id(1, usize::MAX, 0, 3, 2), None);
            assert!(!fits_key_space(usize::MAX, 3, 500));
            assert!(fits_key_space(3, 3, 500));
            assert!(fits_key_space(0, 3, 500));
        }
    }

    mod generator {
        use super::*;

        #[test]
        fn record_fills_every_field() {
            let mut generator = RecordGenerator::new(42);
            let record = generator.record(&full_schema(), 7);

            assert_eq!(record.len(), 6);
            assert_eq!(record["id"], Value::from(7));
            assert_eq!(record["embedding"].as_array().unwrap().len(), 16);
            assert_eq!(record["age"], Value::from(25));
            assert_eq!(record["is_active"], Value::from(false));
        }

        #[test]
        fn varchar_values_respect_max_length() {
            let mut generator = RecordGenerator::new(42);
            let record = generator.record(&full_schema(), 123_456);
            assert_eq!(record["name"], Value::from("name_123"));
        }

        #[test]
        fn float_vectors_are_in_unit_interval() {
            let mut generator = RecordGenerator::new(1);
            let vector = generator.vector(&FieldKind::FloatVector { dim: 256 });
            for value in vector.as_array().unwrap() {
                let v = value.as_f64().unwrap();
                assert!((0.0..1.0).contains(&v), "{} out of range", v);
            }
        }

        #[test]
        fn binary_vectors_pack_eight_dimensions_per_byte() {
            let mut generator = RecordGenerator::new(1);
            let vector = generator.vector(&FieldKind::BinaryVector { dim: 128 });
            let bytes = vector.as_array().unwrap();
            assert_eq!(bytes.len(), 16);
            assert!(bytes.iter().all(|b| b.as_u64().unwrap() <= 255));
        }

        #[test]
        fn sparse_vectors_are_bounded() {
            let mut generator = RecordGenerator::new(1);
            for _ in 0..50 {
                let vector = generator.vector(&FieldKind::SparseFloatVector);
                let entries = vector.as_object().unwrap();
                assert!(!entries.is_empty());
                assert!(entries.len() <= SPARSE_MAX_NONZERO);
                for (index, weight) in entries {
                    assert!(index.parse::<usize>().unwrap() < SPARSE_DIMENSION);
                    assert!(weight.as_f64().unwrap() > 0.0);
                }
            }
        }

        #[test]
        fn auto_id_records_omit_primary_key() {
            let schema = CollectionSchema::new(true, false)
                .field(FieldSpec::new("id", FieldKind::Int64).primary())
                .field(FieldSpec::new("vec", FieldKind::FloatVector { dim: 64 }));
            let mut generator = RecordGenerator::new(42);
            let record = generator.record(&schema, 3);
            assert!(!record.contains_key("id"));
            assert_eq!(record["vec"].as_array().unwrap().len(), 64);
        }

        #[test]
        fn same_seed_gives_same_vectors() {
            let kind = FieldKind::FloatVector { dim: 8 };
            let a = RecordGenerator::new(42).vector(&kind);
            let b = RecordGenerator::new(42).vector(&kind);
            let c = RecordGenerator::new(43).vector(&kind);
            assert_eq!(a, b);
            assert_ne!(a, c);
        }

        #[test]
        fn non_vector_kind_gives_null() {
            let mut generator = RecordGenerator::new(42);
            assert_eq!(generator.vector(&FieldKind::Int64), Value::Null);
        }
    }

    mod load {
        use super::*;
        use crate::provision::ResourceProvisioner;
        use crate::readiness::ReadinessGate;
        use crate::testing::InMemoryService;
        use std::time::Duration;

        async fn created(
            service: &Arc<InMemoryService>,
            schema: &CollectionSchema,
            partitions: &[&str],
        ) -> CreatedCollection {
            let client: Arc<dyn VectorDbClient> = service.clone();
            let ready = ReadinessGate::new(client.clone(), Duration::ZERO)
                .wait(1)
                .await
                .unwrap();
            let provisioner = ResourceProvisioner::new(client, &ready);
            let created = provisioner.recreate_collection("c", schema).await.unwrap();
            for partition in partitions {
                provisioner.ensure_partition(&created, partition).await.unwrap();
            }
            created
        }

        fn partitions(names: &[&str]) -> Vec<String> {
            names.iter().map(|p| p.to_string()).collect()
        }

        #[tokio::test]
        async fn flushes_once_per_phase() {
            let service = Arc::new(InMemoryService::new());
            let collection = created(&service, &full_schema(), &["a", "b"]).await;
            let mut loader = DataLoader::new(service.clone(), 42);

            let stats = loader
                .load(&collection, &partitions(&["a", "b"]), 3, 20)
                .await
                .unwrap();

            assert_eq!(stats.rows, 120);
            assert_eq!(stats.batches, 6);
            assert_eq!(stats.flushes, 3);
            let snapshot = service.snapshot("c").unwrap();
            assert_eq!(snapshot.row_count, 120);
            assert_eq!(snapshot.sealed_segments, 3);
            assert_eq!(snapshot.rows_by_partition["a"], 60);
        }

        #[tokio::test]
        async fn primary_keys_are_unique() {
            let service = Arc::new(InMemoryService::new());
            let collection = created(&service, &full_schema(), &["a", "b", "c"]).await;

            DataLoader::new(service.clone(), 42)
                .load(&collection, &partitions(&["a", "b", "c"]), 2, 50)
                .await
                .unwrap();

            let keys = service.snapshot("c").unwrap().primary_keys;
            let unique: HashSet<i64> = keys.iter().map(|k| k.as_i64().unwrap()).collect();
            assert_eq!(keys.len(), 300);
            assert_eq!(unique.len(), 300);
        }

        #[tokio::test]
        async fn empty_shape_makes_no_calls() {
            let service = Arc::new(InMemoryService::new());
            let collection = created(&service, &full_schema(), &[]).await;
            let before = service.calls().len();
            let mut loader = DataLoader::new(service.clone(), 42);

            let stats = loader.load(&collection, &[], 3, 10).await.unwrap();
            assert_eq!(stats, LoadStats::default());
            let stats = loader
                .load(&collection, &partitions(&["_default"]), 3, 0)
                .await
                .unwrap();
            assert_eq!(stats, LoadStats::default());
            assert_eq!(service.calls().len(), before);
        }

        #[tokio::test]
        async fn oversized_shape_is_rejected_before_any_insert() {
            let service = Arc::new(InMemoryService::new());
            let collection = created(&service, &full_schema(), &["a"]).await;
            let before = service.calls().len();

            let err = DataLoader::new(service.clone(), 42)
                .load(&collection, &partitions(&["a"]), usize::MAX, 2)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                SeedError::LoadShape {
                    phases: usize::MAX,
                    partitions: 1,
                    batch_size: 2,
                    ..
                }
            ));
            assert_eq!(service.calls().len(), before);
        }

        #[tokio::test]
        async fn insert_failure_names_partition_and_phase() {
            let service = Arc::new(InMemoryService::new());
            let collection = created(&service, &full_schema(), &["a", "b"]).await;
            service.fail_on("insert:b", "rate limit exceeded");

            let err = DataLoader::new(service.clone(), 42)
                .load(&collection, &partitions(&["a", "b"]), 2, 5)
                .await
                .unwrap_err();

            match err {
                SeedError::Insert {
                    partition, phase, ..
                } => {
                    assert_eq!(partition, "b");
                    assert_eq!(phase, 0);
                },
                other => panic!("unexpected error: {:?}", other),
            }
            assert_eq!(service.call_count("flush"), 0);
        }

        #[tokio::test]
        async fn flush_failure_is_fatal() {
            let service = Arc::new(InMemoryService::new());
            let collection = created(&service, &full_schema(), &[]).await;
            service.fail_on("flush", "flush rate limited");

            let err = DataLoader::new(service.clone(), 42)
                .load(&collection, &partitions(&["_default"]), 1, 5)
                .await
                .unwrap_err();
            assert!(matches!(err, SeedError::Step { step: "flush", .. }));
        }
    }
}
