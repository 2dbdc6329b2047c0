//! The fixture topology a seeding run converges to.
//!
//! A [`Topology`] is plain data: which databases exist, which collections
//! are rebuilt, how their rows are shaped and which principals are created.
//! [`Topology::comprehensive`] is the canonical layout; tests build smaller
//! ones by hand.

use crate::config::LoadConfig;
use crate::schema::{CollectionSchema, FieldKind, FieldSpec, IndexSpec, DEFAULT_PARTITION};
use serde::Serialize;

pub const PRIMARY_COLLECTION: &str = "test_collection";
pub const SIMPLE_COLLECTION: &str = "simple_collection";
pub const BINARY_COLLECTION: &str = "binary_collection";
pub const SPARSE_COLLECTION: &str = "sparse_collection";
pub const FIXTURE_DATABASE: &str = "test_db";

/// How much of a failure a collection fixture may cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// Any failure aborts the run
    Required,
    /// Failures are logged and the run continues
    BestEffort,
}

/// One collection and everything hanging off it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionFixture {
    pub name: String,
    pub schema: CollectionSchema,
    /// Partitions created on top of the default one
    pub partitions: Vec<String>,
    pub index: IndexSpec,
    pub aliases: Vec<String>,
    pub phases: usize,
    pub batch_size: usize,
    pub requirement: Requirement,
}

impl CollectionFixture {
    pub fn new(name: impl Into<String>, schema: CollectionSchema, index: IndexSpec) -> Self {
        Self {
            name: name.into(),
            schema,
            partitions: Vec::new(),
            index,
            aliases: Vec::new(),
            phases: 1,
            batch_size: 100,
            requirement: Requirement::Required,
        }
    }

    pub fn with_partitions(mut self, partitions: &[&str]) -> Self {
        self.partitions = partitions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_load(mut self, phases: usize, batch_size: usize) -> Self {
        self.phases = phases;
        self.batch_size = batch_size;
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.requirement = Requirement::BestEffort;
        self
    }

    /// Partitions the loader writes into; the default one when none are declared
    pub fn load_targets(&self) -> Vec<String> {
        if self.partitions.is_empty() {
            vec![DEFAULT_PARTITION.to_string()]
        } else {
            self.partitions.clone()
        }
    }

    /// Rows the collection holds after a full load
    pub fn expected_rows(&self) -> usize {
        self.phases * self.load_targets().len() * self.batch_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFixture {
    pub name: String,
    #[serde(skip)]
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    /// Extra databases; created if missing, never dropped
    pub databases: Vec<String>,
    /// Receives search, query and compaction activity
    pub primary: CollectionFixture,
    /// One collection per additional vector encoding
    pub secondary: Vec<CollectionFixture>,
    pub users: Vec<UserFixture>,
    pub roles: Vec<String>,
}

impl Topology {
    /// Every field type, vector encoding and resource kind the consumer inspects
    pub fn comprehensive(load: &LoadConfig) -> Self {
        let primary = CollectionFixture::new(
            PRIMARY_COLLECTION,
            CollectionSchema::new(false, true)
                .field(FieldSpec::new("id", FieldKind::Int64).primary())
                .field(FieldSpec::new("embedding", FieldKind::FloatVector { dim: 128 }))
                .field(FieldSpec::new("name", FieldKind::VarChar { max_length: 256 }))
                .field(FieldSpec::new("score", FieldKind::Float))
                .field(FieldSpec::new("age", FieldKind::Int32))
                .field(FieldSpec::new("is_active", FieldKind::Bool)),
            IndexSpec::new("embedding", "IVF_FLAT", "L2").param("nlist", 128),
        )
        .with_partitions(&["part_a", "part_b", "part_c"])
        .with_aliases(&["test_alias", "test_alias_2"])
        .with_load(load.phases, load.batch_size);

        let simple = CollectionFixture::new(
            SIMPLE_COLLECTION,
            CollectionSchema::new(true, false)
                .field(FieldSpec::new("id", FieldKind::Int64).primary())
                .field(FieldSpec::new("vec", FieldKind::FloatVector { dim: 64 })),
            IndexSpec::new("vec", "IVF_FLAT", "L2").param("nlist", 64),
        )
        .with_load(1, 200);

        let binary = CollectionFixture::new(
            BINARY_COLLECTION,
            CollectionSchema::new(false, false)
                .field(FieldSpec::new("id", FieldKind::Int64).primary())
                .field(FieldSpec::new("bin_vec", FieldKind::BinaryVector { dim: 128 }))
                .field(FieldSpec::new("tag", FieldKind::VarChar { max_length: 64 })),
            IndexSpec::new("bin_vec", "BIN_IVF_FLAT", "HAMMING").param("nlist", 64),
        )
        .with_load(1, 300);

        // Sparse vectors need a recent server; older ones reject the schema
        let sparse = CollectionFixture::new(
            SPARSE_COLLECTION,
            CollectionSchema::new(false, false)
                .field(FieldSpec::new("id", FieldKind::Int64).primary())
                .field(FieldSpec::new("sparse_vec", FieldKind::SparseFloatVector))
                .field(FieldSpec::new("category", FieldKind::VarChar { max_length: 64 })),
            IndexSpec::new("sparse_vec", "SPARSE_INVERTED_INDEX", "IP")
                .param("drop_ratio_build", 0.2),
        )
        .with_load(1, 300)
        .best_effort();

        Self {
            databases: vec![FIXTURE_DATABASE.to_string()],
            primary,
            secondary: vec![simple, binary, sparse],
            users: vec![UserFixture {
                name: "test_user".to_string(),
                password: "Test@123456".to_string(),
            }],
            roles: vec!["test_role".to_string()],
        }
    }

    /// All collection fixtures, primary first
    pub fn collections(&self) -> impl Iterator<Item = &CollectionFixture> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }
}
