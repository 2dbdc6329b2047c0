use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Name of the partition every collection is created with
pub const DEFAULT_PARTITION: &str = "_default";

/// Field type, including the type-specific parameters the service needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Int64,
    VarChar { max_length: u32 },
    Float,
    Int32,
    Bool,
    FloatVector { dim: u32 },
    BinaryVector { dim: u32 },
    SparseFloatVector,
    /// A type reported by the service that this crate never creates
    Unsupported { name: String },
}

impl FieldKind {
    /// Whether the field holds vectors and therefore needs an index
    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            FieldKind::FloatVector { .. }
                | FieldKind::BinaryVector { .. }
                | FieldKind::SparseFloatVector
        )
    }

    /// Type name as used by the service wire protocol
    pub fn type_name(&self) -> &str {
        match self {
            FieldKind::Int64 => "Int64",
            FieldKind::VarChar { .. } => "VarChar",
            FieldKind::Float => "Float",
            FieldKind::Int32 => "Int32",
            FieldKind::Bool => "Bool",
            FieldKind::FloatVector { .. } => "FloatVector",
            FieldKind::BinaryVector { .. } => "BinaryVector",
            FieldKind::SparseFloatVector => "SparseFloatVector",
            FieldKind::Unsupported { name } => name,
        }
    }

    /// Rebuild a kind from the service's type name and element parameters
    pub fn from_wire(type_name: &str, dim: Option<u32>, max_length: Option<u32>) -> Self {
        match type_name {
            "Int64" => FieldKind::Int64,
            "VarChar" => FieldKind::VarChar {
                max_length: max_length.unwrap_or(0),
            },
            "Float" => FieldKind::Float,
            "Int32" => FieldKind::Int32,
            "Bool" => FieldKind::Bool,
            "FloatVector" => FieldKind::FloatVector {
                dim: dim.unwrap_or(0),
            },
            "BinaryVector" => FieldKind::BinaryVector {
                dim: dim.unwrap_or(0),
            },
            "SparseFloatVector" => FieldKind::SparseFloatVector,
            other => FieldKind::Unsupported {
                name: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::VarChar { max_length } => write!(f, "VarChar({})", max_length),
            FieldKind::FloatVector { dim } => write!(f, "FloatVector({})", dim),
            FieldKind::BinaryVector { dim } => write!(f, "BinaryVector({})", dim),
            other => write!(f, "{}", other.type_name()),
        }
    }
}

/// A single field in a collection schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub is_primary: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_primary: false,
        }
    }

    /// Mark this field as the primary key
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema has no fields")]
    Empty,

    #[error("schema has no primary key field")]
    NoPrimaryKey,

    #[error("schema has more than one primary key: {0:?}")]
    MultiplePrimaryKeys(Vec<String>),

    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    #[error("primary key '{field}' must be Int64 or VarChar, got {kind}")]
    InvalidPrimaryType { field: String, kind: String },

    #[error("auto_id requires an Int64 primary key, '{0}' is not Int64")]
    AutoIdRequiresInt64(String),

    #[error("field '{field}' has invalid dimension {dim}")]
    InvalidDimension { field: String, dim: u32 },

    #[error("field '{field}' has invalid max_length {max_length}")]
    InvalidMaxLength { field: String, max_length: u32 },

    #[error("field '{field}' has unsupported type {kind}")]
    UnsupportedType { field: String, kind: String },

    #[error("schema has no vector field")]
    NoVectorField,
}

/// Ordered field list plus collection-level flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub auto_id: bool,
    #[serde(default)]
    pub enable_dynamic_field: bool,
}

impl CollectionSchema {
    pub fn new(auto_id: bool, enable_dynamic_field: bool) -> Self {
        Self {
            fields: Vec::new(),
            auto_id,
            enable_dynamic_field,
        }
    }

    /// Append a field, keeping declaration order
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_field(&self) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.is_primary)
    }

    pub fn vector_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.kind.is_vector())
    }

    /// Non-vector, non-primary fields; the natural output set for reads
    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| !f.is_primary && !f.kind.is_vector())
    }

    /// Fields a caller has to supply on insert
    pub fn insertable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        let auto_id = self.auto_id;
        self.fields.iter().filter(move |f| !(auto_id && f.is_primary))
    }

    /// Check the invariants the service would otherwise reject at create time
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            match &field.kind {
                FieldKind::FloatVector { dim } if *dim == 0 => {
                    return Err(SchemaError::InvalidDimension {
                        field: field.name.clone(),
                        dim: *dim,
                    });
                },
                // Binary vectors are packed into bytes
                FieldKind::BinaryVector { dim } if *dim == 0 || dim % 8 != 0 => {
                    return Err(SchemaError::InvalidDimension {
                        field: field.name.clone(),
                        dim: *dim,
                    });
                },
                FieldKind::VarChar { max_length } if *max_length == 0 => {
                    return Err(SchemaError::InvalidMaxLength {
                        field: field.name.clone(),
                        max_length: *max_length,
                    });
                },
                FieldKind::Unsupported { name } => {
                    return Err(SchemaError::UnsupportedType {
                        field: field.name.clone(),
                        kind: name.clone(),
                    });
                },
                _ => {},
            }
        }

        let primaries: Vec<&FieldSpec> = self.fields.iter().filter(|f| f.is_primary).collect();
        let primary = match primaries.as_slice() {
            [] => return Err(SchemaError::NoPrimaryKey),
            [one] => *one,
            many => {
                return Err(SchemaError::MultiplePrimaryKeys(
                    many.iter().map(|f| f.name.clone()).collect(),
                ))
            },
        };

        match primary.kind {
            FieldKind::Int64 => {},
            FieldKind::VarChar { .. } if !self.auto_id => {},
            FieldKind::VarChar { .. } => {
                return Err(SchemaError::AutoIdRequiresInt64(primary.name.clone()))
            },
            ref other => {
                return Err(SchemaError::InvalidPrimaryType {
                    field: primary.name.clone(),
                    kind: other.to_string(),
                })
            },
        }

        if self.vector_fields().next().is_none() {
            return Err(SchemaError::NoVectorField);
        }

        Ok(())
    }
}

/// Index definition for one vector field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field_name: String,
    pub index_type: String,
    pub metric_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl IndexSpec {
    pub fn new(
        field_name: impl Into<String>,
        index_type: impl Into<String>,
        metric_type: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            index_type: index_type.into(),
            metric_type: metric_type.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a build parameter such as `nlist`
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Index name used when talking to the service
    pub fn index_name(&self) -> String {
        format!("{}_index", self.field_name)
    }
}
