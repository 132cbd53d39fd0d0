//! Schema description models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed set of inferred value types.
///
/// The derive order is also the display order used when tags are listed;
/// widening rules live in `federation::inference`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Null,
    Boolean,
    Number,
    Date,
    String,
    Array,
    Object,
    Unknown,
    /// Distinct concrete types were observed for one field.
    Mixed,
}

impl TypeTag {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Boolean => "boolean",
            TypeTag::Number => "number",
            TypeTag::Date => "date",
            TypeTag::String => "string",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Unknown => "unknown",
            TypeTag::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    /// Column / field / property name.
    pub name: String,
    /// Native catalog type (relational) or merged type tag (schemaless).
    pub data_type: String,
    /// Whether the column may be absent or null.
    pub nullable: bool,
}

impl ColumnSchema {
    /// Creates a column description.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }
}

/// Table / collection / label description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in catalog or first-seen order.
    pub columns: Vec<ColumnSchema>,
}

/// Table listing payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableList {
    /// Table, collection or label names.
    pub tables: Vec<String>,
}
