//! Output schema model and inference.
//!
//! Fixed-shape nodes declare their schema up front and flag which fields
//! are only known after a run (`dynamic`). Open-shape nodes infer one from a
//! sample value with [`infer_from_value`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Name of the metadata block appended to inferred schemas.
pub const EXECUTION_FIELD: &str = "_execution";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Any,
}

impl SchemaType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => SchemaType::Null,
            Value::Bool(_) => SchemaType::Boolean,
            Value::Number(_) => SchemaType::Number,
            Value::String(_) => SchemaType::String,
            Value::Array(_) => SchemaType::Array,
            Value::Object(_) => SchemaType::Object,
        }
    }
}

/// One property of a node's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: SchemaType,
    /// Shape only known after a run; the editor skips type hints for it.
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<SchemaField>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: SchemaType) -> Self {
        Self {
            name: name.into(),
            field_type,
            dynamic: false,
            optional: false,
            description: None,
            properties: Vec::new(),
        }
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_properties(mut self, properties: Vec<SchemaField>) -> Self {
        self.properties = properties;
        self
    }
}

/// Structural description of a node's output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub fields: Vec<SchemaField>,
    /// More fields than listed may show up at runtime; the shape has not
    /// been resolved by a sample run yet.
    #[serde(default)]
    pub dynamic: bool,
}

impl OutputSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields, dynamic: false }
    }

    /// Schema whose listed fields are only part of the picture.
    pub fn open(fields: Vec<SchemaField>) -> Self {
        Self { fields, dynamic: true }
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True when every field is statically known.
    pub fn is_static(&self) -> bool {
        !self.dynamic && self.fields.iter().all(|f| !f.dynamic)
    }

    /// Append the `_execution{success, error?, durationMs}` block, replacing
    /// any field already using that name.
    pub fn with_execution_metadata(mut self) -> Self {
        self.fields.retain(|f| f.name != EXECUTION_FIELD);
        self.fields.push(execution_metadata_field());
        self
    }
}

/// The fixed `_execution` metadata field.
pub fn execution_metadata_field() -> SchemaField {
    SchemaField::new(EXECUTION_FIELD, SchemaType::Object)
        .describe("Execution status and timing")
        .with_properties(vec![
            SchemaField::new("success", SchemaType::Boolean),
            SchemaField::new("error", SchemaType::String).optional(),
            SchemaField::new("durationMs", SchemaType::Number),
        ])
}

/// Describe the top-level properties of a sample value.
///
/// Non-object values are described as a single `result` field, matching how
/// transform outputs wrap them.
pub fn infer_from_value(value: &Value) -> OutputSchema {
    match value {
        Value::Object(map) => OutputSchema::new(
            map.iter()
                .filter(|(name, _)| name.as_str() != EXECUTION_FIELD)
                .map(|(name, v)| SchemaField::new(name.clone(), SchemaType::of(v)))
                .collect(),
        ),
        other => OutputSchema::new(vec![SchemaField::new("result", SchemaType::of(other))]),
    }
}

/// Fingerprint used to tell whether a cached schema still matches its code.
pub fn code_hash(code: &str) -> String {
    format!("{:x}", Sha256::digest(code.as_bytes()))
}
