use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_types::FieldId;

/// A single row: field name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

pub const ID_FIELD: &str = "id";
pub const UID_FIELD: &str = "uid";
pub const CREATE_TIME_FIELD: &str = "create_time";

/// Columns every user table carries. They're created by the DDL compiler and
/// never editable by the user.
pub const SYSTEM_FIELDS: [&str; 3] = [ID_FIELD, UID_FIELD, CREATE_TIME_FIELD];

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

/// Declared type of a user field. Unknown types are carried through verbatim
/// so that the backend can interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Time,
    Other(String),
}

impl FieldType {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "time" => Self::Time,
            _ => Self::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Time => "time",
            Self::Other(name) => name,
        }
    }

    /// The column type used in generated DDL
    pub fn sql_type(&self) -> &str {
        match self {
            Self::String => "VARCHAR",
            Self::Integer => "BIGINT",
            Self::Number => "DECIMAL",
            Self::Boolean => "BOOLEAN",
            Self::Time => "TIMESTAMP",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied definition of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default_value: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A field as it's stored in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub id: FieldId,
    pub is_system: bool,
    #[serde(flatten)]
    pub spec: FieldSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldSpec>,
}

/// The catalog state of a table before an alteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub name: String,
    pub description: Option<String>,
    pub fields: Vec<Field>,
}

impl TableSnapshot {
    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn user_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_system)
    }
}

/// One instruction of an alteration. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ChangeSetItem {
    Insert(FieldSpec),
    Update {
        id: FieldId,
        #[serde(flatten)]
        spec: FieldSpec,
    },
    Delete {
        id: FieldId,
    },
}

impl ChangeSetItem {
    /// Deletes run first so that a column can be dropped and re-added under the
    /// same name within one alteration.
    pub fn execution_order(&self) -> u8 {
        match self {
            Self::Delete { .. } => 0,
            Self::Update { .. } => 1,
            Self::Insert(_) => 2,
        }
    }
}

/// Treats a blank text as absent
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
