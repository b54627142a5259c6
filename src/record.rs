// ABOUTME: Record, key and field-schema types shared by stores, transfers and diffs
// ABOUTME: Values are serde_json values so rows round-trip through CSV, JSON and SQLite

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifying sort key of a record.
///
/// Integer keys order before text keys so a mixed key column still sorts totally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Interpret a JSON value as a key; null and non-scalar values have no key
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Text(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

/// Inclusive key range `[low, high]` selecting one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub low: Key,
    pub high: Key,
}

impl KeyRange {
    pub fn new(low: Key, high: Key) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, key: &Key) -> bool {
        &self.low <= key && key <= &self.high
    }
}

/// A keyed row owned by a store.
///
/// `pk` is `None` for rows that have not been written yet; stores assign a fresh key
/// on insert. Relationship fields are held under their foreign-key column name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub pk: Option<Key>,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(pk: Option<Key>) -> Self {
        Self {
            pk,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Field value, treating a missing field as null
    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&Value::Null)
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.fields.insert(column.to_string(), value);
    }

    /// Flatten into a mapping row, the key stored under `pk`
    pub fn to_row(&self) -> Row {
        let mut map = self.fields.clone();
        if let Some(pk) = &self.pk {
            map.insert("pk".to_string(), pk.to_value());
        }
        Row::Mapping(map)
    }
}

/// Storage type of a field, used to coerce incoming values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Logical field name (`author` for a relationship stored in `author_id`)
    pub name: String,
    /// Column the value lives under in a [`Record`]
    pub column: String,
    pub field_type: FieldType,
    /// Table a relationship field points at
    pub related_to: Option<String>,
    pub max_length: Option<usize>,
    pub nullable: bool,
}

impl FieldInfo {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: name.to_string(),
            field_type,
            related_to: None,
            max_length: None,
            nullable: true,
        }
    }

    /// Relationship field whose foreign key is stored in `<name>_id`
    pub fn related(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            column: format!("{}_id", name),
            field_type: FieldType::Integer,
            related_to: Some(target.to_string()),
            max_length: None,
            nullable: true,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn is_related(&self) -> bool {
        self.related_to.is_some()
    }
}

/// Look a field up by logical name or column name
pub fn find_field_info<'a>(fields: &'a [FieldInfo], name: &str) -> Option<&'a FieldInfo> {
    fields
        .iter()
        .find(|f| f.name == name || f.column == name)
}

/// An already-parsed input row, either named or positional
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Mapping(Map<String, Value>),
    Sequence(Vec<Value>),
}

impl Row {
    pub fn is_blank(&self) -> bool {
        let blank = |v: &Value| match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };
        match self {
            Row::Mapping(map) => map.values().all(blank),
            Row::Sequence(values) => values.iter().all(blank),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Row::Mapping(map) => map.len(),
            Row::Sequence(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::Sequence(values)
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Row::Mapping(map)
    }
}
