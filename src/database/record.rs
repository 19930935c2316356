use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::database::entity::COMMON_FIELDS;
use crate::database::error::DataError;

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Built from caller input, not yet persisted
    New,
    /// Loaded from the database
    Loaded,
}

/// Errors that can occur during Record operations
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Field '{0}' is stamped by the server and cannot be set by callers")]
    SystemFieldNotAllowed(String),
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
}

impl From<RecordError> for DataError {
    fn from(error: RecordError) -> Self {
        match error {
            RecordError::SystemFieldNotAllowed(field) => DataError::InvalidValue {
                column: field,
                reason: "set by the server".to_string(),
            },
            RecordError::InvalidJson(reason) => DataError::InvalidOperation(reason),
        }
    }
}

/// A dynamic row with change tracking against its loaded state
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// State as loaded from the database (None for new records)
    original: Option<BTreeMap<String, Value>>,
    fields: BTreeMap<String, Value>,
    /// Fields written since load
    modified_fields: BTreeSet<String>,
    state: RecordState,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stamped(key: &str) -> bool {
    COMMON_FIELDS.contains(&key)
}

impl Record {
    pub fn new() -> Self {
        Self {
            original: None,
            fields: BTreeMap::new(),
            modified_fields: BTreeSet::new(),
            state: RecordState::New,
        }
    }

    /// Create record from caller JSON; server-stamped fields are rejected
    pub fn from_json(json: Value) -> Result<Self, RecordError> {
        match json {
            Value::Object(map) => {
                let mut record = Self::new();
                for (key, value) in map {
                    if is_stamped(&key) {
                        return Err(RecordError::SystemFieldNotAllowed(key));
                    }
                    record.fields.insert(key, value);
                }
                Ok(record)
            }
            _ => Err(RecordError::InvalidJson("Expected JSON object".to_string())),
        }
    }

    /// Row data from the database (stamped fields allowed)
    pub fn from_sql_data(data: BTreeMap<String, Value>) -> Self {
        Self {
            original: Some(data.clone()),
            fields: data,
            modified_fields: BTreeSet::new(),
            state: RecordState::Loaded,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Set a caller field; server-stamped fields are ignored
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if is_stamped(&key) {
            tracing::warn!("Attempted to set stamped field '{}' - ignoring", key);
            return self;
        }
        self.write(key, value.into());
        self
    }

    /// Set a server-stamped field (observers only)
    pub fn set_system_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.write(key.into(), value.into());
        self
    }

    fn write(&mut self, key: String, value: Value) {
        if self.original.is_some() {
            self.modified_fields.insert(key.clone());
        }
        self.fields.insert(key, value);
    }

    /// Apply caller changes; stamped fields in `changes` are rejected
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<&mut Self, RecordError> {
        if let Some(key) = changes.keys().find(|k| is_stamped(k) || k.as_str() == "id") {
            return Err(RecordError::SystemFieldNotAllowed(key.clone()));
        }
        for (key, value) in changes {
            self.write(key.clone(), value.clone());
        }
        Ok(self)
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.get_str("organization_id")
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn original(&self) -> Option<&BTreeMap<String, Value>> {
        self.original.as_ref()
    }

    /// Check if a specific field has been changed
    pub fn changed(&self, key: &str) -> bool {
        match (&self.original, self.fields.get(key)) {
            (Some(original), Some(current)) => original.get(key) != Some(current),
            (Some(original), None) => original.contains_key(key),
            (None, Some(_)) => true,
            (None, None) => false,
        }
    }

    /// Fields whose value differs from the loaded state, in column order
    pub fn changed_fields(&self) -> Vec<String> {
        match &self.original {
            Some(_) => self.modified_fields.iter().filter(|f| self.changed(f)).cloned().collect(),
            None => self.fields.keys().cloned().collect(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changed_fields().is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Mark as persisted: the current fields become the loaded state
    pub fn into_loaded(self) -> Self {
        Self::from_sql_data(self.fields)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        record.to_json()
    }
}
