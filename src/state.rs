use std::collections::BTreeMap;

use serde_json::Value;

/// Mutable keyed bag for threading identifiers between ordered phases
/// (e.g. a feed id created in Feed Management and deleted later). Owned by
/// one runner instance; cleared at the start of each run.
#[derive(Debug, Default)]
pub struct SharedState {
    values: BTreeMap<String, Value>,
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
