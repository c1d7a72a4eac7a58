use indexmap::IndexMap;
use serde_json::Value;
use stepflow_registry::VariableScope;

/// In-memory variable scope that keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryScope {
    variables: IndexMap<String, Value>,
}

impl MemoryScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }
}

impl From<IndexMap<String, Value>> for MemoryScope {
    fn from(variables: IndexMap<String, Value>) -> Self {
        Self { variables }
    }
}

impl VariableScope for MemoryScope {
    fn try_get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    fn set(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    fn names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }
}
