//! Shared variable pool carried across a test run.
//!
//! One pool instance is threaded by `&mut` through dependency handling and
//! case execution. Keys are unique, writes are last-writer-wins, and the
//! pool only ever grows as cases extract values.

use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    vars: Map<String, Value>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(vars: Map<String, Value>) -> Self {
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        debug!("pool set {name}");
        self.vars.insert(name, value);
    }

    /// Merge a map of values, overwriting existing keys.
    pub fn merge(&mut self, values: Map<String, Value>) {
        for (name, value) in values {
            self.insert(name, value);
        }
    }

    /// A cloned view of the current contents, used as the resolution
    /// source for one placeholder pass.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.vars.clone()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_writer_wins() {
        let mut pool = VariablePool::new();
        pool.insert("token", json!("first"));
        pool.insert("token", json!("second"));
        assert_eq!(pool.get("token"), Some(&json!("second")));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut pool = VariablePool::new();
        pool.insert("a", json!(1));

        let mut update = Map::new();
        update.insert("a".to_string(), json!(2));
        update.insert("b".to_string(), json!([1, 2]));
        pool.merge(update);

        assert_eq!(pool.get("a"), Some(&json!(2)));
        assert_eq!(pool.get("b"), Some(&json!([1, 2])));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut pool = VariablePool::new();
        pool.insert("a", json!(1));
        let snap = pool.snapshot();
        pool.insert("a", json!(2));
        assert_eq!(snap.get("a"), Some(&json!(1)));
    }
}
