use std::collections::HashMap;

use crate::value::Value;

/// Per-virtual-user variable store used for correlation.
///
/// A session is created fresh for every virtual user and dropped when that
/// user finishes; it is never shared, so no synchronization is needed.
/// Only step execution mutates it (feeds and `save_as` checks), and a later
/// write to the same name replaces the earlier binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    user_id: u64,
    values: HashMap<String, Value>,
}

impl Session {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            values: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Bind `name`, returning the previous binding if there was one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Merge a feeder row, overwriting keys that are already bound.
    pub fn merge<I>(&mut self, row: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.values.extend(row);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
