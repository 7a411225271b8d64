use std::any::Any;
use std::collections::HashMap;

use common::CorrelationId;

/// Typed key/value state shared by the steps of one saga run.
///
/// A context belongs to exactly one run; steps read what earlier steps wrote
/// and write what later steps and compensations need.
pub struct SagaContext {
    correlation_id: CorrelationId,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl SagaContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            values: HashMap::new(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Stores `value` under `key`, replacing whatever was there.
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Returns the value under `key` if it exists and is a `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes and returns the value under `key`. A value of another type is
    /// left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key)?.is::<T>() {
            return None;
        }
        self.values
            .remove(key)
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("SagaContext")
            .field("correlation_id", &self.correlation_id)
            .field("keys", &keys)
            .finish()
    }
}
