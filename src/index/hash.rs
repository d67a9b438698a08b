//! Hash index: outer key to field map, positions only. Field values live in
//! the logs.

use std::collections::HashMap;

use crate::storage::ValuePosition;

#[derive(Default)]
pub struct HashIndex {
    map: HashMap<Vec<u8>, HashMap<Vec<u8>, ValuePosition>>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8], field: &[u8]) -> Option<ValuePosition> {
        self.map.get(key)?.get(field).copied()
    }

    /// Install a field position, returning the one it replaced.
    pub fn put(&mut self, key: &[u8], field: Vec<u8>, pos: ValuePosition) -> Option<ValuePosition> {
        self.map.entry(key.to_vec()).or_default().insert(field, pos)
    }

    /// Remove a field; drops the outer key when it becomes empty.
    pub fn remove(&mut self, key: &[u8], field: &[u8]) -> Option<ValuePosition> {
        let fields = self.map.get_mut(key)?;
        let prev = fields.remove(field);
        if fields.is_empty() {
            self.map.remove(key);
        }
        prev
    }

    pub fn remove_key(&mut self, key: &[u8]) -> Option<HashMap<Vec<u8>, ValuePosition>> {
        self.map.remove(key)
    }

    pub fn key_exists(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn field_count(&self, key: &[u8]) -> usize {
        self.map.get(key).map_or(0, |fields| fields.len())
    }

    pub fn fields(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.map
            .get(key)
            .map_or_else(Vec::new, |fields| fields.keys().cloned().collect())
    }

    pub fn positions(&self, key: &[u8]) -> Vec<(Vec<u8>, ValuePosition)> {
        self.map.get(key).map_or_else(Vec::new, |fields| {
            fields.iter().map(|(f, p)| (f.clone(), *p)).collect()
        })
    }

    /// Iterate every (outer key, field map) pair; used by the dump writer.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &HashMap<Vec<u8>, ValuePosition>)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
