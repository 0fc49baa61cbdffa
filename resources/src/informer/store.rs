use std::collections::HashMap;

use parking_lot::RwLock;

use super::{Delta, DeltaKind};
use crate::objects::Object;

/// Last known state of every tracked object, keyed by [`Object::key`].
///
/// Readers always observe whole objects: every mutation happens under a
/// single write lock, so a key is seen either before or after a change.
#[derive(Debug)]
pub struct ObjectStore<T> {
    items: RwLock<HashMap<String, T>>,
}

impl<T: Object> Default for ObjectStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Object> ObjectStore<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.items.read().get(key).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Drop every stored object and repopulate from `items` in one step.
    pub fn replace(&self, items: Vec<T>) {
        let new_items = items
            .into_iter()
            .map(|object| (object.key(), object))
            .collect::<HashMap<_, _>>();
        *self.items.write() = new_items;
    }

    pub fn apply(&self, delta: &Delta<T>) {
        let mut items = self.items.write();
        match delta.kind {
            DeltaKind::Added | DeltaKind::Updated | DeltaKind::Resync => {
                if items.get(&delta.key) != Some(&delta.object) {
                    items.insert(delta.key.to_owned(), delta.object.clone());
                }
            },
            DeltaKind::Deleted => {
                items.remove(&delta.key);
            },
        }
    }
}
