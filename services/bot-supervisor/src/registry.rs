//! Instance registry: slot arena with an id index and a free list

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::instance::BotInstance;

/// Registry the supervisor shares with the broadcaster
pub type BotRegistry = Registry<Arc<BotInstance>>;

/// Id-keyed arena. Removed slots are recycled by the next insert.
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Option<(Uuid, T)>>,
    index: HashMap<Uuid, usize>,
    free: Vec<usize>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot used, or hands the value back if the id is taken
    pub fn insert(&mut self, id: Uuid, value: T) -> Result<usize, T> {
        if self.index.contains_key(&id) {
            return Err(value);
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some((id, value));
                slot
            }
            None => {
                self.slots.push(Some((id, value)));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        Ok(slot)
    }

    pub fn get(&self, id: &Uuid) -> Option<&T> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_ref().map(|(_, v)| v)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<T> {
        let slot = self.index.remove(id)?;
        let (_, value) = self.slots[slot].take()?;
        self.free.push(slot);
        Some(value)
    }

    pub fn slot_of(&self, id: &Uuid) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Uuid, &T)> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|(id, v)| (*id, v)))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.iter().map(|(_, v)| v)
    }
}

impl<T: Clone> Registry<T> {
    /// Cloned handles, so callers can drop the registry lock before awaiting
    pub fn snapshot(&self) -> Vec<T> {
        self.values().cloned().collect()
    }
}
