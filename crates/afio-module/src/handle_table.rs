//! Generational slot table for worker-side open files.
//!
//! Freed slots are reused, but every reuse bumps the slot's generation, so
//! a [`HandleId`] that outlived its `Close` no longer resolves.

use afio_core::task::HandleId;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> HandleId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return HandleId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        HandleId::new(index, 0)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn remove(&mut self, id: HandleId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_ids_are_rejected_after_reuse() {
        let mut table = HandleTable::new();
        let first = table.insert("a");
        assert_eq!(table.remove(first), Some("a"));

        let second = table.insert("b");
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());

        assert!(table.get_mut(first).is_none());
        assert!(table.remove(first).is_none());
        assert_eq!(table.get_mut(second).copied(), Some("b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn double_remove_is_harmless() {
        let mut table = HandleTable::new();
        let id = table.insert(1);
        assert_eq!(table.remove(id), Some(1));
        assert_eq!(table.remove(id), None);
        assert!(table.is_empty());
    }
}
