use std::sync::atomic::{AtomicU32, Ordering};

use crate::{FieldIdx, MethodIdx};

static NEXT_EPOCH: AtomicU32 = AtomicU32::new(0);

/// Handle to a class entry. Stays valid until the class is removed or its
/// container is compacted.
///
/// Every arena draws its epoch from a process-wide counter, so a handle only
/// resolves in the container that issued it and in clones of that container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId {
    index: u32,
    epoch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub class: ClassId,
    pub method: MethodIdx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: ClassId,
    pub field: FieldIdx,
}

/// Append-only slots; removal leaves a tombstone so iteration keeps insertion order.
#[derive(Debug, Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    epoch: u32,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::with_epoch(NEXT_EPOCH.fetch_add(1, Ordering::Relaxed))
    }
}

impl<T> Arena<T> {
    pub fn with_epoch(epoch: u32) -> Self {
        Self {
            slots: Vec::new(),
            epoch,
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn insert(&mut self, value: T) -> ClassId {
        let id = ClassId {
            index: self.slots.len() as u32,
            epoch: self.epoch,
        };
        self.slots.push(Some(value));
        self.live += 1;
        id
    }

    pub fn get(&self, id: ClassId) -> Option<&T> {
        if id.epoch != self.epoch {
            return None;
        }
        self.slots.get(id.index as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ClassId) -> Option<&mut T> {
        if id.epoch != self.epoch {
            return None;
        }
        self.slots.get_mut(id.index as usize)?.as_mut()
    }

    pub fn remove(&mut self, id: ClassId) -> Option<T> {
        if id.epoch != self.epoch {
            return None;
        }
        let value = self.slots.get_mut(id.index as usize)?.take()?;
        self.live -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &T)> + '_ {
        let epoch = self.epoch;
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            slot.as_ref().map(|value| {
                (
                    ClassId {
                        index: i as u32,
                        epoch,
                    },
                    value,
                )
            })
        })
    }

    pub fn last(&self) -> Option<ClassId> {
        let index = self.slots.iter().rposition(Option::is_some)?;
        Some(ClassId {
            index: index as u32,
            epoch: self.epoch,
        })
    }
}
