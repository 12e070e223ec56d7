//! Generation-checked handle table.
//!
//! A handle names a slot and the generation the slot had when the value was
//! registered. Releasing a value bumps the slot's generation, so a handle
//! kept past its release can never resolve to whatever reuses the slot.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Packs the handle into a non-zero `u64`.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

/// Owning table of values addressed by [`Handle`]s.
pub struct HandleTable<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }
}

impl<T> HandleTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, value: T) -> Handle {
        self.register_arc(Arc::new(value))
    }

    pub fn register_arc(&self, value: Arc<T>) -> Handle {
        let mut inner = self.inner.lock();
        inner.live += 1;
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(inner.slots.len()).unwrap_or(u32::MAX);
        inner.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Handle {
            index,
            generation: 1,
        }
    }

    /// Returns the live value behind `handle`.
    pub fn resolve(&self, handle: Handle) -> Result<Arc<T>> {
        let inner = self.inner.lock();
        inner
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.clone())
            .ok_or(Error::InvalidHandle)
    }

    /// Removes the value behind `handle`. Releasing a stale or already
    /// released handle is a no-op returning `None`.
    pub fn release(&self, handle: Handle) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = next_generation(slot.generation);
        inner.free.push(handle.index);
        inner.live -= 1;
        Some(value)
    }

    /// Whether `handle` named a value that has been released and whose slot
    /// has not been reused since.
    #[must_use]
    pub fn is_retired(&self, handle: Handle) -> bool {
        let inner = self.inner.lock();
        inner
            .slots
            .get(handle.index as usize)
            .is_some_and(|slot| {
                slot.value.is_none() && slot.generation == next_generation(handle.generation)
            })
    }

    /// Number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
