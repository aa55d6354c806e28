//! Generation-checked connection table
//!
//! Handles are `{index, generation}`. Removing a connection bumps the
//! slot's generation, so a handle kept past `remove` never resolves to
//! whatever later reuses the slot.

use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics};
use crate::core::liveness::Liveness;
use crate::traits::error::{Result, WirePoolError};
use std::fmt;
use std::sync::Arc;

/// Stable identifier of one pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    index: u32,
    generation: u32,
}

impl ConnectionHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// State a caller thread may read about a connection
///
/// The background thread's session writes the same cells.
#[derive(Clone)]
pub struct SlotEntry {
    pub state: Arc<AtomicConnectionState>,
    pub liveness: Arc<Liveness>,
    pub metrics: Arc<AtomicMetrics>,
}

struct Slot {
    generation: u32,
    entry: Option<SlotEntry>,
}

pub struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    capacity: usize,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            capacity,
        }
    }

    /// Fails with `PoolExhausted` at capacity, leaving the table untouched
    pub fn insert(&mut self, entry: SlotEntry) -> Result<ConnectionHandle> {
        if self.live >= self.capacity {
            return Err(WirePoolError::PoolExhausted {
                capacity: self.capacity,
            });
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.live += 1;
        Ok(ConnectionHandle {
            index,
            generation: slot.generation,
        })
    }

    /// `None` for stale or already-removed handles
    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<SlotEntry> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(entry)
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&SlotEntry> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| ConnectionHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection_state::ConnectionState;

    fn entry() -> SlotEntry {
        SlotEntry {
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Connecting)),
            liveness: Arc::new(Liveness::new()),
            metrics: Arc::new(AtomicMetrics::new()),
        }
    }

    #[test]
    fn test_capacity_is_hard() {
        let mut table = SlotTable::new(2);
        let a = table.insert(entry()).unwrap();
        let _b = table.insert(entry()).unwrap();
        assert!(matches!(
            table.insert(entry()),
            Err(WirePoolError::PoolExhausted { capacity: 2 })
        ));
        assert_eq!(table.len(), 2);

        table.remove(a).unwrap();
        assert!(table.insert(entry()).is_ok());
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut table = SlotTable::new(4);
        let old = table.insert(entry()).unwrap();
        table.remove(old).unwrap();

        let new = table.insert(entry()).unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert!(!table.contains(old));
        assert!(table.remove(old).is_none());
        assert!(table.contains(new));
    }

    #[test]
    fn test_double_remove() {
        let mut table = SlotTable::new(4);
        let handle = table.insert(entry()).unwrap();
        assert!(table.remove(handle).is_some());
        assert!(table.remove(handle).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_handles_lists_live_only() {
        let mut table = SlotTable::new(4);
        let a = table.insert(entry()).unwrap();
        let b = table.insert(entry()).unwrap();
        table.remove(a);
        assert_eq!(table.handles(), vec![b]);
    }
}
