//! Duplicate and retransmission detection
//!
//! Fixed-capacity ring logs of recently seen frame set ids and resend ids.
//! Empty slots are `None`, so id 0 is never confused with an unused slot.

use crate::game::constants::net::{RESEND_HISTORY_SIZE, SET_HISTORY_SIZE};
use crate::net::protocol::{FrameSetId, ResendId};

/// Ring buffer of the last N ids; the oldest entry is overwritten first
#[derive(Debug, Clone)]
pub struct IdHistory {
    slots: Box<[Option<u8>]>,
    next: usize,
}

impl IdHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be non-zero");
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            next: 0,
        }
    }

    /// Record an id, evicting the oldest entry when full
    #[inline]
    pub fn add(&mut self, id: u8) {
        self.slots[self.next] = Some(id);
        self.next = (self.next + 1) % self.slots.len();
    }

    /// Whether the id is among the remembered entries
    #[inline]
    pub fn contains(&self, id: u8) -> bool {
        self.slots.iter().any(|slot| *slot == Some(id))
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.next = 0;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Recently applied frame sets
#[derive(Debug, Clone)]
pub struct SetHistory(IdHistory);

impl SetHistory {
    pub fn new(capacity: usize) -> Self {
        Self(IdHistory::new(capacity))
    }

    pub fn add(&mut self, set: FrameSetId) {
        self.0.add(set);
    }

    pub fn contains(&self, set: FrameSetId) -> bool {
        self.0.contains(set)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

impl Default for SetHistory {
    fn default() -> Self {
        Self::new(SET_HISTORY_SIZE)
    }
}

/// Recently received resend ids
#[derive(Debug, Clone)]
pub struct ResendHistory(IdHistory);

impl ResendHistory {
    pub fn new(capacity: usize) -> Self {
        Self(IdHistory::new(capacity))
    }

    pub fn add(&mut self, resend: ResendId) {
        self.0.add(resend);
    }

    pub fn contains(&self, resend: ResendId) -> bool {
        self.0.contains(resend)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

impl Default for ResendHistory {
    fn default() -> Self {
        Self::new(RESEND_HISTORY_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_contains() {
        let mut history = SetHistory::default();
        assert!(!history.contains(5));
        history.add(5);
        assert!(history.contains(5));
        assert!(!history.contains(6));
    }

    #[test]
    fn test_empty_slots_do_not_match_zero() {
        let set_history = SetHistory::default();
        let resend_history = ResendHistory::default();
        assert!(!set_history.contains(0));
        assert!(!resend_history.contains(0));

        let mut resend_history = resend_history;
        resend_history.add(0);
        assert!(resend_history.contains(0));
    }

    #[test]
    fn test_ring_eviction() {
        let mut history = IdHistory::new(SET_HISTORY_SIZE);
        // CAPACITY + 1 distinct ids: the first one falls out
        for id in 0..=SET_HISTORY_SIZE as u8 {
            history.add(id);
        }
        assert!(!history.contains(0));
        for id in 1..=SET_HISTORY_SIZE as u8 {
            assert!(history.contains(id), "id {} should still be remembered", id);
        }
        assert_eq!(history.len(), SET_HISTORY_SIZE);
    }

    #[test]
    fn test_remembered_until_capacity_additions() {
        let mut history = IdHistory::new(4);
        history.add(200);
        for id in 1..4 {
            history.add(id);
            assert!(history.contains(200));
        }
        history.add(4);
        assert!(!history.contains(200));
    }

    #[test]
    fn test_clear() {
        let mut history = ResendHistory::new(8);
        history.add(3);
        history.add(7);
        history.clear();
        assert!(!history.contains(3));
        assert!(!history.contains(7));
        assert_eq!(history.capacity(), 8);
    }

    #[test]
    fn test_default_capacities() {
        assert_eq!(SetHistory::default().capacity(), 100);
        assert_eq!(ResendHistory::default().capacity(), 200);
    }

    #[test]
    fn test_len_and_is_empty() {
        let mut history = IdHistory::new(3);
        assert!(history.is_empty());
        history.add(1);
        history.add(1);
        assert_eq!(history.len(), 2);
        assert!(!history.is_empty());
    }
}
