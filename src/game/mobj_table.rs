//! Client mobj table
//!
//! Arena-indexed hash table keyed by thing id. Mobjs live in a dense slot
//! vector; each hash bucket is a doubly linked list threaded through the
//! slots by index, so link and unlink are O(1) and lookup scans one bucket.

use std::ops::ControlFlow;

use crate::game::constants::mobj::HASH_SIZE;
use crate::game::mobj::ClientMobj;
use crate::net::protocol::ThingId;

/// Index of a slot in the table's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MobjHandle(u32);

impl MobjHandle {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Slot {
    mobj: Option<ClientMobj>,
    prev: Option<MobjHandle>,
    next: Option<MobjHandle>,
    linked: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    head: Option<MobjHandle>,
    tail: Option<MobjHandle>,
}

#[inline]
fn bucket_of(id: ThingId) -> usize {
    usize::from(id) % HASH_SIZE
}

#[derive(Debug)]
pub struct MobjTable {
    slots: Vec<Slot>,
    free: Vec<MobjHandle>,
    buckets: Box<[Bucket]>,
    linked: usize,
}

impl MobjTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: vec![Bucket::default(); HASH_SIZE].into_boxed_slice(),
            linked: 0,
        }
    }

    /// Store a mobj in the arena without linking it
    pub fn alloc(&mut self, mobj: ClientMobj) -> MobjHandle {
        match self.free.pop() {
            Some(handle) => {
                self.slots[handle.index()] = Slot {
                    mobj: Some(mobj),
                    prev: None,
                    next: None,
                    linked: false,
                };
                handle
            }
            None => {
                let handle = MobjHandle(self.slots.len() as u32);
                self.slots.push(Slot {
                    mobj: Some(mobj),
                    prev: None,
                    next: None,
                    linked: false,
                });
                handle
            }
        }
    }

    /// Allocate and link under the mobj's own id
    pub fn insert(&mut self, mobj: ClientMobj) -> MobjHandle {
        let id = mobj.id;
        let handle = self.alloc(mobj);
        self.link(handle, id);
        handle
    }

    /// Assign the id and append to the tail of its bucket
    pub fn link(&mut self, handle: MobjHandle, id: ThingId) {
        if self.is_linked(handle) {
            self.unlink(handle);
        }
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return;
        };
        let Some(mobj) = slot.mobj.as_mut() else {
            return;
        };
        mobj.id = id;

        let bucket = &mut self.buckets[bucket_of(id)];
        slot.prev = bucket.tail;
        slot.next = None;
        slot.linked = true;

        match bucket.tail {
            Some(tail) => self.slots[tail.index()].next = Some(handle),
            None => bucket.head = Some(handle),
        }
        bucket.tail = Some(handle);
        self.linked += 1;
    }

    /// Splice out of its bucket; returns false when not linked
    pub fn unlink(&mut self, handle: MobjHandle) -> bool {
        let Some(slot) = self.slots.get(handle.index()) else {
            return false;
        };
        if !slot.linked {
            return false;
        }
        let Some(id) = slot.mobj.as_ref().map(|mobj| mobj.id) else {
            return false;
        };
        let (prev, next) = (slot.prev, slot.next);
        let bucket = &mut self.buckets[bucket_of(id)];

        match prev {
            Some(prev) => self.slots[prev.index()].next = next,
            None => bucket.head = next,
        }
        match next {
            Some(next) => self.slots[next.index()].prev = prev,
            None => bucket.tail = prev,
        }

        let slot = &mut self.slots[handle.index()];
        slot.prev = None;
        slot.next = None;
        slot.linked = false;
        self.linked -= 1;
        true
    }

    /// Unlink and release the slot
    pub fn remove(&mut self, handle: MobjHandle) -> Option<ClientMobj> {
        self.unlink(handle);
        let mobj = self.slots.get_mut(handle.index())?.mobj.take()?;
        self.free.push(handle);
        Some(mobj)
    }

    pub fn find(&self, id: ThingId) -> Option<MobjHandle> {
        let mut cursor = self.buckets[bucket_of(id)].head;
        while let Some(handle) = cursor {
            let slot = &self.slots[handle.index()];
            if slot.mobj.as_ref().is_some_and(|mobj| mobj.id == id) {
                return Some(handle);
            }
            cursor = slot.next;
        }
        None
    }

    #[inline]
    pub fn get(&self, handle: MobjHandle) -> Option<&ClientMobj> {
        self.slots.get(handle.index())?.mobj.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, handle: MobjHandle) -> Option<&mut ClientMobj> {
        self.slots.get_mut(handle.index())?.mobj.as_mut()
    }

    pub fn find_mobj(&self, id: ThingId) -> Option<&ClientMobj> {
        self.find(id).and_then(|handle| self.get(handle))
    }

    pub fn find_mobj_mut(&mut self, id: ThingId) -> Option<&mut ClientMobj> {
        let handle = self.find(id)?;
        self.get_mut(handle)
    }

    pub fn is_linked(&self, handle: MobjHandle) -> bool {
        self.slots
            .get(handle.index())
            .is_some_and(|slot| slot.linked)
    }

    /// Visit every linked mobj, bucket by bucket, until the callback breaks
    pub fn for_each<B, F>(&self, mut f: F) -> ControlFlow<B>
    where
        F: FnMut(MobjHandle, &ClientMobj) -> ControlFlow<B>,
    {
        for bucket in self.buckets.iter() {
            let mut cursor = bucket.head;
            while let Some(handle) = cursor {
                let slot = &self.slots[handle.index()];
                if let Some(mobj) = slot.mobj.as_ref() {
                    f(handle, mobj)?;
                }
                cursor = slot.next;
            }
        }
        ControlFlow::Continue(())
    }

    /// Mutable variant of [`for_each`](Self::for_each); links are not
    /// reachable from the callback so ids must not be changed
    pub fn for_each_mut<B, F>(&mut self, mut f: F) -> ControlFlow<B>
    where
        F: FnMut(MobjHandle, &mut ClientMobj) -> ControlFlow<B>,
    {
        for bucket in self.buckets.iter() {
            let mut cursor = bucket.head;
            while let Some(handle) = cursor {
                let slot = &mut self.slots[handle.index()];
                if let Some(mobj) = slot.mobj.as_mut() {
                    f(handle, mobj)?;
                }
                cursor = slot.next;
            }
        }
        ControlFlow::Continue(())
    }

    /// Handles of every linked mobj
    pub fn handles(&self) -> Vec<MobjHandle> {
        let mut handles = Vec::with_capacity(self.linked);
        let _ = self.for_each(|handle, _| {
            handles.push(handle);
            ControlFlow::<()>::Continue(())
        });
        handles
    }

    /// Linked mobj count
    #[inline]
    pub fn len(&self) -> usize {
        self.linked
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.linked == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.buckets.iter_mut().for_each(|bucket| *bucket = Bucket::default());
        self.linked = 0;
    }
}

impl Default for MobjTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashSet;
    use proptest::prelude::*;

    fn mobj(id: ThingId) -> ClientMobj {
        ClientMobj::hidden(id, 0)
    }

    #[test]
    fn test_insert_and_find() {
        let mut table = MobjTable::new();
        let handle = table.insert(mobj(42));
        assert_eq!(table.find(42), Some(handle));
        assert_eq!(table.find_mobj(42).map(|m| m.id), Some(42));
        assert_eq!(table.find(43), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bucket_collisions() {
        let mut table = MobjTable::new();
        let ids = [7u16, 7 + HASH_SIZE as u16, 7 + 2 * HASH_SIZE as u16];
        let handles: Vec<_> = ids.iter().map(|&id| table.insert(mobj(id))).collect();

        for (id, handle) in ids.iter().zip(&handles) {
            assert_eq!(table.find(*id), Some(*handle));
        }

        // Remove the middle, then the head, then the tail
        assert!(table.unlink(handles[1]));
        assert_eq!(table.find(ids[1]), None);
        assert_eq!(table.find(ids[2]), Some(handles[2]));
        assert!(table.unlink(handles[0]));
        assert_eq!(table.find(ids[2]), Some(handles[2]));
        assert!(table.unlink(handles[2]));
        assert!(table.is_empty());

        // Bucket endpoints were repaired: relinking works from scratch
        table.link(handles[2], ids[2]);
        assert_eq!(table.find(ids[2]), Some(handles[2]));
    }

    #[test]
    fn test_unlink_twice() {
        let mut table = MobjTable::new();
        let handle = table.insert(mobj(1));
        assert!(table.unlink(handle));
        assert!(!table.unlink(handle));
        assert_eq!(table.len(), 0);
        // Still allocated
        assert!(table.get(handle).is_some());
    }

    #[test]
    fn test_remove_recycles_slot() {
        let mut table = MobjTable::new();
        let first = table.insert(mobj(1));
        assert_eq!(table.remove(first).map(|m| m.id), Some(1));
        assert!(table.get(first).is_none());
        let second = table.insert(mobj(2));
        assert_eq!(first, second);
        assert_eq!(table.find(1), None);
        assert_eq!(table.find(2), Some(second));
    }

    #[test]
    fn test_relink_under_new_id() {
        let mut table = MobjTable::new();
        let handle = table.insert(mobj(1));
        table.link(handle, 300);
        assert_eq!(table.find(1), None);
        assert_eq!(table.find(300), Some(handle));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_for_each_early_stop() {
        let mut table = MobjTable::new();
        for id in 0..10 {
            table.insert(mobj(id));
        }
        let mut visited = 0;
        let result = table.for_each(|_, mobj| {
            visited += 1;
            if mobj.id == 4 {
                ControlFlow::Break(mobj.id)
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(result, ControlFlow::Break(4));
        assert_eq!(visited, 5);
    }

    #[test]
    fn test_for_each_mut() {
        let mut table = MobjTable::new();
        table.insert(mobj(1));
        table.insert(mobj(2));
        let _ = table.for_each_mut(|_, mobj| {
            mobj.angle = 90;
            ControlFlow::<()>::Continue(())
        });
        assert_eq!(table.find_mobj(1).map(|m| m.angle), Some(90));
        assert_eq!(table.find_mobj(2).map(|m| m.angle), Some(90));
    }

    #[test]
    fn test_clear() {
        let mut table = MobjTable::new();
        table.insert(mobj(1));
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.find(1), None);
        assert!(table.handles().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(ThingId),
        Remove(ThingId),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // Narrow id range so buckets collide often
        let id = 0u16..(HASH_SIZE as u16 * 4);
        prop_oneof![
            id.clone().prop_map(Op::Insert),
            id.prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn test_round_trip_against_model(ops in prop::collection::vec(op_strategy(), 0..300)) {
            let mut table = MobjTable::new();
            let mut model: HashSet<ThingId> = HashSet::new();

            for op in ops {
                match op {
                    Op::Insert(id) => {
                        if model.insert(id) {
                            table.insert(mobj(id));
                        }
                    }
                    Op::Remove(id) => {
                        if let Some(handle) = table.find(id) {
                            prop_assert!(table.remove(handle).is_some());
                        }
                        model.remove(&id);
                    }
                }
            }

            prop_assert_eq!(table.len(), model.len());
            for id in 0..(HASH_SIZE as u16 * 4) {
                let found = table.find_mobj(id).map(|m| m.id);
                prop_assert_eq!(found, model.get(&id).copied());
            }

            let mut seen = HashSet::new();
            let _ = table.for_each(|_, mobj| {
                assert!(seen.insert(mobj.id), "visited {} twice", mobj.id);
                ControlFlow::<()>::Continue(())
            });
            prop_assert_eq!(seen, model);
        }
    }
}
