//! # Event Queue
//!
//! Time-ordered queue with stable FIFO ordering among co-time events and
//! `O(log n)` delete-by-handle. Events live in a slab arena; the ordered map
//! only stores arena keys, so a handle stays valid until its event fires or
//! is deleted, and a stale handle can never reach a recycled slot thanks to
//! the generation counter.

use std::collections::{BTreeMap, VecDeque};

use slab::Slab;

use super::Event;
use crate::error::ProtocolError;
use crate::time::SimTime;

/// Stable reference to a scheduled event.
///
/// Handles are the only way tasks refer to their pending events
/// (`next_event`, `strict_end_event`); the queue is the single owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    slot: usize,
    generation: u64,
}

struct ArenaEntry {
    generation: u64,
    event: Event,
}

/// Co-time events collapse to a scalar when only one remains.
enum Slot {
    Single(usize),
    Bucket(VecDeque<usize>),
}

/// The time-ordered event queue.
pub struct EventQueue {
    arena: Slab<ArenaEntry>,
    by_time: BTreeMap<SimTime, Slot>,
    next_generation: u64,
    /// Time of the most recently popped event; inserts behind it are
    /// protocol violations.
    floor: SimTime,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            arena: Slab::new(),
            by_time: BTreeMap::new(),
            next_generation: 0,
            floor: 0,
        }
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Schedule an event. Co-time events keep insertion order.
    pub fn insert(&mut self, event: Event) -> Result<EventHandle, ProtocolError> {
        if event.time < self.floor {
            return Err(ProtocolError::EventInPast {
                time: event.time,
                now: self.floor,
            });
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let slot = self.arena.insert(ArenaEntry { generation, event });

        match self.by_time.entry(event.time) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(Slot::Single(slot));
            }
            std::collections::btree_map::Entry::Occupied(mut e) => match e.get_mut() {
                Slot::Single(first) => {
                    let first = *first;
                    *e.get_mut() = Slot::Bucket(VecDeque::from([first, slot]));
                }
                Slot::Bucket(bucket) => bucket.push_back(slot),
            },
        }
        Ok(EventHandle { slot, generation })
    }

    /// Remove and return the earliest-time, earliest-inserted event.
    pub fn pop_next(&mut self) -> Option<Event> {
        let mut entry = self.by_time.first_entry()?;
        let slot = match entry.get_mut() {
            Slot::Single(slot) => {
                let slot = *slot;
                entry.remove();
                slot
            }
            Slot::Bucket(bucket) => {
                let slot = bucket.pop_front().expect("bucket never empty");
                if bucket.len() == 1 {
                    let last = bucket[0];
                    *entry.get_mut() = Slot::Single(last);
                }
                slot
            }
        };
        let event = self.arena.remove(slot).event;
        self.floor = event.time;
        Some(event)
    }

    /// The earliest pending event, without removal.
    pub fn peek_next(&self) -> Option<&Event> {
        let (_, slot) = self.by_time.first_key_value()?;
        let key = match slot {
            Slot::Single(k) => *k,
            Slot::Bucket(bucket) => *bucket.front().expect("bucket never empty"),
        };
        Some(&self.arena[key].event)
    }

    /// Look up a pending event by handle.
    pub fn get(&self, handle: EventHandle) -> Option<&Event> {
        self.arena
            .get(handle.slot)
            .filter(|entry| entry.generation == handle.generation)
            .map(|entry| &entry.event)
    }

    /// Whether a handle still refers to a pending event.
    pub fn contains(&self, handle: EventHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Cancel by handle. Returns the event, or `None` when the handle is
    /// stale (already fired or deleted) - cancellation is idempotent.
    pub fn delete(&mut self, handle: EventHandle) -> Option<Event> {
        let time = self.get(handle)?.time;
        let entry = self
            .by_time
            .get_mut(&time)
            .expect("pending event must have a time slot");
        match entry {
            Slot::Single(_) => {
                self.by_time.remove(&time);
            }
            Slot::Bucket(bucket) => {
                let pos = bucket
                    .iter()
                    .position(|&k| k == handle.slot)
                    .expect("pending event must be in its bucket");
                bucket.remove(pos);
                if bucket.len() == 1 {
                    let last = bucket[0];
                    *entry = Slot::Single(last);
                }
            }
        }
        Some(self.arena.remove(handle.slot).event)
    }

    /// Drop all pending events and reset the clock floor.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.by_time.clear();
        self.floor = 0;
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .field("floor", &self.floor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn ev(time: SimTime) -> Event {
        Event {
            time,
            set_on: 0,
            kind: EventKind::Timer,
        }
    }

    #[test]
    fn test_time_order() {
        let mut q = EventQueue::new();
        q.insert(ev(30)).unwrap();
        q.insert(ev(10)).unwrap();
        q.insert(ev(20)).unwrap();
        assert_eq!(q.pop_next().unwrap().time, 10);
        assert_eq!(q.pop_next().unwrap().time, 20);
        assert_eq!(q.pop_next().unwrap().time, 30);
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn test_cotime_fifo() {
        let mut q = EventQueue::new();
        let a = Event { time: 5, set_on: 0, kind: EventKind::SimStart };
        let b = Event { time: 5, set_on: 1, kind: EventKind::Timer };
        let c = Event { time: 5, set_on: 2, kind: EventKind::SimStop };
        q.insert(a).unwrap();
        q.insert(b).unwrap();
        q.insert(c).unwrap();
        assert_eq!(q.pop_next().unwrap().kind, EventKind::SimStart);
        assert_eq!(q.pop_next().unwrap().kind, EventKind::Timer);
        assert_eq!(q.pop_next().unwrap().kind, EventKind::SimStop);
    }

    #[test]
    fn test_delete_from_bucket() {
        let mut q = EventQueue::new();
        let _a = q.insert(Event { time: 5, set_on: 0, kind: EventKind::SimStart }).unwrap();
        let b = q.insert(Event { time: 5, set_on: 0, kind: EventKind::Timer }).unwrap();
        let _c = q.insert(Event { time: 5, set_on: 0, kind: EventKind::SimStop }).unwrap();
        assert_eq!(q.delete(b).unwrap().kind, EventKind::Timer);
        // Deleting again is a stale no-op.
        assert!(q.delete(b).is_none());
        assert_eq!(q.pop_next().unwrap().kind, EventKind::SimStart);
        assert_eq!(q.pop_next().unwrap().kind, EventKind::SimStop);
    }

    #[test]
    fn test_stale_after_pop() {
        let mut q = EventQueue::new();
        let h = q.insert(ev(1)).unwrap();
        q.pop_next().unwrap();
        assert!(!q.contains(h));
        assert!(q.delete(h).is_none());
    }

    #[test]
    fn test_rejects_past_insert() {
        let mut q = EventQueue::new();
        q.insert(ev(100)).unwrap();
        q.pop_next().unwrap();
        assert!(q.insert(ev(99)).is_err());
        assert!(q.insert(ev(100)).is_ok());
    }

    quickcheck::quickcheck! {
        fn prop_pop_monotonic(times: Vec<u32>) -> bool {
            let mut q = EventQueue::new();
            for &t in &times {
                q.insert(ev(t as SimTime)).unwrap();
            }
            let mut last = 0;
            while let Some(e) = q.pop_next() {
                if e.time < last {
                    return false;
                }
                last = e.time;
            }
            true
        }
    }
}
