//! Eviction policies for resident blocks.

use std::collections::{BTreeMap, HashMap};

/// Tracks resident block ids and nominates one for eviction.
pub trait Eviction: Send {
    /// Start tracking a newly resident block.
    fn insert(&mut self, id: u64);

    /// Record an access to a resident block.
    fn touch(&mut self, id: u64);

    /// Stop tracking a block.
    fn remove(&mut self, id: u64);

    /// Choose a block to evict and stop tracking it.
    fn victim(&mut self) -> Option<u64>;

    /// Stop tracking every block.
    fn clear(&mut self);
}

/// Eviction strategy of a [super::BlockCache].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Evict the least recently used block.
    #[default]
    Lru,
    /// Evict the most recently used block.
    Mru,
    /// Second-chance approximation of LRU using a per-block reference bit.
    Clock,
}

impl Policy {
    pub(crate) fn build(self) -> Box<dyn Eviction> {
        match self {
            Self::Lru => Box::new(Recency::new(false)),
            Self::Mru => Box::new(Recency::new(true)),
            Self::Clock => Box::new(Clock::default()),
        }
    }
}

/// Orders blocks by a logical access tick.
struct Recency {
    most_recent: bool,
    tick: u64,
    ticks: HashMap<u64, u64>,
    order: BTreeMap<u64, u64>,
}

impl Recency {
    fn new(most_recent: bool) -> Self {
        Self {
            most_recent,
            tick: 0,
            ticks: HashMap::new(),
            order: BTreeMap::new(),
        }
    }
}

impl Eviction for Recency {
    fn insert(&mut self, id: u64) {
        self.touch(id);
    }

    fn touch(&mut self, id: u64) {
        self.tick += 1;
        if let Some(previous) = self.ticks.insert(id, self.tick) {
            self.order.remove(&previous);
        }
        self.order.insert(self.tick, id);
    }

    fn remove(&mut self, id: u64) {
        if let Some(tick) = self.ticks.remove(&id) {
            self.order.remove(&tick);
        }
    }

    fn victim(&mut self) -> Option<u64> {
        let (_, id) = if self.most_recent {
            self.order.pop_last()?
        } else {
            self.order.pop_first()?
        };
        self.ticks.remove(&id);
        Some(id)
    }

    fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }
}

struct Entry {
    id: u64,
    referenced: bool,
}

/// Circular buffer of resident blocks swept by a clock hand.
///
/// A block is nominated only after the hand passes it with its reference bit cleared, so every
/// block accessed since the previous sweep survives one more round.
#[derive(Default)]
struct Clock {
    slots: Vec<Option<Entry>>,
    positions: HashMap<u64, usize>,
    free: Vec<usize>,
    hand: usize,
}

impl Eviction for Clock {
    fn insert(&mut self, id: u64) {
        if let Some(position) = self.positions.get(&id) {
            if let Some(entry) = self.slots[*position].as_mut() {
                entry.referenced = true;
            }
            return;
        }
        let entry = Some(Entry {
            id,
            referenced: true,
        });
        let position = match self.free.pop() {
            Some(position) => {
                self.slots[position] = entry;
                position
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        };
        self.positions.insert(id, position);
    }

    fn touch(&mut self, id: u64) {
        if let Some(position) = self.positions.get(&id) {
            if let Some(entry) = self.slots[*position].as_mut() {
                entry.referenced = true;
            }
        }
    }

    fn remove(&mut self, id: u64) {
        if let Some(position) = self.positions.remove(&id) {
            self.slots[position] = None;
            self.free.push(position);
        }
    }

    fn victim(&mut self) -> Option<u64> {
        if self.positions.is_empty() {
            return None;
        }
        loop {
            let position = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();
            let Some(entry) = self.slots[position].as_mut() else {
                continue;
            };
            if entry.referenced {
                entry.referenced = false;
                continue;
            }
            let id = entry.id;
            self.slots[position] = None;
            self.free.push(position);
            self.positions.remove(&id);
            return Some(id);
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.positions.clear();
        self.free.clear();
        self.hand = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_order() {
        let mut policy = Policy::Lru.build();
        for id in 0..3 {
            policy.insert(id);
        }
        policy.touch(0);
        assert_eq!(policy.victim(), Some(1));
        assert_eq!(policy.victim(), Some(2));
        policy.remove(0);
        assert_eq!(policy.victim(), None);
    }

    #[test]
    fn test_mru_order() {
        let mut policy = Policy::Mru.build();
        for id in 0..3 {
            policy.insert(id);
        }
        policy.touch(1);
        assert_eq!(policy.victim(), Some(1));
        assert_eq!(policy.victim(), Some(2));
        assert_eq!(policy.victim(), Some(0));
        assert_eq!(policy.victim(), None);
    }

    #[test]
    fn test_clock_second_chance() {
        let mut policy = Policy::Clock.build();
        for id in 0..3 {
            policy.insert(id);
        }

        // Every block is referenced, so the first sweep clears all bits and evicts the first
        assert_eq!(policy.victim(), Some(0));

        // Block 1 is referenced again and survives the next sweep
        policy.touch(1);
        assert_eq!(policy.victim(), Some(2));

        // The freed slot is reused
        policy.insert(3);
        policy.remove(1);
        assert_eq!(policy.victim(), Some(3));
        assert_eq!(policy.victim(), None);
    }

    #[test]
    fn test_clear() {
        for kind in [Policy::Lru, Policy::Mru, Policy::Clock] {
            let mut policy = kind.build();
            policy.insert(7);
            policy.clear();
            assert_eq!(policy.victim(), None, "{kind:?}");
        }
    }
}
