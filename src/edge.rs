//! Archetype edge cache: memoized add/remove transitions between archetypes.
//!
//! Most structural mutation is "add one component" or "remove one
//! component", so every archetype caches where that leads rather than
//! re-deriving the destination mask and re-probing the mask→archetype map
//! each time.

use crate::component::ComponentId;
use rustc_hash::FxHashMap;

const FAST_THRESHOLD: usize = crate::component::FAST_THRESHOLD;

#[derive(Clone, Copy)]
struct Edge {
    destination: usize,
}

/// One direction (add or remove) of transition memoization.
#[derive(Default)]
struct EdgeTable {
    fast: Vec<Option<Edge>>,
    overflow: FxHashMap<ComponentId, Edge>,
}

impl EdgeTable {
    fn get(&self, id: ComponentId) -> Option<usize> {
        if (id as usize) < FAST_THRESHOLD {
            self.fast.get(id as usize).and_then(|e| e.map(|e| e.destination))
        } else {
            self.overflow.get(&id).map(|e| e.destination)
        }
    }

    fn set(&mut self, id: ComponentId, destination: usize) {
        if (id as usize) < FAST_THRESHOLD {
            if self.fast.len() <= id as usize {
                self.fast.resize(id as usize + 1, None);
            }
            self.fast[id as usize] = Some(Edge { destination });
        } else {
            self.overflow.insert(id, Edge { destination });
        }
    }

    fn invalidate(&mut self, destination: usize) {
        for slot in self.fast.iter_mut() {
            if slot.map(|e| e.destination) == Some(destination) {
                *slot = None;
            }
        }
        self.overflow.retain(|_, e| e.destination != destination);
    }
}

/// Per-archetype cache of "add component X" / "remove component X"
/// transitions, each resolving to the index of a neighboring archetype.
#[derive(Default)]
pub struct EdgeCache {
    add: EdgeTable,
    remove: EdgeTable,
}

impl EdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_add(&self, id: ComponentId) -> Option<usize> {
        self.add.get(id)
    }

    pub fn cache_add(&mut self, id: ComponentId, destination: usize) {
        self.add.set(id, destination)
    }

    pub fn get_remove(&self, id: ComponentId) -> Option<usize> {
        self.remove.get(id)
    }

    pub fn cache_remove(&mut self, id: ComponentId, destination: usize) {
        self.remove.set(id, destination)
    }

    /// Scrubs every edge pointing at `destination`, called before an
    /// archetype is garbage collected.
    pub fn invalidate_destination(&mut self, destination: usize) {
        self.add.invalidate(destination);
        self.remove.invalidate(destination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_reads_back() {
        let mut cache = EdgeCache::new();
        assert_eq!(cache.get_add(3), None);
        cache.cache_add(3, 7);
        assert_eq!(cache.get_add(3), Some(7));
    }

    #[test]
    fn overflow_path_for_large_ids() {
        let mut cache = EdgeCache::new();
        let big_id = (FAST_THRESHOLD + 5) as ComponentId;
        cache.cache_remove(big_id, 2);
        assert_eq!(cache.get_remove(big_id), Some(2));
    }

    #[test]
    fn invalidate_scrubs_all_references() {
        let mut cache = EdgeCache::new();
        cache.cache_add(1, 5);
        cache.cache_remove(2, 5);
        cache.cache_add(3, 6);
        cache.invalidate_destination(5);
        assert_eq!(cache.get_add(1), None);
        assert_eq!(cache.get_remove(2), None);
        assert_eq!(cache.get_add(3), Some(6));
    }
}
