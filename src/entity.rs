// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity identifiers and the entity pool that owns their versions.

/// 24-bit index ceiling: entities live in `[0, MAX_INDEX)`.
pub const MAX_INDEX: u32 = 1 << 24;

/// Reserved version meaning "no entity" / the default value.
pub const NULL_VERSION: u8 = 0;

/// Reserved version meaning "destroyed, index not yet reused".
pub const TOMBSTONE_VERSION: u8 = 255;

const INITIAL_VERSION: u8 = 1;

/// A 32-bit packed `(index, version)` entity handle.
///
/// Version 0 is the null sentinel; version 255 is the tombstone marker
/// stored in the pool for a destroyed index awaiting reuse. A handle
/// compares valid only against [`EntityPool::is_alive`], never by value
/// alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    index: u32,
    version: u8,
}

impl EntityId {
    /// The null handle: index 0, version 0. Never returned by
    /// [`EntityPool::create`].
    pub const NULL: EntityId = EntityId { index: 0, version: NULL_VERSION };

    fn new(index: u32, version: u8) -> Self {
        debug_assert!(index < MAX_INDEX);
        Self { index, version }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_null(&self) -> bool {
        self.version == NULL_VERSION
    }

    /// Pack into the 32-bit wire/hash representation: low 24 bits index,
    /// high 8 bits version.
    pub fn to_bits(&self) -> u32 {
        (self.index & (MAX_INDEX - 1)) | ((self.version as u32) << 24)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self {
            index: bits & (MAX_INDEX - 1),
            version: (bits >> 24) as u8,
        }
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Location of an entity's row within its archetype's chunk list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub archetype: usize,
    pub chunk: u32,
    pub slot: u32,
}

impl Location {
    pub const INVALID: Location = Location {
        archetype: usize::MAX,
        chunk: u32::MAX,
        slot: u32::MAX,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Owns the dense version table and the LIFO free-index stack.
///
/// Invariant (per index): either `versions[i]` is the live version of an
/// alive handle, or it is [`TOMBSTONE_VERSION`] and `(i, next_version)`
/// appears exactly once on `free`, or it is [`NULL_VERSION`] and `i` has
/// never been allocated.
#[derive(Debug, Default)]
pub struct EntityPool {
    versions: Vec<u8>,
    free: Vec<(u32, u8)>,
}

impl EntityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indices ever allocated (alive or tombstoned).
    pub fn capacity(&self) -> usize {
        self.versions.len()
    }

    /// Number of currently-alive handles.
    pub fn alive_count(&self) -> usize {
        self.versions.len() - self.free.len()
    }

    /// Allocates a fresh handle: reuses a freed index when available,
    /// otherwise grows the version table.
    pub fn create(&mut self) -> EntityId {
        if let Some((index, version)) = self.free.pop() {
            self.versions[index as usize] = version;
            return EntityId::new(index, version);
        }

        let index = self.versions.len() as u32;
        assert!(index < MAX_INDEX, "entity index space exhausted");
        self.versions.push(INITIAL_VERSION);
        EntityId::new(index, INITIAL_VERSION)
    }

    /// `true` iff `entity` is the currently-live handle for its index.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        if entity.is_null() {
            return false;
        }
        match self.versions.get(entity.index as usize) {
            Some(&v) => v == entity.version && v != NULL_VERSION && v != TOMBSTONE_VERSION,
            None => false,
        }
    }

    /// Destroys `entity`. Returns `false` (no-op) if it was already dead.
    ///
    /// The version advances `1..=254` wrapping back to `1`, so `NULL` and
    /// `TOMBSTONE` are never observed as a live version.
    pub fn destroy(&mut self, entity: EntityId) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let index = entity.index as usize;
        self.versions[index] = TOMBSTONE_VERSION;
        let next_version = if entity.version >= 254 { INITIAL_VERSION } else { entity.version + 1 };
        self.free.push((entity.index, next_version));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_first_entity_is_index0_version1() {
        let mut pool = EntityPool::new();
        let e = pool.create();
        assert_eq!(e.index(), 0);
        assert_eq!(e.version(), INITIAL_VERSION);
        assert!(pool.is_alive(e));
    }

    #[test]
    fn destroy_then_valid_is_false() {
        let mut pool = EntityPool::new();
        let e = pool.create();
        assert!(pool.destroy(e));
        assert!(!pool.is_alive(e));
        assert!(!pool.destroy(e), "double destroy is a no-op");
    }

    #[test]
    fn version_recycling_skips_null_and_tombstone() {
        let mut pool = EntityPool::new();
        let mut seen_versions = Vec::new();
        let mut current = pool.create();
        seen_versions.push(current.version());
        for _ in 0..254 {
            pool.destroy(current);
            current = pool.create();
            seen_versions.push(current.version());
        }

        assert!(seen_versions.iter().all(|&v| v != NULL_VERSION && v != TOMBSTONE_VERSION));
        assert_eq!(seen_versions[0], 1);
        assert_eq!(seen_versions[253], 254);
        assert_eq!(seen_versions[254], 1);
        assert!(current.index() == 0, "same index recycled throughout");
    }

    #[test]
    fn swap_remove_like_reuse_keeps_other_indices_intact() {
        let mut pool = EntityPool::new();
        let a = pool.create();
        let b = pool.create();
        let c = pool.create();
        pool.destroy(a);
        assert!(pool.is_alive(b));
        assert!(pool.is_alive(c));
        assert!(!pool.is_alive(a));
    }
}
