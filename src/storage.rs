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

//! Archetype storage: owns the entity pool, the component registry, every
//! archetype, and the two indices that make both directions of lookup O(1)
//! on average — mask to archetype, and entity to its current row.

use std::rc::Rc;

use crate::archetype::Archetype;
use crate::chunk_pool::{ChunkPool, ChunkPoolConfig};
use crate::component::{Bundle, Component, ComponentId, ComponentRegistry};
use crate::entity::{EntityId, EntityPool, Location};
use crate::error::{EcsError, Result};
use crate::mask::ComponentMask;
use crate::swiss::SwissMap;

/// Tunables threaded down to the backing [`ChunkPool`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageConfig {
    pub chunk_pool: ChunkPoolConfig,
    pub cleanup: ArchetypeCleanupOptions,
}

/// Thresholds governing [`Storage::cleanup_empty_archetypes`].
#[derive(Debug, Clone, Copy)]
pub struct ArchetypeCleanupOptions {
    /// Consecutive empty scans (see [`Archetype::note_cleanup_scan`]) an
    /// archetype must accumulate before it is eligible for removal.
    pub empty_duration: u32,
    /// Archetypes that ever held more than this many entities are never
    /// removed, on the assumption they will be repopulated.
    pub peak_bound: usize,
    /// Upper bound on archetypes removed by one `cleanup_empty_archetypes` call.
    pub max_to_remove: usize,
    /// Never reduce the live archetype count below this floor.
    pub min_to_keep: usize,
}

impl Default for ArchetypeCleanupOptions {
    fn default() -> Self {
        Self { empty_duration: 4, peak_bound: usize::MAX, max_to_remove: 8, min_to_keep: 1 }
    }
}

/// Owns every entity and every archetype in a world.
pub struct Storage {
    registry: ComponentRegistry,
    entities: EntityPool,
    archetypes: Vec<Archetype>,
    mask_index: SwissMap<ComponentMask, usize>,
    locations: SwissMap<EntityId, Location>,
    pool: Rc<ChunkPool>,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    pub fn with_config(config: StorageConfig) -> Self {
        Self {
            registry: ComponentRegistry::new(),
            entities: EntityPool::new(),
            archetypes: Vec::new(),
            mask_index: SwissMap::new(),
            locations: SwissMap::new(),
            pool: ChunkPool::new(config.chunk_pool),
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn location_of(&self, entity: EntityId) -> Option<Location> {
        self.locations.get(&entity).copied()
    }

    /// Looks up (or lazily builds) the archetype holding exactly `mask`.
    fn archetype_for(&mut self, mask: ComponentMask) -> usize {
        if let Some(&idx) = self.mask_index.get(&mask) {
            return idx;
        }
        let descriptors = mask
            .iter_ids()
            .map(|id| {
                self.registry
                    .descriptor(id as ComponentId)
                    .expect("every bit in a mask names a registered component")
                    .clone()
            })
            .collect();
        let idx = self.archetypes.len();
        self.archetypes.push(Archetype::new(mask, descriptors, Rc::clone(&self.pool)));
        self.mask_index.insert(mask, idx);
        idx
    }

    /// Borrows archetypes `a` and `b` simultaneously, `a` mutably. Panics if
    /// `a == b`; structural moves are always between distinct archetypes.
    fn split_archetypes_mut(&mut self, a: usize, b: usize) -> (&mut Archetype, &Archetype) {
        assert_ne!(a, b, "structural move between an archetype and itself");
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &left[b])
        }
    }

    /// Spawns an entity with no components. Useful as a handle-only marker
    /// or a target for later [`add_component`](Self::add_component) calls.
    pub fn spawn_empty(&mut self) -> EntityId {
        let entity = self.entities.create();
        let archetype_index = self.archetype_for(ComponentMask::EMPTY);
        let loc = self.archetypes[archetype_index].add_entity(archetype_index, entity);
        self.locations.insert(entity, loc);
        entity
    }

    /// Spawns an entity carrying every component in `bundle`.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> EntityId {
        let ids = B::register_components(&mut self.registry);
        let mut mask = ComponentMask::EMPTY;
        for &id in &ids {
            mask.set(id as usize);
        }

        let entity = self.entities.create();
        let archetype_index = self.archetype_for(mask);
        let archetype = &mut self.archetypes[archetype_index];
        let loc = archetype.add_entity_no_construct(archetype_index, entity);

        let ptrs: Vec<*mut u8> = ids
            .iter()
            .map(|&id| {
                let column = archetype.column_of(id).expect("bundle component in its own archetype");
                unsafe { archetype.read_column(loc, column) }
            })
            .collect();
        unsafe { bundle.write_components(&ptrs) };

        self.locations.insert(entity, loc);
        entity
    }

    /// Destroys `entity` and drops every component it carried.
    pub fn despawn(&mut self, entity: EntityId) -> Result<()> {
        let loc = self.locations.remove(&entity).ok_or(EcsError::EntityNotFound)?;
        let swapped = self.archetypes[loc.archetype].remove_entity(loc, &ComponentMask::EMPTY);
        if let Some(swapped_entity) = swapped {
            self.locations.insert(swapped_entity, loc);
        }
        self.entities.destroy(entity);
        Ok(())
    }

    /// Adds `value` to `entity`, moving it into the archetype for its new
    /// component set. If `entity` already carries `T`, the existing value is
    /// replaced in place with no structural move.
    pub fn add_component<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        let loc = self.locations.get(&entity).copied().ok_or(EcsError::EntityNotFound)?;
        let id = self.registry.register::<T>();
        let src_index = loc.archetype;
        let src_mask = self.archetypes[src_index].mask;

        if src_mask.test(id as usize) {
            let column = self.archetypes[src_index].column_of(id).expect("mask bit implies column");
            let mut value = value;
            unsafe {
                let ptr = self.archetypes[src_index].read_column(loc, column) as *mut T;
                std::ptr::drop_in_place(ptr);
                std::ptr::copy_nonoverlapping(&mut value as *mut T, ptr, 1);
            }
            std::mem::forget(value);
            return Ok(());
        }

        let dst_index = match self.archetypes[src_index].edges.get_add(id) {
            Some(idx) => idx,
            None => {
                let mut dst_mask = src_mask;
                dst_mask.set(id as usize);
                let idx = self.archetype_for(dst_mask);
                self.archetypes[src_index].edges.cache_add(id, idx);
                idx
            }
        };

        let (dst_arch, src_arch) = self.split_archetypes_mut(dst_index, src_index);
        let dst_loc = dst_arch.add_entity_no_construct(dst_index, entity);
        let moved = dst_arch.move_shared_columns(dst_loc, src_arch, loc);
        let column = dst_arch.column_of(id).expect("component just targeted for add");
        let mut value = value;
        unsafe { dst_arch.write_column(dst_loc, column, &mut value as *mut T as *mut u8) };
        std::mem::forget(value);

        let swapped = self.archetypes[src_index].remove_entity(loc, &moved);
        if let Some(swapped_entity) = swapped {
            self.locations.insert(swapped_entity, loc);
        }
        self.locations.insert(entity, dst_loc);
        Ok(())
    }

    /// Removes and returns `entity`'s `T` value, moving it into the
    /// archetype for its reduced component set.
    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<T> {
        let id = self.registry.id_of::<T>().ok_or(EcsError::ComponentNotFound)?;
        let loc = self.locations.get(&entity).copied().ok_or(EcsError::EntityNotFound)?;
        let src_index = loc.archetype;
        let src_mask = self.archetypes[src_index].mask;
        if !src_mask.test(id as usize) {
            return Err(EcsError::ComponentNotFound);
        }

        let dst_index = match self.archetypes[src_index].edges.get_remove(id) {
            Some(idx) => idx,
            None => {
                let mut dst_mask = src_mask;
                dst_mask.reset(id as usize);
                let idx = self.archetype_for(dst_mask);
                self.archetypes[src_index].edges.cache_remove(id, idx);
                idx
            }
        };

        let removed_column = self.archetypes[src_index].column_of(id).expect("mask bit implies column");
        let value = unsafe {
            let ptr = self.archetypes[src_index].read_column(loc, removed_column) as *mut T;
            std::ptr::read(ptr)
        };

        let (dst_arch, src_arch) = self.split_archetypes_mut(dst_index, src_index);
        let dst_loc = dst_arch.add_entity_no_construct(dst_index, entity);
        let mut moved = dst_arch.move_shared_columns(dst_loc, src_arch, loc);
        moved.set(id as usize);

        let swapped = self.archetypes[src_index].remove_entity(loc, &moved);
        if let Some(swapped_entity) = swapped {
            self.locations.insert(swapped_entity, loc);
        }
        self.locations.insert(entity, dst_loc);
        Ok(value)
    }

    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        let Some(id) = self.registry.id_of::<T>() else { return false };
        let Some(loc) = self.locations.get(&entity) else { return false };
        self.archetypes[loc.archetype].mask.test(id as usize)
    }

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let id = self.registry.id_of::<T>()?;
        let loc = *self.locations.get(&entity)?;
        let archetype = &self.archetypes[loc.archetype];
        if !archetype.mask.test(id as usize) {
            return None;
        }
        let column = archetype.column_of(id)?;
        let ptr = unsafe { archetype.read_column(loc, column) } as *const T;
        Some(unsafe { &*ptr })
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let id = self.registry.id_of::<T>()?;
        let loc = *self.locations.get(&entity)?;
        let archetype = &mut self.archetypes[loc.archetype];
        if !archetype.mask.test(id as usize) {
            return None;
        }
        let column = archetype.column_of(id)?;
        let ptr = unsafe { archetype.read_column(loc, column) } as *mut T;
        Some(unsafe { &mut *ptr })
    }

    /// Coalesces every archetype's undersubscribed trailing chunks,
    /// reclaiming pool capacity, and keeps the location index in sync with
    /// whatever rows moved as a result.
    pub fn compact(&mut self) {
        for (archetype_index, archetype) in self.archetypes.iter_mut().enumerate() {
            for (entity, chunk, slot) in archetype.coalesce() {
                self.locations.insert(entity, Location { archetype: archetype_index, chunk, slot });
            }
        }
    }

    /// Scans every live, non-root archetype and retires ones that have been
    /// empty for `options.empty_duration` consecutive calls, never peaked
    /// above `options.peak_bound`, and whose removal keeps at least
    /// `options.min_to_keep` archetypes alive. At most `options.max_to_remove`
    /// are retired per call. A retired archetype keeps its index (other
    /// archetypes' locations stay valid) but is dropped from the mask index
    /// and every peer's edge cache, and its chunks return to the pool.
    /// Returns the number of archetypes retired.
    pub fn cleanup_empty_archetypes(&mut self, options: &ArchetypeCleanupOptions) -> usize {
        let mut candidates = Vec::new();
        for (index, archetype) in self.archetypes.iter_mut().enumerate() {
            if archetype.is_dead() || archetype.mask.none() {
                continue;
            }
            archetype.note_cleanup_scan();
            if archetype.entity_count() == 0
                && archetype.empty_streak() >= options.empty_duration
                && archetype.peak_entity_count() <= options.peak_bound
            {
                candidates.push(index);
            }
        }

        let alive_count = self.archetypes.iter().filter(|a| !a.is_dead()).count();
        let mut removable_budget = alive_count.saturating_sub(options.min_to_keep);
        let mut removed = 0;

        for index in candidates {
            if removed >= options.max_to_remove || removable_budget == 0 {
                break;
            }
            let mask = self.archetypes[index].mask;
            self.mask_index.remove(&mask);
            for (other_index, archetype) in self.archetypes.iter_mut().enumerate() {
                if other_index != index {
                    archetype.edges.invalidate_destination(index);
                }
            }
            self.archetypes[index].mark_dead();
            removed += 1;
            removable_budget -= 1;
        }
        #[cfg(feature = "profiling")]
        tracing::debug!(removed, "archetype cleanup pass");
        removed
    }
}
