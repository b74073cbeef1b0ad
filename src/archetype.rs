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

//! Chunked archetype storage: entities sharing an exact component set live
//! in fixed-size, cache-line-aligned, struct-of-arrays chunks drawn from a
//! shared [`ChunkPool`].

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::chunk_pool::{ChunkPool, PooledChunk, CACHE_LINE};
use crate::component::{ComponentDescriptor, ComponentId};
use crate::edge::EdgeCache;
use crate::entity::{EntityId, Location};
use crate::mask::ComponentMask;

fn cache_align(bytes: usize) -> usize {
    (bytes + CACHE_LINE - 1) & !(CACHE_LINE - 1)
}

/// Base pointer and element stride of one component's column within a chunk.
/// `stride == 0` marks a zero-sized component; its base pointer is never
/// dereferenced.
#[derive(Clone, Copy)]
struct ColumnSlot {
    base: *mut u8,
    stride: usize,
}

/// One fixed-capacity block of entities and their component columns, backed
/// by a single chunk drawn from the pool.
pub struct ArchetypeChunk {
    memory: PooledChunk,
    capacity: u32,
    count: u32,
    entities_offset: usize,
    columns: Vec<ColumnSlot>,
}

impl ArchetypeChunk {
    fn new(memory: PooledChunk, capacity: u32, entities_offset: usize, column_offsets: &[(usize, usize)]) -> Self {
        let base = memory.as_ptr();
        let columns = column_offsets
            .iter()
            .map(|&(offset, stride)| ColumnSlot {
                base: if stride == 0 { base } else { unsafe { base.add(offset) } },
                stride,
            })
            .collect();
        Self { memory, capacity, count: 0, entities_offset, columns }
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn entity_ptr(&self, slot: u32) -> *mut u32 {
        // SAFETY: `slot < capacity` is an invariant every caller upholds, and
        // the entity array reserves `capacity` four-byte words at
        // `entities_offset`.
        unsafe { self.memory.as_ptr().add(self.entities_offset).cast::<u32>().add(slot as usize) }
    }

    pub fn entity_at(&self, slot: u32) -> EntityId {
        debug_assert!(slot < self.count);
        EntityId::from_bits(unsafe { *self.entity_ptr(slot) })
    }

    fn set_entity(&mut self, slot: u32, entity: EntityId) {
        unsafe { *self.entity_ptr(slot) = entity.to_bits() };
    }

    /// Raw pointer to `column`'s value at `slot`. `column` is an index into
    /// the owning archetype's component order, not a [`ComponentId`].
    ///
    /// # Safety
    /// `column` must be in range and `slot < capacity`.
    pub unsafe fn column_ptr(&self, column: usize, slot: u32) -> *mut u8 {
        let c = self.columns[column];
        if c.stride == 0 {
            c.base
        } else {
            c.base.add(c.stride * slot as usize)
        }
    }

    /// Appends `entity` to the next free slot without constructing any
    /// column value. Returns the slot, or `None` if the chunk is full.
    pub fn add_entity_no_construct(&mut self, entity: EntityId) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        let slot = self.count;
        self.set_entity(slot, entity);
        self.count += 1;
        Some(slot)
    }

    /// Appends `entity`, default-constructing every column that supports it.
    /// Columns without a default constructor are left byte-zeroed (chunk
    /// memory starts zeroed and reused slots are only ever populated through
    /// an explicit move- or value-construct).
    pub fn add_entity(&mut self, entity: EntityId, descriptors: &[ComponentDescriptor]) -> Option<u32> {
        let slot = self.add_entity_no_construct(entity)?;
        for (i, desc) in descriptors.iter().enumerate() {
            unsafe {
                desc.default_construct(self.column_ptr(i, slot));
            }
        }
        Some(slot)
    }

    /// Removes the entity at `slot` by swapping the last occupied slot into
    /// its place. Columns listed in `skip` are not dropped (their values
    /// were already moved out by the caller before calling this). Returns
    /// the handle of the entity that was moved into `slot`, if any.
    pub fn remove_entity(
        &mut self,
        slot: u32,
        descriptors: &[ComponentDescriptor],
        column_of: impl Fn(usize) -> ComponentId,
        skip: &ComponentMask,
    ) -> Option<EntityId> {
        debug_assert!(slot < self.count);
        let last = self.count - 1;
        for (i, desc) in descriptors.iter().enumerate() {
            if skip.test(column_of(i) as usize) {
                continue;
            }
            unsafe { desc.drop_value(self.column_ptr(i, slot)) };
        }

        let moved = if slot != last {
            let moved_entity = self.entity_at(last);
            for (i, desc) in descriptors.iter().enumerate() {
                unsafe {
                    let dst = self.column_ptr(i, slot);
                    let src = self.column_ptr(i, last);
                    desc.move_construct(dst, src);
                }
            }
            self.set_entity(slot, moved_entity);
            Some(moved_entity)
        } else {
            None
        };
        self.count -= 1;
        moved
    }
}

/// Computed once per archetype: where the entity array and each component
/// column sit within every chunk it owns, and how many entities fit.
struct Layout {
    capacity: u32,
    entities_offset: usize,
    /// Parallel to the archetype's `component_order`: `(byte offset, stride)`.
    columns: Vec<(usize, usize)>,
}

fn layout_fits(n: usize, chunk_size: usize, descriptors: &[ComponentDescriptor]) -> Option<Layout> {
    if n == 0 {
        return None;
    }
    let entities_bytes = cache_align(n * std::mem::size_of::<u32>());
    let mut offset = entities_bytes;
    let mut columns = Vec::with_capacity(descriptors.len());
    for d in descriptors {
        if d.size == 0 {
            columns.push((0, 0));
            continue;
        }
        columns.push((offset, d.size));
        offset += cache_align(n * d.size);
    }
    if offset <= chunk_size {
        let _ = entities_bytes;
        Some(Layout { capacity: n as u32, entities_offset: 0, columns })
    } else {
        None
    }
}

/// Largest power-of-two entity count whose SoA layout fits in one chunk.
fn compute_layout(chunk_size: usize, descriptors: &[ComponentDescriptor]) -> Layout {
    let mut n = 1usize;
    while layout_fits(n * 2, chunk_size, descriptors).is_some() {
        n *= 2;
    }
    layout_fits(n, chunk_size, descriptors).unwrap_or(Layout { capacity: 1, entities_offset: 0, columns: vec![] })
}

/// All entities sharing one exact [`ComponentMask`].
pub struct Archetype {
    pub mask: ComponentMask,
    component_order: Vec<ComponentId>,
    column_index: FxHashMap<ComponentId, usize>,
    descriptors: Vec<ComponentDescriptor>,
    pool: Rc<ChunkPool>,
    layout: Layout,
    chunks: Vec<ArchetypeChunk>,
    first_non_full_chunk: usize,
    entity_count: usize,
    peak_entity_count: usize,
    empty_streak: u32,
    dead: bool,
    pub edges: EdgeCache,
}

impl Archetype {
    /// Builds a new archetype over `descriptors` (already sorted by
    /// [`ComponentId`]) and eagerly allocates its first chunk.
    pub fn new(mask: ComponentMask, mut descriptors: Vec<ComponentDescriptor>, pool: Rc<ChunkPool>) -> Self {
        descriptors.sort_by_key(|d| d.id);
        let component_order: Vec<ComponentId> = descriptors.iter().map(|d| d.id).collect();
        let column_index = component_order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let layout = compute_layout(pool.chunk_size(), &descriptors);
        #[cfg(feature = "profiling")]
        tracing::debug!(component_count = component_order.len(), "archetype registered");
        let mut archetype = Self {
            mask,
            component_order,
            column_index,
            descriptors,
            pool,
            layout,
            chunks: Vec::new(),
            first_non_full_chunk: 0,
            entity_count: 0,
            peak_entity_count: 0,
            empty_streak: 0,
            dead: false,
            edges: EdgeCache::new(),
        };
        archetype.push_chunk();
        archetype
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// Highest `entity_count` this archetype has ever reached.
    pub fn peak_entity_count(&self) -> usize {
        self.peak_entity_count
    }

    /// Consecutive cleanup scans ([`Self::note_cleanup_scan`]) that found
    /// this archetype empty.
    pub fn empty_streak(&self) -> u32 {
        self.empty_streak
    }

    /// `true` once [`Self::mark_dead`] has run; a dead archetype keeps its
    /// stable slot in storage's archetype vector but holds no chunks and is
    /// no longer reachable through the mask index.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Updates the empty-streak counter for one cleanup pass. Call once per
    /// [`crate::storage::Storage::cleanup_empty_archetypes`] invocation.
    pub fn note_cleanup_scan(&mut self) {
        if self.entity_count == 0 {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }
    }

    /// Releases every chunk back to the pool and marks this archetype
    /// unreachable. Caller must have already removed it from the mask index
    /// and scrubbed every peer's edge cache.
    pub fn mark_dead(&mut self) {
        self.chunks.clear();
        self.first_non_full_chunk = 0;
        self.dead = true;
    }

    pub fn chunk_capacity(&self) -> u32 {
        self.layout.capacity
    }

    pub fn chunks(&self) -> &[ArchetypeChunk] {
        &self.chunks
    }

    pub fn component_order(&self) -> &[ComponentId] {
        &self.component_order
    }

    pub fn column_of(&self, id: ComponentId) -> Option<usize> {
        self.column_index.get(&id).copied()
    }

    pub fn descriptor(&self, column: usize) -> &ComponentDescriptor {
        &self.descriptors[column]
    }

    fn push_chunk(&mut self) -> bool {
        match self.pool.acquire() {
            Some(mem) => {
                self.chunks.push(ArchetypeChunk::new(mem, self.layout.capacity, self.layout.entities_offset, &self.layout.columns));
                true
            }
            None => false,
        }
    }

    fn ensure_non_full_chunk(&mut self) -> Option<usize> {
        while self.first_non_full_chunk < self.chunks.len() {
            if !self.chunks[self.first_non_full_chunk].is_full() {
                return Some(self.first_non_full_chunk);
            }
            self.first_non_full_chunk += 1;
        }
        if self.push_chunk() {
            self.first_non_full_chunk = self.chunks.len() - 1;
            Some(self.first_non_full_chunk)
        } else {
            None
        }
    }

    /// Appends `entity`, default-constructing every column. Returns
    /// `Location::INVALID` if the chunk pool is exhausted.
    pub fn add_entity(&mut self, archetype_index: usize, entity: EntityId) -> Location {
        let Some(ci) = self.ensure_non_full_chunk() else {
            return Location::INVALID;
        };
        let slot = self.chunks[ci].add_entity(entity, &self.descriptors).expect("reserved non-full chunk");
        self.entity_count += 1;
        self.peak_entity_count = self.peak_entity_count.max(self.entity_count);
        Location { archetype: archetype_index, chunk: ci as u32, slot }
    }

    /// Appends `entity` without constructing any column; the caller is
    /// responsible for populating every column before the entity is
    /// observed by a query.
    pub fn add_entity_no_construct(&mut self, archetype_index: usize, entity: EntityId) -> Location {
        let Some(ci) = self.ensure_non_full_chunk() else {
            return Location::INVALID;
        };
        let slot = self.chunks[ci].add_entity_no_construct(entity).expect("reserved non-full chunk");
        self.entity_count += 1;
        self.peak_entity_count = self.peak_entity_count.max(self.entity_count);
        Location { archetype: archetype_index, chunk: ci as u32, slot }
    }

    /// Moves every column shared with `src` from `src_loc` into `dst_loc`,
    /// returning the mask of columns that were populated this way so the
    /// caller can skip dropping them when it removes the source row.
    pub fn move_shared_columns(&mut self, dst_loc: Location, src: &Archetype, src_loc: Location) -> ComponentMask {
        let mut moved = ComponentMask::EMPTY;
        let dst_chunk = &mut self.chunks[dst_loc.chunk as usize];
        let src_chunk = &src.chunks[src_loc.chunk as usize];
        for (&id, &dst_col) in &self.column_index {
            if let Some(&src_col) = src.column_index.get(&id) {
                let desc = &self.descriptors[dst_col];
                unsafe {
                    let dst_ptr = dst_chunk.column_ptr(dst_col, dst_loc.slot);
                    let src_ptr = src_chunk.column_ptr(src_col, src_loc.slot);
                    desc.move_construct(dst_ptr, src_ptr);
                }
                moved.set(id as usize);
            }
        }
        moved
    }

    /// Writes a single component's value directly into `loc`.
    ///
    /// # Safety
    /// `value` must point to a valid, properly aligned instance of the
    /// component registered under `column`, and the slot must not already
    /// hold a live value for that column.
    pub unsafe fn write_column(&mut self, loc: Location, column: usize, value: *mut u8) {
        let chunk = &mut self.chunks[loc.chunk as usize];
        let dst = chunk.column_ptr(column, loc.slot);
        let desc = &self.descriptors[column];
        desc.move_construct(dst, value);
    }

    pub unsafe fn read_column(&self, loc: Location, column: usize) -> *mut u8 {
        self.chunks[loc.chunk as usize].column_ptr(column, loc.slot)
    }

    /// Removes the entity at `loc`. Columns whose ids are set in `skip` are
    /// not dropped (the caller already moved them elsewhere). Returns the
    /// handle of whichever entity was swapped into the vacated slot.
    pub fn remove_entity(&mut self, loc: Location, skip: &ComponentMask) -> Option<EntityId> {
        let order = &self.component_order;
        let moved = {
            let chunk = &mut self.chunks[loc.chunk as usize];
            chunk.remove_entity(loc.slot, &self.descriptors, |i| order[i], skip)
        };
        self.entity_count -= 1;
        self.first_non_full_chunk = self.first_non_full_chunk.min(loc.chunk as usize);

        let last_chunk_index = self.chunks.len() - 1;
        if loc.chunk as usize == last_chunk_index && self.chunks[last_chunk_index].is_empty() && self.chunks.len() > 1 {
            self.chunks.pop();
            self.first_non_full_chunk = self.first_non_full_chunk.min(self.chunks.len() - 1);
        }
        moved
    }

    /// Merges undersubscribed trailing chunks to reclaim pool capacity.
    /// Entities in a coalesced chunk keep their chunk index but may change
    /// slot; the returned vec records `(entity, new_slot)` for every moved
    /// row so the caller can update its location index.
    pub fn coalesce(&mut self) -> Vec<(EntityId, u32, u32)> {
        let mut moves = Vec::new();
        let mut write_chunk = 0usize;
        let mut write_slot = 0u32;
        for read_chunk in 0..self.chunks.len() {
            let count = self.chunks[read_chunk].len();
            for slot in 0..count {
                let entity = self.chunks[read_chunk].entity_at(slot);
                if read_chunk != write_chunk || slot != write_slot {
                    for i in 0..self.descriptors.len() {
                        let desc = &self.descriptors[i];
                        unsafe {
                            if read_chunk == write_chunk {
                                let src = self.chunks[read_chunk].column_ptr(i, slot);
                                let dst = self.chunks[write_chunk].column_ptr(i, write_slot);
                                desc.move_construct(dst, src);
                            } else {
                                let (before, after) = self.chunks.split_at_mut(read_chunk);
                                let dst = before[write_chunk].column_ptr(i, write_slot);
                                let src = after[0].column_ptr(i, slot);
                                desc.move_construct(dst, src);
                            }
                        }
                    }
                    self.chunks[write_chunk].set_entity(write_slot, entity);
                    moves.push((entity, write_chunk as u32, write_slot));
                }
                write_slot += 1;
                if write_slot == self.layout.capacity {
                    write_chunk += 1;
                    write_slot = 0;
                }
            }
        }
        let live_chunks = (if write_slot == 0 { write_chunk } else { write_chunk + 1 }).max(1);
        for (i, chunk) in self.chunks.iter_mut().enumerate().take(live_chunks) {
            chunk.count = if i + 1 < live_chunks {
                self.layout.capacity
            } else if write_slot == 0 {
                self.layout.capacity
            } else {
                write_slot
            };
        }
        let chunks_freed = self.chunks.len() - live_chunks;
        self.chunks.truncate(live_chunks);
        self.first_non_full_chunk = 0;
        #[cfg(feature = "profiling")]
        tracing::debug!(chunks_freed, moved = moves.len(), "archetype coalesce pass");
        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_pool::ChunkPoolConfig;
    use crate::component::ComponentRegistry;

    #[derive(Clone, Copy)]
    struct Position {
        #[allow(dead_code)]
        x: f32,
    }
    #[derive(Clone, Copy)]
    struct Velocity {
        #[allow(dead_code)]
        x: f32,
    }

    fn pool() -> Rc<ChunkPool> {
        ChunkPool::new(ChunkPoolConfig { chunks_per_block: 4, ..Default::default() })
    }

    fn descriptors(registry: &mut ComponentRegistry) -> Vec<ComponentDescriptor> {
        let p = registry.register::<Position>();
        let v = registry.register::<Velocity>();
        vec![registry.descriptor(p).unwrap().clone(), registry.descriptor(v).unwrap().clone()]
    }

    #[test]
    fn add_and_remove_tracks_entity_count() {
        let mut registry = ComponentRegistry::new();
        let mut mask = ComponentMask::EMPTY;
        mask.set(0);
        mask.set(1);
        let mut arch = Archetype::new(mask, descriptors(&mut registry), pool());

        let e0 = EntityId::from_bits(0x01_000000);
        let e1 = EntityId::from_bits(0x01_000001);
        let loc0 = arch.add_entity(0, e0);
        let loc1 = arch.add_entity(0, e1);
        assert_eq!(arch.entity_count(), 2);
        assert_eq!(loc0.slot, 0);
        assert_eq!(loc1.slot, 1);

        let moved = arch.remove_entity(loc0, &ComponentMask::EMPTY);
        assert_eq!(moved, Some(e1));
        assert_eq!(arch.entity_count(), 1);
        assert_eq!(arch.chunks()[0].entity_at(0), e1);
    }

    #[test]
    fn cleanup_bookkeeping_tracks_peak_and_streak_and_mark_dead_frees_chunks() {
        let mut registry = ComponentRegistry::new();
        let mut mask = ComponentMask::EMPTY;
        mask.set(0);
        mask.set(1);
        let mut arch = Archetype::new(mask, descriptors(&mut registry), pool());

        let e0 = EntityId::from_bits(0x01_000000);
        let loc0 = arch.add_entity(0, e0);
        assert_eq!(arch.peak_entity_count(), 1);
        arch.remove_entity(loc0, &ComponentMask::EMPTY);
        assert_eq!(arch.entity_count(), 0);
        assert_eq!(arch.peak_entity_count(), 1, "peak must not decay on removal");

        arch.note_cleanup_scan();
        arch.note_cleanup_scan();
        assert_eq!(arch.empty_streak(), 2);

        assert!(!arch.chunks().is_empty());
        arch.mark_dead();
        assert!(arch.is_dead());
        assert!(arch.chunks().is_empty());
    }

    #[test]
    fn chunk_rollover_when_capacity_exceeded() {
        let mut registry = ComponentRegistry::new();
        let mut mask = ComponentMask::EMPTY;
        mask.set(0);
        let p = registry.register::<Position>();
        let descs = vec![registry.descriptor(p).unwrap().clone()];
        let mut arch = Archetype::new(mask, descs, pool());
        let cap = arch.chunk_capacity();

        for i in 0..(cap + 1) {
            let e = EntityId::from_bits(0x01_000000 | i);
            arch.add_entity(0, e);
        }
        assert_eq!(arch.chunks().len(), 2);
        assert_eq!(arch.entity_count() as u32, cap + 1);
    }

    #[test]
    fn move_shared_columns_copies_values_across_archetypes() {
        let mut registry = ComponentRegistry::new();
        let p = registry.register::<Position>();
        let v = registry.register::<Velocity>();

        let mut src_mask = ComponentMask::EMPTY;
        src_mask.set(p as usize);
        let mut src = Archetype::new(src_mask, vec![registry.descriptor(p).unwrap().clone()], pool());

        let mut dst_mask = ComponentMask::EMPTY;
        dst_mask.set(p as usize);
        dst_mask.set(v as usize);
        let mut dst = Archetype::new(
            dst_mask,
            vec![registry.descriptor(p).unwrap().clone(), registry.descriptor(v).unwrap().clone()],
            pool(),
        );

        let e = EntityId::from_bits(0x01_000000);
        let src_loc = src.add_entity(0, e);
        unsafe {
            let ptr = src.read_column(src_loc, src.column_of(p).unwrap()) as *mut Position;
            *ptr = Position { x: 42.0 };
        }

        let dst_loc = dst.add_entity_no_construct(1, e);
        let moved = dst.move_shared_columns(dst_loc, &src, src_loc);
        assert!(moved.test(p as usize));
        assert!(!moved.test(v as usize));

        unsafe {
            let ptr = dst.read_column(dst_loc, dst.column_of(p).unwrap()) as *mut Position;
            assert_eq!((*ptr).x, 42.0);
        }

        src.remove_entity(src_loc, &moved);
    }
}
