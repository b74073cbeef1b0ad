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

//! Archetype wire format: a concrete, `speedy`-backed encoding of a
//! [`Storage`] snapshot. One block per archetype, mask words first, then a
//! header per component (stable hash, size, alignment) so a snapshot can be
//! matched against a registry from a different process, then one entry per
//! chunk holding packed entity handles and raw column bytes.

use speedy::{Readable, Writable};

use crate::archetype::Archetype;
use crate::error::{EcsError, Result};
use crate::storage::Storage;

/// Per-component header, enough to match a column against a live registry.
#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct ComponentHeader {
    pub stable_hash: u64,
    pub size: u64,
    pub align: u64,
}

/// One chunk's worth of entity handles and column bytes, in archetype
/// component order.
#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct ChunkBlock {
    pub entity_bits: Vec<u32>,
    pub columns: Vec<Vec<u8>>,
}

/// One archetype's mask, component headers, and chunk data.
#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct ArchetypeBlock {
    pub mask_words: Vec<u64>,
    pub entity_count: u64,
    pub descriptors: Vec<ComponentHeader>,
    pub chunks: Vec<ChunkBlock>,
}

/// A full storage snapshot: one block per non-empty archetype.
#[derive(Debug, Clone, Default, PartialEq, Readable, Writable)]
pub struct WorldSnapshot {
    pub archetypes: Vec<ArchetypeBlock>,
}

fn encode_archetype(archetype: &Archetype) -> Result<ArchetypeBlock> {
    let descriptors: Vec<ComponentHeader> = archetype
        .component_order()
        .iter()
        .enumerate()
        .map(|(column, _)| {
            let d = archetype.descriptor(column);
            ComponentHeader { stable_hash: d.name_hash, size: d.size as u64, align: d.align as u64 }
        })
        .collect();

    let mut chunks = Vec::with_capacity(archetype.chunks().len());
    for chunk in archetype.chunks() {
        let len = chunk.len();
        let entity_bits: Vec<u32> = (0..len).map(|slot| chunk.entity_at(slot).to_bits()).collect();

        let mut columns = Vec::with_capacity(archetype.component_order().len());
        for (column, _) in archetype.component_order().iter().enumerate() {
            let descriptor = archetype.descriptor(column);
            if !descriptor.is_trivially_copyable() {
                return Err(EcsError::SerializationError(format!(
                    "component with stable hash {:#x} is not trivially copyable; \
                     per-element serialize callbacks are not yet implemented",
                    descriptor.name_hash
                )));
            }
            let mut bytes = Vec::with_capacity(descriptor.size * len as usize);
            for slot in 0..len {
                let ptr = unsafe { chunk.column_ptr(column, slot) };
                if descriptor.size > 0 {
                    let slice = unsafe { std::slice::from_raw_parts(ptr, descriptor.size) };
                    bytes.extend_from_slice(slice);
                }
            }
            columns.push(bytes);
        }
        chunks.push(ChunkBlock { entity_bits, columns });
    }

    Ok(ArchetypeBlock {
        mask_words: archetype.mask.words().to_vec(),
        entity_count: archetype.entity_count() as u64,
        descriptors,
        chunks,
    })
}

/// Snapshots every non-empty archetype in `storage`.
///
/// Only trivially-copyable components can be encoded today; an archetype
/// carrying a component with drop glue (a `String`, a `Vec`, ...) fails the
/// whole snapshot. Per-element serialize/deserialize callbacks on
/// [`crate::component::ComponentDescriptor`] would lift this restriction.
pub fn snapshot(storage: &Storage) -> Result<WorldSnapshot> {
    let archetypes = storage
        .archetypes()
        .iter()
        .filter(|a| a.entity_count() > 0)
        .map(encode_archetype)
        .collect::<Result<Vec<_>>>()?;
    Ok(WorldSnapshot { archetypes })
}

/// Encodes a snapshot to its `speedy` wire bytes.
pub fn to_bytes(snapshot: &WorldSnapshot) -> Result<Vec<u8>> {
    snapshot.write_to_vec().map_err(|e| EcsError::SerializationError(e.to_string()))
}

/// Decodes a snapshot from `speedy` wire bytes.
pub fn from_bytes(bytes: &[u8]) -> Result<WorldSnapshot> {
    WorldSnapshot::read_from_buffer(bytes).map_err(|e| EcsError::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);

    #[test]
    fn snapshot_round_trips_through_wire_bytes() {
        let mut storage = Storage::new();
        storage.spawn((Position { x: 1.0, y: 2.0 }, Health(10)));
        storage.spawn((Position { x: 3.0, y: 4.0 }, Health(20)));

        let snap = snapshot(&storage).expect("trivially-copyable archetype");
        let bytes = to_bytes(&snap).unwrap();
        let decoded = from_bytes(&bytes).unwrap();
        assert_eq!(decoded, snap);
    }

    #[test]
    fn empty_storage_snapshots_to_zero_archetypes() {
        let storage = Storage::new();
        let snap = snapshot(&storage).unwrap();
        assert!(snap.archetypes.is_empty());
    }

    #[test]
    fn non_trivial_component_reports_serialization_error() {
        let mut storage = Storage::new();
        storage.spawn((String::from("hello"),));
        assert!(snapshot(&storage).is_err());
    }
}
