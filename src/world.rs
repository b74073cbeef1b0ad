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

//! World: the user-facing handle onto archetype [`Storage`].
//!
//! `World` itself holds no entity data — it forwards to `Storage` and adds
//! the command-buffer flush point structural mutation needs during
//! iteration.

use crate::archetype::Archetype;
use crate::command::CommandBuffer;
use crate::component::{Bundle, Component};
use crate::entity::EntityId;
use crate::error::Result;
use crate::query::{Query, QueryTerm};
use crate::storage::{ArchetypeCleanupOptions, Storage, StorageConfig};

/// Central ECS world: entities, components, and archetype storage.
pub struct World {
    storage: Storage,
}

impl World {
    pub fn new() -> Self {
        Self { storage: Storage::new() }
    }

    pub fn with_config(config: StorageConfig) -> Self {
        Self { storage: Storage::with_config(config) }
    }

    pub fn spawn_empty(&mut self) -> EntityId {
        self.storage.spawn_empty()
    }

    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> EntityId {
        self.storage.spawn(bundle)
    }

    pub fn despawn(&mut self, entity: EntityId) -> Result<()> {
        self.storage.despawn(entity)
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.storage.is_alive(entity)
    }

    pub fn add_component<T: Component>(&mut self, entity: EntityId, component: T) -> Result<()> {
        self.storage.add_component(entity, component)
    }

    pub fn remove_component<T: Component>(&mut self, entity: EntityId) -> Result<T> {
        self.storage.remove_component::<T>(entity)
    }

    pub fn has_component<T: Component>(&self, entity: EntityId) -> bool {
        self.storage.has_component::<T>(entity)
    }

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.storage.get::<T>(entity)
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage.get_mut::<T>(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.storage.entity_count()
    }

    pub fn archetype_count(&self) -> usize {
        self.storage.archetype_count()
    }

    pub fn archetypes(&self) -> &[Archetype] {
        self.storage.archetypes()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Reclaims undersubscribed chunks across every archetype.
    pub fn compact(&mut self) {
        self.storage.compact();
    }

    /// Retires long-empty, low-value archetypes per `options`. Returns how
    /// many were retired.
    pub fn cleanup_empty_archetypes(&mut self, options: &ArchetypeCleanupOptions) -> usize {
        self.storage.cleanup_empty_archetypes(options)
    }

    pub fn query<'w, T: QueryTerm<'w>>(&'w self) -> Query<'w, T> {
        Query::new(&self.storage)
    }

    /// Applies every queued command, in order, draining the buffer.
    pub fn flush_commands(&mut self, mut buffer: CommandBuffer) -> Result<()> {
        buffer.apply(self)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
