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

//! Parent/child and peer-link bookkeeping, layered on top of the core
//! storage as ordinary components plus a thin free-function surface.
//! `Parent`/`Children`/`Links` carry no storage primitive of their own.

use crate::entity::EntityId;
use crate::error::Result;
use crate::world::World;

/// Points at an entity's parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parent(pub EntityId);

/// An entity's direct children, in insertion order, deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Children {
    children: Vec<EntityId>,
}

impl Children {
    pub fn add_child(&mut self, child: EntityId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, child: EntityId) -> bool {
        if let Some(pos) = self.children.iter().position(|&c| c == child) {
            self.children.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, child: EntityId) -> bool {
        self.children.contains(&child)
    }

    pub fn as_slice(&self) -> &[EntityId] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Non-hierarchical peer links (symmetric: linking `a` to `b` also links
/// `b` to `a`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Links {
    peers: Vec<EntityId>,
}

impl Links {
    fn add(&mut self, peer: EntityId) {
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
    }

    fn remove(&mut self, peer: EntityId) {
        if let Some(pos) = self.peers.iter().position(|&p| p == peer) {
            self.peers.remove(pos);
        }
    }

    pub fn as_slice(&self) -> &[EntityId] {
        &self.peers
    }
}

/// Sets `child`'s parent to `parent`, detaching it from any previous parent.
pub fn set_parent(world: &mut World, child: EntityId, parent: EntityId) -> Result<()> {
    if let Some(&Parent(old)) = world.get::<Parent>(child) {
        if old == parent {
            return Ok(());
        }
        if let Some(old_children) = world.get_mut::<Children>(old) {
            old_children.remove_child(child);
        }
        world.get_mut::<Parent>(child).unwrap().0 = parent;
    } else {
        world.add_component(child, Parent(parent))?;
    }

    if let Some(children) = world.get_mut::<Children>(parent) {
        children.add_child(child);
    } else {
        let mut children = Children::default();
        children.add_child(child);
        world.add_component(parent, children)?;
    }
    Ok(())
}

/// Detaches `child` from its parent, if any.
pub fn remove_parent(world: &mut World, child: EntityId) -> Result<()> {
    if let Some(&Parent(parent)) = world.get::<Parent>(child) {
        if let Some(children) = world.get_mut::<Children>(parent) {
            children.remove_child(child);
        }
        world.remove_component::<Parent>(child)?;
    }
    Ok(())
}

pub fn parent_of(world: &World, child: EntityId) -> Option<EntityId> {
    world.get::<Parent>(child).map(|p| p.0)
}

pub fn children_of(world: &World, parent: EntityId) -> &[EntityId] {
    world.get::<Children>(parent).map(Children::as_slice).unwrap_or(&[])
}

/// Links `a` and `b` as peers. Idempotent and symmetric.
pub fn add_link(world: &mut World, a: EntityId, b: EntityId) -> Result<()> {
    add_one_sided_link(world, a, b)?;
    add_one_sided_link(world, b, a)
}

fn add_one_sided_link(world: &mut World, from: EntityId, to: EntityId) -> Result<()> {
    if let Some(links) = world.get_mut::<Links>(from) {
        links.add(to);
    } else {
        let mut links = Links::default();
        links.add(to);
        world.add_component(from, links)?;
    }
    Ok(())
}

/// Removes the peer link between `a` and `b`, if one exists.
pub fn remove_link(world: &mut World, a: EntityId, b: EntityId) {
    if let Some(links) = world.get_mut::<Links>(a) {
        links.remove(b);
    }
    if let Some(links) = world.get_mut::<Links>(b) {
        links.remove(a);
    }
}
