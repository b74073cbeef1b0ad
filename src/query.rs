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

//! Compile-time query terms over archetype storage.
//!
//! A query is a tuple of [`QueryTerm`]s. `Required<T>`/`RequiredMut<T>` fetch
//! `&T`/`&mut T` and narrow matching archetypes to those carrying `T`;
//! `Optional<T>`/`OptionalMut<T>` fetch without narrowing; `Not<T>` narrows
//! to archetypes *without* `T` and fetches nothing; `AnyOf<(A, B, ...)>` and
//! `OneOf<(A, B, ...)>` narrow to archetypes carrying at least one, or
//! exactly one, member of a [`ComponentGroup`].

use std::marker::PhantomData;

use crate::archetype::Archetype;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entity::{EntityId, Location};
use crate::mask::ComponentMask;
use crate::storage::Storage;

/// Accumulated matching rule for a compiled query: every required bit must
/// be set, no excluded bit may be set, and every any-of/one-of group must
/// satisfy its own rule. `impossible` short-circuits a query built over a
/// component type that was never registered — it can never match anything.
#[derive(Default, Clone)]
pub struct QuerySpec {
    pub required: ComponentMask,
    pub excluded: ComponentMask,
    pub any_of: Vec<ComponentMask>,
    pub one_of: Vec<ComponentMask>,
    pub impossible: bool,
}

impl QuerySpec {
    pub fn matches(&self, mask: &ComponentMask) -> bool {
        if self.impossible {
            return false;
        }
        mask.has_all(&self.required)
            && !mask.intersects(&self.excluded)
            && self.any_of.iter().all(|g| mask.intersects(g))
            && self.one_of.iter().all(|g| mask.intersection(g).count() == 1)
    }
}

/// One term of a query tuple. Implemented for `Required<T>`, `Optional<T>`,
/// `Not<T>`, their `*Mut` counterparts, `AnyOf<G>`/`OneOf<G>`, and tuples of
/// up to eight terms.
pub trait QueryTerm<'w> {
    type Item;
    type Compiled: Clone;

    /// Resolves component ids once, ahead of any archetype scan.
    fn compile(registry: &ComponentRegistry) -> Self::Compiled;

    /// Folds this term's matching rule into `spec`.
    fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec);

    /// Reads this term's value out of `archetype` at `loc`.
    ///
    /// # Safety
    /// `archetype` must satisfy the [`QuerySpec`] this term contributed to,
    /// and `loc` must name a live row within it.
    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item;
}

/// Fetches `&T`, narrowing matches to archetypes carrying `T`.
pub struct Required<T>(PhantomData<T>);
/// Fetches `&mut T`, narrowing matches to archetypes carrying `T`.
pub struct RequiredMut<T>(PhantomData<T>);
/// Fetches `Option<&T>` without narrowing matches.
pub struct Optional<T>(PhantomData<T>);
/// Fetches `Option<&mut T>` without narrowing matches.
pub struct OptionalMut<T>(PhantomData<T>);
/// Fetches nothing; narrows matches to archetypes *without* `T`.
pub struct Not<T>(PhantomData<T>);
/// Narrows matches to archetypes carrying at least one member of `G`.
pub struct AnyOf<G>(PhantomData<G>);
/// Narrows matches to archetypes carrying exactly one member of `G`.
pub struct OneOf<G>(PhantomData<G>);

impl<'w, T: Component> QueryTerm<'w> for Required<T> {
    type Item = &'w T;
    type Compiled = Option<ComponentId>;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        registry.id_of::<T>()
    }

    fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec) {
        match compiled {
            Some(id) => spec.required.set(*id as usize),
            None => spec.impossible = true,
        }
    }

    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
        let id = compiled.expect("required component present on a matching archetype");
        let column = archetype.column_of(id).expect("mask bit implies column");
        unsafe { &*(archetype.read_column(loc, column) as *const T) }
    }
}

impl<'w, T: Component> QueryTerm<'w> for RequiredMut<T> {
    type Item = &'w mut T;
    type Compiled = Option<ComponentId>;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        registry.id_of::<T>()
    }

    fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec) {
        match compiled {
            Some(id) => spec.required.set(*id as usize),
            None => spec.impossible = true,
        }
    }

    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
        let id = compiled.expect("required component present on a matching archetype");
        let column = archetype.column_of(id).expect("mask bit implies column");
        unsafe { &mut *(archetype.read_column(loc, column) as *mut T) }
    }
}

impl<'w, T: Component> QueryTerm<'w> for Optional<T> {
    type Item = Option<&'w T>;
    type Compiled = Option<ComponentId>;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        registry.id_of::<T>()
    }

    fn contribute(_compiled: &Self::Compiled, _spec: &mut QuerySpec) {}

    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
        let id = (*compiled)?;
        let column = archetype.column_of(id)?;
        Some(unsafe { &*(archetype.read_column(loc, column) as *const T) })
    }
}

impl<'w, T: Component> QueryTerm<'w> for OptionalMut<T> {
    type Item = Option<&'w mut T>;
    type Compiled = Option<ComponentId>;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        registry.id_of::<T>()
    }

    fn contribute(_compiled: &Self::Compiled, _spec: &mut QuerySpec) {}

    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
        let id = (*compiled)?;
        let column = archetype.column_of(id)?;
        Some(unsafe { &mut *(archetype.read_column(loc, column) as *mut T) })
    }
}

impl<'w, T: Component> QueryTerm<'w> for Not<T> {
    type Item = ();
    type Compiled = Option<ComponentId>;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        registry.id_of::<T>()
    }

    fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec) {
        if let Some(id) = compiled {
            spec.excluded.set(*id as usize);
        }
    }

    unsafe fn fetch(_compiled: &Self::Compiled, _archetype: &'w Archetype, _loc: Location) -> Self::Item {}
}

/// A fixed set of component types fetched together by [`AnyOf`]/[`OneOf`].
/// Implemented for tuples of two to four [`Component`] types.
pub trait ComponentGroup<'w> {
    type Item;
    type Compiled: Clone + Copy;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled;
    fn mask(compiled: &Self::Compiled) -> ComponentMask;

    /// # Safety
    /// Same contract as [`QueryTerm::fetch`].
    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item;
}

macro_rules! impl_component_group {
    ($($T:ident),+) => {
        impl<'w, $($T: Component),+> ComponentGroup<'w> for ($($T,)+) {
            type Item = ($(Option<&'w $T>,)+);
            type Compiled = ($(Option<ComponentId>,)+);

            fn compile(registry: &ComponentRegistry) -> Self::Compiled {
                ($(registry.id_of::<$T>(),)+)
            }

            fn mask(compiled: &Self::Compiled) -> ComponentMask {
                #[allow(non_snake_case)]
                let ($($T,)+) = *compiled;
                let mut mask = ComponentMask::EMPTY;
                $(if let Some(id) = $T { mask.set(id as usize); })+
                mask
            }

            unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
                #[allow(non_snake_case)]
                let ($($T,)+) = *compiled;
                ($(
                    $T.and_then(|id| archetype.column_of(id))
                        .map(|col| unsafe { &*(archetype.read_column(loc, col) as *const $T) }),
                )+)
            }
        }
    };
}

impl_component_group!(A, B);
impl_component_group!(A, B, C);
impl_component_group!(A, B, C, D);

impl<'w, G: ComponentGroup<'w>> QueryTerm<'w> for AnyOf<G> {
    type Item = G::Item;
    type Compiled = G::Compiled;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        G::compile(registry)
    }

    fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec) {
        let mask = G::mask(compiled);
        if mask.none() {
            spec.impossible = true;
        } else {
            spec.any_of.push(mask);
        }
    }

    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
        unsafe { G::fetch(compiled, archetype, loc) }
    }
}

impl<'w, G: ComponentGroup<'w>> QueryTerm<'w> for OneOf<G> {
    type Item = G::Item;
    type Compiled = G::Compiled;

    fn compile(registry: &ComponentRegistry) -> Self::Compiled {
        G::compile(registry)
    }

    fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec) {
        let mask = G::mask(compiled);
        if mask.none() {
            spec.impossible = true;
        } else {
            spec.one_of.push(mask);
        }
    }

    unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
        unsafe { G::fetch(compiled, archetype, loc) }
    }
}

macro_rules! impl_query_term_tuple {
    ($($T:ident),+) => {
        impl<'w, $($T: QueryTerm<'w>),+> QueryTerm<'w> for ($($T,)+) {
            type Item = ($($T::Item,)+);
            type Compiled = ($($T::Compiled,)+);

            fn compile(registry: &ComponentRegistry) -> Self::Compiled {
                ($($T::compile(registry),)+)
            }

            fn contribute(compiled: &Self::Compiled, spec: &mut QuerySpec) {
                #[allow(non_snake_case)]
                let ($($T,)+) = compiled;
                $($T::contribute($T, spec);)+
            }

            unsafe fn fetch(compiled: &Self::Compiled, archetype: &'w Archetype, loc: Location) -> Self::Item {
                #[allow(non_snake_case)]
                let ($($T,)+) = compiled;
                ($(unsafe { $T::fetch($T, archetype, loc) },)+)
            }
        }
    };
}

impl_query_term_tuple!(A);
impl_query_term_tuple!(A, B);
impl_query_term_tuple!(A, B, C);
impl_query_term_tuple!(A, B, C, D);
impl_query_term_tuple!(A, B, C, D, E);
impl_query_term_tuple!(A, B, C, D, E, F);
impl_query_term_tuple!(A, B, C, D, E, F, G);
impl_query_term_tuple!(A, B, C, D, E, F, G, H);

fn matching_archetypes(storage: &Storage, spec: &QuerySpec) -> Vec<usize> {
    if spec.impossible {
        return Vec::new();
    }
    storage
        .archetypes()
        .iter()
        .enumerate()
        .filter(|(_, archetype)| !archetype.is_dead() && spec.matches(&archetype.mask))
        .map(|(i, _)| i)
        .collect()
}

/// A query over a world's entities, live for as long as `'w`.
pub struct Query<'w, T: QueryTerm<'w>> {
    storage: &'w Storage,
    compiled: T::Compiled,
    matching: Vec<usize>,
}

impl<'w, T: QueryTerm<'w>> Query<'w, T> {
    pub fn new(storage: &'w Storage) -> Self {
        let compiled = T::compile(storage.registry());
        let mut spec = QuerySpec::default();
        T::contribute(&compiled, &mut spec);
        let matching = matching_archetypes(storage, &spec);
        Self { storage, compiled, matching }
    }

    pub fn iter(&self) -> QueryIter<'w, T> {
        QueryIter {
            storage: self.storage,
            compiled: self.compiled.clone(),
            matching: self.matching.clone(),
            archetype_pos: 0,
            chunk_pos: 0,
            slot: 0,
        }
    }

    /// Total matching entity count, without fetching any component data.
    pub fn count(&self) -> usize {
        self.matching.iter().map(|&i| self.storage.archetypes()[i].entity_count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(feature = "parallel")]
impl<'w, T: QueryTerm<'w>> Query<'w, T>
where
    T::Compiled: Sync,
{
    /// Parallel counterpart to [`Query::iter`]: dispatches one Rayon task per
    /// chunk of each matching archetype rather than one task per archetype,
    /// since chunks are the unit the view partitions work by. Chunks never
    /// share memory, so concurrent calls into `f` for distinct chunks (even
    /// of the same archetype) never alias. Call order is unspecified.
    pub fn par_for_each<F>(&self, f: F)
    where
        F: Fn(EntityId, T::Item) + Sync,
        T::Item: Send,
    {
        use rayon::prelude::*;

        self.matching.par_iter().for_each(|&archetype_index| {
            let archetype = &self.storage.archetypes()[archetype_index];
            let chunk_count = archetype.chunks().len();
            (0..chunk_count).into_par_iter().for_each(|chunk_pos| {
                let chunk = &archetype.chunks()[chunk_pos];
                for slot in 0..chunk.len() {
                    let loc = Location { archetype: archetype_index, chunk: chunk_pos as u32, slot };
                    let entity = chunk.entity_at(slot);
                    // SAFETY: `archetype` satisfies `self`'s spec by
                    // construction (it came from `self.matching`), and `loc`
                    // names a live row since `slot < chunk.len()`.
                    let item = unsafe { T::fetch(&self.compiled, archetype, loc) };
                    f(entity, item);
                }
            });
        });
    }
}

impl<'w, T: QueryTerm<'w>> IntoIterator for &Query<'w, T> {
    type Item = (EntityId, T::Item);
    type IntoIter = QueryIter<'w, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator produced by [`Query::iter`], walking every matching archetype's
/// chunks in order.
pub struct QueryIter<'w, T: QueryTerm<'w>> {
    storage: &'w Storage,
    compiled: T::Compiled,
    matching: Vec<usize>,
    archetype_pos: usize,
    chunk_pos: usize,
    slot: u32,
}

impl<'w, T: QueryTerm<'w>> Iterator for QueryIter<'w, T> {
    type Item = (EntityId, T::Item);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let archetype_index = *self.matching.get(self.archetype_pos)?;
            let archetype = &self.storage.archetypes()[archetype_index];
            let chunks = archetype.chunks();

            let Some(chunk) = chunks.get(self.chunk_pos) else {
                self.archetype_pos += 1;
                self.chunk_pos = 0;
                self.slot = 0;
                continue;
            };
            if self.slot >= chunk.len() {
                self.chunk_pos += 1;
                self.slot = 0;
                continue;
            }

            let loc = Location { archetype: archetype_index, chunk: self.chunk_pos as u32, slot: self.slot };
            let entity = chunk.entity_at(self.slot);
            self.slot += 1;
            let item = unsafe { T::fetch(&self.compiled, archetype, loc) };
            return Some((entity, item));
        }
    }
}

/// Caches a query's compiled term ids and its last-seen matching archetype
/// list across repeated calls, as a system driving the same query every
/// frame would. Rebuilds the match list whenever the storage's archetype
/// count has grown since the previous call.
pub struct QueryState<T> {
    compiled: Option<T>,
    seen_archetype_count: usize,
    matching: Vec<usize>,
}

impl<T: Clone> QueryState<T> {
    pub fn new() -> Self {
        Self { compiled: None, seen_archetype_count: 0, matching: Vec::new() }
    }

    pub fn get<'w, Q>(&mut self, storage: &'w Storage) -> Query<'w, Q>
    where
        Q: QueryTerm<'w, Compiled = T>,
    {
        let compiled = self.compiled.get_or_insert_with(|| Q::compile(storage.registry())).clone();
        if storage.archetype_count() != self.seen_archetype_count {
            let mut spec = QuerySpec::default();
            Q::contribute(&compiled, &mut spec);
            self.matching = matching_archetypes(storage, &spec);
            self.seen_archetype_count = storage.archetype_count();
        }
        Query { storage, compiled, matching: self.matching.clone() }
    }
}

impl<T: Clone> Default for QueryState<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Position {
        x: f32,
        y: f32,
    }
    #[derive(Clone, Copy, PartialEq, Debug)]
    struct Velocity {
        dx: f32,
    }
    struct Marker;

    #[test]
    fn required_term_matches_only_archetypes_with_component() {
        let mut storage = Storage::new();
        let moving = storage.spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0 }));
        let still = storage.spawn((Position { x: 5.0, y: 5.0 },));

        let query: Query<'_, (Required<Position>, Required<Velocity>)> = Query::new(&storage);
        let results: Vec<_> = query.iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, moving);
        let _ = still;
    }

    #[test]
    fn optional_term_does_not_narrow_matches() {
        let mut storage = Storage::new();
        storage.spawn((Position { x: 1.0, y: 1.0 }, Velocity { dx: 2.0 }));
        storage.spawn((Position { x: 2.0, y: 2.0 },));

        let query: Query<'_, (Required<Position>, Optional<Velocity>)> = Query::new(&storage);
        let mut with_velocity = 0;
        let mut without_velocity = 0;
        for (_, (_, v)) in query.iter() {
            if v.is_some() {
                with_velocity += 1;
            } else {
                without_velocity += 1;
            }
        }
        assert_eq!(with_velocity, 1);
        assert_eq!(without_velocity, 1);
    }

    #[test]
    fn not_term_excludes_matching_component() {
        let mut storage = Storage::new();
        let plain = storage.spawn((Position { x: 0.0, y: 0.0 },));
        storage.spawn((Position { x: 0.0, y: 0.0 }, Marker));

        let query: Query<'_, (Required<Position>, Not<Marker>)> = Query::new(&storage);
        let results: Vec<_> = query.iter().map(|(e, _)| e).collect();
        assert_eq!(results, vec![plain]);
    }

    #[test]
    fn any_of_matches_archetypes_with_at_least_one_member() {
        let mut storage = Storage::new();
        let a = storage.spawn((Position { x: 0.0, y: 0.0 },));
        let b = storage.spawn((Velocity { dx: 1.0 },));
        storage.spawn_empty();

        let query: Query<'_, AnyOf<(Position, Velocity)>> = Query::new(&storage);
        let mut seen: Vec<_> = query.iter().map(|(e, _)| e).collect();
        seen.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn required_mut_allows_in_place_writes() {
        let mut storage = Storage::new();
        let e = storage.spawn((Velocity { dx: 1.0 },));
        {
            let query: Query<'_, RequiredMut<Velocity>> = Query::new(&storage);
            for (_, v) in query.iter() {
                v.dx *= 2.0;
            }
        }
        assert_eq!(storage.get::<Velocity>(e), Some(&Velocity { dx: 2.0 }));
    }

    #[test]
    fn query_over_unregistered_component_matches_nothing() {
        let storage = Storage::new();
        let query: Query<'_, Required<Position>> = Query::new(&storage);
        assert_eq!(query.count(), 0);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn par_for_each_visits_every_match_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut storage = Storage::new();
        for i in 0..64 {
            storage.spawn((Velocity { dx: i as f32 },));
        }
        let query: Query<'_, RequiredMut<Velocity>> = Query::new(&storage);
        let visits = AtomicUsize::new(0);
        query.par_for_each(|_, v| {
            v.dx *= 2.0;
            visits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(visits.load(Ordering::Relaxed), 64);
    }
}
