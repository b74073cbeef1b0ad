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

//! Component marker trait, bundles, and the component descriptor registry.
//!
//! A [`ComponentDescriptor`] stands in for the per-type virtual table a
//! dynamically-typed engine would need: every place archetype storage would
//! otherwise call `T::move(ptr)` or `T::drop(ptr)` directly, it instead goes
//! through the descriptor's function pointers, recorded once at
//! registration time.

use std::any::TypeId;
use std::ptr;

use smallvec::{smallvec, SmallVec};

use crate::mask::MAX_COMPONENTS;

/// Maximum number of components supported by [`Bundle`] implementations.
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// Component ids below this threshold are looked up in a flat array;
/// ids at or above it fall through to a map.
pub const FAST_THRESHOLD: usize = 256;

/// Marker trait for components. Components must be `'static` (no borrowed
/// data) and `Send + Sync` so they can cross system/thread boundaries.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

bitflags::bitflags! {
    /// Flags describing a component's construction/layout properties.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ComponentFlags: u8 {
        /// `memcpy`/`memset` may replace move-construct/default-construct.
        const TRIVIALLY_COPYABLE = 1 << 0;
        /// Default-construction cannot fail and is cheap.
        const NOTHROW_DEFAULT = 1 << 1;
        /// Zero-sized type; columns for it occupy no storage.
        const EMPTY = 1 << 2;
    }
}

/// Compact identifier for a registered component type.
pub type ComponentId = u32;

unsafe fn drop_in_place_erased<T>(ptr: *mut u8) {
    ptr::drop_in_place(ptr as *mut T);
}

unsafe fn move_ctor_erased<T>(dst: *mut u8, src: *mut u8) {
    ptr::copy_nonoverlapping(src as *const T, dst as *mut T, 1);
}

unsafe fn default_ctor_erased<T: Default>(dst: *mut u8) {
    ptr::write(dst as *mut T, T::default());
}

/// Immutable per-type metadata, the engine's stand-in for a vtable.
#[derive(Clone)]
pub struct ComponentDescriptor {
    pub id: ComponentId,
    pub type_id: TypeId,
    pub name_hash: u64,
    pub size: usize,
    pub align: usize,
    pub flags: ComponentFlags,
    move_ctor: unsafe fn(*mut u8, *mut u8),
    drop_fn: Option<unsafe fn(*mut u8)>,
    default_ctor: Option<unsafe fn(*mut u8)>,
}

impl ComponentDescriptor {
    fn of<T: Component>(id: ComponentId) -> Self {
        let size = std::mem::size_of::<T>();
        let mut flags = ComponentFlags::empty();
        if size == 0 {
            flags |= ComponentFlags::EMPTY;
        }
        if std::mem::needs_drop::<T>() {
            Self {
                id,
                type_id: TypeId::of::<T>(),
                name_hash: stable_name_hash::<T>(),
                size,
                align: std::mem::align_of::<T>(),
                flags,
                move_ctor: move_ctor_erased::<T>,
                drop_fn: Some(drop_in_place_erased::<T>),
                default_ctor: None,
            }
        } else {
            Self {
                id,
                type_id: TypeId::of::<T>(),
                name_hash: stable_name_hash::<T>(),
                size,
                align: std::mem::align_of::<T>(),
                flags: flags | ComponentFlags::TRIVIALLY_COPYABLE,
                move_ctor: move_ctor_erased::<T>,
                drop_fn: None,
                default_ctor: None,
            }
        }
    }

    fn with_default<T: Component + Default>(mut self) -> Self {
        self.default_ctor = Some(default_ctor_erased::<T>);
        self.flags |= ComponentFlags::NOTHROW_DEFAULT;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.flags.contains(ComponentFlags::EMPTY)
    }

    pub fn is_trivially_copyable(&self) -> bool {
        self.flags.contains(ComponentFlags::TRIVIALLY_COPYABLE)
    }

    /// Move-construct the value at `src` into `dst`, leaving `src` logically
    /// moved-from (the caller must not drop it again).
    ///
    /// # Safety
    /// `src` and `dst` must be valid, non-overlapping, and each at least
    /// `size` bytes, properly aligned for this descriptor's type.
    pub unsafe fn move_construct(&self, dst: *mut u8, src: *mut u8) {
        if self.size == 0 {
            return;
        }
        (self.move_ctor)(dst, src)
    }

    /// Drop the value at `ptr` in place, if the type needs drop glue.
    ///
    /// # Safety
    /// `ptr` must point to a live, properly initialized value of this
    /// descriptor's type.
    pub unsafe fn drop_value(&self, ptr: *mut u8) {
        if let Some(f) = self.drop_fn {
            f(ptr)
        }
    }

    /// Default-construct the value at `ptr`, if this type supports it.
    ///
    /// # Safety
    /// `ptr` must be valid and properly aligned, and must not already hold
    /// a live value.
    pub unsafe fn default_construct(&self, ptr: *mut u8) -> bool {
        match self.default_ctor {
            Some(f) => {
                f(ptr);
                true
            }
            None => false,
        }
    }
}

fn stable_name_hash<T: 'static>() -> u64 {
    // Stable across runs of the same binary; used as the portable wire
    // identifier (the type's own TypeId is not stable across compilations).
    let name = std::any::type_name::<T>();
    let mut h: u64 = 0xCBF29CE484222325;
    for b in name.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001B3);
    }
    h
}

/// Per-world registry assigning a monotonic [`ComponentId`] to each type on
/// first registration. Ids below [`FAST_THRESHOLD`] resolve through a flat
/// array; larger ids spill into a map (expected rare, given
/// [`MAX_COMPONENTS`] bounds practical registrations well under it).
#[derive(Default)]
pub struct ComponentRegistry {
    by_type: rustc_hash::FxHashMap<TypeId, ComponentId>,
    fast: Vec<Option<ComponentDescriptor>>,
    overflow: rustc_hash::FxHashMap<ComponentId, ComponentDescriptor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent registration: returns the existing id if `T` was already
    /// registered, otherwise assigns the next id.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        self.register_with::<T>(ComponentDescriptor::of::<T>)
    }

    /// Like [`register`](Self::register) but also records a default
    /// constructor, used by batch-spawn paths that populate columns before
    /// assigning real values.
    pub fn register_default<T: Component + Default>(&mut self) -> ComponentId {
        self.register_with::<T>(|id| ComponentDescriptor::of::<T>(id).with_default::<T>())
    }

    fn register_with<T: Component>(
        &mut self,
        build: impl FnOnce(ComponentId) -> ComponentDescriptor,
    ) -> ComponentId {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.by_type.get(&type_id) {
            return id;
        }
        let id = self.by_type.len() as ComponentId;
        assert!((id as usize) < MAX_COMPONENTS, "component id space exhausted");
        let descriptor = build(id);
        self.by_type.insert(type_id, id);
        self.insert_descriptor(id, descriptor);
        id
    }

    fn insert_descriptor(&mut self, id: ComponentId, descriptor: ComponentDescriptor) {
        if (id as usize) < FAST_THRESHOLD {
            if self.fast.len() <= id as usize {
                self.fast.resize_with(id as usize + 1, || None);
            }
            self.fast[id as usize] = Some(descriptor);
        } else {
            self.overflow.insert(id, descriptor);
        }
    }

    pub fn id_of<T: Component>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Finds a registered component by its portable stable-name hash, used
    /// to resolve a serialized descriptor against a live registry.
    pub fn id_by_hash(&self, name_hash: u64) -> Option<ComponentId> {
        self.fast
            .iter()
            .flatten()
            .chain(self.overflow.values())
            .find(|d| d.name_hash == name_hash)
            .map(|d| d.id)
    }

    pub fn descriptor(&self, id: ComponentId) -> Option<&ComponentDescriptor> {
        if (id as usize) < FAST_THRESHOLD {
            self.fast.get(id as usize).and_then(|o| o.as_ref())
        } else {
            self.overflow.get(&id)
        }
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Groups multiple components for one-shot entity spawning.
pub trait Bundle: Send + Sync + 'static {
    /// Type ids of every component in the bundle, in declaration order.
    fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Register every component type in `registry`, returning their ids in
    /// declaration order.
    fn register_components(
        registry: &mut ComponentRegistry,
    ) -> SmallVec<[ComponentId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Write every component's value to its destination pointer.
    ///
    /// # Safety
    /// `ptrs` must have one valid, properly aligned pointer per component,
    /// in the same order as [`type_ids`](Self::type_ids).
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

// Implemented only for tuples, never blanket-for-Component, to avoid
// conflicting with the single-component tuple impl.
macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(TypeId::of::<$T>()),*]
            }

            fn register_components(registry: &mut ComponentRegistry) -> SmallVec<[ComponentId; MAX_BUNDLE_COMPONENTS]> {
                smallvec![$(registry.register::<$T>()),*]
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    ptr::write(ptrs[i] as *mut $T, $T);
                    i += 1;
                )*
                let _ = i;
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
