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

//! Component metadata and the world-owned component cache.
//!
//! Each registered component gets one [`ComponentItem`]: size, alignment,
//! optional SoA field sizes, and the function pointers the chunk uses to
//! construct/destroy/move/copy/compare values without knowing their static
//! type at the call site (spec §3, §9 design notes). The metadata is keyed
//! by `TypeId` so re-registering the same Rust type reuses the same
//! `ComponentItem` and component `Entity`, exactly as the spec requires:
//! "the metadata outlives the component entity and is reused on
//! re-registration".

use std::any::TypeId;
use std::mem::{align_of, needs_drop, size_of};

use ahash::AHashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::id::Entity;
use crate::reflection::{Soa, MAX_SOA_FIELDS};

/// Marker trait for component payloads. Components must not borrow data.
pub trait Component: 'static + Send + Sync {}
impl<T: 'static + Send + Sync> Component for T {}

pub type CtorFn = unsafe fn(*mut u8);
pub type DtorFn = unsafe fn(*mut u8);
pub type CopyFn = unsafe fn(*const u8, *mut u8);
pub type MoveFn = unsafe fn(*mut u8, *mut u8);
pub type SwapFn = unsafe fn(*mut u8, *mut u8);
pub type EqFn = unsafe fn(*const u8, *const u8) -> bool;

/// Per-component reflection metadata (spec §3, §4.3 "component cache").
pub struct ComponentItem {
    /// The component's own entity id (participates in archetype id lists).
    pub id: Entity,
    pub name: &'static str,
    /// Byte size; the spec caps this at 255 for chunk layout math.
    pub size: u32,
    pub alignment: u32,
    pub soa_field_sizes: SmallVec<[u16; MAX_SOA_FIELDS]>,
    ctor: Option<CtorFn>,
    dtor: Option<DtorFn>,
    copy: Option<CopyFn>,
    mov: MoveFn,
    swap: SwapFn,
    eq: Option<EqFn>,
}

impl ComponentItem {
    fn base<T: Component>(id: Entity) -> Self {
        Self {
            id,
            name: std::any::type_name::<T>(),
            size: size_of::<T>() as u32,
            alignment: align_of::<T>() as u32,
            soa_field_sizes: SmallVec::new(),
            ctor: None,
            dtor: if needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
            } else {
                None
            },
            copy: None,
            mov: |src, dst| unsafe {
                std::ptr::copy_nonoverlapping(src as *const T, dst as *mut T, 1);
            },
            swap: |a, b| unsafe {
                std::ptr::swap(a as *mut T, b as *mut T);
            },
            eq: None,
        }
    }

    /// True when the type has neither a destructor nor a default
    /// constructor registered (spec: "trivial types omit ctor/dtor
    /// pointers").
    pub fn is_trivial(&self) -> bool {
        self.dtor.is_none() && self.ctor.is_none()
    }

    pub fn is_soa(&self) -> bool {
        !self.soa_field_sizes.is_empty()
    }

    /// Whether duplicating this component via [`Self::copy_value`] actually
    /// clones it, rather than falling back to an unchecked byte copy.
    pub fn has_copy(&self) -> bool {
        self.copy.is_some()
    }

    /// A zero-size, no-op item for ids used purely as tags, relations, or
    /// pair targets - entities with no Rust-typed payload of their own.
    fn tag(id: Entity) -> Self {
        Self {
            id,
            name: "<tag>",
            size: 0,
            alignment: 1,
            soa_field_sizes: SmallVec::new(),
            ctor: None,
            dtor: None,
            copy: None,
            mov: |_, _| {},
            swap: |_, _| {},
            eq: None,
        }
    }

    /// # Safety
    /// `ptr` must be valid, aligned, and uninitialized memory for the
    /// registered type.
    pub unsafe fn construct(&self, ptr: *mut u8) {
        match self.ctor {
            Some(f) => f(ptr),
            None => debug_assert!(
                self.is_trivial(),
                "component {} has no default constructor",
                self.name
            ),
        }
    }

    /// # Safety
    /// `ptr` must point at a live, initialized value of the registered type.
    pub unsafe fn destruct(&self, ptr: *mut u8) {
        if let Some(f) = self.dtor {
            f(ptr);
        }
    }

    /// # Safety
    /// `src` initialized, `dst` valid and uninitialized, non-overlapping.
    pub unsafe fn move_value(&self, src: *mut u8, dst: *mut u8) {
        (self.mov)(src, dst);
    }

    /// # Safety
    /// `src` initialized, `dst` valid and uninitialized, non-overlapping.
    /// Falls back to a move if the type has no registered clone.
    pub unsafe fn copy_value(&self, src: *const u8, dst: *mut u8) {
        match self.copy {
            Some(f) => f(src, dst),
            None => (self.mov)(src as *mut u8, dst),
        }
    }

    /// # Safety
    /// both pointers must reference live, initialized values.
    pub unsafe fn swap_value(&self, a: *mut u8, b: *mut u8) {
        (self.swap)(a, b);
    }

    /// # Safety
    /// both pointers must reference live, initialized values.
    pub unsafe fn values_equal(&self, a: *const u8, b: *const u8) -> Option<bool> {
        self.eq.map(|f| f(a, b))
    }
}

/// World-owned table from component `TypeId` to its metadata (spec §2
/// "Component cache").
#[derive(Default)]
pub struct ComponentCache {
    items: AHashMap<u64, ComponentItem>,
    by_type: FxHashMap<TypeId, Entity>,
}

impl ComponentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_type(&self, type_id: TypeId) -> Option<Entity> {
        self.by_type.get(&type_id).copied()
    }

    pub fn get(&self, id: Entity) -> Option<&ComponentItem> {
        self.items.get(&id.bits())
    }

    /// Register `T` as a plain (AoS, no default-ctor, no clone, no eq)
    /// component, assigning it `id` if this is the first registration.
    /// Reuses the existing item on re-registration.
    pub fn register<T: Component>(&mut self, id: Entity) -> Entity {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }
        self.items.insert(id.bits(), ComponentItem::base::<T>(id));
        self.by_type.insert(type_id, id);
        id
    }

    /// Same as [`register`](Self::register) but additionally records SoA
    /// field sizes so the chunk lays the component out as independent
    /// per-field sub-arrays (spec §4.2 "SoA access").
    pub fn register_soa<T: Component + Soa>(&mut self, id: Entity) -> Entity {
        debug_assert!(
            !needs_drop::<T>(),
            "SoA components must be trivial; the chunk moves their fields by raw byte copy"
        );
        let assigned = self.register::<T>(id);
        if let Some(item) = self.items.get_mut(&assigned.bits()) {
            if item.soa_field_sizes.is_empty() && !T::FIELD_SIZES.is_empty() {
                item.soa_field_sizes = T::FIELD_SIZES.iter().map(|&s| s as u16).collect();
            }
        }
        assigned
    }

    /// Attaches a default constructor, used when the transition algorithm
    /// needs to default-construct a destination-only component.
    pub fn with_ctor<T: Component + Default>(&mut self, id: Entity) {
        if let Some(item) = self.items.get_mut(&id.bits()) {
            item.ctor = Some(|ptr| unsafe { std::ptr::write(ptr as *mut T, T::default()) });
        }
    }

    /// Attaches a true clone (duplicate-without-consuming-source), used by
    /// `copy_foreign_entity_data`-style duplication (`World::copy`).
    pub fn with_copy<T: Component + Clone>(&mut self, id: Entity) {
        if let Some(item) = self.items.get_mut(&id.bits()) {
            item.copy = Some(|src, dst| unsafe {
                let value = (*(src as *const T)).clone();
                std::ptr::write(dst as *mut T, value);
            });
        }
    }

    /// Attaches an equality comparator.
    pub fn with_eq<T: Component + PartialEq>(&mut self, id: Entity) {
        if let Some(item) = self.items.get_mut(&id.bits()) {
            item.eq = Some(|a, b| unsafe { *(a as *const T) == *(b as *const T) });
        }
    }

    /// Registers `id` as a zero-size tag if it has no metadata yet -
    /// entities used as plain tags, relations, or pair targets never go
    /// through [`Self::register`], but every id in an archetype's list needs
    /// a [`ComponentItem`] for the chunk's layout math. Idempotent, and
    /// never overwrites a richer item from an earlier typed registration.
    pub fn register_tag(&mut self, id: Entity) {
        self.items.entry(id.bits()).or_insert_with(|| ComponentItem::tag(id));
    }
}

/// Maximum number of components a [`Bundle`] may pack into one spawn call.
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// A group of component values spawned onto one entity in a single
/// archetype transition (spec §6 `add(entity, id, value)` generalized to
/// many ids at once).
pub trait Bundle: Send + Sync + 'static {
    fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Ensure every component in the bundle has a cache entry, returning
    /// their assigned component ids in the same order as `type_ids()`.
    fn register_components(
        cache: &mut ComponentCache,
        alloc_id: &mut dyn FnMut() -> Entity,
    ) -> SmallVec<[Entity; MAX_BUNDLE_COMPONENTS]>
    where
        Self: Sized;

    /// Write components to raw pointers, in `type_ids()` order.
    ///
    /// # Safety
    /// Caller must ensure pointers are valid, aligned, and sized for each
    /// component type in order.
    unsafe fn write_components(self, ptrs: &[*mut u8]);
}

macro_rules! impl_bundle {
    ($($T:ident),*) => {
        impl<$($T: Component),*> Bundle for ($($T,)*) {
            fn type_ids() -> SmallVec<[TypeId; MAX_BUNDLE_COMPONENTS]> {
                smallvec::smallvec![$(TypeId::of::<$T>()),*]
            }

            fn register_components(cache: &mut ComponentCache, alloc_id: &mut dyn FnMut() -> Entity) -> SmallVec<[Entity; MAX_BUNDLE_COMPONENTS]> {
                let mut ids = SmallVec::new();
                $(
                    let type_id = TypeId::of::<$T>();
                    let assigned = match cache.lookup_type(type_id) {
                        Some(existing) => existing,
                        None => {
                            let fresh = alloc_id();
                            cache.register::<$T>(fresh)
                        }
                    };
                    ids.push(assigned);
                )*
                ids
            }

            #[allow(non_snake_case)]
            unsafe fn write_components(self, ptrs: &[*mut u8]) {
                let ($($T,)*) = self;
                let mut i = 0;
                $(
                    std::ptr::write(ptrs[i] as *mut $T, $T);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityKind;

    fn fake_entity(i: u32) -> Entity {
        Entity::from_raw_index(i, 0, EntityKind::Gen)
    }

    #[test]
    fn register_is_idempotent_by_type() {
        let mut cache = ComponentCache::new();
        let id = cache.register::<u32>(fake_entity(1));
        let id2 = cache.register::<u32>(fake_entity(2));
        assert_eq!(id, id2, "re-registration must reuse the cached entity");
    }

    #[test]
    fn trivial_type_has_no_dtor() {
        let mut cache = ComponentCache::new();
        let id = cache.register::<u32>(fake_entity(1));
        assert!(cache.get(id).unwrap().is_trivial());
    }

    #[test]
    fn non_trivial_type_has_dtor() {
        let mut cache = ComponentCache::new();
        let id = cache.register::<String>(fake_entity(1));
        assert!(!cache.get(id).unwrap().is_trivial());
    }

    #[test]
    fn bundle_type_ids_preserve_order() {
        let ids = <(u32, u64)>::type_ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], TypeId::of::<u32>());
        assert_eq!(ids[1], TypeId::of::<u64>());
    }
}
