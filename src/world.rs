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

//! The world: the single entry point that owns every other piece of
//! storage and exposes the external interface (spec §6) - entity
//! lifecycle, composition, component access, relationships, naming, and
//! queries.
//!
//! Archetype index 0 is always the empty archetype, created in [`World::new`].
//! Two built-in relations - `Is` (inheritance) and `ChildOf` (hierarchy) -
//! are spawned right after it, so `is_a`/`child_of` have a concrete entity
//! to pair against from the start.

use std::any::TypeId;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::archetype::{self, Archetype};
use crate::chunk_alloc::ChunkAllocator;
use crate::component::{Bundle, Component, ComponentCache, ComponentItem, MAX_BUNDLE_COMPONENTS};
use crate::entity_table::{EntityTable, Location};
use crate::error::{EcsError, Result};
use crate::gc;
use crate::id::{Entity, EntityKind, ENTITY_BAD};
use crate::limits::{DEFAULT_DEFRAG_ENTITIES_PER_TICK, MAX_COMPONENTS, MAX_IS_TRAVERSAL_DEPTH};
use crate::query::{Op, QueryEngine, Term};
use crate::relationship::{CleanupPolicy, NameIndex, RelationshipIndex, RuleIndex};

#[cfg(feature = "trace")]
use tracing::{debug, trace};

/// A list of terms plus an optional `group_by` relation, built with
/// [`QueryBuilder`] and run with [`World::each`]/[`World::count`]/
/// [`World::arr`]/[`World::grouped`] (spec §4.5 query compiler input).
#[derive(Clone, Debug, Default)]
pub struct QueryDesc {
    terms: Vec<Term>,
    group_by: Option<Entity>,
}

/// Builds a [`QueryDesc`] term by term (spec §6 query DSL).
#[derive(Default)]
pub struct QueryBuilder {
    terms: Vec<Term>,
    group_by: Option<Entity>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(mut self, id: Entity) -> Self {
        self.terms.push(Term::all(id));
        self
    }

    pub fn any(mut self, id: Entity) -> Self {
        self.terms.push(Term::any(id));
        self
    }

    pub fn no(mut self, id: Entity) -> Self {
        self.terms.push(Term::not(id));
        self
    }

    /// `All` term restricted to rows whose column changed since this exact
    /// query last ran (spec §4.6).
    pub fn changed(mut self, id: Entity) -> Self {
        self.terms.push(Term::all(id).track_changes());
        self
    }

    pub fn group_by(mut self, relation: Entity) -> Self {
        self.group_by = Some(relation);
        self
    }

    pub fn build(self) -> QueryDesc {
        QueryDesc {
            terms: self.terms,
            group_by: self.group_by,
        }
    }
}

pub struct World {
    entities: EntityTable,
    components: ComponentCache,
    archetypes: Vec<Archetype>,
    /// Archetype content hash -> every archetype index sharing that hash
    /// (collisions are resolved by comparing sorted id slices).
    archetype_index: FxHashMap<u64, SmallVec<[u32; 4]>>,
    alloc: ChunkAllocator,
    relationships: RelationshipIndex,
    rules: RuleIndex,
    names: NameIndex,
    queries: QueryEngine,
    tick: u64,
    /// Monotonic counter bumped on every `get_mut` call, independent of
    /// `tick` (which only advances on `progress`). Chunk column versions
    /// are stamped with this value so a changed-term query can tell which
    /// chunks were touched since it last ran (spec §4.6).
    change_tick: u64,
    defrag_budget: usize,
    is_relation: Entity,
    child_of_relation: Entity,
}

impl World {
    pub fn new() -> Self {
        let mut world = Self {
            entities: EntityTable::new(),
            components: ComponentCache::new(),
            archetypes: Vec::new(),
            archetype_index: FxHashMap::default(),
            alloc: ChunkAllocator::new(),
            relationships: RelationshipIndex::new(),
            rules: RuleIndex::new(),
            names: NameIndex::new(),
            queries: QueryEngine::new(),
            // Tick 0 is reserved so a freshly-created column's version (0)
            // never compares equal to a real "last observed" tick.
            tick: 1,
            change_tick: 1,
            defrag_budget: DEFAULT_DEFRAG_ENTITIES_PER_TICK,
            is_relation: ENTITY_BAD,
            child_of_relation: ENTITY_BAD,
        };

        let empty: SmallVec<[Entity; MAX_COMPONENTS]> = SmallVec::new();
        let idx = world.find_or_create_archetype(empty);
        debug_assert_eq!(idx, 0, "the empty archetype must be index 0");

        world.is_relation = world.spawn();
        world.child_of_relation = world.spawn();
        world
    }

    pub fn is_relation(&self) -> Entity {
        self.is_relation
    }

    pub fn child_of_relation(&self) -> Entity {
        self.child_of_relation
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn set_defrag_budget(&mut self, entities_per_tick: usize) {
        self.defrag_budget = entities_per_tick;
    }

    // -- archetype registry --------------------------------------------------

    fn find_or_create_archetype(&mut self, mut ids: SmallVec<[Entity; MAX_COMPONENTS]>) -> u32 {
        ids.sort_unstable();
        ids.dedup();
        let hash = archetype::content_hash(&ids);
        if let Some(bucket) = self.archetype_index.get(&hash) {
            for &idx in bucket {
                if self.archetypes[idx as usize].ids() == ids.as_slice() {
                    return idx;
                }
            }
        }
        let idx = self.archetypes.len() as u32;
        for &id in &ids {
            self.relationships.index_archetype_id(id, idx);
        }
        #[cfg(feature = "trace")]
        trace!(archetype = idx, len = ids.len(), "created archetype");
        self.archetypes.push(Archetype::new(ids));
        self.archetype_index.entry(hash).or_default().push(idx);
        idx
    }

    /// Resolves the destination archetype for a structural change from
    /// `from_idx` (whose sorted id list is `from_ids`) to `target_ids`,
    /// consulting and lazily materializing the archetype graph's `right`/
    /// `left` edges when the change is a single id add or remove (spec
    /// §4.4) - the common case for `add_id`/`remove_id`. Multi-id changes
    /// (e.g. a bundle insert, or an auto-added `Requires` dependency) have
    /// no single-edge representation and fall back to the hash lookup.
    fn resolve_transition(
        &mut self,
        from_idx: u32,
        from_ids: &[Entity],
        target_ids: SmallVec<[Entity; MAX_COMPONENTS]>,
    ) -> u32 {
        if target_ids.len() == from_ids.len() + 1 {
            if let Some(added) = target_ids.iter().find(|id| !from_ids.contains(id)).copied() {
                if let Some(to_idx) = self.archetypes[from_idx as usize].right_edge(added) {
                    return to_idx;
                }
                let to_idx = self.find_or_create_archetype(target_ids);
                self.archetypes[from_idx as usize].set_right_edge(added, to_idx);
                self.archetypes[to_idx as usize].set_left_edge(added, from_idx);
                return to_idx;
            }
        } else if from_ids.len() == target_ids.len() + 1 {
            if let Some(removed) = from_ids.iter().find(|id| !target_ids.contains(id)).copied() {
                if let Some(to_idx) = self.archetypes[from_idx as usize].left_edge(removed) {
                    return to_idx;
                }
                let to_idx = self.find_or_create_archetype(target_ids);
                self.archetypes[from_idx as usize].set_left_edge(removed, to_idx);
                self.archetypes[to_idx as usize].set_right_edge(removed, from_idx);
                return to_idx;
            }
        }
        self.find_or_create_archetype(target_ids)
    }

    /// Moves `entity` from its current archetype to the one whose id set is
    /// `target_ids` (creating it if needed), preserving every column common
    /// to both, destructing whatever is dropped, and leaving every id in
    /// `skip_construct` uninitialized for the caller to fill in (used by
    /// [`World::insert_bundle`] to avoid default-constructing a value the
    /// caller is about to overwrite anyway). Returns the new
    /// `(archetype, chunk, row)`.
    fn transition_to(
        &mut self,
        entity: Entity,
        mut target_ids: SmallVec<[Entity; MAX_COMPONENTS]>,
        skip_construct: &[Entity],
    ) -> (u32, usize, usize) {
        target_ids.sort_unstable();
        target_ids.dedup();

        let loc = self.entities.location(entity).expect("entity must be valid");
        let from_idx = loc.archetype;
        let from_ids: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[from_idx as usize].ids().into();

        if target_ids.as_slice() == from_ids.as_slice() {
            return (from_idx, loc.chunk as usize, loc.row as usize);
        }

        let to_idx = self.resolve_transition(from_idx, &from_ids, target_ids);
        let to_ids: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[to_idx as usize].ids().into();

        let to_items: SmallVec<[&ComponentItem; MAX_COMPONENTS]> = to_ids
            .iter()
            .map(|&id| self.components.get(id).expect("component metadata must exist"))
            .collect();

        let (dest_chunk_idx, dest_row) =
            self.archetypes[to_idx as usize].add_entity(entity, &to_items, &mut self.alloc);

        for (ci, &id) in to_ids.iter().enumerate() {
            let item = to_items[ci];
            if item.size == 0 {
                continue;
            }
            // A `Uni` column owns one slot shared by the whole destination
            // chunk; once an earlier entity has constructed or moved a
            // value into it, later entities joining the same chunk must
            // leave it alone rather than re-constructing over a live value.
            let uni_already_set = id.kind() == EntityKind::Uni && dest_row > 0;
            if uni_already_set {
                continue;
            }
            if let Some(src_ci) = from_ids.iter().position(|&x| x == id) {
                let dest_chunk = self.archetypes[to_idx as usize].chunk(dest_chunk_idx);
                let src_chunk = self.archetypes[from_idx as usize].chunk(loc.chunk as usize);
                unsafe { dest_chunk.move_component_from(ci, dest_row, src_chunk, src_ci, loc.row as usize, item) };
            } else if !skip_construct.contains(&id) {
                let dest_chunk = self.archetypes[to_idx as usize].chunk(dest_chunk_idx);
                let ptr = unsafe { dest_chunk.component_ptr(ci, dest_row) };
                unsafe { item.construct(ptr) };
            }
        }

        let from_items: SmallVec<[&ComponentItem; MAX_COMPONENTS]> = from_ids
            .iter()
            .map(|&id| self.components.get(id).expect("component metadata must exist"))
            .collect();
        for (ci, &id) in from_ids.iter().enumerate() {
            if to_ids.contains(&id) {
                continue;
            }
            let item = from_items[ci];
            if item.size == 0 {
                continue;
            }
            let src_chunk = self.archetypes[from_idx as usize].chunk(loc.chunk as usize);
            let ptr = unsafe { src_chunk.component_ptr(ci, loc.row as usize) };
            unsafe { item.destruct(ptr) };
        }

        let swapped = self.archetypes[from_idx as usize]
            .chunk_mut(loc.chunk as usize)
            .remove_entity_no_destruct(loc.row as usize);
        if let Some(swapped) = swapped {
            self.entities.set_row(swapped, loc.row);
        }
        self.archetypes[from_idx as usize].dec_entity_count();

        self.entities.set_location(
            entity,
            Location {
                archetype: to_idx,
                chunk: dest_chunk_idx as u32,
                row: dest_row as u32,
            },
        );

        (to_idx, dest_chunk_idx, dest_row)
    }

    // -- entity lifecycle (spec §6) -------------------------------------------

    /// Spawns a bare entity into the empty archetype.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.entities.allocate(EntityKind::Gen);
        let (chunk, row) = self.archetypes[0].add_entity(entity, &[], &mut self.alloc);
        self.entities.set_location(
            entity,
            Location {
                archetype: 0,
                chunk: chunk as u32,
                row: row as u32,
            },
        );
        entity
    }

    pub fn spawn_n(&mut self, n: usize) -> Vec<Entity> {
        (0..n).map(|_| self.spawn()).collect()
    }

    /// Spawns an entity and immediately attaches every component in
    /// `bundle` in a single archetype transition.
    pub fn spawn_bundle<B: Bundle>(&mut self, bundle: B) -> Entity {
        let entity = self.spawn();
        self.insert_bundle(entity, bundle);
        entity
    }

    /// Attaches every component in `bundle` to an already-live `entity` in
    /// one archetype transition.
    pub fn insert_bundle<B: Bundle>(&mut self, entity: Entity, bundle: B) {
        debug_assert!(self.entities.is_valid(entity));

        let component_ids = {
            let World {
                entities,
                archetypes,
                alloc,
                components,
                ..
            } = self;
            B::register_components(components, &mut || {
                let e = entities.allocate(EntityKind::Gen);
                let (chunk, row) = archetypes[0].add_entity(e, &[], alloc);
                entities.set_location(
                    e,
                    Location {
                        archetype: 0,
                        chunk: chunk as u32,
                        row: row as u32,
                    },
                );
                e
            })
        };

        let loc = self.entities.location(entity).expect("entity must be valid");
        let mut target: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[loc.archetype as usize].ids().into();
        for &id in &component_ids {
            if !target.contains(&id) {
                target.push(id);
            }
        }

        let (to_arch, to_chunk, to_row) = self.transition_to(entity, target, &component_ids);

        let archetype = &self.archetypes[to_arch as usize];
        let ptrs: SmallVec<[*mut u8; MAX_BUNDLE_COMPONENTS]> = component_ids
            .iter()
            .map(|&id| {
                let col = archetype
                    .column_of(id)
                    .expect("bundle component must be present after transition");
                let chunk = archetype.chunk(to_chunk);
                unsafe { chunk.component_ptr(col, to_row) }
            })
            .collect();
        unsafe { bundle.write_components(&ptrs) };
    }

    /// Duplicates `entity`: same archetype, every value cloned via its
    /// registered clone (or, if none was registered, duplicated by raw byte
    /// copy - sound only for trivial types, see [`ComponentItem::copy_value`]).
    pub fn copy(&mut self, entity: Entity) -> Result<Entity> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity);
        }
        let loc = self.entities.location(entity).unwrap();
        let kind = self.entities.kind(entity).unwrap();
        let new_entity = self.entities.allocate(kind);

        let ids: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[loc.archetype as usize].ids().into();
        let items: SmallVec<[&ComponentItem; MAX_COMPONENTS]> = ids
            .iter()
            .map(|&id| self.components.get(id).expect("component metadata must exist"))
            .collect();

        let (chunk_idx, row) = self.archetypes[loc.archetype as usize].add_entity(new_entity, &items, &mut self.alloc);

        for (ci, item) in items.iter().enumerate() {
            if item.size == 0 {
                continue;
            }
            debug_assert!(
                item.has_copy() || item.is_trivial(),
                "component {} has no registered clone; duplicating it by raw copy risks a double free - register one with ComponentCache::with_copy",
                item.name
            );
            let archetype = &self.archetypes[loc.archetype as usize];
            let src_chunk = archetype.chunk(loc.chunk as usize);
            let dst_chunk = archetype.chunk(chunk_idx);
            let src_ptr = unsafe { src_chunk.component_ptr(ci, loc.row as usize) } as *const u8;
            let dst_ptr = unsafe { dst_chunk.component_ptr(ci, row) };
            unsafe { item.copy_value(src_ptr, dst_ptr) };
        }

        self.entities.set_location(
            new_entity,
            Location {
                archetype: loc.archetype,
                chunk: chunk_idx as u32,
                row: row as u32,
            },
        );
        Ok(new_entity)
    }

    pub fn copy_n(&mut self, entity: Entity, n: usize) -> Result<Vec<Entity>> {
        (0..n).map(|_| self.copy(entity)).collect()
    }

    pub fn valid(&self, entity: Entity) -> bool {
        self.entities.is_valid(entity)
    }

    pub fn enable(&mut self, entity: Entity, enabled: bool) -> Result<()> {
        let loc = self.entities.location(entity).ok_or(EcsError::InvalidEntity)?;
        let chunk = self.archetypes[loc.archetype as usize].chunk_mut(loc.chunk as usize);
        if chunk.is_enabled(loc.row as usize) == enabled {
            return Ok(());
        }
        let new_row = chunk.set_enabled(loc.row as usize, enabled);
        let other = chunk.entity_at(loc.row as usize);
        self.entities.set_row(entity, new_row as u32);
        if other != entity {
            self.entities.set_row(other, loc.row);
        }
        Ok(())
    }

    pub fn enabled(&self, entity: Entity) -> bool {
        match self.entities.location(entity) {
            Some(loc) => self.archetypes[loc.archetype as usize]
                .chunk(loc.chunk as usize)
                .is_enabled(loc.row as usize),
            None => false,
        }
    }

    /// Finds every live entity carrying the exact (non-wildcard) id `id`,
    /// used by `despawn`'s cleanup-rule cascade.
    fn entities_with_id(&self, id: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        for arch_idx in self.relationships.archetypes_for(id) {
            let archetype = &self.archetypes[arch_idx as usize];
            for chunk in archetype.chunks() {
                out.extend_from_slice(&chunk.entities()[..chunk.enabled_count() as usize]);
            }
        }
        out
    }

    /// Deletes `entity`, applying every `(OnDelete, policy)` rule registered
    /// against a relation that targets it (spec §6 `del`). `Error` aborts
    /// immediately; note this does not roll back any `Remove`/`Delete`
    /// cascade already applied for a relation processed earlier in the same
    /// call, matching the "no total cascade order guaranteed" decision in
    /// SPEC_FULL.md §4.
    pub fn despawn(&mut self, entity: Entity) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity);
        }

        for relation in self.relationships.relations_targeting(entity).collect::<Vec<_>>() {
            let pair = Entity::new_pair(relation, entity);
            match self.rules.on_delete(relation) {
                CleanupPolicy::Error => return Err(EcsError::CleanupRuleViolation),
                CleanupPolicy::Remove => {
                    for holder in self.entities_with_id(pair) {
                        if holder != entity {
                            let _ = self.remove_id(holder, pair);
                        }
                    }
                }
                CleanupPolicy::Delete => {
                    for holder in self.entities_with_id(pair) {
                        if holder != entity && self.entities.is_valid(holder) {
                            let _ = self.despawn(holder);
                        }
                    }
                }
            }
        }

        for parent in self.relationships.direct_parents(entity).to_vec() {
            self.relationships.remove_is(entity, parent);
        }
        for child in self.relationships.direct_children(entity).to_vec() {
            self.relationships.remove_is(child, entity);
        }
        self.names.remove(entity);

        let loc = self.entities.location(entity).unwrap();
        let items: SmallVec<[&ComponentItem; MAX_COMPONENTS]> = self.archetypes[loc.archetype as usize]
            .ids()
            .iter()
            .map(|&id| self.components.get(id).expect("component metadata must exist"))
            .collect();
        let (swapped, _now_empty) =
            self.archetypes[loc.archetype as usize].remove_entity(loc.chunk as usize, loc.row as usize, &items);
        if let Some(swapped) = swapped {
            self.entities.set_row(swapped, loc.row);
        }
        self.entities.deallocate(entity);
        #[cfg(feature = "trace")]
        debug!(?entity, "despawned");
        Ok(())
    }

    // -- composition (spec §6) -------------------------------------------------

    pub fn has(&self, entity: Entity, id: Entity) -> bool {
        self.entities
            .location(entity)
            .is_some_and(|loc| self.archetypes[loc.archetype as usize].has_id(id))
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        match self.components.lookup_type(TypeId::of::<T>()) {
            Some(id) => self.has(entity, id),
            None => false,
        }
    }

    /// The id `T` was registered under, if any entity has carried it yet.
    pub fn component_id<T: Component>(&self) -> Option<Entity> {
        self.components.lookup_type(TypeId::of::<T>())
    }

    /// Attaches a tag, relation, or pair id carrying no payload. Idempotent.
    pub fn add_id(&mut self, entity: Entity, id: Entity) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity);
        }
        self.components.register_tag(id);
        let loc = self.entities.location(entity).unwrap();
        if self.archetypes[loc.archetype as usize].has_id(id) {
            return Ok(());
        }

        let mut target: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[loc.archetype as usize].ids().into();

        if id.is_pair() && !id.is_wildcard() {
            let relation = id.pair_first();
            if self.rules.is_exclusive(relation) && target.iter().any(|x| x.is_pair() && x.pair_first() == relation) {
                return Err(EcsError::ExclusiveViolation);
            }
        }

        target.push(id);
        for &dep in self.rules.requirements_of(id).to_vec().iter() {
            if !target.contains(&dep) {
                self.components.register_tag(dep);
                target.push(dep);
            }
        }
        target.sort_unstable();
        target.dedup();

        if self.rules.violates_cant_combine(&target) {
            return Err(EcsError::CantCombineViolation);
        }

        self.transition_to(entity, target, &[]);

        if id.is_pair() && !id.is_wildcard() && id.pair_first() == self.is_relation {
            self.relationships.record_is(entity, id.pair_second());
        }
        Ok(())
    }

    /// Removes an id, failing if another id still present on the entity
    /// `Requires` it (spec's `RequiredDependency` error).
    pub fn remove_id(&mut self, entity: Entity, id: Entity) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity);
        }
        let loc = self.entities.location(entity).unwrap();
        if !self.archetypes[loc.archetype as usize].has_id(id) {
            return Err(EcsError::ComponentNotFound);
        }
        for dependent in self.rules.dependents_of(id).collect::<Vec<_>>() {
            if self.archetypes[loc.archetype as usize].has_id(dependent) {
                return Err(EcsError::RequiredDependency);
            }
        }

        let mut target: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[loc.archetype as usize].ids().into();
        target.retain(|&x| x != id);

        if id.is_pair() && !id.is_wildcard() && id.pair_first() == self.is_relation {
            self.relationships.remove_is(entity, id.pair_second());
        }

        self.transition_to(entity, target, &[]);
        Ok(())
    }

    pub fn add_is_a(&mut self, child: Entity, parent: Entity) -> Result<()> {
        self.add_id(child, Entity::new_pair(self.is_relation, parent))
    }

    pub fn add_child_of(&mut self, child: Entity, parent: Entity) -> Result<()> {
        self.add_id(child, Entity::new_pair(self.child_of_relation, parent))
    }

    pub fn is_a(&self, child: Entity) -> &[Entity] {
        self.relationships.direct_parents(child)
    }

    pub fn children_of(&self, parent: Entity) -> &[Entity] {
        self.relationships.direct_children(parent)
    }

    pub fn target(&self, entity: Entity, relation: Entity) -> Option<Entity> {
        let loc = self.entities.location(entity)?;
        self.archetypes[loc.archetype as usize]
            .ids()
            .iter()
            .find(|id| id.is_pair() && id.pair_first() == relation)
            .map(|id| id.pair_second())
    }

    pub fn targets(&self, entity: Entity, relation: Entity) -> Vec<Entity> {
        let Some(loc) = self.entities.location(entity) else {
            return Vec::new();
        };
        self.archetypes[loc.archetype as usize]
            .ids()
            .iter()
            .filter(|id| id.is_pair() && id.pair_first() == relation)
            .map(|id| id.pair_second())
            .collect()
    }

    pub fn relations(&self, entity: Entity, target: Entity) -> Vec<Entity> {
        let Some(loc) = self.entities.location(entity) else {
            return Vec::new();
        };
        self.archetypes[loc.archetype as usize]
            .ids()
            .iter()
            .filter(|id| id.is_pair() && id.pair_second() == target)
            .map(|id| id.pair_first())
            .collect()
    }

    /// `relation(e, target)`: any one relation id for which `(relation,
    /// target)` is present on `e`, or `None` if there isn't one.
    pub fn relation(&self, entity: Entity, target: Entity) -> Option<Entity> {
        self.relations(entity, target).into_iter().next()
    }

    /// `is(e, base)`: whether `e` directly carries `(Is, base)`.
    pub fn is(&self, entity: Entity, base: Entity) -> bool {
        self.is_a(entity).contains(&base)
    }

    /// `in(e, base)`: whether `e` directly carries `(ChildOf, base)`. Named
    /// `is_in` here since `in` is a Rust keyword.
    pub fn is_in(&self, entity: Entity, base: Entity) -> bool {
        self.children_of(base).contains(&entity)
    }

    /// `as_relations_trav(target, fn)`: calls `f` with every relation id for
    /// which `(relation, target)` is present on `entity`.
    pub fn as_relations_trav<F: FnMut(Entity)>(&self, entity: Entity, target: Entity, mut f: F) {
        for relation in self.relations(entity, target) {
            f(relation);
        }
    }

    /// `as_targets_trav(rel, fn)`: calls `f` with every target for which
    /// `(rel, target)` is present on `entity`.
    pub fn as_targets_trav<F: FnMut(Entity)>(&self, entity: Entity, relation: Entity, mut f: F) {
        for target in self.targets(entity, relation) {
            f(target);
        }
    }

    pub fn add_requires(&mut self, id: Entity, dependency: Entity) {
        self.rules.add_requires(id, dependency);
    }

    pub fn mark_exclusive(&mut self, relation: Entity) {
        self.rules.mark_exclusive(relation);
    }

    pub fn add_cant_combine(&mut self, a: Entity, b: Entity) {
        self.rules.add_cant_combine(a, b);
    }

    pub fn set_on_delete(&mut self, relation: Entity, policy: CleanupPolicy) {
        self.rules.set_on_delete(relation, policy);
    }

    // -- typed component access (spec §6) -------------------------------------

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.components.lookup_type(TypeId::of::<T>())?;
        let loc = self.entities.location(entity)?;
        let archetype = &self.archetypes[loc.archetype as usize];
        let col = archetype.column_of(id)?;
        let chunk = archetype.chunk(loc.chunk as usize);
        unsafe { Some(&*(chunk.component_ptr(col, loc.row as usize) as *const T)) }
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.components.lookup_type(TypeId::of::<T>())?;
        let loc = self.entities.location(entity)?;
        self.change_tick += 1;
        let stamp = self.change_tick;
        let archetype = &mut self.archetypes[loc.archetype as usize];
        let col = archetype.column_of(id)?;
        let chunk = archetype.chunk_mut(loc.chunk as usize);
        chunk.bump_version(col, stamp);
        unsafe { Some(&mut *(chunk.component_ptr(col, loc.row as usize) as *mut T)) }
    }

    /// Sets `entity`'s `T` value, attaching the component first if it isn't
    /// already present.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity);
        }
        if let Some(slot) = self.get_mut::<T>(entity) {
            *slot = value;
            return Ok(());
        }
        self.insert_bundle(entity, (value,));
        Ok(())
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<()> {
        let id = self
            .components
            .lookup_type(TypeId::of::<T>())
            .ok_or(EcsError::ComponentNotFound)?;
        self.remove_id(entity, id)
    }

    // -- naming (spec §6) -------------------------------------------------------

    pub fn set_name(&mut self, entity: Entity, name: &str) -> Result<()> {
        if !self.entities.is_valid(entity) {
            return Err(EcsError::InvalidEntity);
        }
        self.names.set(entity, name);
        Ok(())
    }

    /// `name_raw(entity, str)`: the non-copying variant of [`Self::set_name`].
    /// Rust's ownership model means there is no separate "raw pointer" name
    /// storage to offer here - both operations end up allocating the same
    /// owned string - so this exists only for API parity with spec.md.
    pub fn name_raw(&mut self, entity: Entity, name: &str) -> Result<()> {
        self.set_name(entity, name)
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.names.name_of(entity)
    }

    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.names.lookup(name)
    }

    // -- queries (spec §6, §4.5, §4.6) ------------------------------------------

    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// `target` plus every id that is-a `target`, directly or transitively,
    /// found by walking `Is`-children breadth-first and bounded by
    /// [`MAX_IS_TRAVERSAL_DEPTH`] (spec §9 "Wildcard/IS traversal").
    fn is_a_closure(&self, target: Entity) -> SmallVec<[Entity; 8]> {
        let mut visited: SmallVec<[Entity; 8]> = SmallVec::new();
        visited.push(target);
        let mut frontier = vec![target];
        let mut depth = 0;
        while !frontier.is_empty() && depth < MAX_IS_TRAVERSAL_DEPTH {
            let mut next = Vec::new();
            for node in frontier {
                for &child in self.relationships.direct_children(node) {
                    if !visited.contains(&child) {
                        visited.push(child);
                        next.push(child);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        visited
    }

    /// Rewrites every `All((Is, target))` term into an `Any` clause over
    /// `target`'s transitive `Is`-closure, as both a plain id and an
    /// `(Is, s)` pair - this is what makes e.g. an entity tagged with a
    /// `Wolf` component match a query for `(Is, Animal)` when `Wolf` is-a
    /// `Carnivore` is-a `Animal`. Only one such term per query is supported:
    /// it shares the query's single `Any` bucket, so combining it with a
    /// genuine `Any` term in the same query would conflate their semantics.
    fn resolve_is_terms(&self, terms: &[Term]) -> Vec<Term> {
        let mut out = Vec::with_capacity(terms.len());
        for &t in terms {
            if t.op == Op::All && t.id.is_pair() && !t.id.is_wildcard() && t.id.pair_first() == self.is_relation {
                for s in self.is_a_closure(t.id.pair_second()) {
                    out.push(Term::any(s));
                    out.push(Term::any(Entity::new_pair(self.is_relation, s)));
                }
            } else {
                out.push(t);
            }
        }
        out
    }

    pub fn each<F: FnMut(Entity)>(&mut self, desc: &QueryDesc, mut f: F) {
        let terms = self.resolve_is_terms(&desc.terms);
        let (matched, observed_until, changed_ids): (Vec<u32>, u64, Vec<Entity>) = {
            let cached = self.queries.run(&terms, desc.group_by, &self.archetypes, &self.relationships);
            let changed_ids: Vec<Entity> = cached.changed_terms().map(|t| t.id).collect();
            (cached.matched.clone(), cached.last_tick, changed_ids)
        };

        for arch_idx in matched {
            let archetype = &self.archetypes[arch_idx as usize];
            // `last_tick == 0` means this exact query has never completed a
            // run before - there is nothing yet to compare against, so the
            // first run always reports every matching row as a baseline.
            let changed_cols: SmallVec<[usize; 4]> = if observed_until == 0 {
                SmallVec::new()
            } else {
                changed_ids.iter().filter_map(|&id| archetype.column_of(id)).collect()
            };
            for chunk in archetype.chunks() {
                if !changed_cols.is_empty() && !changed_cols.iter().any(|&c| chunk.version_of(c) > observed_until) {
                    continue;
                }
                // Locked for the duration of iteration (spec §5): any
                // structural change the functor tried to make on this chunk
                // would be a programming error, caught by the mutators'
                // `debug_assert!(!self.is_locked())`.
                chunk.lock();
                for row in 0..chunk.enabled_count() as usize {
                    f(chunk.entity_at(row));
                }
                chunk.unlock();
            }
        }

        self.queries.advance_tick(&terms, desc.group_by, self.change_tick);
    }

    pub fn count(&mut self, desc: &QueryDesc) -> usize {
        let mut n = 0usize;
        self.each(desc, |_| n += 1);
        n
    }

    pub fn empty(&mut self, desc: &QueryDesc) -> bool {
        let mut any = false;
        self.each(desc, |_| any = true);
        !any
    }

    pub fn arr(&mut self, desc: &QueryDesc) -> Vec<Entity> {
        let mut out = Vec::new();
        self.each(desc, |e| out.push(e));
        out
    }

    /// Runs `desc` and groups the matches by the target of `desc`'s
    /// `group_by` relation (spec §6 `group_by`).
    pub fn grouped(&mut self, desc: &QueryDesc) -> FxHashMap<Entity, Vec<Entity>> {
        let terms = self.resolve_is_terms(&desc.terms);
        self.queries.run(&terms, desc.group_by, &self.archetypes, &self.relationships);
        let hash = self.queries.hash_for(&terms, desc.group_by);
        let by_archetype = self.queries.grouped(hash, &self.archetypes);

        let mut out: FxHashMap<Entity, Vec<Entity>> = FxHashMap::default();
        for (key, arch_indices) in by_archetype {
            let bucket = out.entry(key).or_default();
            for idx in arch_indices {
                for chunk in self.archetypes[idx as usize].chunks() {
                    bucket.extend_from_slice(&chunk.entities()[..chunk.enabled_count() as usize]);
                }
            }
        }
        out
    }

    // -- ticking / GC (spec §4.7) ------------------------------------------------

    /// Advances one tick: sweeps GC-pending chunks/archetypes, reconciles
    /// every index keyed by archetype position if any archetype was
    /// destroyed (a `swap_remove` reshuffles indices), then runs a bounded
    /// defragmentation pass.
    pub fn progress(&mut self) {
        self.tick += 1;

        let destroyed = gc::sweep_archetypes(&mut self.archetypes, &mut self.alloc);
        if !destroyed.is_empty() {
            #[cfg(feature = "trace")]
            debug!(count = destroyed.len(), "gc destroyed archetypes");
            for archetype in &mut self.archetypes {
                archetype.clear_graph_edges();
            }
            self.rebuild_indices();
            self.queries.invalidate_all();
        }

        self.defragment();
    }

    /// Rebuilds every index keyed by archetype *position* (the registry and
    /// the relationship index's archetype-membership maps) from scratch.
    /// `Is`-inheritance, dependency/exclusive rules, and names are all keyed
    /// by entity, not archetype index, so they survive untouched.
    fn rebuild_indices(&mut self) {
        self.archetype_index.clear();
        self.relationships.clear_archetype_membership();
        for (idx, archetype) in self.archetypes.iter().enumerate() {
            let hash = archetype.content_hash();
            self.archetype_index.entry(hash).or_default().push(idx as u32);
            for &id in archetype.ids() {
                self.relationships.index_archetype_id(id, idx as u32);
            }
        }
    }

    /// Moves up to `defrag_budget` entities out of the sparsest semi-full
    /// chunk of each archetype into its densest semi-full chunk, one
    /// archetype at a time. Disabled rows are left in place (an unspecified
    /// ordering question: this implementation only ever relocates enabled
    /// rows, see `Archetype::defrag_step`).
    fn defragment(&mut self) {
        let mut budget = self.defrag_budget;
        for idx in 0..self.archetypes.len() {
            if budget == 0 {
                break;
            }
            let ids: SmallVec<[Entity; MAX_COMPONENTS]> = self.archetypes[idx].ids().into();
            let items: SmallVec<[&ComponentItem; MAX_COMPONENTS]> = ids
                .iter()
                .map(|&id| self.components.get(id).expect("component metadata must exist"))
                .collect();
            while budget > 0 {
                let Some((entity, _from_chunk, to_chunk, to_row)) = self.archetypes[idx].defrag_step(&items) else {
                    break;
                };
                self.entities.set_location(
                    entity,
                    Location {
                        archetype: idx as u32,
                        chunk: to_chunk as u32,
                        row: to_row as u32,
                    },
                );
                budget -= 1;
            }
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Clone, Copy)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, PartialEq, Clone, Copy)]
    struct Velocity {
        x: f32,
    }

    #[test]
    fn spawn_and_despawn_round_trip() {
        let mut world = World::new();
        let e = world.spawn_bundle((Position { x: 1.0, y: 2.0 },));
        assert!(world.valid(e));
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        world.despawn(e).unwrap();
        assert!(!world.valid(e));
        assert!(world.despawn(e).is_err());
    }

    #[test]
    fn adding_a_component_moves_entity_to_a_new_archetype() {
        let mut world = World::new();
        let e = world.spawn_bundle((Position { x: 0.0, y: 0.0 },));
        world.set(e, Velocity { x: 1.0 }).unwrap();
        assert!(world.has_component::<Velocity>(e));
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 0.0, y: 0.0 }));
    }

    #[test]
    fn removing_a_component_preserves_the_rest() {
        let mut world = World::new();
        let e = world.spawn_bundle((Position { x: 3.0, y: 4.0 }, Velocity { x: 9.0 }));
        world.remove_component::<Velocity>(e).unwrap();
        assert!(!world.has_component::<Velocity>(e));
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 3.0, y: 4.0 }));
    }

    #[test]
    fn swap_remove_preserves_the_moved_entity_data() {
        let mut world = World::new();
        let a = world.spawn_bundle((Position { x: 1.0, y: 1.0 },));
        let b = world.spawn_bundle((Position { x: 2.0, y: 2.0 },));
        world.despawn(a).unwrap();
        assert_eq!(world.get::<Position>(b), Some(&Position { x: 2.0, y: 2.0 }));
    }

    #[test]
    fn query_matches_entities_across_archetypes() {
        let mut world = World::new();
        world.spawn_bundle((Position { x: 0.0, y: 0.0 },));
        world.spawn_bundle((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0 }));
        let pos_id = world.components.lookup_type(TypeId::of::<Position>()).unwrap();
        let q = world.query().all(pos_id).build();
        assert_eq!(world.count(&q), 2);
    }

    #[test]
    fn is_a_relation_is_queryable_via_wildcard() {
        let mut world = World::new();
        let base = world.spawn();
        let derived = world.spawn();
        world.add_is_a(derived, base).unwrap();
        assert_eq!(world.is_a(derived), &[base]);

        let is_rel = world.is_relation();
        let q = world.query().all(Entity::pair_with_wildcard_target(is_rel)).build();
        let matched = world.arr(&q);
        assert!(matched.contains(&derived));
    }

    #[test]
    fn requires_rule_auto_adds_the_dependency() {
        let mut world = World::new();
        let x = world.spawn();
        let y = world.spawn();
        world.add_requires(x, y);
        let e = world.spawn();
        world.add_id(e, x).unwrap();
        assert!(world.has(e, y));
    }

    #[test]
    fn cant_combine_rule_rejects_the_conflicting_id() {
        let mut world = World::new();
        let a = world.spawn();
        let b = world.spawn();
        world.add_cant_combine(a, b);
        let e = world.spawn();
        world.add_id(e, a).unwrap();
        assert_eq!(world.add_id(e, b), Err(EcsError::CantCombineViolation));
    }

    #[test]
    fn deleting_a_target_removes_the_pair_by_default() {
        let mut world = World::new();
        let likes = world.spawn();
        let alice = world.spawn();
        let bob = world.spawn();
        world.add_id(bob, Entity::new_pair(likes, alice)).unwrap();

        world.despawn(alice).unwrap();
        assert!(!world.has(bob, Entity::new_pair(likes, alice)));
        assert!(world.valid(bob));
    }

    #[test]
    fn on_delete_cascade_despawns_dependents() {
        let mut world = World::new();
        let child_of = world.child_of_relation();
        world.set_on_delete(child_of, CleanupPolicy::Delete);
        let parent = world.spawn();
        let child = world.spawn();
        world.add_child_of(child, parent).unwrap();
        world.despawn(parent).unwrap();
        assert!(!world.valid(child));
    }

    #[test]
    fn progress_reclaims_empty_archetypes_eventually() {
        let mut world = World::new();
        let e = world.spawn_bundle((Position { x: 0.0, y: 0.0 },));
        let populated = world.archetype_count();
        world.despawn(e).unwrap();
        for _ in 0..32 {
            world.progress();
        }
        assert!(world.archetype_count() < populated || populated == 1);
    }
}
