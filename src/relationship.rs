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

//! Secondary indices the world keeps alongside the archetype graph:
//! relationship/wildcard lookups, `Is` inheritance, dependency/combination
//! rules, and name lookup (spec §3 "Relationship pairs", §9 supplemented
//! features).

use ahash::AHashSet;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::id::Entity;

/// Per-id archetype membership plus the relationship/inheritance indices
/// derived from it.
#[derive(Default)]
pub struct RelationshipIndex {
    /// id (component, relation, target, or a synthetic wildcard pair) ->
    /// archetypes containing a matching id. Lets a query term with a
    /// wildcard source jump straight to candidates instead of scanning
    /// every archetype.
    archetypes_by_id: FxHashMap<u64, AHashSet<u32>>,

    /// target -> relations that have been used to point at it.
    target_to_relations: FxHashMap<Entity, AHashSet<Entity>>,
    /// relation -> targets it has been used with.
    relation_to_targets: FxHashMap<Entity, AHashSet<Entity>>,

    /// child -> parents via `Is(child, parent)`.
    is_parents: FxHashMap<Entity, SmallVec<[Entity; 4]>>,
    /// parent -> children via `Is(child, parent)`.
    is_children: FxHashMap<Entity, SmallVec<[Entity; 4]>>,
}

impl RelationshipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `archetype` carries `id` (and, if `id` is a concrete
    /// pair, its wildcard generalizations).
    pub fn index_archetype_id(&mut self, id: Entity, archetype: u32) {
        self.archetypes_by_id
            .entry(id.bits())
            .or_default()
            .insert(archetype);

        if id.is_pair() && !id.is_wildcard() {
            let relation = id.pair_first();
            let target = id.pair_second();

            self.archetypes_by_id
                .entry(Entity::pair_with_wildcard_target(relation).bits())
                .or_default()
                .insert(archetype);
            self.archetypes_by_id
                .entry(Entity::pair_with_wildcard_relation(target).bits())
                .or_default()
                .insert(archetype);
            self.archetypes_by_id
                .entry(Entity::any_pair().bits())
                .or_default()
                .insert(archetype);

            self.target_to_relations
                .entry(target)
                .or_default()
                .insert(relation);
            self.relation_to_targets
                .entry(relation)
                .or_default()
                .insert(target);
        }
    }

    pub fn remove_archetype(&mut self, id: Entity, archetype: u32) {
        if let Some(set) = self.archetypes_by_id.get_mut(&id.bits()) {
            set.remove(&archetype);
        }
    }

    /// Clears every archetype-membership map (but not `Is` inheritance,
    /// which is keyed by entity, not archetype index). Called after the GC
    /// destroys archetypes and reshuffles indices via `swap_remove`; the
    /// caller repopulates by calling [`Self::index_archetype_id`] again for
    /// every surviving archetype (spec §4.7).
    pub fn clear_archetype_membership(&mut self) {
        self.archetypes_by_id.clear();
        self.target_to_relations.clear();
        self.relation_to_targets.clear();
    }

    /// Archetypes that carry an id matching `term_id`, which may itself be
    /// a wildcard pair.
    pub fn archetypes_for(&self, term_id: Entity) -> impl Iterator<Item = u32> + '_ {
        self.archetypes_by_id
            .get(&term_id.bits())
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn relations_targeting(&self, target: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.target_to_relations
            .get(&target)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn targets_of(&self, relation: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.relation_to_targets
            .get(&relation)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    // -- Is inheritance -----------------------------------------------------

    pub fn record_is(&mut self, child: Entity, parent: Entity) {
        let parents = self.is_parents.entry(child).or_default();
        if !parents.contains(&parent) {
            parents.push(parent);
        }
        let children = self.is_children.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    pub fn remove_is(&mut self, child: Entity, parent: Entity) {
        if let Some(v) = self.is_parents.get_mut(&child) {
            v.retain(|&p| p != parent);
        }
        if let Some(v) = self.is_children.get_mut(&parent) {
            v.retain(|&c| c != child);
        }
    }

    pub fn direct_parents(&self, child: Entity) -> &[Entity] {
        self.is_parents
            .get(&child)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn direct_children(&self, parent: Entity) -> &[Entity] {
        self.is_children
            .get(&parent)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// What happens to a relationship pair `(relation, target)` when `target`
/// is deleted (spec §6 `del(entity)` cleanup rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Strip the pair from the entities that hold it (default).
    #[default]
    Remove,
    /// Delete the entities that hold the pair too (cascades).
    Delete,
    /// Reject the deletion of `target` outright.
    Error,
}

/// Dependency/combination rules attached to ids via `Requires`, `Exclusive`,
/// `CantCombine` (spec §9 supplemented features).
#[derive(Default)]
pub struct RuleIndex {
    requires: FxHashMap<Entity, SmallVec<[Entity; 4]>>,
    exclusive: AHashSet<Entity>,
    cant_combine: FxHashMap<Entity, SmallVec<[Entity; 4]>>,
    on_delete: FxHashMap<Entity, CleanupPolicy>,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_delete(&mut self, relation: Entity, policy: CleanupPolicy) {
        self.on_delete.insert(relation, policy);
    }

    pub fn on_delete(&self, relation: Entity) -> CleanupPolicy {
        self.on_delete.get(&relation).copied().unwrap_or_default()
    }

    pub fn add_requires(&mut self, id: Entity, dependency: Entity) {
        let deps = self.requires.entry(id).or_default();
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    pub fn requirements_of(&self, id: Entity) -> &[Entity] {
        self.requires.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Any id in `requires` that depends on `dependency`, used to reject
    /// removing `dependency` while it is still required (spec's
    /// `RequiredDependency` error).
    pub fn dependents_of<'a>(&'a self, dependency: Entity) -> impl Iterator<Item = Entity> + 'a {
        self.requires
            .iter()
            .filter(move |(_, deps)| deps.contains(&dependency))
            .map(|(&id, _)| id)
    }

    pub fn mark_exclusive(&mut self, relation: Entity) {
        self.exclusive.insert(relation);
    }

    pub fn is_exclusive(&self, relation: Entity) -> bool {
        self.exclusive.contains(&relation)
    }

    pub fn add_cant_combine(&mut self, a: Entity, b: Entity) {
        self.cant_combine.entry(a).or_default().push(b);
        self.cant_combine.entry(b).or_default().push(a);
    }

    pub fn cant_combine_with(&self, id: Entity) -> &[Entity] {
        self.cant_combine
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// True if `ids` (already sorted, as an archetype id list is) contains
    /// two ids that have been declared unable to combine.
    pub fn violates_cant_combine(&self, ids: &[Entity]) -> bool {
        for &id in ids {
            for &forbidden in self.cant_combine_with(id) {
                if ids.binary_search(&forbidden).is_ok() {
                    return true;
                }
            }
        }
        false
    }
}

/// Bidirectional name <-> entity lookup (spec §6 `name`/`get(str)`).
#[derive(Default)]
pub struct NameIndex {
    by_name: FxHashMap<Box<str>, Entity>,
    by_entity: FxHashMap<Entity, Box<str>>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, entity: Entity, name: &str) {
        if let Some(old) = self.by_entity.remove(&entity) {
            self.by_name.remove(&old);
        }
        self.by_name.insert(name.into(), entity);
        self.by_entity.insert(entity, name.into());
    }

    pub fn remove(&mut self, entity: Entity) {
        if let Some(old) = self.by_entity.remove(&entity) {
            self.by_name.remove(&old);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, entity: Entity) -> Option<&str> {
        self.by_entity.get(&entity).map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityKind;

    fn e(i: u32) -> Entity {
        Entity::from_raw_index(i, 0, EntityKind::Gen)
    }

    #[test]
    fn wildcard_lookup_finds_concrete_pair_archetypes() {
        let mut idx = RelationshipIndex::new();
        let likes = e(1);
        let alice = e(2);
        let pair = Entity::new_pair(likes, alice);
        idx.index_archetype_id(pair, 7);

        assert!(idx
            .archetypes_for(Entity::pair_with_wildcard_target(likes))
            .any(|a| a == 7));
        assert!(idx
            .archetypes_for(Entity::pair_with_wildcard_relation(alice))
            .any(|a| a == 7));
        assert!(idx.archetypes_for(Entity::any_pair()).any(|a| a == 7));
    }

    #[test]
    fn is_relation_tracks_both_directions() {
        let mut idx = RelationshipIndex::new();
        let child = e(1);
        let parent = e(2);
        idx.record_is(child, parent);
        assert_eq!(idx.direct_parents(child), &[parent]);
        assert_eq!(idx.direct_children(parent), &[child]);
    }

    #[test]
    fn cant_combine_is_symmetric() {
        let mut rules = RuleIndex::new();
        let a = e(1);
        let b = e(2);
        rules.add_cant_combine(a, b);
        let mut sorted = vec![a, b];
        sorted.sort();
        assert!(rules.violates_cant_combine(&sorted));
    }

    #[test]
    fn name_index_overwrites_previous_name() {
        let mut names = NameIndex::new();
        let ent = e(1);
        names.set(ent, "first");
        names.set(ent, "second");
        assert_eq!(names.lookup("first"), None);
        assert_eq!(names.lookup("second"), Some(ent));
        assert_eq!(names.name_of(ent), Some("second"));
    }
}
