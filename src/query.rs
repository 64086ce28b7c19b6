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

//! Query terms, compilation, and the cached archetype matcher (spec §4.5,
//! §4.6).
//!
//! A query is a list of [`Term`]s (`All`/`Any`/`Not`, each reading or
//! writing a possibly-wildcarded id). [`compile`] buckets the normalized
//! term list into a [`Program`] of exactly three groups - all, any, not -
//! which is the three-opcode "VM" this crate runs against an archetype's
//! sorted id list: one all-must-match pass, one any-must-match pass, one
//! none-must-match pass. [`QueryEngine`] caches that program per distinct
//! (terms, group_by) combination, keyed by a content hash, and only scans
//! archetypes created since the cache was last consulted.

use rustc_hash::FxHashMap;

use crate::archetype::Archetype;
use crate::id::Entity;
use crate::relationship::RelationshipIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    All,
    Any,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Access {
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Source {
    /// The term applies to the matched entity itself.
    SelfEntity,
}

/// One clause of a query: "this id, with this access, combined this way".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term {
    pub op: Op,
    pub access: Access,
    pub id: Entity,
    pub src: Source,
    /// Only meaningful on `All` terms: restrict to rows whose column
    /// changed since the query last ran (spec §4.6 change filter).
    pub changed: bool,
}

impl Term {
    pub fn all(id: Entity) -> Self {
        Self {
            op: Op::All,
            access: Access::Read,
            id,
            src: Source::SelfEntity,
            changed: false,
        }
    }

    pub fn any(id: Entity) -> Self {
        Self {
            op: Op::Any,
            access: Access::Read,
            id,
            src: Source::SelfEntity,
            changed: false,
        }
    }

    pub fn not(id: Entity) -> Self {
        Self {
            op: Op::Not,
            access: Access::None,
            id,
            src: Source::SelfEntity,
            changed: false,
        }
    }

    pub fn write(mut self) -> Self {
        self.access = Access::Write;
        self
    }

    pub fn track_changes(mut self) -> Self {
        debug_assert_eq!(self.op, Op::All, "only All terms support change filtering");
        self.changed = true;
        self
    }
}

fn normalize(terms: &[Term]) -> Vec<Term> {
    let mut v = terms.to_vec();
    v.sort();
    v.dedup();
    v
}

/// Content hash over a normalized term list plus an optional group-by id,
/// used as the query cache key (spec §4.6 "content hash").
pub fn content_hash(terms: &[Term], group_by: Option<Entity>) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    terms.hash(&mut hasher);
    group_by.hash(&mut hasher);
    hasher.finish()
}

/// The compiled three-bucket program: every `all` id must be present,
/// at least one `any` id must be present (if the bucket is non-empty),
/// and no `not` id may be present.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub all: Vec<Term>,
    pub any: Vec<Term>,
    pub not: Vec<Entity>,
}

pub fn compile(normalized_terms: &[Term]) -> Program {
    let mut program = Program::default();
    for &t in normalized_terms {
        match t.op {
            Op::All => program.all.push(t),
            Op::Any => program.any.push(t),
            Op::Not => program.not.push(t.id),
        }
    }
    program
}

/// Whether `pattern` (possibly a wildcarded entity or pair) matches the
/// concrete id `concrete` that an archetype actually carries.
fn wildcard_matches(pattern: Entity, concrete: Entity) -> bool {
    if pattern == concrete {
        return true;
    }
    if pattern.is_pair() {
        if !concrete.is_pair() {
            return false;
        }
        let (pr, pt) = (pattern.pair_first(), pattern.pair_second());
        let (cr, ct) = (concrete.pair_first(), concrete.pair_second());
        (pr == cr || pr.is_wildcard()) && (pt == ct || pt.is_wildcard())
    } else {
        pattern.is_wildcard() && concrete.is_entity() && !concrete.is_pair()
    }
}

fn id_present(ids: &[Entity], needle: Entity) -> bool {
    if !needle.is_wildcard() {
        ids.binary_search(&needle).is_ok()
    } else {
        ids.iter().any(|&id| wildcard_matches(needle, id))
    }
}

pub fn matches(ids: &[Entity], program: &Program) -> bool {
    for t in &program.all {
        if !id_present(ids, t.id) {
            return false;
        }
    }
    if !program.any.is_empty() && !program.any.iter().any(|t| id_present(ids, t.id)) {
        return false;
    }
    for &nid in &program.not {
        if id_present(ids, nid) {
            return false;
        }
    }
    true
}

/// A cached, incrementally-matched query.
pub struct CachedQuery {
    pub program: Program,
    pub group_by: Option<Entity>,
    pub matched: Vec<u32>,
    scanned_until: usize,
    pub last_tick: u64,
}

impl CachedQuery {
    pub fn changed_terms(&self) -> impl Iterator<Item = &Term> {
        self.program.all.iter().filter(|t| t.changed)
    }
}

/// Owns every cached query the world has ever run.
#[derive(Default)]
pub struct QueryEngine {
    cache: FxHashMap<u64, CachedQuery>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the matched archetype list for `terms`/`group_by`, scanning
    /// only archetypes created since this exact query was last run (spec
    /// §4.6 "incremental re-matching").
    pub fn run(
        &mut self,
        terms: &[Term],
        group_by: Option<Entity>,
        archetypes: &[Archetype],
        _rel: &RelationshipIndex,
    ) -> &CachedQuery {
        let normalized = normalize(terms);
        let hash = content_hash(&normalized, group_by);
        let entry = self.cache.entry(hash).or_insert_with(|| CachedQuery {
            program: compile(&normalized),
            group_by,
            matched: Vec::new(),
            scanned_until: 0,
            last_tick: 0,
        });
        if entry.scanned_until < archetypes.len() {
            for (idx, archetype) in archetypes.iter().enumerate().skip(entry.scanned_until) {
                if matches(archetype.ids(), &entry.program) {
                    entry.matched.push(idx as u32);
                }
            }
            entry.scanned_until = archetypes.len();
        }
        entry
    }

    pub fn advance_tick(&mut self, terms: &[Term], group_by: Option<Entity>, tick: u64) {
        let normalized = normalize(terms);
        let hash = content_hash(&normalized, group_by);
        if let Some(entry) = self.cache.get_mut(&hash) {
            entry.last_tick = tick;
        }
    }

    /// Forces every cached query to fully rescan on its next `run`. Called
    /// after the GC destroys archetypes, since that reshuffles indices via
    /// `swap_remove` (spec §4.7).
    pub fn invalidate_all(&mut self) {
        for entry in self.cache.values_mut() {
            entry.matched.clear();
            entry.scanned_until = 0;
        }
    }

    /// Groups a cached query's matches by the target of `group_by` (spec
    /// §6 `group_by`): each matched archetype's id list is searched for a
    /// pair whose relation is `group_by`, and its target becomes the
    /// group key. Archetypes with no such pair group under the wildcard
    /// target.
    pub fn grouped(&self, hash: u64, archetypes: &[Archetype]) -> FxHashMap<Entity, Vec<u32>> {
        let mut groups: FxHashMap<Entity, Vec<u32>> = FxHashMap::default();
        let Some(entry) = self.cache.get(&hash) else {
            return groups;
        };
        let Some(group_by) = entry.group_by else {
            return groups;
        };
        for &idx in &entry.matched {
            let ids = archetypes[idx as usize].ids();
            let key = ids
                .iter()
                .find(|id| id.is_pair() && id.pair_first() == group_by)
                .map(|id| id.pair_second())
                .unwrap_or(crate::id::WILDCARD);
            groups.entry(key).or_default().push(idx);
        }
        groups
    }

    pub fn hash_for(&self, terms: &[Term], group_by: Option<Entity>) -> u64 {
        content_hash(&normalize(terms), group_by)
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
    fn all_terms_require_every_id() {
        let a = e(1);
        let b = e(2);
        let program = compile(&normalize(&[Term::all(a), Term::all(b)]));
        assert!(matches(&[a, b], &program));
        assert!(!matches(&[a], &program));
    }

    #[test]
    fn not_terms_exclude() {
        let a = e(1);
        let b = e(2);
        let program = compile(&normalize(&[Term::all(a), Term::not(b)]));
        assert!(matches(&[a], &program));
        assert!(!matches(&[a, b], &program));
    }

    #[test]
    fn any_term_needs_just_one() {
        let a = e(1);
        let b = e(2);
        let c = e(3);
        let program = compile(&normalize(&[Term::any(a), Term::any(b)]));
        assert!(matches(&[a], &program));
        assert!(matches(&[b], &program));
        assert!(!matches(&[c], &program));
    }

    #[test]
    fn wildcard_pair_matches_any_target() {
        let likes = e(1);
        let alice = e(2);
        let bob = e(3);
        let pattern = Entity::pair_with_wildcard_target(likes);
        assert!(wildcard_matches(pattern, Entity::new_pair(likes, alice)));
        assert!(wildcard_matches(pattern, Entity::new_pair(likes, bob)));
        assert!(!wildcard_matches(pattern, Entity::new_pair(bob, alice)));
    }

    #[test]
    fn normalize_deduplicates_identical_terms() {
        let a = e(1);
        let terms = normalize(&[Term::all(a), Term::all(a)]);
        assert_eq!(terms.len(), 1);
    }
}
