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

//! An archetype: the set of entities sharing exactly one sorted id list,
//! split across one or more [`Chunk`]s, plus the lazily-built transition
//! graph edges to neighboring archetypes (spec §4.3, §4.4).

use std::cell::Cell;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use crate::chunk::Chunk;
use crate::chunk_alloc::ChunkAllocator;
use crate::component::ComponentItem;
use crate::id::Entity;
use crate::limits::MAX_COMPONENTS;

/// Order-independent content hash for an id set, used as the key into the
/// world's archetype registry. Actual archetype lookup still falls back to
/// comparing the sorted id slices on a hash match, since a 64-bit XOR-fold
/// can collide.
pub fn content_hash(ids: &[Entity]) -> u64 {
    let mut acc: u64 = 0;
    for &id in ids {
        let mut hasher = FxHasher::default();
        id.hash(&mut hasher);
        acc ^= hasher.finish();
    }
    acc
}

pub struct Archetype {
    ids: SmallVec<[Entity; MAX_COMPONENTS]>,
    id_to_col: FxHashMap<Entity, usize>,
    chunks: Vec<Chunk>,
    entity_count: u32,

    /// id -> archetype index reached by adding that id to this archetype.
    right_edges: FxHashMap<Entity, u32>,
    /// id -> archetype index reached by removing that id from this archetype.
    left_edges: FxHashMap<Entity, u32>,

    /// `None` while alive or just revived; `Some(n)` while the GC is
    /// counting this archetype down toward destruction (spec §4.7).
    lifetime: Cell<Option<u32>>,
}

impl Archetype {
    pub fn new(ids: SmallVec<[Entity; MAX_COMPONENTS]>) -> Self {
        debug_assert!(
            ids.windows(2).all(|w| w[0] < w[1]),
            "archetype id list must be sorted and deduplicated"
        );
        debug_assert!(
            ids.windows(2)
                .all(|w| w[0].kind() != crate::id::EntityKind::Uni || w[1].kind() == crate::id::EntityKind::Uni),
            "archetype id list must have generic ids strictly preceding unique ids"
        );
        let id_to_col = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        Self {
            ids,
            id_to_col,
            chunks: Vec::new(),
            entity_count: 0,
            right_edges: FxHashMap::default(),
            left_edges: FxHashMap::default(),
            lifetime: Cell::new(None),
        }
    }

    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    pub fn content_hash(&self) -> u64 {
        content_hash(&self.ids)
    }

    pub fn column_of(&self, id: Entity) -> Option<usize> {
        self.id_to_col.get(&id).copied()
    }

    pub fn has_id(&self, id: Entity) -> bool {
        self.id_to_col.contains_key(&id)
    }

    pub fn entity_count(&self) -> u32 {
        self.entity_count
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    pub fn chunk_mut(&mut self, index: usize) -> &mut Chunk {
        &mut self.chunks[index]
    }

    // -- graph edges (spec §4.4) -------------------------------------------

    pub fn right_edge(&self, id: Entity) -> Option<u32> {
        self.right_edges.get(&id).copied()
    }

    pub fn left_edge(&self, id: Entity) -> Option<u32> {
        self.left_edges.get(&id).copied()
    }

    pub fn set_right_edge(&mut self, id: Entity, to_index: u32) {
        self.right_edges.insert(id, to_index);
    }

    pub fn set_left_edge(&mut self, id: Entity, to_index: u32) {
        self.left_edges.insert(id, to_index);
    }

    /// Drops every cached transition edge. Called after the GC destroys one
    /// or more archetypes, since `Vec::swap_remove` reshuffles every index
    /// above the removed one and a targeted per-index invalidation can't
    /// keep up with that - edges are lazily rematerialized on the next
    /// add/remove (spec §4.7).
    pub fn clear_graph_edges(&mut self) {
        self.right_edges.clear();
        self.left_edges.clear();
    }

    // -- rows ----------------------------------------------------------------

    /// Finds a chunk with room for one more row, creating one if every
    /// existing chunk is full.
    fn foc_free_chunk(&mut self, items: &[&ComponentItem], alloc: &mut ChunkAllocator) -> usize {
        if let Some(i) = self.chunks.iter().position(|c| !c.is_full()) {
            return i;
        }
        self.chunks.push(Chunk::new(self.ids.clone(), items, alloc));
        self.chunks.len() - 1
    }

    /// Reserves a row for `entity`. Caller is responsible for writing every
    /// component's value. `items` must list this archetype's components'
    /// metadata in the same order as `ids()`.
    pub fn add_entity(
        &mut self,
        entity: Entity,
        items: &[&ComponentItem],
        alloc: &mut ChunkAllocator,
    ) -> (usize, usize) {
        let chunk_idx = self.foc_free_chunk(items, alloc);
        let row = self.chunks[chunk_idx].add_entity(entity);
        self.entity_count += 1;
        self.lifetime.set(None); // revival cancels any pending GC countdown
        (chunk_idx, row)
    }

    /// Removes the row, returning `(swapped_entity, chunk_now_empty)`.
    pub fn remove_entity(
        &mut self,
        chunk_idx: usize,
        row: usize,
        items: &[&ComponentItem],
    ) -> (Option<Entity>, bool) {
        let chunk = &mut self.chunks[chunk_idx];
        let swapped = chunk.remove_entity(row, items);
        self.entity_count -= 1;
        (swapped, chunk.is_empty())
    }

    /// # Safety
    /// `chunk_idx` must refer to an empty chunk with no live rows.
    pub unsafe fn free_chunk(&mut self, chunk_idx: usize, alloc: &mut ChunkAllocator) {
        let mut chunk = self.chunks.swap_remove(chunk_idx);
        chunk.release(alloc);
    }

    /// Decrements the live entity count without touching any chunk,  used
    /// after a caller has already moved a row out via
    /// `Chunk::remove_entity_no_destruct` as part of a cross-archetype
    /// transition.
    pub fn dec_entity_count(&mut self) {
        self.entity_count -= 1;
    }

    /// Moves one enabled row from the sparsest semi-full chunk into the
    /// densest semi-full chunk, shrinking the number of chunks in use over
    /// time. A semi-full chunk has at least one enabled row and at least one
    /// free slot; a chunk that is empty or full is never picked either way.
    /// Returns `(moved_entity, from_chunk, to_chunk, to_row)`, or `None` if
    /// there is nothing worth relocating right now - including when the two
    /// candidate chunks disagree on a `Uni` column's value, since those rows
    /// are required to stay byte-identical within an archetype (spec §4.7:
    /// "uni-component values must match"). Disabled rows are left alone -
    /// see `World::defragment`'s doc comment.
    pub fn defrag_step(&mut self, items: &[&ComponentItem]) -> Option<(Entity, usize, usize, usize)> {
        let n = self.chunks.len();
        if n < 2 {
            return None;
        }

        let mut sparsest: Option<usize> = None;
        let mut densest: Option<usize> = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let enabled = chunk.enabled_count() as usize;
            if enabled == 0 || chunk.is_full() {
                continue;
            }
            if sparsest.map_or(true, |s| enabled < self.chunks[s].enabled_count() as usize) {
                sparsest = Some(i);
            }
            if densest.map_or(true, |d| enabled > self.chunks[d].enabled_count() as usize) {
                densest = Some(i);
            }
        }
        let (src_idx, dest_idx) = match (sparsest, densest) {
            (Some(s), Some(d)) if s != d => (s, d),
            _ => return None,
        };

        if !self.uni_columns_match(src_idx, dest_idx, items) {
            return None;
        }

        let from_row = self.chunks[src_idx].enabled_count() as usize - 1;
        let entity = self.chunks[src_idx].entity_at(from_row);
        let to_row = self.chunks[dest_idx].add_entity(entity);
        for (ci, item) in items.iter().enumerate() {
            if item.size == 0 {
                continue;
            }
            let dest = &self.chunks[dest_idx];
            let src = &self.chunks[src_idx];
            unsafe { dest.move_component_from(ci, to_row, src, ci, from_row, item) };
        }
        self.chunks[src_idx].remove_entity_no_destruct(from_row);
        Some((entity, src_idx, dest_idx, to_row))
    }

    /// Whether every `Uni` column (one shared slot per chunk, spec §3) holds
    /// the same value in both chunks. Types with no registered equality
    /// comparator fall back to a raw byte compare, mirroring
    /// `ComponentItem::copy_value`'s fallback to an unchecked copy.
    fn uni_columns_match(&self, a: usize, b: usize, items: &[&ComponentItem]) -> bool {
        for (ci, item) in items.iter().enumerate() {
            if item.size == 0 || self.ids[ci].kind() != crate::id::EntityKind::Uni {
                continue;
            }
            let pa = unsafe { self.chunks[a].component_ptr(ci, 0) };
            let pb = unsafe { self.chunks[b].component_ptr(ci, 0) };
            let equal = unsafe { item.values_equal(pa, pb) }.unwrap_or_else(|| unsafe {
                std::slice::from_raw_parts(pa, item.size as usize)
                    == std::slice::from_raw_parts(pb, item.size as usize)
            });
            if !equal {
                return false;
            }
        }
        true
    }

    // -- GC lifetime (spec §4.7) ---------------------------------------------

    pub fn lifetime(&self) -> Option<u32> {
        self.lifetime.get()
    }

    pub fn set_lifetime(&self, v: Option<u32>) {
        self.lifetime.set(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentCache;
    use crate::id::EntityKind;

    fn e(i: u32) -> Entity {
        Entity::from_raw_index(i, 0, EntityKind::Gen)
    }

    #[test]
    fn content_hash_is_order_independent() {
        let a = [e(1), e(2), e(3)];
        let b = [e(3), e(1), e(2)];
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn add_and_remove_entity_round_trips() {
        let mut cache = ComponentCache::new();
        let comp = cache.register::<u32>(e(100));
        let mut ids: SmallVec<[Entity; MAX_COMPONENTS]> = SmallVec::new();
        ids.push(comp);
        let mut archetype = Archetype::new(ids);
        let mut alloc = ChunkAllocator::new();
        let item = cache.get(comp).unwrap();

        let ent = e(1);
        let (chunk_idx, row) = archetype.add_entity(ent, &[item], &mut alloc);
        assert_eq!(archetype.entity_count(), 1);
        let (swapped, now_empty) = archetype.remove_entity(chunk_idx, row, &[item]);
        assert_eq!(swapped, None);
        assert!(now_empty);
        assert_eq!(archetype.entity_count(), 0);
    }
}
