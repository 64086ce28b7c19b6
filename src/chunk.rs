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

//! A fixed-capacity block of rows, all belonging to the same archetype
//! (spec §4.3).
//!
//! Each column is either AoS (one contiguous array of whole component
//! values, driven by the component's [`ComponentItem`] function pointers)
//! or SoA (one contiguous sub-array per field, spec §4.2). SoA components
//! are assumed trivial - no constructor or destructor runs on them, only a
//! raw per-field byte copy - which matches the SIMD-aligned numeric structs
//! the spec expects SoA to be used for.
//!
//! Rows are partitioned into an enabled prefix and a disabled suffix
//! (`entities[0..enabled_count)` vs `entities[enabled_count..])`); queries
//! that don't explicitly ask for disabled entities only ever walk the
//! enabled prefix.

use std::cell::Cell;

use smallvec::SmallVec;

use crate::chunk_alloc::{ChunkAllocator, ChunkSizeClass};
use crate::component::ComponentItem;
use crate::id::{Entity, EntityKind};
use crate::limits::{MAX_CHUNK_LOCKS, MAX_COMPONENTS};
use crate::reflection::MAX_SOA_FIELDS;

struct ColumnLayout {
    /// Byte offset of this column's region within the block.
    offset: u32,
    /// AoS: size of one whole value. SoA: size of one element per field.
    size: u32,
    /// Empty for AoS columns. One entry per SoA field, offset relative to
    /// `offset`.
    soa_field_offsets: SmallVec<[u32; MAX_SOA_FIELDS]>,
    soa_field_sizes: SmallVec<[u32; MAX_SOA_FIELDS]>,
    /// `Uni` columns own exactly one slot, shared by every row in the chunk,
    /// instead of one slot per row (spec §3).
    is_uni: bool,
}

impl ColumnLayout {
    fn is_soa(&self) -> bool {
        !self.soa_field_offsets.is_empty()
    }
}

pub struct Chunk {
    ids: SmallVec<[Entity; MAX_COMPONENTS]>,
    columns: SmallVec<[ColumnLayout; MAX_COMPONENTS]>,
    versions: SmallVec<[u64; MAX_COMPONENTS]>,
    entities: Vec<Entity>,
    enabled_count: u32,
    capacity: u32,
    size_class: ChunkSizeClass,
    data: *mut u8,
    /// Total bytes consumed by `data`, 0 for a tag-only chunk with no
    /// backing allocation.
    total_bytes: u32,
    lock: Cell<u8>,
    /// `None` while alive or just revived; `Some(n)` while the GC is
    /// counting this chunk down toward being freed (spec §4.7).
    lifetime: Cell<Option<u32>>,
}

impl Chunk {
    /// Builds a chunk for an archetype whose sorted id list is `ids`, with
    /// metadata for each id given in the same order via `items`.
    pub fn new(
        ids: SmallVec<[Entity; MAX_COMPONENTS]>,
        items: &[&ComponentItem],
        alloc: &mut ChunkAllocator,
    ) -> Self {
        debug_assert_eq!(ids.len(), items.len());
        debug_assert!(
            ids.windows(2)
                .all(|w| w[0].kind() != EntityKind::Uni || w[1].kind() == EntityKind::Uni),
            "chunk: generic ids must precede unique ids"
        );

        // Generic components contribute one slot per row; unique (`Uni`)
        // components contribute exactly one shared slot for the whole
        // chunk, regardless of row count (spec §3).
        let gen_row_bytes: usize = ids
            .iter()
            .zip(items.iter())
            .filter(|(id, _)| id.kind() != EntityKind::Uni)
            .map(|(_, i)| i.size as usize)
            .sum();
        let uni_bytes: usize = ids
            .iter()
            .zip(items.iter())
            .filter(|(id, _)| id.kind() == EntityKind::Uni)
            .map(|(_, i)| i.size as usize)
            .sum();

        let class = if gen_row_bytes == 0 && uni_bytes == 0 {
            ChunkSizeClass::Small
        } else {
            ChunkSizeClass::for_payload(gen_row_bytes.max(1) + uni_bytes)
                .expect("chunk: archetype row too large for the biggest block class")
        };
        let usable = class.block_size() - crate::limits::MEMORY_BLOCK_USABLE_OFFSET;
        let capacity = if gen_row_bytes == 0 {
            // Tag-only / unique-only archetype: no per-row generic data.
            u32::MAX
        } else {
            (usable.saturating_sub(uni_bytes) / gen_row_bytes) as u32
        };
        debug_assert!(capacity > 0, "chunk: row doesn't fit in any block class");

        let mut columns = SmallVec::with_capacity(items.len());
        let mut offset = 0u32;
        for (id, item) in ids.iter().zip(items.iter()) {
            let is_uni = id.kind() == EntityKind::Uni;
            let slots = if is_uni { 1 } else { capacity };
            let mut soa_field_offsets = SmallVec::new();
            let mut soa_field_sizes = SmallVec::new();
            if item.is_soa() {
                let mut field_offset = 0u32;
                for &field_size in item.soa_field_sizes.iter() {
                    soa_field_offsets.push(field_offset);
                    soa_field_sizes.push(field_size as u32);
                    field_offset += field_size as u32 * slots;
                }
            }
            columns.push(ColumnLayout {
                offset,
                size: item.size,
                soa_field_offsets,
                soa_field_sizes,
                is_uni,
            });
            offset += item.size * slots;
        }
        let total_bytes = offset;

        let data = if total_bytes == 0 {
            std::ptr::NonNull::dangling().as_ptr()
        } else {
            alloc.alloc(class)
        };

        let versions = SmallVec::from_elem(0u64, ids.len());

        Self {
            ids,
            columns,
            versions,
            entities: Vec::new(),
            enabled_count: 0,
            capacity,
            size_class: class,
            data,
            total_bytes,
            lock: Cell::new(0),
            lifetime: Cell::new(None),
        }
    }

    /// # Safety
    /// Must only be called once, and only on a chunk whose row size is
    /// nonzero (tag-only chunks never allocated real memory).
    pub unsafe fn release(&mut self, alloc: &mut ChunkAllocator) {
        if self.total_bytes > 0 {
            alloc.free(self.size_class, self.data);
        }
    }

    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entities.len() as u32 >= self.capacity
    }

    pub fn enabled_count(&self) -> u32 {
        self.enabled_count
    }

    pub fn entity_at(&self, row: usize) -> Entity {
        self.entities[row]
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn is_enabled(&self, row: usize) -> bool {
        (row as u32) < self.enabled_count
    }

    pub fn find_column(&self, id: Entity) -> Option<usize> {
        self.ids.iter().position(|&i| i == id)
    }

    // -- structural change lock (spec §5) --------------------------------

    pub fn lock(&self) {
        let n = self.lock.get();
        assert!(n < MAX_CHUNK_LOCKS, "chunk: lock depth exceeded");
        self.lock.set(n + 1);
    }

    pub fn unlock(&self) {
        let n = self.lock.get();
        assert!(n > 0, "chunk: unbalanced unlock");
        self.lock.set(n - 1);
    }

    pub fn is_locked(&self) -> bool {
        self.lock.get() > 0
    }

    // -- lifetime (spec §4.7) ---------------------------------------------

    pub fn lifetime(&self) -> Option<u32> {
        self.lifetime.get()
    }

    pub fn set_lifetime(&self, v: Option<u32>) {
        self.lifetime.set(v);
    }

    // -- change versions ---------------------------------------------------

    pub fn version_of(&self, col: usize) -> u64 {
        self.versions[col]
    }

    pub fn bump_version(&mut self, col: usize, tick: u64) {
        self.versions[col] = tick;
    }

    // -- row lifecycle ------------------------------------------------------

    /// Reserves a new enabled row for `entity`. Callers are responsible for
    /// constructing every column's value via `component_ptr`/`soa_field_ptr`
    /// - this mirrors how the archetype transition algorithm already knows
    /// which ids are fresh vs moved.
    pub fn add_entity(&mut self, entity: Entity) -> usize {
        debug_assert!(!self.is_full());
        debug_assert!(!self.is_locked(), "chunk: structural change while locked");
        let row = self.entities.len();
        if row == self.enabled_count as usize {
            self.entities.push(entity);
        } else {
            // Keep the disabled suffix intact: push then rotate the new
            // entity to the end of the enabled prefix.
            self.entities.push(entity);
            let last = self.entities.len() - 1;
            self.swap_rows(self.enabled_count as usize, last);
            self.entities.swap(self.enabled_count as usize, last);
        }
        self.enabled_count += 1;
        self.lifetime.set(None); // revival cancels any pending GC countdown
        self.enabled_count as usize - 1
    }

    /// Destructs `row`'s values and swap-removes it, returning the entity
    /// that was moved into `row`'s slot, if any.
    pub fn remove_entity(&mut self, row: usize, items: &[&ComponentItem]) -> Option<Entity> {
        debug_assert!(!self.is_locked(), "chunk: structural change while locked");
        let last_row = self.entities.len() - 1;
        for (ci, item) in items.iter().enumerate() {
            unsafe { self.destruct_at(ci, row, item) };
        }
        if row != last_row {
            for ci in 0..self.columns.len() {
                unsafe { self.raw_move_row(ci, last_row, row) };
            }
        }
        self.entities.swap_remove(row);
        if (row as u32) < self.enabled_count {
            self.enabled_count -= 1;
        }
        self.entities.get(row).copied()
    }

    /// Swap-removes `row` without running any destructor, returning the
    /// entity that was moved into `row`'s slot, if any. Used by the
    /// archetype transition algorithm, which has already logically moved
    /// every surviving column's value out to the destination archetype and
    /// separately destructs whatever didn't survive.
    pub fn remove_entity_no_destruct(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(!self.is_locked(), "chunk: structural change while locked");
        let last_row = self.entities.len() - 1;
        if row != last_row {
            for ci in 0..self.columns.len() {
                unsafe { self.raw_move_row(ci, last_row, row) };
            }
        }
        self.entities.swap_remove(row);
        if (row as u32) < self.enabled_count {
            self.enabled_count -= 1;
        }
        self.entities.get(row).copied()
    }

    /// Moves across an archetype boundary: copies `col`'s value at `row` in
    /// `src_chunk`/`src_row` into this chunk's `col`/`row`, by whichever
    /// layout (AoS or SoA) `item` uses. Does not touch the source slot
    /// beyond reading it - the caller is responsible for compacting the
    /// source chunk afterward.
    ///
    /// # Safety
    /// `col` must be a valid, same-typed column in both chunks, and `row`/
    /// `src_row` must be in bounds.
    pub unsafe fn move_component_from(
        &self,
        col: usize,
        row: usize,
        src_chunk: &Chunk,
        src_col: usize,
        src_row: usize,
        item: &ComponentItem,
    ) {
        if item.size == 0 {
            return;
        }
        if item.is_soa() {
            let layout = &self.columns[col];
            for f in 0..layout.soa_field_offsets.len() {
                let size = layout.soa_field_sizes[f] as usize;
                let src = src_chunk.soa_field_ptr(src_col, f, src_row);
                let dst = self.soa_field_ptr(col, f, row);
                std::ptr::copy_nonoverlapping(src, dst, size);
            }
        } else {
            let src = src_chunk.component_ptr(src_col, src_row);
            let dst = self.component_ptr(col, row);
            item.move_value(src, dst);
        }
    }

    /// Moves an entity across the enabled/disabled partition boundary.
    /// Returns the row it ends up at.
    pub fn set_enabled(&mut self, row: usize, enabled: bool) -> usize {
        if enabled == self.is_enabled(row) {
            return row;
        }
        debug_assert!(!self.is_locked(), "chunk: structural change while locked");
        if enabled {
            let target = self.enabled_count as usize;
            self.swap_rows(row, target);
            self.entities.swap(row, target);
            self.enabled_count += 1;
            target
        } else {
            let target = self.enabled_count as usize - 1;
            self.swap_rows(row, target);
            self.entities.swap(row, target);
            self.enabled_count -= 1;
            target
        }
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for ci in 0..self.columns.len() {
            unsafe { self.raw_swap_row(ci, a, b) };
        }
    }

    // -- raw pointer access --------------------------------------------------

    /// # Safety
    /// `col` must index an AoS column.
    pub unsafe fn component_ptr(&self, col: usize, row: usize) -> *mut u8 {
        let layout = &self.columns[col];
        debug_assert!(!layout.is_soa());
        let row = if layout.is_uni { 0 } else { row };
        self.data
            .add(layout.offset as usize + row * layout.size as usize)
    }

    /// # Safety
    /// `col` must index an SoA column and `field` must be in range.
    pub unsafe fn soa_field_ptr(&self, col: usize, field: usize, row: usize) -> *mut u8 {
        let layout = &self.columns[col];
        debug_assert!(layout.is_soa());
        let row = if layout.is_uni { 0 } else { row };
        let field_off = layout.soa_field_offsets[field];
        let field_size = layout.soa_field_sizes[field] as usize;
        self.data
            .add(layout.offset as usize + field_off as usize + row * field_size)
    }

    /// Destructs row `row`'s value in column `ci`. `Uni` columns own one
    /// slot shared by every row in the chunk, so per-row removal never
    /// destructs them - only `destruct_all` does, once, when the whole
    /// chunk is freed.
    unsafe fn destruct_at(&self, ci: usize, row: usize, item: &ComponentItem) {
        let layout = &self.columns[ci];
        if layout.is_soa() || layout.is_uni {
            return; // SoA fields are assumed trivial (no destructor).
        }
        item.destruct(self.component_ptr(ci, row));
    }

    unsafe fn raw_move_row(&self, ci: usize, from: usize, to: usize) {
        let layout = &self.columns[ci];
        if layout.is_uni {
            return; // shared slot, nothing to move between rows
        }
        if layout.is_soa() {
            for f in 0..layout.soa_field_offsets.len() {
                let size = layout.soa_field_sizes[f] as usize;
                let src = self.soa_field_ptr(ci, f, from);
                let dst = self.soa_field_ptr(ci, f, to);
                std::ptr::copy_nonoverlapping(src, dst, size);
            }
        } else {
            let size = layout.size as usize;
            let src = self.component_ptr(ci, from);
            let dst = self.component_ptr(ci, to);
            std::ptr::copy_nonoverlapping(src, dst, size);
        }
    }

    unsafe fn raw_swap_row(&self, ci: usize, a: usize, b: usize) {
        let layout = &self.columns[ci];
        if layout.is_uni {
            return; // shared slot, nothing to swap between rows
        }
        if layout.is_soa() {
            for f in 0..layout.soa_field_offsets.len() {
                let size = layout.soa_field_sizes[f] as usize;
                let pa = self.soa_field_ptr(ci, f, a);
                let pb = self.soa_field_ptr(ci, f, b);
                for i in 0..size {
                    std::ptr::swap(pa.add(i), pb.add(i));
                }
            }
        } else {
            let pa = self.component_ptr(ci, a);
            let pb = self.component_ptr(ci, b);
            for i in 0..layout.size as usize {
                std::ptr::swap(pa.add(i), pb.add(i));
            }
        }
    }

    /// Destructs every remaining value in the chunk. Called right before
    /// the chunk is freed (spec §4.7 GC sweep).
    pub fn destruct_all(&mut self, items: &[&ComponentItem]) {
        let count = self.entities.len();
        for row in 0..count {
            for (ci, item) in items.iter().enumerate() {
                unsafe { self.destruct_at(ci, row, item) };
            }
        }
        // Uni columns own one shared slot regardless of row count, so they
        // are destructed once here rather than per row above.
        for (ci, item) in items.iter().enumerate() {
            if self.columns[ci].is_uni && !self.columns[ci].is_soa() {
                unsafe { item.destruct(self.component_ptr(ci, 0)) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityKind;

    fn fake_entity(i: u32) -> Entity {
        Entity::from_raw_index(i, 0, EntityKind::Gen)
    }

    fn make_chunk(alloc: &mut ChunkAllocator) -> (Chunk, crate::component::ComponentCache) {
        let mut cache = crate::component::ComponentCache::new();
        let comp_id = cache.register::<u32>(fake_entity(100));
        let ids: SmallVec<[Entity; MAX_COMPONENTS]> = smallvec::smallvec![comp_id];
        let item = cache.get(comp_id).unwrap();
        let chunk = Chunk::new(ids, &[item], alloc);
        (chunk, cache)
    }

    #[test]
    fn add_and_remove_entity_tracks_count() {
        let mut alloc = ChunkAllocator::new();
        let (mut chunk, cache) = make_chunk(&mut alloc);
        let e0 = fake_entity(0);
        let e1 = fake_entity(1);
        let row0 = chunk.add_entity(e0);
        let row1 = chunk.add_entity(e1);
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.entity_at(row0), e0);
        assert_eq!(chunk.entity_at(row1), e1);

        let comp_id = chunk.ids()[0];
        let item = cache.get(comp_id).unwrap();
        let swapped = chunk.remove_entity(row0, &[item]);
        assert_eq!(swapped, Some(e1));
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.entity_at(0), e1);
    }

    #[test]
    fn disabling_moves_row_past_enabled_count() {
        let mut alloc = ChunkAllocator::new();
        let (mut chunk, _cache) = make_chunk(&mut alloc);
        let e0 = fake_entity(0);
        let e1 = fake_entity(1);
        chunk.add_entity(e0);
        chunk.add_entity(e1);
        assert_eq!(chunk.enabled_count(), 2);

        let new_row = chunk.set_enabled(0, false);
        assert_eq!(chunk.enabled_count(), 1);
        assert_eq!(chunk.entity_at(new_row), e0);
        assert!(!chunk.is_enabled(new_row));
    }
}
