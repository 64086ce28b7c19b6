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

//! Maps entity indices to their current archetype/chunk/row and tracks
//! generations, so a stale [`Entity`] handle is recognized as invalid
//! instead of silently aliasing whatever now lives at its old index
//! (spec §3, §6 `valid`).
//!
//! Freed indices go on an implicit free list (the slot's `archetype` field
//! doubles as the next-free pointer while dead) so reuse doesn't need a
//! separate allocation.

use crate::id::{Entity, EntityKind};

const DEAD: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct Record {
    generation: u32,
    kind: EntityKind,
    alive: bool,
    /// Index of the next free slot while `!alive`, otherwise the owning
    /// archetype's index.
    archetype: u32,
    chunk: u32,
    row: u32,
}

/// Where a live entity's component data currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub archetype: u32,
    pub chunk: u32,
    pub row: u32,
}

pub struct EntityTable {
    records: Vec<Record>,
    free_head: u32,
    free_count: u32,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            free_head: DEAD,
            free_count: 0,
        }
    }
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len() - self.free_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a fresh entity, reusing a dead slot's index (and bumping
    /// its generation) when one is available.
    pub fn allocate(&mut self, kind: EntityKind) -> Entity {
        if self.free_head != DEAD {
            let index = self.free_head;
            let record = &mut self.records[index as usize];
            self.free_head = record.archetype;
            self.free_count -= 1;
            record.alive = true;
            record.kind = kind;
            record.archetype = DEAD;
            record.chunk = 0;
            record.row = 0;
            Entity::from_raw_index(index, record.generation, kind)
        } else {
            let index = self.records.len() as u32;
            self.records.push(Record {
                generation: 0,
                kind,
                alive: true,
                archetype: DEAD,
                chunk: 0,
                row: 0,
            });
            Entity::from_raw_index(index, 0, kind)
        }
    }

    /// Bumps the slot's generation and returns it to the free list.
    pub fn deallocate(&mut self, entity: Entity) {
        debug_assert!(self.is_valid(entity));
        let index = entity.index();
        let record = &mut self.records[index as usize];
        record.alive = false;
        record.generation = record.generation.wrapping_add(1);
        record.archetype = self.free_head;
        self.free_head = index;
        self.free_count += 1;
    }

    pub fn is_valid(&self, entity: Entity) -> bool {
        if entity.is_bad() || entity.is_pair() {
            return false;
        }
        let index = entity.index() as usize;
        match self.records.get(index) {
            Some(r) => r.alive && r.generation == entity.generation(),
            None => false,
        }
    }

    pub fn location(&self, entity: Entity) -> Option<Location> {
        if !self.is_valid(entity) {
            return None;
        }
        let r = &self.records[entity.index() as usize];
        Some(Location {
            archetype: r.archetype,
            chunk: r.chunk,
            row: r.row,
        })
    }

    pub fn set_location(&mut self, entity: Entity, loc: Location) {
        debug_assert!(self.is_valid(entity));
        let r = &mut self.records[entity.index() as usize];
        r.archetype = loc.archetype;
        r.chunk = loc.chunk;
        r.row = loc.row;
    }

    /// Updates only the row, used after a swap-remove moved `entity` into a
    /// new row within the same chunk.
    pub fn set_row(&mut self, entity: Entity, row: u32) {
        debug_assert!(self.is_valid(entity));
        self.records[entity.index() as usize].row = row;
    }

    pub fn kind(&self, entity: Entity) -> Option<EntityKind> {
        if !self.is_valid(entity) {
            return None;
        }
        Some(self.records[entity.index() as usize].kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_deallocate_invalidates_handle() {
        let mut table = EntityTable::new();
        let e = table.allocate(EntityKind::Gen);
        assert!(table.is_valid(e));
        table.deallocate(e);
        assert!(!table.is_valid(e));
    }

    #[test]
    fn reused_index_gets_new_generation() {
        let mut table = EntityTable::new();
        let e1 = table.allocate(EntityKind::Gen);
        table.deallocate(e1);
        let e2 = table.allocate(EntityKind::Gen);
        assert_eq!(e1.index(), e2.index());
        assert_ne!(e1.generation(), e2.generation());
        assert!(!table.is_valid(e1));
        assert!(table.is_valid(e2));
    }

    #[test]
    fn location_round_trips() {
        let mut table = EntityTable::new();
        let e = table.allocate(EntityKind::Gen);
        let loc = Location {
            archetype: 3,
            chunk: 1,
            row: 7,
        };
        table.set_location(e, loc);
        assert_eq!(table.location(e), Some(loc));
        table.set_row(e, 8);
        assert_eq!(table.location(e).unwrap().row, 8);
    }
}
