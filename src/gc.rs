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

//! Two-phase deletion and reclamation of empty chunks/archetypes (spec
//! §4.7).
//!
//! An empty chunk or archetype isn't freed the instant its last entity
//! leaves: it starts a countdown (`MAX_CHUNK_LIFESPAN`/
//! `MAX_ARCHETYPE_LIFESPAN` ticks) so a spawn/despawn churn pattern doesn't
//! thrash the allocator. Getting a new entity before the countdown expires
//! cancels it (handled in `Archetype::add_entity`/`Chunk::add_entity`).
//! Archetype destruction shifts the world's `Vec<Archetype>` (via
//! `swap_remove`), so this module reports destroyed archetypes by their id
//! list rather than by index - the caller reconciles its own index-keyed
//! registries against that.

use smallvec::SmallVec;

use crate::archetype::Archetype;
use crate::chunk_alloc::ChunkAllocator;
use crate::limits::{MAX_ARCHETYPE_LIFESPAN, MAX_CHUNK_LIFESPAN, MAX_COMPONENTS};

use crate::id::Entity;

/// Advances every empty chunk's countdown in `archetype`, freeing any that
/// reach zero. Returns the number of chunks freed.
pub fn sweep_chunks(archetype: &mut Archetype, alloc: &mut ChunkAllocator) -> usize {
    let mut freed = 0;
    let mut i = 0;
    while i < archetype.chunks().len() {
        let chunk = archetype.chunk(i);
        if !chunk.is_empty() {
            i += 1;
            continue;
        }
        let remaining = match chunk.lifetime() {
            None => {
                chunk.set_lifetime(Some(MAX_CHUNK_LIFESPAN));
                MAX_CHUNK_LIFESPAN
            }
            Some(0) => 0,
            Some(n) => {
                chunk.set_lifetime(Some(n - 1));
                n - 1
            }
        };
        if remaining == 0 {
            unsafe { archetype.free_chunk(i, alloc) };
            freed += 1;
            // Don't advance `i`: swap_remove moved another chunk here.
        } else {
            i += 1;
        }
    }
    freed
}

/// Advances every empty archetype's countdown, destroying any that reach
/// zero (once all of their chunks have already been freed by
/// [`sweep_chunks`]). Returns the id lists of archetypes that were
/// destroyed this sweep.
pub fn sweep_archetypes(
    archetypes: &mut Vec<Archetype>,
    alloc: &mut ChunkAllocator,
) -> Vec<SmallVec<[Entity; MAX_COMPONENTS]>> {
    let mut destroyed = Vec::new();
    let mut i = 0;
    while i < archetypes.len() {
        sweep_chunks(&mut archetypes[i], alloc);
        let ready = archetypes[i].is_empty() && archetypes[i].chunks().is_empty();
        if !ready {
            archetypes[i].set_lifetime(None);
            i += 1;
            continue;
        }
        let remaining = match archetypes[i].lifetime() {
            None => {
                archetypes[i].set_lifetime(Some(MAX_ARCHETYPE_LIFESPAN));
                MAX_ARCHETYPE_LIFESPAN
            }
            Some(0) => 0,
            Some(n) => {
                archetypes[i].set_lifetime(Some(n - 1));
                n - 1
            }
        };
        if remaining == 0 {
            destroyed.push(archetypes[i].ids().into());
            archetypes.swap_remove(i);
            // Don't advance `i`: re-examine whatever swap_remove moved here.
        } else {
            i += 1;
        }
    }
    destroyed
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
    fn empty_chunk_is_freed_after_its_lifespan() {
        let mut cache = ComponentCache::new();
        let comp = cache.register::<u32>(e(100));
        let item = cache.get(comp).unwrap();
        let mut ids: SmallVec<[Entity; MAX_COMPONENTS]> = SmallVec::new();
        ids.push(comp);
        let mut archetype = Archetype::new(ids);
        let mut alloc = ChunkAllocator::new();

        let (chunk_idx, row) = archetype.add_entity(e(1), &[item], &mut alloc);
        archetype.remove_entity(chunk_idx, row, &[item]);
        assert_eq!(archetype.chunks().len(), 1, "empty chunk isn't freed immediately");

        for _ in 0..MAX_CHUNK_LIFESPAN {
            sweep_chunks(&mut archetype, &mut alloc);
        }
        assert_eq!(archetype.chunks().len(), 0);
    }

    #[test]
    fn revival_before_expiry_cancels_countdown() {
        let mut cache = ComponentCache::new();
        let comp = cache.register::<u32>(e(100));
        let item = cache.get(comp).unwrap();
        let mut ids: SmallVec<[Entity; MAX_COMPONENTS]> = SmallVec::new();
        ids.push(comp);
        let mut archetype = Archetype::new(ids);
        let mut alloc = ChunkAllocator::new();

        let (chunk_idx, row) = archetype.add_entity(e(1), &[item], &mut alloc);
        archetype.remove_entity(chunk_idx, row, &[item]);
        sweep_chunks(&mut archetype, &mut alloc);
        assert!(archetype.chunk(0).lifetime().is_some());

        archetype.add_entity(e(2), &[item], &mut alloc);
        assert_eq!(archetype.chunk(0).lifetime(), None);
    }

    #[test]
    fn empty_archetype_is_destroyed_after_its_lifespan() {
        let mut cache = ComponentCache::new();
        let comp = cache.register::<u32>(e(100));
        let item = cache.get(comp).unwrap();
        let mut ids: SmallVec<[Entity; MAX_COMPONENTS]> = SmallVec::new();
        ids.push(comp);
        let mut archetype = Archetype::new(ids);
        let mut alloc = ChunkAllocator::new();

        let (chunk_idx, row) = archetype.add_entity(e(1), &[item], &mut alloc);
        archetype.remove_entity(chunk_idx, row, &[item]);

        let mut archetypes = vec![archetype];
        let mut destroyed = Vec::new();
        for _ in 0..=MAX_ARCHETYPE_LIFESPAN {
            destroyed = sweep_archetypes(&mut archetypes, &mut alloc);
        }
        assert_eq!(destroyed.len(), 1);
        assert!(archetypes.is_empty());
    }
}
