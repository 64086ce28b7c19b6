//! Compile-time constants shared across the storage and query engine.
//!
//! These are the core's only "configuration" (spec §6: no environment or
//! CLI surface at this layer).

/// Maximum number of ids (components, pairs, tags) a single archetype may
/// carry (spec §3).
pub const MAX_COMPONENTS: usize = 32;

/// Small chunk memory block size, in bytes.
pub const CHUNK_BLOCK_SIZE_SMALL: usize = 8 * 1024;

/// Large chunk memory block size, in bytes. Archetypes whose per-row data
/// doesn't comfortably fit the small class are promoted here (spec §4.3).
pub const CHUNK_BLOCK_SIZE_LARGE: usize = 16 * 1024;

/// Maximum number of blocks tracked by a single allocator page (spec §4.1).
pub const MAX_BLOCKS_PER_PAGE: usize = 62;

/// Bytes reserved at the start of every block to store the owning page's
/// address, so `free(ptr)` can recover it (spec §4.1).
pub const MEMORY_BLOCK_USABLE_OFFSET: usize = std::mem::size_of::<usize>();

/// Ticks an empty archetype survives before being destroyed (spec §4.3/§4.7).
pub const MAX_ARCHETYPE_LIFESPAN: u32 = 4;

/// Ticks an empty chunk survives before being freed (spec §4.7).
pub const MAX_CHUNK_LIFESPAN: u32 = 2;

/// Default bound on defragmentation work performed per world tick
/// (spec §4.7, `defragEntitiesPerTick`).
pub const DEFAULT_DEFRAG_ENTITIES_PER_TICK: usize = 16;

/// Maximum structural-change lock depth on a single chunk (spec §5).
pub const MAX_CHUNK_LOCKS: u8 = 7;

/// Maximum `Is`-inheritance traversal depth, bounding pathological chains
/// (spec §9 design notes).
pub const MAX_IS_TRAVERSAL_DEPTH: usize = 64;
