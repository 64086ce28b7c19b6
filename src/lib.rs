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

//! gaia-ecs-core - an archetype-based Entity Component System core.
//!
//! Entities are packed 64-bit ids that can also serve as components, tags,
//! relations, or relationship targets. Components live in per-archetype
//! chunks of contiguous memory; a bytecode-compiled query engine matches
//! archetypes against `All`/`Any`/`Not` terms, including relationship
//! wildcards.

pub mod archetype;
pub mod chunk;
pub mod chunk_alloc;
pub mod component;
pub mod entity_table;
pub mod error;
pub mod gc;
pub mod id;
pub mod limits;
pub mod query;
pub mod reflection;
pub mod relationship;
pub mod world;

pub use component::{Bundle, Component, ComponentCache};
pub use error::{EcsError, Result};
pub use id::{Entity, EntityKind, WILDCARD};
pub use query::{QueryEngine, Term};
pub use reflection::Soa;
pub use relationship::CleanupPolicy;
pub use world::{QueryBuilder, QueryDesc, World};
