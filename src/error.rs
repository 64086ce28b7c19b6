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

//! Error types.
//!
//! Per spec §7, most error conditions here are programming mistakes and are
//! reported via `assert!`/`debug_assert!` rather than `Result` - capacity
//! overflow, structural change on a locked chunk, `(OnDelete, Error)`
//! cleanup violations. `EcsError` only covers the conditions the spec calls
//! out as legitimately recoverable: invalid handles and the few operations
//! that "fail silently".

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The entity handle's generation does not match the live record (or
    /// the index was never allocated).
    InvalidEntity,

    /// The id was not present on the entity (e.g. removing a component that
    /// isn't attached).
    ComponentNotFound,

    /// The target of `(rel, tgt)` already has another target and `rel` is
    /// `Exclusive`.
    ExclusiveViolation,

    /// Adding id `X` would combine with an existing id `Y` on the archetype
    /// where `(X, CantCombine, Y)` holds.
    CantCombineViolation,

    /// A component id still required via `Requires(X, Y)` cannot be
    /// deleted while `Y` is still depended upon.
    RequiredDependency,

    /// `del(entity)` was called on an id whose cleanup policy is
    /// `(OnDelete, Error)`.
    CleanupRuleViolation,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::InvalidEntity => write!(f, "invalid or stale entity handle"),
            EcsError::ComponentNotFound => write!(f, "id not present on entity"),
            EcsError::ExclusiveViolation => write!(f, "relation is exclusive but already has a target"),
            EcsError::CantCombineViolation => write!(f, "ids cannot combine on the same archetype"),
            EcsError::RequiredDependency => write!(f, "id is still required by a dependent component"),
            EcsError::CleanupRuleViolation => write!(f, "delete violates an (OnDelete, Error) rule"),
        }
    }
}

impl std::error::Error for EcsError {}

pub type Result<T> = std::result::Result<T, EcsError>;
