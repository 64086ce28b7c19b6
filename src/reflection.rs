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

//! Compile-time struct-to-tuple decomposition used to derive SoA layout.
//!
//! A component that wants structure-of-arrays storage implements [`Soa`],
//! which exposes the byte size of each field in declaration order. The
//! chunk allocates one contiguous sub-array per field instead of one array
//! of whole structs (spec §4.2). Components that don't implement `Soa`
//! (the default, via the blanket impl) fall back to plain AoS storage -
//! this is the "runtime reflection fallback" spec §9 allows for non-SoA
//! data.

/// At most this many fields may participate in an SoA decomposition
/// (spec §3: "SoA arity (0..15)").
pub const MAX_SOA_FIELDS: usize = 15;

/// Describes how a component type decomposes into per-field sub-arrays.
///
/// There is deliberately no blanket implementation: a component is AoS by
/// default (registered with [`crate::component::ComponentCache::register`])
/// and opts into SoA storage by implementing `Soa` and registering with
/// [`crate::component::ComponentCache::register_soa`]. Implement this by
/// hand or via [`impl_soa`].
pub trait Soa: Sized + 'static {
    /// Byte size of each field, in declaration order.
    const FIELD_SIZES: &'static [usize];

    /// Required alignment for each field's sub-array. Defaults to the
    /// type's own alignment.
    fn field_alignment() -> usize {
        std::mem::align_of::<Self>()
    }
}

/// Implements [`Soa`] for a plain-old-data struct by listing its fields.
///
/// ```ignore
/// struct Position { x: f32, y: f32, z: f32 }
/// impl_soa!(Position, [x: f32, y: f32, z: f32]);
/// ```
#[macro_export]
macro_rules! impl_soa {
    ($t:ty, [$($field:ident : $ft:ty),+ $(,)?]) => {
        impl $crate::reflection::Soa for $t {
            const FIELD_SIZES: &'static [usize] = &[$(std::mem::size_of::<$ft>()),+];
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Vec3Like {
        #[allow(dead_code)]
        x: f32,
        #[allow(dead_code)]
        y: f32,
        #[allow(dead_code)]
        z: f32,
    }
    impl_soa!(Vec3Like, [x: f32, y: f32, z: f32]);

    #[test]
    fn derived_soa_reports_field_sizes() {
        assert_eq!(Vec3Like::FIELD_SIZES, &[4, 4, 4]);
        assert_eq!(Vec3Like::FIELD_SIZES.len(), 3);
    }
}
