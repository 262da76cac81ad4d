//! Rough accounting of the dynamic memory held by the pool's containers.
//!
//! These are deliberately coarse per-element estimates, not allocator truth.
//! They only need two properties: they move monotonically with element
//! counts (so eviction loops terminate), and they are cheap to maintain
//! incrementally.

use std::mem;

const PTR: usize = mem::size_of::<usize>();

/// Estimated heap usage of a hash map with `len` entries.
pub(crate) fn hash_map<K, V>(len: usize) -> usize {
    len * (mem::size_of::<K>() + mem::size_of::<V>() + 3 * PTR)
}

/// Estimated heap usage of a B-tree map with `len` entries.
pub(crate) fn btree_map<K, V>(len: usize) -> usize {
    len * (mem::size_of::<K>() + mem::size_of::<V>() + 2 * PTR)
}

/// Estimated heap usage of a B-tree set with `len` elements.
pub(crate) fn btree_set<T>(len: usize) -> usize {
    len * (mem::size_of::<T>() + 2 * PTR)
}

/// Estimated heap usage of a contiguous buffer with `len` elements.
pub(crate) fn contiguous<T>(len: usize) -> usize {
    len * mem::size_of::<T>()
}

/// The incremental cost of adding one element to a B-tree set of `T`.
///
/// Used to keep a cached usage total in sync while link sets change, without
/// re-measuring whole containers.
pub(crate) const fn btree_set_node<T>() -> usize {
    mem::size_of::<T>() + 2 * PTR
}
