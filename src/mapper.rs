//! A small ordered bijection between a "real" scalar domain and a "virtual"
//! one, used to give the tracee deterministic stand-ins for kernel-assigned
//! values (inode numbers, mtimes) that would otherwise vary run to run.

use crate::errors::{Error, ErrorKind, Result};
use std::collections::HashMap;
use std::hash::Hash;

/// `ValueMapper<K, V>` is an ordered bijection from `K` to `V`: each key maps
/// to at most one value and vice versa, and once a key is inserted its value
/// never changes for as long as the key stays in the map.
///
/// The value for a fresh key is supplied by the caller at insertion time
/// (via a closure) rather than generated internally, so the same type backs
/// both the monotonic-counter inode registry and the clock-snapshot mtime
/// registry described in the data model.
#[derive(Debug, Default)]
pub struct ValueMapper<K, V>
where
    K: Eq + Hash + Copy,
    V: Eq + Hash + Copy,
{
    forward: HashMap<K, V>,
    backward: HashMap<V, K>,
}

impl<K, V> ValueMapper<K, V>
where
    K: Eq + Hash + Copy,
    V: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        ValueMapper {
            forward: HashMap::new(),
            backward: HashMap::new(),
        }
    }

    /// Returns the existing virtual value for `real` if already mapped,
    /// otherwise computes one with `make_value` and inserts both directions.
    ///
    /// `make_value` is only invoked on a miss, so a monotonic counter closure
    /// passed in by the inode registry only advances on genuinely new keys.
    pub fn add_real_with<F>(&mut self, real: K, make_value: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(&existing) = self.forward.get(&real) {
            return existing;
        }
        let value = make_value();
        self.forward.insert(real, value);
        self.backward.insert(value, real);
        value
    }

    pub fn get_virtual(&self, real: K) -> Result<V> {
        self.forward
            .get(&real)
            .copied()
            .ok_or_else(|| Error::kind(ErrorKind::LookupMissing))
    }

    pub fn get_real(&self, virtual_value: V) -> Result<K> {
        self.backward
            .get(&virtual_value)
            .copied()
            .ok_or_else(|| Error::kind(ErrorKind::LookupMissing))
    }

    pub fn has_real(&self, real: K) -> bool {
        self.forward.contains_key(&real)
    }

    pub fn has_virtual(&self, virtual_value: V) -> bool {
        self.backward.contains_key(&virtual_value)
    }

    /// Removes both directions for `real`. Does not recycle its virtual
    /// value: whatever counter produced it (if any) keeps advancing, so a
    /// later re-insertion of a real key that happens to reuse the same
    /// underlying kernel id still gets a fresh virtual id.
    pub fn erase_real(&mut self, real: K) -> Result<()> {
        match self.forward.remove(&real) {
            Some(value) => {
                self.backward.remove(&value);
                Ok(())
            }
            None => Err(Error::kind(ErrorKind::LookupMissing)),
        }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// The inode registry: real kernel inode numbers to dense virtual ids,
/// assigned in first-sighting order starting from `base`.
#[derive(Debug)]
pub struct InodeRegistry {
    map: ValueMapper<u64, u64>,
    next_id: u64,
}

impl InodeRegistry {
    pub fn new(base: u64) -> Self {
        InodeRegistry {
            map: ValueMapper::new(),
            next_id: base,
        }
    }

    /// Assigns (or returns the existing) virtual inode for `real`. The
    /// counter this draws from never decreases and is never rewound by
    /// `erase`, so virtual ids are never recycled (property 2 in the spec).
    pub fn add_real(&mut self, real: u64) -> u64 {
        let next_id = &mut self.next_id;
        self.map.add_real_with(real, || {
            let id = *next_id;
            *next_id += 1;
            id
        })
    }

    pub fn get_virtual(&self, real: u64) -> Result<u64> {
        self.map.get_virtual(real)
    }

    pub fn get_real(&self, virtual_id: u64) -> Result<u64> {
        self.map.get_real(virtual_id)
    }

    pub fn has_real(&self, real: u64) -> bool {
        self.map.has_real(real)
    }

    pub fn erase_real(&mut self, real: u64) -> Result<()> {
        self.map.erase_real(real)
    }
}

/// The mtime registry: real inode to the logical clock reading observed the
/// first time that inode was stat'd. Reads are idempotent by construction
/// (`add_real_with` only calls the closure on a miss), matching the
/// invariant that a virtual mtime stays put until something explicitly
/// bumps it.
///
/// Known limitation (documented rather than worked around, matching the
/// spec's treatment of the devRandom/devUrandom open counters): if two
/// distinct inodes are first observed within the same logical clock tick,
/// the reverse (virtual-mtime -> inode) direction only remembers the most
/// recent of the two. Nothing in this crate relies on that reverse lookup;
/// forward lookups (what the tracee actually observes) are unaffected.
#[derive(Debug)]
pub struct MtimeRegistry {
    map: ValueMapper<u64, u64>,
}

impl MtimeRegistry {
    pub fn new() -> Self {
        MtimeRegistry { map: ValueMapper::new() }
    }

    pub fn observe(&mut self, real_inode: u64, logical_now: u64) -> u64 {
        self.map.add_real_with(real_inode, || logical_now)
    }

    /// Bumps the mtime of an already-observed inode to `logical_now`
    /// (used when a write-side syscall should make the file look modified).
    pub fn bump(&mut self, real_inode: u64, logical_now: u64) {
        let _ = self.map.erase_real(real_inode);
        self.map.add_real_with(real_inode, || logical_now);
    }

    pub fn has_real(&self, real_inode: u64) -> bool {
        self.map.has_real(real_inode)
    }

    pub fn erase_real(&mut self, real_inode: u64) -> Result<()> {
        self.map.erase_real(real_inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bijection_round_trips() {
        let mut registry = InodeRegistry::new(1);
        let v = registry.add_real(555);
        assert_eq!(registry.get_real(v).unwrap(), 555);
        assert_eq!(registry.get_virtual(555).unwrap(), v);
    }

    #[test]
    fn virtual_ids_assigned_in_insertion_order_from_base() {
        let mut registry = InodeRegistry::new(1);
        assert_eq!(registry.add_real(10), 1);
        assert_eq!(registry.add_real(20), 2);
        // Repeated sighting of the same real inode does not consume a new id.
        assert_eq!(registry.add_real(10), 1);
        assert_eq!(registry.add_real(30), 3);
    }

    #[test]
    fn erasure_removes_both_directions_and_never_recycles() {
        let mut registry = InodeRegistry::new(1);
        let v1 = registry.add_real(7);
        registry.erase_real(7).unwrap();

        assert!(registry.get_virtual(7).is_err());
        assert!(registry.get_real(v1).is_err());

        let v2 = registry.add_real(7);
        assert_ne!(v1, v2);
        assert_eq!(v2, 2);
    }

    #[test]
    fn erase_of_absent_key_fails_lookup_missing() {
        let mut registry = InodeRegistry::new(1);
        let err = registry.erase_real(42).unwrap_err();
        assert_eq!(err.get_kind(), ErrorKind::LookupMissing);
    }

    #[test]
    fn mtime_registry_is_stable_across_repeat_observations() {
        let mut mtimes = MtimeRegistry::new();
        let first = mtimes.observe(9, 1000);
        let second = mtimes.observe(9, 2000);
        assert_eq!(first, second);
        assert_eq!(first, 1000);
    }

    #[test]
    fn mtime_registry_bump_changes_value() {
        let mut mtimes = MtimeRegistry::new();
        mtimes.observe(9, 1000);
        mtimes.bump(9, 5000);
        assert_eq!(mtimes.observe(9, 9999), 5000);
    }
}
