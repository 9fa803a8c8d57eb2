//! Sharded per-key state with a constant-time key count.
//!
//! `DashMap::len` visits every shard, which is too costly to run on each
//! request. The count here is kept in an atomic that moves only when a key
//! is created or removed.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;

#[derive(Debug)]
pub(crate) struct KeyedState<V> {
    map: DashMap<String, V>,
    keys: AtomicUsize,
}

impl<V> KeyedState<V> {
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
            keys: AtomicUsize::new(0),
        }
    }

    /// Exclusive access to the state for `key`, created with `init` on first
    /// sight. The shard lock is held until the guard drops.
    pub(crate) fn get_or_insert_with<F>(&self, key: &str, init: F) -> RefMut<'_, String, V>
    where
        F: FnOnce() -> V,
    {
        if let Some(existing) = self.map.get_mut(key) {
            return existing;
        }

        match self.map.entry(key.to_owned()) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                self.keys.fetch_add(1, Ordering::Relaxed);
                entry.insert(init())
            }
        }
    }

    pub(crate) fn remove(&self, key: &str) {
        if self.map.remove(key).is_some() {
            self.keys.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.load(Ordering::Relaxed)
    }
}
