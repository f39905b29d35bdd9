//! Reference-counted cache of GPU handles.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// A cached handle and the number of outstanding references to it.
#[derive(Debug)]
pub struct CacheEntry<H> {
    pub handle: H,
    pub count: u32,
}

/// Maps keys to backend handles. A handle is created by the first
/// [`ensure`](ResourceCache::ensure) of its key and destroyed by the matching
/// last [`release`](ResourceCache::release).
#[derive(Debug)]
pub struct ResourceCache<K, H> {
    entries: HashMap<K, CacheEntry<H>>,
}

impl<K, H> Default for ResourceCache<K, H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, H> ResourceCache<K, H>
where
    K: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference to `key`, creating its handle with `factory` if no
    /// reference is outstanding. A failing factory leaves the cache untouched.
    pub fn ensure<F>(&mut self, key: K, factory: F) -> anyhow::Result<&H>
    where
        F: FnOnce(&K) -> anyhow::Result<H>,
    {
        let entry = match self.entries.entry(key) {
            std::collections::hash_map::Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.count += 1;
                entry
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let handle = factory(&key)?;
                log::debug!("created cached resource for {key:?}");
                vacant.insert(CacheEntry { handle, count: 1 })
            }
        };
        Ok(&entry.handle)
    }

    /// Drop a reference to `key`; the last one hands the handle to
    /// `destructor` and removes the entry.
    ///
    /// # Panics
    ///
    /// If no reference to `key` is outstanding.
    pub fn release<F>(&mut self, key: &K, destructor: F)
    where
        F: FnOnce(H),
    {
        let Some(entry) = self.entries.get_mut(key) else {
            panic!("released {key:?} without an outstanding reference");
        };
        entry.count -= 1;
        if entry.count == 0 {
            if let Some(entry) = self.entries.remove(key) {
                log::debug!("destroying cached resource for {key:?}");
                destructor(entry.handle);
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&H> {
        self.entries.get(key).map(|entry| &entry.handle)
    }

    /// Outstanding references to `key`, 0 if it is not cached.
    pub fn use_count(&self, key: &K) -> u32 {
        self.entries.get(key).map_or(0, |entry| entry.count)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry regardless of its count.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, CacheEntry<H>)> + '_ {
        self.entries.drain()
    }
}
