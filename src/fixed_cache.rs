use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// Number of neighbouring slots probed before an existing entry is evicted.
const MAX_PROBES: usize = 4;

/// Bounded cache with a fixed number of slots. Entries that collide beyond the probe window
/// evict the entry in their home slot, so memory never grows past the initial capacity.
pub struct FixedSizeCache<K, V> {
    slots: Mutex<Vec<Option<(K, V)>>>,
    mask: usize,
}

impl<K: Hash + Eq, V: Clone> FixedSizeCache<K, V> {
    /// Creates a cache whose capacity is `capacity` rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, 1 << 20).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
            mask: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn home(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let home = self.home(key);
        let slots = self.slots.lock();
        (0..MAX_PROBES.min(slots.len()))
            .map(|probe| (home + probe) & self.mask)
            .find_map(|index| match &slots[index] {
                Some((existing, value)) if existing == key => Some(value.clone()),
                _ => None,
            })
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs without the lock held; concurrent misses may compute the same value
    /// twice, the later insert wins.
    pub fn compute_if_absent(&self, key: K, compute: impl FnOnce(&K) -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute(&key);
        self.insert(key, value.clone());
        value
    }

    pub fn insert(&self, key: K, value: V) {
        let home = self.home(&key);
        let mut slots = self.slots.lock();
        let probes = MAX_PROBES.min(slots.len());
        let mut target = home;
        for probe in 0..probes {
            let index = (home + probe) & self.mask;
            match &slots[index] {
                Some((existing, _)) if *existing == key => {
                    target = index;
                    break;
                }
                None => {
                    target = index;
                    break;
                }
                Some(_) => {}
            }
        }
        slots[target] = Some((key, value));
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn computes_once_per_key() {
        let cache = FixedSizeCache::new(16);
        let calls = Cell::new(0);

        let first = cache.compute_if_absent("java/lang/String".to_string(), |key| {
            calls.set(calls.get() + 1);
            key.len()
        });
        let second = cache.compute_if_absent("java/lang/String".to_string(), |_| {
            calls.set(calls.get() + 1);
            0
        });

        assert_eq!(first, 16);
        assert_eq!(second, 16);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn never_grows_past_capacity() {
        let cache = FixedSizeCache::new(5);
        assert_eq!(cache.capacity(), 8);

        for value in 0..100 {
            cache.insert(value, value * 2);
        }

        assert!(cache.len() <= 8);
        assert_eq!(cache.get(&99), Some(198));
        cache.clear();
        assert!(cache.is_empty());
    }
}
