use im::OrdMap;
use std::borrow::Borrow;

/// An immutable sorted map with structural sharing.
///
/// Every update returns a new map and leaves `self` untouched; the two share all unchanged
/// structure, so forking a map along an exploration branch costs O(log n). This is the backing
/// store of the pointer, alias, lock and usage states.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PersistentMap<K: Ord + Clone, V: Clone> {
    inner: OrdMap<K, V>,
}

impl<K: Ord + Clone, V: Clone> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self {
            inner: OrdMap::new(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> PersistentMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get(key)
    }

    /// The value for `key`, or `default` when it is absent.
    pub fn get_or<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.get(key).unwrap_or(default)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.inner.contains_key(key)
    }

    /// A copy of this map with `key` bound to `value`.
    pub fn put_and_copy(&self, key: K, value: V) -> Self {
        Self {
            inner: self.inner.update(key, value),
        }
    }

    /// A copy of this map without `key`.
    pub fn remove_and_copy<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self {
            inner: self.inner.without(key),
        }
    }

    /// Iterate over entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn updates_return_new_maps() {
        let empty: PersistentMap<&str, i32> = PersistentMap::new();
        let one = empty.put_and_copy("a", 1);
        let two = one.put_and_copy("b", 2);
        let replaced = two.put_and_copy("a", 10);
        let removed = replaced.remove_and_copy("b");

        assert!(empty.is_empty());
        assert_eq!(one.get("a"), Some(&1));
        assert_eq!(one.get("b"), None);
        assert_eq!(two.len(), 2);
        assert_eq!(two.get("a"), Some(&1));
        assert_eq!(replaced.get("a"), Some(&10));
        assert_eq!(removed.keys().copied().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(*removed.get_or("b", &-1), -1);
    }

    #[test]
    fn iteration_is_sorted() {
        let map: PersistentMap<i32, ()> = [5, 1, 3].into_iter().map(|k| (k, ())).collect();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, u16),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<u8>(), any::<u16>()).prop_map(|(k, v)| Op::Put(k, v)),
            any::<u8>().prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn snapshots_are_never_disturbed(ops in proptest::collection::vec(op(), 0..64)) {
            let mut snapshots = vec![PersistentMap::<u8, u16>::new()];
            let mut expected = vec![std::collections::BTreeMap::new()];
            for op in ops {
                let (next, mut model) = match (snapshots.last(), expected.last()) {
                    (Some(s), Some(m)) => (s.clone(), m.clone()),
                    _ => unreachable!(),
                };
                let next = match op {
                    Op::Put(k, v) => {
                        model.insert(k, v);
                        next.put_and_copy(k, v)
                    }
                    Op::Remove(k) => {
                        model.remove(&k);
                        next.remove_and_copy(&k)
                    }
                };
                snapshots.push(next);
                expected.push(model);
            }
            for (snapshot, model) in snapshots.iter().zip(expected.iter()) {
                let entries: Vec<_> = snapshot.iter().map(|(k, v)| (*k, *v)).collect();
                let wanted: Vec<_> = model.iter().map(|(k, v)| (*k, *v)).collect();
                prop_assert_eq!(entries, wanted);
            }
        }
    }
}
