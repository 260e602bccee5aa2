//! Small collection-reshaping helpers shared across the store and orchestrators.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Converts a `Vec` into a `HashMap` keyed by `key_fn`.
#[inline]
pub fn vec_to_map<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    items.into_iter().map(|item| (key_fn(&item), item)).collect()
}

/// Converts a `Vec` into a `HashMap` with separate key and value extractors.
#[inline]
pub fn vec_to_map_with<T, K, V, KF, VF>(items: Vec<T>, key_fn: KF, value_fn: VF) -> HashMap<K, V>
where
    K: Eq + Hash,
    KF: Fn(&T) -> K,
    VF: Fn(&T) -> V,
{
    items.into_iter().map(|item| (key_fn(&item), value_fn(&item))).collect()
}

/// Groups a `Vec` by `key_fn`, preserving insertion order within each group.
#[inline]
pub fn group_by<T, K, F>(items: Vec<T>, key_fn: F) -> HashMap<K, Vec<T>>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut map: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        map.entry(key_fn(&item)).or_default().push(item);
    }
    map
}

/// Deduplicates while preserving first-seen order.
#[inline]
pub fn unique_ordered<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

/// Returns `(to_add, to_remove)`: items in `new_items` but not `current`, and
/// items in `current` but not `new_items`.
pub fn diff_sets<T: Eq + Hash + Clone>(current: &[T], new_items: &[T]) -> (Vec<T>, Vec<T>) {
    let current_set: HashSet<_> = current.iter().cloned().collect();
    let new_set: HashSet<_> = new_items.iter().cloned().collect();

    let to_add: Vec<T> = new_set.difference(&current_set).cloned().collect();
    let to_remove: Vec<T> = current_set.difference(&new_set).cloned().collect();

    (to_add, to_remove)
}

pub trait IteratorExt: Iterator {
    fn filter_map_some<B, F>(self, f: F) -> impl Iterator<Item = B>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> Option<B>;
}

impl<I: Iterator> IteratorExt for I {
    #[inline]
    fn filter_map_some<B, F>(self, f: F) -> impl Iterator<Item = B>
    where
        F: FnMut(Self::Item) -> Option<B>,
    {
        self.filter_map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_by_preserves_insertion_order() {
        let items = vec![1, 2, 3, 4, 5];
        let grouped = group_by(items, |n| n % 2);
        assert_eq!(grouped[&0], vec![2, 4]);
        assert_eq!(grouped[&1], vec![1, 3, 5]);
    }

    #[test]
    fn diff_sets_computes_both_directions() {
        let current = vec![1, 2, 3];
        let new_items = vec![2, 3, 4];
        let (mut to_add, mut to_remove) = diff_sets(&current, &new_items);
        to_add.sort();
        to_remove.sort();
        assert_eq!(to_add, vec![4]);
        assert_eq!(to_remove, vec![1]);
    }
}
