//! Interval lookup over 64-bit offsets
//!
//! [`IntervalMap`] is a treap: a binary search tree on the key that is also a
//! max-heap on a random per-node priority. Insertion rotates a new node up
//! while its priority beats its parent's; deletion rotates the node down
//! towards the higher-priority child until it is a leaf. Expected height is
//! O(log n) with no balancing metadata beyond the priority.
//!
//! The priority source is a constructor argument so tests can script it.
//! An absent child counts as priority `i32::MIN`, which is never generated.

use std::cmp::Ordering;

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

/// Priority of an absent child
const NULL_PRIORITY: i32 = i32::MIN;

type Link<V> = Option<Box<Node<V>>>;

struct Node<V> {
    key: i64,
    value: V,
    priority: i32,
    left: Link<V>,
    right: Link<V>,
}

fn priority<V>(link: &Link<V>) -> i32 {
    link.as_ref().map_or(NULL_PRIORITY, |n| n.priority)
}

fn rotate_left<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    match node.right.take() {
        Some(mut pivot) => {
            node.right = pivot.left.take();
            pivot.left = Some(node);
            pivot
        }
        None => node,
    }
}

fn rotate_right<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    match node.left.take() {
        Some(mut pivot) => {
            node.left = pivot.right.take();
            pivot.right = Some(node);
            pivot
        }
        None => node,
    }
}

/// Ordered map from `i64` offsets to values with exact, floor and ceiling lookup
pub struct IntervalMap<V, R = SmallRng> {
    root: Link<V>,
    len: usize,
    rng: R,
}

impl<V> IntervalMap<V> {
    /// Map seeded from the operating system
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_os_rng())
    }
}

impl<V> Default for IntervalMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, R: RngCore> IntervalMap<V, R> {
    /// Map drawing node priorities from `rng`
    pub fn with_rng(rng: R) -> Self {
        Self {
            root: None,
            len: 0,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Alias of [`IntervalMap::len`]
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Insert or replace; returns the previous value for `key`
    pub fn put(&mut self, key: i64, value: V) -> Option<V> {
        if let Some(node) = self.search_mut(key) {
            return Some(std::mem::replace(&mut node.value, value));
        }
        let node = Box::new(Node {
            key,
            value,
            priority: self.next_priority(),
            left: None,
            right: None,
        });
        let root = self.root.take();
        self.root = Some(Self::insert(root, node));
        self.len += 1;
        None
    }

    /// Exact lookup
    pub fn get(&self, key: i64) -> Option<&V> {
        let mut cursor = self.root.as_deref();
        while let Some(node) = cursor {
            match key.cmp(&node.key) {
                Ordering::Less => cursor = node.left.as_deref(),
                Ordering::Greater => cursor = node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.get(key).is_some()
    }

    /// Value with the greatest key `<= key`
    pub fn find_previous(&self, key: i64) -> Option<&V> {
        self.floor(key).map(|n| &n.value)
    }

    /// Value with the smallest key `>= key`
    pub fn find_next(&self, key: i64) -> Option<&V> {
        self.ceiling(key).map(|n| &n.value)
    }

    /// Key of the floor entry
    pub fn previous_key(&self, key: i64) -> Option<i64> {
        self.floor(key).map(|n| n.key)
    }

    /// Key of the ceiling entry
    pub fn next_key(&self, key: i64) -> Option<i64> {
        self.ceiling(key).map(|n| n.key)
    }

    /// Remove `key`; false if it was not present
    pub fn remove(&mut self, key: i64) -> bool {
        let mut removed = None;
        let root = self.root.take();
        self.root = Self::delete(root, key, &mut removed);
        if removed.is_some() {
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> Iter<'_, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(self.root.as_deref());
        iter
    }

    fn next_priority(&mut self) -> i32 {
        loop {
            let p = self.rng.next_u32() as i32;
            if p != NULL_PRIORITY {
                return p;
            }
        }
    }

    fn search_mut(&mut self, key: i64) -> Option<&mut Node<V>> {
        let mut cursor = self.root.as_deref_mut();
        while let Some(node) = cursor {
            match key.cmp(&node.key) {
                Ordering::Less => cursor = node.left.as_deref_mut(),
                Ordering::Greater => cursor = node.right.as_deref_mut(),
                Ordering::Equal => return Some(node),
            }
        }
        None
    }

    fn floor(&self, key: i64) -> Option<&Node<V>> {
        let mut best = None;
        let mut cursor = self.root.as_deref();
        while let Some(node) = cursor {
            match key.cmp(&node.key) {
                Ordering::Less => cursor = node.left.as_deref(),
                Ordering::Greater => {
                    best = Some(node);
                    cursor = node.right.as_deref();
                }
                Ordering::Equal => return Some(node),
            }
        }
        best
    }

    fn ceiling(&self, key: i64) -> Option<&Node<V>> {
        let mut best = None;
        let mut cursor = self.root.as_deref();
        while let Some(node) = cursor {
            match key.cmp(&node.key) {
                Ordering::Less => {
                    best = Some(node);
                    cursor = node.left.as_deref();
                }
                Ordering::Greater => cursor = node.right.as_deref(),
                Ordering::Equal => return Some(node),
            }
        }
        best
    }

    fn insert(link: Link<V>, node: Box<Node<V>>) -> Box<Node<V>> {
        let Some(mut current) = link else {
            return node;
        };
        if node.key < current.key {
            let left = Self::insert(current.left.take(), node);
            let rotate = left.priority > current.priority;
            current.left = Some(left);
            if rotate {
                rotate_right(current)
            } else {
                current
            }
        } else {
            let right = Self::insert(current.right.take(), node);
            let rotate = right.priority > current.priority;
            current.right = Some(right);
            if rotate {
                rotate_left(current)
            } else {
                current
            }
        }
    }

    fn delete(link: Link<V>, key: i64, removed: &mut Option<V>) -> Link<V> {
        let mut node = link?;
        match key.cmp(&node.key) {
            Ordering::Less => {
                node.left = Self::delete(node.left.take(), key, removed);
                Some(node)
            }
            Ordering::Greater => {
                node.right = Self::delete(node.right.take(), key, removed);
                Some(node)
            }
            Ordering::Equal => Self::sink(node, removed),
        }
    }

    /// Rotate `node` down to a leaf and drop it
    fn sink(node: Box<Node<V>>, removed: &mut Option<V>) -> Link<V> {
        if node.left.is_none() && node.right.is_none() {
            *removed = Some(node.value);
            return None;
        }
        if priority(&node.left) > priority(&node.right) {
            let mut top = rotate_right(node);
            top.right = top.right.take().and_then(|n| Self::sink(n, removed));
            Some(top)
        } else {
            let mut top = rotate_left(node);
            top.left = top.left.take().and_then(|n| Self::sink(n, removed));
            Some(top)
        }
    }
}

/// In-order iterator over `(key, &value)`
pub struct Iter<'a, V> {
    stack: Vec<&'a Node<V>>,
}

impl<'a, V> Iter<'a, V> {
    fn push_left(&mut self, mut cursor: Option<&'a Node<V>>) {
        while let Some(node) = cursor {
            self.stack.push(node);
            cursor = node.left.as_deref();
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (i64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        Some((node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Hands out a fixed list of priorities
    struct ScriptedRng {
        values: Vec<i32>,
        next: usize,
    }

    impl ScriptedRng {
        fn new(values: &[i32]) -> Self {
            Self {
                values: values.to_vec(),
                next: 0,
            }
        }
    }

    impl RngCore for ScriptedRng {
        fn next_u32(&mut self) -> u32 {
            let v = self.values[self.next];
            self.next += 1;
            v as u32
        }

        fn next_u64(&mut self) -> u64 {
            self.next_u32() as u64
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            for chunk in dst.chunks_mut(4) {
                let bytes = self.next_u32().to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    fn scripted(priorities: &[i32]) -> IntervalMap<i32, ScriptedRng> {
        IntervalMap::with_rng(ScriptedRng::new(priorities))
    }

    fn root<V, R>(map: &IntervalMap<V, R>) -> &Node<V> {
        map.root.as_deref().unwrap()
    }

    fn check_invariants<V>(link: &Link<V>, lo: Option<i64>, hi: Option<i64>) -> usize {
        let Some(node) = link else {
            return 0;
        };
        if let Some(lo) = lo {
            assert!(node.key > lo, "BST order violated at {}", node.key);
        }
        if let Some(hi) = hi {
            assert!(node.key < hi, "BST order violated at {}", node.key);
        }
        assert!(priority(&node.left) <= node.priority, "heap order violated");
        assert!(priority(&node.right) <= node.priority, "heap order violated");
        1 + check_invariants(&node.left, lo, Some(node.key))
            + check_invariants(&node.right, Some(node.key), hi)
    }

    #[test]
    fn test_empty() {
        let map: IntervalMap<i32> = IntervalMap::new();
        assert_eq!(map.size(), 0);
        assert!(map.is_empty());
        assert!(map.get(0).is_none());
        assert!(map.find_previous(0).is_none());
        assert!(map.find_next(0).is_none());
    }

    #[test]
    fn test_single() {
        let mut map = IntervalMap::new();
        map.put(1, 1);

        assert!(root(&map).left.is_none());
        assert!(root(&map).right.is_none());
        assert_eq!(map.len(), 1);

        assert_eq!(map.find_previous(0), None);
        assert_eq!(map.find_previous(1), Some(&1));
        assert_eq!(map.find_previous(2), Some(&1));
        assert_eq!(map.find_next(0), Some(&1));
        assert_eq!(map.find_next(1), Some(&1));
        assert_eq!(map.find_next(2), None);
    }

    #[test]
    fn test_rotation_on_higher_right_priority() {
        let mut map = scripted(&[0, 1, 2]);
        map.put(1, 1);
        map.put(2, 2);

        let r = root(&map);
        assert_eq!(r.value, 2);
        assert!(r.right.is_none());
        assert_eq!(r.left.as_ref().unwrap().value, 1);
        assert_eq!(map.len(), 2);

        assert_eq!(map.find_previous(0), None);
        assert_eq!(map.find_previous(1), Some(&1));
        assert_eq!(map.find_previous(3), Some(&2));
        assert_eq!(map.find_next(0), Some(&1));
        assert_eq!(map.find_next(2), Some(&2));
        assert_eq!(map.find_next(3), None);
    }

    #[test]
    fn test_no_rotation_on_lower_left_priority() {
        let mut map = scripted(&[2, 1]);
        map.put(2, 2);
        map.put(1, 1);

        let r = root(&map);
        assert_eq!(r.value, 2);
        assert!(r.right.is_none());
        assert_eq!(r.left.as_ref().unwrap().value, 1);
    }

    #[test]
    fn test_no_rotation_on_lower_right_priority() {
        let mut map = scripted(&[2, 1]);
        map.put(1, 1);
        map.put(2, 2);

        let r = root(&map);
        assert_eq!(r.value, 1);
        assert!(r.left.is_none());
        assert_eq!(r.right.as_ref().unwrap().value, 2);
    }

    #[test]
    fn test_rotation_on_higher_left_priority() {
        let mut map = scripted(&[1, 2]);
        map.put(2, 2);
        map.put(1, 1);

        let r = root(&map);
        assert_eq!(r.value, 1);
        assert!(r.left.is_none());
        assert_eq!(r.right.as_ref().unwrap().value, 2);
    }

    #[test]
    fn test_three_descending_priorities() {
        let mut map = scripted(&[3, 2, 1]);
        map.put(1, 1);
        map.put(3, 3);
        map.put(4, 4);

        let r = root(&map);
        assert_eq!(r.value, 1);
        assert!(r.left.is_none());
        let right = r.right.as_ref().unwrap();
        assert_eq!(right.value, 3);
        assert!(right.left.is_none());
        assert_eq!(right.right.as_ref().unwrap().value, 4);

        assert_eq!(map.find_previous(2), map.get(1));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_three_middle_priority_wins() {
        let mut map = scripted(&[1, 3, 1]);
        map.put(1, 1);
        map.put(3, 3);
        map.put(4, 4);

        let r = root(&map);
        assert_eq!(r.value, 3);
        assert_eq!(r.left.as_ref().unwrap().value, 1);
        assert_eq!(r.right.as_ref().unwrap().value, 4);
        assert_eq!(map.find_previous(2), map.get(1));
    }

    #[test]
    fn test_three_ascending_priorities() {
        let mut map = scripted(&[1, 2, 3]);
        map.put(1, 1);
        map.put(3, 3);
        map.put(4, 4);

        let r = root(&map);
        assert_eq!(r.value, 4);
        assert!(r.right.is_none());
        let left = r.left.as_ref().unwrap();
        assert_eq!(left.value, 3);
        assert!(left.right.is_none());
        assert_eq!(left.left.as_ref().unwrap().value, 1);
        assert_eq!(map.find_previous(2), map.get(1));
    }

    #[test]
    fn test_delete_root() {
        let mut map = scripted(&[1223151319, -411449891]);
        map.put(0x9800, 3);
        map.put(0x9000, 1);

        assert!(map.remove(0x9800));
        assert_eq!(map.get(0x9000), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_delete_missing_key() {
        let mut map = scripted(&[823337390, 189758945]);
        map.put(0x9800, 3);
        map.put(0x9000, 1);

        assert!(!map.remove(111));
        assert_eq!(map.len(), 2);
        assert!(map.remove(0x9800));
        assert_eq!(map.get(0x9000), Some(&1));
        assert!(!map.remove(0x9800));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_reserved_priority_skipped() {
        let mut map = scripted(&[i32::MIN, 7]);
        map.put(5, 5);
        assert_eq!(root(&map).priority, 7);
    }

    #[test]
    fn test_put_replaces_value() {
        let mut map = IntervalMap::new();
        assert_eq!(map.put(10, "a"), None);
        assert_eq!(map.put(10, "b"), Some("a"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(10), Some(&"b"));
        assert!(map.contains_key(10));
        map.clear();
        assert!(map.is_empty());
        assert!(!map.contains_key(10));
    }

    #[test]
    fn test_invariants_hold_for_random_inserts() {
        let mut map = IntervalMap::with_rng(SmallRng::seed_from_u64(0x5eed));
        let mut keys = SmallRng::seed_from_u64(42);
        for _ in 0..2000 {
            let key = (keys.next_u64() % 100_000) as i64 - 50_000;
            map.put(key, key * 2);
        }
        let counted = check_invariants(&map.root, None, None);
        assert_eq!(counted, map.len());
    }

    #[test]
    fn test_invariants_hold_after_removals() {
        let mut map = IntervalMap::with_rng(SmallRng::seed_from_u64(7));
        for key in 0..500 {
            map.put(key * 3, key);
        }
        for key in (0..500).step_by(2) {
            assert!(map.remove(key * 3));
        }
        assert_eq!(map.len(), 250);
        assert_eq!(check_invariants(&map.root, None, None), 250);
    }

    #[test]
    fn test_lookups_match_btreemap() {
        let mut map = IntervalMap::with_rng(SmallRng::seed_from_u64(99));
        let mut reference = BTreeMap::new();
        let mut keys = SmallRng::seed_from_u64(1234);
        for i in 0..1000 {
            let key = (keys.next_u32() % 10_000) as i64 * 512;
            map.put(key, i);
            reference.insert(key, i);
        }

        for probe in (-1024..5_200_000i64).step_by(4099) {
            assert_eq!(map.get(probe), reference.get(&probe));
            assert_eq!(
                map.find_previous(probe),
                reference.range(..=probe).next_back().map(|(_, v)| v)
            );
            assert_eq!(
                map.find_next(probe),
                reference.range(probe..).next().map(|(_, v)| v)
            );
        }

        let ordered: Vec<i64> = map.iter().map(|(k, _)| k).collect();
        let expected: Vec<i64> = reference.keys().copied().collect();
        assert_eq!(ordered, expected);
    }

    #[test]
    fn test_extreme_keys() {
        let mut map = IntervalMap::new();
        map.put(i64::MIN + 1, "low");
        map.put(i64::MAX, "high");
        assert_eq!(map.find_previous(0), Some(&"low"));
        assert_eq!(map.find_next(0), Some(&"high"));
        assert_eq!(map.previous_key(i64::MAX), Some(i64::MAX));
        assert_eq!(map.next_key(i64::MIN), Some(i64::MIN + 1));
    }
}
