use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const BITS: usize = 5;
const FANOUT: usize = 1 << BITS;
const MAX_DEPTH: usize = 12;     // 12 * 5 bits of the 64-bit hash
const LEAF_MAX: usize = 16;      // Leaves above this split, unless already at MAX_DEPTH

#[derive(Clone)]
struct Entry<K, V> {
    hash: u64,
    key: K,
    value: V,
}

#[derive(Clone)]
enum Node<K, V> {
    Leaf(Vec<Entry<K, V>>),
    Branch(Box<[Option<Arc<Node<K, V>>>; FANOUT]>),
}

fn hash_of<Q: Hash + ?Sized>(key: &Q) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn slot(hash: u64, depth: usize) -> usize {
    ((hash >> (depth * BITS)) as usize) & (FANOUT - 1)
}

/// Hash trie with `Arc`-shared nodes
/// Clone is O(1); a mutation copies only the nodes on the path to its key,
/// so a snapshot holding the old map never forces a full copy.
pub struct PersistentMap<K, V> {
    root: Arc<Node<K, V>>,
    len: usize,
}

impl<K, V> PersistentMap<K, V> {
    pub fn new() -> Self {
        PersistentMap {
            root: Arc::new(Node::Leaf(Vec::new())),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries in no particular order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: vec![&*self.root],
            leaf: Default::default(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_of(key);
        let mut node = &*self.root;
        let mut depth = 0;
        loop {
            match node {
                Node::Leaf(entries) => {
                    return entries.iter()
                        .find(|e| e.hash == hash && e.key.borrow() == key)
                        .map(|e| &e.value);
                }
                Node::Branch(children) => {
                    node = children[slot(hash, depth)].as_deref()?;
                    depth += 1;
                }
            }
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Returns the previous value of `key`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        let hash = hash_of(&key);
        upsert(&mut self.root, hash, 0, key, &mut self.len, move || value);
        None
    }

    /// Mutable access to the value of `key`, inserting `make()` if absent.
    pub fn get_or_insert_with<F: FnOnce() -> V>(&mut self, key: K, make: F) -> &mut V {
        let hash = hash_of(&key);
        upsert(&mut self.root, hash, 0, key, &mut self.len, make)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.contains_key(key) {
            return None;
        }
        find_mut(&mut self.root, hash_of(key), 0, key)
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.contains_key(key) {
            return None;
        }
        let removed = remove(&mut self.root, hash_of(key), 0, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }
}

/// Finds or creates the entry for `key`; `make` runs only for a new entry.
fn upsert<'a, K, V, F>(
    node: &'a mut Arc<Node<K, V>>,
    hash: u64,
    depth: usize,
    key: K,
    len: &mut usize,
    make: F,
) -> &'a mut V
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: FnOnce() -> V,
{
    let split = match &**node {
        Node::Leaf(entries) => {
            depth < MAX_DEPTH
                && entries.len() >= LEAF_MAX
                && !entries.iter().any(|e| e.hash == hash && e.key == key)
        }
        Node::Branch(_) => false,
    };
    if split {
        let node_mut = Arc::make_mut(node);
        if let Node::Leaf(entries) = node_mut {
            let entries = std::mem::take(entries);
            *node_mut = split_leaf(entries, depth);
        }
    }

    match Arc::make_mut(node) {
        Node::Leaf(entries) => {
            let pos = match entries.iter().position(|e| e.hash == hash && e.key == key) {
                Some(pos) => pos,
                None => {
                    entries.push(Entry { hash, key, value: make() });
                    *len += 1;
                    entries.len() - 1
                }
            };
            &mut entries[pos].value
        }
        Node::Branch(children) => {
            let child = children[slot(hash, depth)]
                .get_or_insert_with(|| Arc::new(Node::Leaf(Vec::new())));
            upsert(child, hash, depth + 1, key, len, make)
        }
    }
}

fn split_leaf<K, V>(entries: Vec<Entry<K, V>>, depth: usize) -> Node<K, V> {
    let mut buckets: [Vec<Entry<K, V>>; FANOUT] = std::array::from_fn(|_| Vec::new());
    for entry in entries {
        buckets[slot(entry.hash, depth + 1)].push(entry);
    }
    let mut children: Box<[Option<Arc<Node<K, V>>>; FANOUT]> = Box::new(std::array::from_fn(|_| None));
    for (i, bucket) in buckets.into_iter().enumerate() {
        if !bucket.is_empty() {
            children[i] = Some(Arc::new(Node::Leaf(bucket)));
        }
    }
    Node::Branch(children)
}

fn find_mut<'a, K, V, Q>(node: &'a mut Arc<Node<K, V>>, hash: u64, depth: usize, key: &Q) -> Option<&'a mut V>
where
    K: Borrow<Q> + Clone,
    V: Clone,
    Q: Eq + ?Sized,
{
    match Arc::make_mut(node) {
        Node::Leaf(entries) => entries.iter_mut()
            .find(|e| e.hash == hash && e.key.borrow() == key)
            .map(|e| &mut e.value),
        Node::Branch(children) => {
            let child = children[slot(hash, depth)].as_mut()?;
            find_mut(child, hash, depth + 1, key)
        }
    }
}

fn remove<K, V, Q>(node: &mut Arc<Node<K, V>>, hash: u64, depth: usize, key: &Q) -> Option<V>
where
    K: Borrow<Q> + Clone,
    V: Clone,
    Q: Eq + ?Sized,
{
    match Arc::make_mut(node) {
        Node::Leaf(entries) => {
            let pos = entries.iter().position(|e| e.hash == hash && e.key.borrow() == key)?;
            Some(entries.swap_remove(pos).value)
        }
        Node::Branch(children) => {
            let child_slot = &mut children[slot(hash, depth)];
            let child = child_slot.as_mut()?;
            let removed = remove(child, hash, depth + 1, key);
            if matches!(&**child, Node::Leaf(entries) if entries.is_empty()) {
                *child_slot = None;
            }
            removed
        }
    }
}

pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    leaf: std::slice::Iter<'a, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.leaf.next() {
                return Some((&entry.key, &entry.value));
            }
            match self.stack.pop()? {
                Node::Leaf(entries) => self.leaf = entries.iter(),
                Node::Branch(children) => self.stack.extend(children.iter().flatten().map(|c| &**c)),
            }
        }
    }
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        PersistentMap {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> PartialEq for PersistentMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Hash + Eq + Clone, V: Clone + Eq> Eq for PersistentMap<K, V> {}

impl<K: Hash + Eq + Clone, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PersistentMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_a_map_past_many_splits() {
        let mut map = PersistentMap::new();
        for i in 0..5000u64 {
            assert_eq!(map.insert(i, i * 2), None);
        }
        assert_eq!(map.len(), 5000);
        assert_eq!(map.insert(7, 0), Some(14));
        assert_eq!(map.get(&7), Some(&0));
        assert_eq!(map.get(&5000), None);

        *map.get_mut(&9).unwrap() += 1;
        assert_eq!(map.get(&9), Some(&19));
        *map.get_or_insert_with(6000, || 1) += 1;
        assert_eq!(map.get(&6000), Some(&2));

        for i in 0..2500u64 {
            assert!(map.remove(&i).is_some());
        }
        assert_eq!(map.remove(&0), None);
        assert_eq!(map.len(), 2501);
        assert_eq!(map.iter().count(), 2501);
        assert!(map.keys().all(|k| *k >= 2500));
    }

    #[test]
    fn clones_are_unaffected_by_later_writes() {
        let mut map: PersistentMap<String, u32> = (0..100).map(|i| (format!("term{}", i), i)).collect();
        let snapshot = map.clone();

        map.insert("term5".to_string(), 500);
        map.remove("term6");
        map.insert("new".to_string(), 1);

        assert_eq!(snapshot.get("term5"), Some(&5));
        assert_eq!(snapshot.get("term6"), Some(&6));
        assert!(!snapshot.contains_key("new"));
        assert_eq!(snapshot.len(), 100);
        assert_eq!(map.get("term5"), Some(&500));
        assert_ne!(map, snapshot);
    }

    #[test]
    fn writes_copy_only_the_touched_path() {
        let mut map: PersistentMap<u64, u64> = (0..10_000).map(|i| (i, i)).collect();
        let snapshot = map.clone();
        map.insert(42, 0);

        // Every top-level subtree except the one holding 42 is still shared.
        let (Node::Branch(old), Node::Branch(new)) = (&*snapshot.root, &*map.root) else {
            panic!("root should have split");
        };
        let touched = slot(hash_of(&42u64), 0);
        for i in 0..FANOUT {
            match (&old[i], &new[i]) {
                (Some(a), Some(b)) => assert_eq!(Arc::ptr_eq(a, b), i != touched),
                (None, None) => {}
                _ => panic!("slot {} changed shape", i),
            }
        }
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a: PersistentMap<u32, u32> = (0..300).map(|i| (i, i)).collect();
        let b: PersistentMap<u32, u32> = (0..300).rev().map(|i| (i, i)).collect();
        assert_eq!(a, b);
    }
}
