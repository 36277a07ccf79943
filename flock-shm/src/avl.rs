//! Balanced search tree over a fixed array, suitable for shared memory.
//!
//! Links are array indices with `-1` as the null encoding, free slots are
//! tracked in a ring buffer, and no heap allocation ever happens after
//! construction. Used for the safety-protocol neighbour table.

use crate::ring::Ring;
use crate::{Result, ShmError, FREE_RING_SLOTS};

const NULL: i32 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Node<K: Copy, V: Copy> {
    key: K,
    value: V,
    left: i32,
    right: i32,
    height: i32,
}

/// AVL tree over `N` array slots (`N` must stay below the free-ring bound).
#[repr(C)]
pub struct ArrayAvl<K: Copy + Ord + Default, V: Copy + Default, const N: usize> {
    free: Ring<i32, FREE_RING_SLOTS>,
    nodes: [Node<K, V>; N],
    root: i32,
    len: u32,
}

impl<K: Copy + Ord + Default, V: Copy + Default, const N: usize> ArrayAvl<K, V, N> {
    pub fn new() -> Result<Self> {
        let mut tree = ArrayAvl {
            free: Ring::new(N as u64)?,
            nodes: [Node::default(); N],
            root: NULL,
            len: 0,
        };
        tree.init()?;
        Ok(tree)
    }

    /// Prepares a zeroed tree for use (also the in-shm initialization path).
    pub fn init(&mut self) -> Result<()> {
        self.free.init(N as u64)?;
        for i in 0..N as i32 {
            self.free.push(i)?;
        }
        self.root = NULL;
        self.len = 0;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len as usize >= N
    }

    fn height(&self, idx: i32) -> i32 {
        if idx == NULL {
            0
        } else {
            self.nodes[idx as usize].height
        }
    }

    fn update_height(&mut self, idx: i32) {
        let h = 1 + self
            .height(self.nodes[idx as usize].left)
            .max(self.height(self.nodes[idx as usize].right));
        self.nodes[idx as usize].height = h;
    }

    fn balance_factor(&self, idx: i32) -> i32 {
        if idx == NULL {
            0
        } else {
            self.height(self.nodes[idx as usize].left) - self.height(self.nodes[idx as usize].right)
        }
    }

    fn rotate_right(&mut self, y: i32) -> i32 {
        let x = self.nodes[y as usize].left;
        let t2 = self.nodes[x as usize].right;
        self.nodes[x as usize].right = y;
        self.nodes[y as usize].left = t2;
        self.update_height(y);
        self.update_height(x);
        x
    }

    fn rotate_left(&mut self, x: i32) -> i32 {
        let y = self.nodes[x as usize].right;
        let t2 = self.nodes[y as usize].left;
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].right = t2;
        self.update_height(x);
        self.update_height(y);
        y
    }

    fn rebalance(&mut self, idx: i32) -> i32 {
        self.update_height(idx);
        let balance = self.balance_factor(idx);

        if balance > 1 {
            if self.balance_factor(self.nodes[idx as usize].left) < 0 {
                let new_left = self.rotate_left(self.nodes[idx as usize].left);
                self.nodes[idx as usize].left = new_left;
            }
            return self.rotate_right(idx);
        }
        if balance < -1 {
            if self.balance_factor(self.nodes[idx as usize].right) > 0 {
                let new_right = self.rotate_right(self.nodes[idx as usize].right);
                self.nodes[idx as usize].right = new_right;
            }
            return self.rotate_left(idx);
        }
        idx
    }

    fn insert_at(&mut self, idx: i32, key: K, value: V) -> Result<i32> {
        if idx == NULL {
            let new_idx = self.free.pop().ok_or(ShmError::TreeFull)?;
            self.nodes[new_idx as usize] = Node {
                key,
                value,
                left: NULL,
                right: NULL,
                height: 1,
            };
            self.len += 1;
            return Ok(new_idx);
        }

        if key < self.nodes[idx as usize].key {
            let new_left = self.insert_at(self.nodes[idx as usize].left, key, value)?;
            self.nodes[idx as usize].left = new_left;
        } else if key > self.nodes[idx as usize].key {
            let new_right = self.insert_at(self.nodes[idx as usize].right, key, value)?;
            self.nodes[idx as usize].right = new_right;
        } else {
            self.nodes[idx as usize].value = value;
            return Ok(idx);
        }

        Ok(self.rebalance(idx))
    }

    /// Inserts or replaces. Fails with `TreeFull` when all slots are taken.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let new_root = self.insert_at(self.root, key, value)?;
        self.root = new_root;
        Ok(())
    }

    fn find(&self, key: &K) -> i32 {
        let mut idx = self.root;
        while idx != NULL {
            let node = &self.nodes[idx as usize];
            if *key < node.key {
                idx = node.left;
            } else if *key > node.key {
                idx = node.right;
            } else {
                return idx;
            }
        }
        NULL
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find(key) != NULL
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.find(key);
        if idx == NULL {
            None
        } else {
            Some(&self.nodes[idx as usize].value)
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.find(key);
        if idx == NULL {
            None
        } else {
            Some(&mut self.nodes[idx as usize].value)
        }
    }

    fn min_index(&self, mut idx: i32) -> i32 {
        while self.nodes[idx as usize].left != NULL {
            idx = self.nodes[idx as usize].left;
        }
        idx
    }

    fn remove_at(&mut self, idx: i32, key: &K, removed: &mut Option<V>) -> Result<i32> {
        if idx == NULL {
            return Ok(NULL);
        }

        if *key < self.nodes[idx as usize].key {
            let new_left = self.remove_at(self.nodes[idx as usize].left, key, removed)?;
            self.nodes[idx as usize].left = new_left;
        } else if *key > self.nodes[idx as usize].key {
            let new_right = self.remove_at(self.nodes[idx as usize].right, key, removed)?;
            self.nodes[idx as usize].right = new_right;
        } else {
            if removed.is_none() {
                *removed = Some(self.nodes[idx as usize].value);
            }
            let left = self.nodes[idx as usize].left;
            let right = self.nodes[idx as usize].right;

            if left == NULL || right == NULL {
                let child = if left != NULL { left } else { right };
                self.free.push(idx).map_err(|_| {
                    ShmError::Corrupt("tree free list cannot take a released slot")
                })?;
                self.len -= 1;
                return Ok(child);
            }

            // Two children: pull up the in-order successor, then remove it
            // from the right subtree.
            let succ = self.min_index(right);
            let succ_key = self.nodes[succ as usize].key;
            let succ_value = self.nodes[succ as usize].value;
            self.nodes[idx as usize].key = succ_key;
            self.nodes[idx as usize].value = succ_value;
            let mut scratch = Some(succ_value);
            let new_right = self.remove_at(right, &succ_key, &mut scratch)?;
            self.nodes[idx as usize].right = new_right;
        }

        Ok(self.rebalance(idx))
    }

    /// Removes a key, returning its value when it was present.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>> {
        let mut removed = None;
        let new_root = self.remove_at(self.root, key, &mut removed)?;
        self.root = new_root;
        Ok(removed)
    }

    /// In-order traversal, strictly increasing in key.
    pub fn walk(&self, visit: &mut dyn FnMut(&K, &V)) {
        self.walk_at(self.root, visit);
    }

    fn walk_at(&self, idx: i32, visit: &mut dyn FnMut(&K, &V)) {
        if idx == NULL {
            return;
        }
        let node = &self.nodes[idx as usize];
        self.walk_at(node.left, visit);
        visit(&node.key, &node.value);
        self.walk_at(node.right, visit);
    }

    /// Collects keys whose values fail a keep-predicate (age-out scans).
    pub fn keys_where(&self, mut pred: impl FnMut(&K, &V) -> bool) -> Vec<K> {
        let mut out = Vec::new();
        self.walk(&mut |k, v| {
            if pred(k, v) {
                out.push(*k);
            }
        });
        out
    }

    /// Verifies structure, heights and balance; for tests and debug assertions.
    pub fn validate(&self) -> Result<()> {
        let mut count = 0u32;
        self.validate_at(self.root, &mut count, None, None)?;
        if count != self.len {
            return Err(ShmError::Corrupt("tree length does not match node count"));
        }
        Ok(())
    }

    fn validate_at(
        &self,
        idx: i32,
        count: &mut u32,
        lower: Option<K>,
        upper: Option<K>,
    ) -> Result<i32> {
        if idx == NULL {
            return Ok(0);
        }
        let node = &self.nodes[idx as usize];
        if let Some(lo) = lower {
            if node.key <= lo {
                return Err(ShmError::Corrupt("tree ordering violated"));
            }
        }
        if let Some(hi) = upper {
            if node.key >= hi {
                return Err(ShmError::Corrupt("tree ordering violated"));
            }
        }
        *count += 1;
        let lh = self.validate_at(node.left, count, lower, Some(node.key))?;
        let rh = self.validate_at(node.right, count, Some(node.key), upper)?;
        if (lh - rh).abs() > 1 {
            return Err(ShmError::Corrupt("tree balance violated"));
        }
        let h = 1 + lh.max(rh);
        if node.height != h {
            return Err(ShmError::Corrupt("stored height differs from computed height"));
        }
        Ok(h)
    }
}
