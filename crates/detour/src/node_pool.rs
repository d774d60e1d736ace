//! Search nodes for the path queries
//!
//! Nodes live in a fixed size pool and are looked up by `(PolyRef, state)`
//! through a hash table. Parents are stored as pool indices, so a search
//! tree never holds references into the pool.

use crate::PolyRef;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
        /// Parent of the node is not adjacent. Found using raycast.
        const PARENT_DETACHED = 0x04;
    }
}

/// Maximum number of states a polygon may be visited with
pub const DT_MAX_STATES_PER_NODE: u8 = 4;

/// A node of the search graph
#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    /// Position of the node
    pub pos: [f32; 3],
    /// Cost from previous node to current node
    pub cost: f32,
    /// Cost up to the node plus heuristic
    pub total: f32,
    pub parent: Option<usize>,
    /// Extra state of the node, a polygon can be visited in several states
    pub state: u8,
    pub flags: NodeFlags,
    pub id: PolyRef,
}

fn hash_ref(r: PolyRef) -> u32 {
    let mut a = r.id();
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a
}

/// Fixed capacity store of search nodes
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
    max_nodes: usize,
    hash_mask: u32,
}

impl NodePool {
    /// Creates a pool of `max_nodes` nodes. `hash_size` is rounded up to a
    /// power of two.
    pub fn new(max_nodes: usize, hash_size: usize) -> Self {
        let hash_size = recast_common::next_pow2(hash_size.max(1) as u32) as usize;
        Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![None; hash_size],
            next: Vec::with_capacity(max_nodes),
            max_nodes,
            hash_mask: hash_size as u32 - 1,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.next.clear();
        self.first.fill(None);
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn bucket(&self, id: PolyRef) -> usize {
        (hash_ref(id) & self.hash_mask) as usize
    }

    /// Index of the node for `(id, state)`, allocating it if needed.
    /// Returns `None` when the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<usize> {
        if let Some(i) = self.find_node(id, state) {
            return Some(i);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let i = self.nodes.len();
        self.nodes.push(Node {
            id,
            state,
            ..Default::default()
        });
        let bucket = self.bucket(id);
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(i);
        Some(i)
    }

    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<usize> {
        let mut cur = self.first[self.bucket(id)];
        while let Some(i) = cur {
            let n = &self.nodes[i];
            if n.id == id && n.state == state {
                return Some(i);
            }
            cur = self.next[i];
        }
        None
    }

    /// All nodes of `id`, in any state
    pub fn find_nodes(&self, id: PolyRef) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.first[self.bucket(id)];
        while let Some(i) = cur {
            if self.nodes[i].id == id {
                out.push(i);
            }
            cur = self.next[i];
        }
        out
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn node_mut(&mut self, i: usize) -> &mut Node {
        &mut self.nodes[i]
    }
}

/// Binary min-heap of node indices ordered by [`Node::total`]
#[derive(Debug, Default)]
pub struct NodeQueue {
    heap: Vec<usize>,
}

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn top(&self) -> Option<usize> {
        self.heap.first().copied()
    }

    pub fn push(&mut self, pool: &NodePool, node: usize) {
        self.heap.push(node);
        self.bubble_up(pool, self.heap.len() - 1);
    }

    pub fn pop(&mut self, pool: &NodePool) -> Option<usize> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.trickle_down(pool, 0);
        }
        Some(top)
    }

    /// Restores the heap order after the total of `node` decreased
    pub fn modify(&mut self, pool: &NodePool, node: usize) {
        if let Some(i) = self.heap.iter().position(|&n| n == node) {
            self.bubble_up(pool, i);
        }
    }

    fn bubble_up(&mut self, pool: &NodePool, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if pool.node(self.heap[parent]).total <= pool.node(self.heap[i]).total {
                break;
            }
            self.heap.swap(parent, i);
            i = parent;
        }
    }

    fn trickle_down(&mut self, pool: &NodePool, mut i: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && pool.node(self.heap[right]).total < pool.node(self.heap[left]).total {
                right
            } else {
                left
            };
            if pool.node(self.heap[i]).total <= pool.node(self.heap[child]).total {
                break;
            }
            self.heap.swap(i, child);
            i = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_node_reuses_entries() {
        let mut pool = NodePool::new(4, 2);
        let a = pool.get_node(PolyRef::new(7), 0).unwrap();
        let b = pool.get_node(PolyRef::new(7), 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.get_node(PolyRef::new(7), 0), Some(a));
        assert_eq!(pool.find_nodes(PolyRef::new(7)).len(), 2);
        assert_eq!(pool.find_node(PolyRef::new(8), 0), None);
        assert_eq!(pool.node_count(), 2);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = NodePool::new(2, 4);
        assert!(pool.get_node(PolyRef::new(1), 0).is_some());
        assert!(pool.get_node(PolyRef::new(2), 0).is_some());
        assert!(pool.get_node(PolyRef::new(3), 0).is_none());

        pool.clear();
        assert_eq!(pool.node_count(), 0);
        assert!(pool.get_node(PolyRef::new(3), 0).is_some());
    }

    #[test]
    fn test_queue_orders_by_total() {
        let mut pool = NodePool::new(8, 8);
        let mut queue = NodeQueue::new(8);
        for (id, total) in [(1, 5.0), (2, 1.0), (3, 3.0), (4, 4.0)] {
            let i = pool.get_node(PolyRef::new(id), 0).unwrap();
            pool.node_mut(i).total = total;
            queue.push(&pool, i);
        }

        // Lowering a total moves the node to the front.
        let i = pool.find_node(PolyRef::new(1), 0).unwrap();
        pool.node_mut(i).total = 0.5;
        queue.modify(&pool, i);

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop(&pool))
            .map(|i| pool.node(i).id.id())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(queue.is_empty());
    }
}
