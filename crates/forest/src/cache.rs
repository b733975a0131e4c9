//! Bounded LRU node cache with lock-free optimistic reads on the hit path.
//!
//! Each owner slot carries a 64-bit tag: the lowest bit is 0 while a writer
//! is mid-transition and 1 once the slot is stable. Readers load the tag,
//! the id, and the node, then re-check the tag; a transition or a mismatch
//! means a concurrent writer interfered and the reader must retry under the
//! lock via the id index instead of trusting its position hint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::node::Node;
use crate::node_id::{NodeId, NodeReference};

struct Owner {
    tag: AtomicU64,
    id: AtomicU64,
    node: Mutex<Option<Node>>,
}

impl Owner {
    fn empty() -> Self {
        Self {
            tag: AtomicU64::new(1),
            id: AtomicU64::new(NodeId::EMPTY.as_u64()),
            node: Mutex::new(None),
        }
    }

    fn is_stable(tag: u64) -> bool {
        tag & 1 == 1
    }
}

#[derive(Default)]
struct LruList {
    prev: Vec<u32>,
    next: Vec<u32>,
    head: u32,
    tail: u32,
    present: Vec<bool>,
}

const NIL: u32 = u32::MAX;

impl LruList {
    fn new(capacity: usize) -> Self {
        Self {
            prev: vec![NIL; capacity],
            next: vec![NIL; capacity],
            head: NIL,
            tail: NIL,
            present: vec![false; capacity],
        }
    }

    fn unlink(&mut self, slot: u32) {
        let p = self.prev[slot as usize];
        let n = self.next[slot as usize];
        if p != NIL {
            self.next[p as usize] = n;
        } else {
            self.head = n;
        }
        if n != NIL {
            self.prev[n as usize] = p;
        } else {
            self.tail = p;
        }
        self.present[slot as usize] = false;
    }

    fn push_front(&mut self, slot: u32) {
        self.prev[slot as usize] = NIL;
        self.next[slot as usize] = self.head;
        if self.head != NIL {
            self.prev[self.head as usize] = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
        self.present[slot as usize] = true;
    }

    fn push_back(&mut self, slot: u32) {
        self.prev[slot as usize] = self.tail;
        self.next[slot as usize] = NIL;
        if self.tail != NIL {
            self.next[self.tail as usize] = slot;
        }
        self.tail = slot;
        if self.head == NIL {
            self.head = slot;
        }
        self.present[slot as usize] = true;
    }

    fn touch_front(&mut self, slot: u32) {
        if self.present[slot as usize] {
            self.unlink(slot);
        }
        self.push_front(slot);
    }

    fn touch_back(&mut self, slot: u32) {
        if self.present[slot as usize] {
            self.unlink(slot);
        }
        self.push_back(slot);
    }
}

struct CacheShared {
    by_id: HashMap<NodeId, u32>,
    lru: LruList,
    next_free_slot: u32,
}

pub struct NodeCache {
    owners: Vec<Owner>,
    capacity: usize,
    shared: Mutex<CacheShared>,
}

pub struct Eviction {
    pub id: NodeId,
    pub node: Node,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let owners = (0..capacity).map(|_| Owner::empty()).collect();
        Self {
            owners,
            capacity,
            shared: Mutex::new(CacheShared {
                by_id: HashMap::new(),
                lru: LruList::new(capacity),
                next_free_slot: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Optimistic get: tries the position hint lock-free, falls back to the
    /// id index under the lock.
    pub fn get(&self, reference: &mut NodeReference) -> Option<Node> {
        if reference.has_position_hint() {
            let slot = reference.pos_hint as usize;
            if slot < self.owners.len() {
                let owner = &self.owners[slot];
                let tag1 = owner.tag.load(Ordering::Acquire);
                if Owner::is_stable(tag1) {
                    let id = NodeId::from_u64(owner.id.load(Ordering::Acquire));
                    if id == reference.id {
                        let node = owner.node.lock().expect("cache owner mutex poisoned").clone();
                        let tag2 = owner.tag.load(Ordering::Acquire);
                        if tag1 == tag2 {
                            if let Some(node) = node {
                                return Some(node);
                            }
                        }
                    }
                }
            }
        }
        self.get_locked(reference)
    }

    fn get_locked(&self, reference: &mut NodeReference) -> Option<Node> {
        let mut shared = self.shared.lock().expect("cache shared mutex poisoned");
        let slot = *shared.by_id.get(&reference.id)?;
        shared.lru.touch_front(slot);
        let owner = &self.owners[slot as usize];
        reference.pos_hint = slot;
        reference.tag_hint = owner.tag.load(Ordering::Acquire);
        owner.node.lock().expect("cache owner mutex poisoned").clone()
    }

    /// Inserts `node` for `id` if absent, returning the current node plus
    /// whatever was evicted to make room (if anything).
    pub fn get_or_set(
        &self,
        reference: &mut NodeReference,
        node: impl FnOnce() -> Node,
    ) -> (Node, bool, Option<Eviction>) {
        let mut shared = self.shared.lock().expect("cache shared mutex poisoned");
        if let Some(&slot) = shared.by_id.get(&reference.id) {
            shared.lru.touch_front(slot);
            let owner = &self.owners[slot as usize];
            reference.pos_hint = slot;
            reference.tag_hint = owner.tag.load(Ordering::Acquire);
            let existing = owner
                .node
                .lock()
                .expect("cache owner mutex poisoned")
                .clone()
                .expect("owner present in index must hold a node");
            return (existing, true, None);
        }

        let (slot, evicted) = if (shared.next_free_slot as usize) < self.capacity {
            let slot = shared.next_free_slot;
            shared.next_free_slot += 1;
            (slot, None)
        } else {
            let tail = shared.lru.tail;
            let evicted_id = NodeId::from_u64(self.owners[tail as usize].id.load(Ordering::Acquire));
            shared.by_id.remove(&evicted_id);
            let evicted_node = self.owners[tail as usize]
                .node
                .lock()
                .expect("cache owner mutex poisoned")
                .take();
            shared.lru.unlink(tail);
            (
                tail,
                evicted_node.map(|node| Eviction { id: evicted_id, node }),
            )
        };

        let new_node = node();
        let owner = &self.owners[slot as usize];
        // Two-phase tag: transition (even), publish id+node, then stable (odd).
        let transition_tag = owner.tag.load(Ordering::Relaxed).wrapping_add(1) | 0;
        let transition_tag = transition_tag & !1;
        owner.tag.store(transition_tag, Ordering::Release);
        owner.id.store(reference.id.as_u64(), Ordering::Release);
        *owner.node.lock().expect("cache owner mutex poisoned") = Some(new_node.clone());
        owner.tag.store(transition_tag | 1, Ordering::Release);

        shared.by_id.insert(reference.id, slot);
        shared.lru.push_front(slot);
        reference.pos_hint = slot;
        reference.tag_hint = transition_tag | 1;

        (new_node, false, evicted)
    }

    /// Unconditionally installs `node` for `id`, overwriting any existing
    /// entry in place (bumping its tag so concurrent readers see the
    /// replacement) rather than leaving the stale value cached.
    pub fn put(&self, id: NodeId, node: Node) -> (NodeReference, Option<Eviction>) {
        let mut reference = NodeReference::new(id);
        let mut shared = self.shared.lock().expect("cache shared mutex poisoned");
        if let Some(&slot) = shared.by_id.get(&id) {
            shared.lru.touch_front(slot);
            let owner = &self.owners[slot as usize];
            let transition_tag = owner.tag.load(Ordering::Relaxed).wrapping_add(1) & !1;
            owner.tag.store(transition_tag, Ordering::Release);
            *owner.node.lock().expect("cache owner mutex poisoned") = Some(node);
            owner.tag.store(transition_tag | 1, Ordering::Release);
            reference.pos_hint = slot;
            reference.tag_hint = transition_tag | 1;
            return (reference, None);
        }
        drop(shared);
        let (_, _, evicted) = self.get_or_set(&mut reference, || node);
        (reference, evicted)
    }

    pub fn touch(&self, reference: &NodeReference) {
        if !reference.has_position_hint() {
            return;
        }
        let mut shared = self.shared.lock().expect("cache shared mutex poisoned");
        if shared.by_id.get(&reference.id) == Some(&reference.pos_hint) {
            shared.lru.touch_front(reference.pos_hint);
        }
    }

    pub fn release(&self, reference: &NodeReference) {
        if !reference.has_position_hint() {
            return;
        }
        let mut shared = self.shared.lock().expect("cache shared mutex poisoned");
        if shared.by_id.get(&reference.id) == Some(&reference.pos_hint) {
            shared.lru.touch_back(reference.pos_hint);
        }
    }

    /// Calls `f` once per present owner. Owners mid-transition are skipped —
    /// callers needing a fully consistent snapshot should hold the cache
    /// lock externally (not exposed here, since every other operation
    /// already serializes through `shared`).
    pub fn for_each(&self, mut f: impl FnMut(NodeId, &Node)) {
        let shared = self.shared.lock().expect("cache shared mutex poisoned");
        for (&id, &slot) in shared.by_id.iter() {
            let owner = &self.owners[slot as usize];
            let tag = owner.tag.load(Ordering::Acquire);
            if !Owner::is_stable(tag) {
                continue;
            }
            if let Some(node) = owner.node.lock().expect("cache owner mutex poisoned").as_ref() {
                f(id, node);
            }
        }
    }
}
