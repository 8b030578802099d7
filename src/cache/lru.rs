//! Recency List Module
//!
//! Arena-backed doubly-linked list used to track access order for LRU
//! eviction. Links are arena indices, so moving a node to the front or
//! unlinking it is O(1) and no per-node allocation happens after warm-up.

/// Handle to a node in a `RecencyList`.
///
/// Handles stay valid until the node is removed; after that the slot may be
/// recycled for another node.
pub type NodeId = usize;

#[derive(Debug)]
struct Node<T> {
    item: T,
    /// Toward the front (more recently used)
    prev: Option<NodeId>,
    /// Toward the back (less recently used)
    next: Option<NodeId>,
}

// == Recency List ==
/// Tracks access order for LRU eviction.
///
/// - Front = Most recently used
/// - Back = Least recently used
#[derive(Debug)]
pub struct RecencyList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecencyList<T> {
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    // == Push Front ==
    /// Inserts an item as the most recently used and returns its handle.
    pub fn push_front(&mut self, item: T) -> NodeId {
        let node = Node {
            item,
            prev: None,
            next: self.head,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            self.node_mut(old_head).prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
        self.len += 1;
        id
    }

    // == Move To Front ==
    /// Marks a node as most recently used.
    pub fn move_to_front(&mut self, id: NodeId) {
        if self.head == Some(id) {
            return;
        }
        self.unlink(id);
        let old_head = self.head;
        {
            let node = self.node_mut(id);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            self.node_mut(old_head).prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    // == Remove ==
    /// Unlinks a node and returns its item.
    ///
    /// Returns None if the handle does not refer to a live node.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        if self.slots.get(id).map_or(true, Option::is_none) {
            return None;
        }
        self.unlink(id);
        let node = self.slots[id].take()?;
        self.free.push(id);
        self.len -= 1;
        Some(node.item)
    }

    // == Pop Back ==
    /// Removes and returns the least recently used item.
    pub fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;
        self.remove(tail)
    }

    // == Accessors ==
    /// Least recently used node, if any.
    pub fn back(&self) -> Option<NodeId> {
        self.tail
    }

    /// Most recently used node, if any.
    pub fn front(&self) -> Option<NodeId> {
        self.head
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id)?.as_ref().map(|node| &node.item)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots.get_mut(id)?.as_mut().map(|node| &mut node.item)
    }

    /// Iterates from most to least recently used.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Iterates node handles from most to least recently used.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.slots[id].as_ref().and_then(|node| node.next);
            Some(id)
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    // == Internal: Linking ==
    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match self.slots[id].as_mut() {
            Some(node) => node,
            None => unreachable!("recency list link points at an empty slot"),
        }
    }

    /// Detaches a live node from its neighbours, leaving its own links stale.
    fn unlink(&mut self, id: NodeId) {
        let (prev, next) = {
            let node = self.node_mut(id);
            (node.prev.take(), node.next.take())
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }
}

/// Front-to-back iterator over a `RecencyList`.
pub struct Iter<'a, T> {
    list: &'a RecencyList<T>,
    cursor: Option<NodeId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.list.slots[id].as_ref()?;
        self.cursor = node.next;
        Some(&node.item)
    }
}
