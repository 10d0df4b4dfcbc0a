//! Generic FIFO queue with in-place removal
//!
//! The scheduler keeps its ready, blocked, and zombie threads in this queue.
//! Entries live in a slab of slots linked head to tail, so enqueue and
//! dequeue are O(1) and removing an arbitrary entry is a single O(n) scan
//! followed by an O(1) unlink. Insertion order is preserved exactly; the
//! round-robin policy depends on it.

use crate::error::QueueError;
use std::fmt;

/// What [`Queue::iterate`] does after the visitor has seen an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Move on to the next entry
    Continue,
    /// Unlink and drop the entry just visited, then move on
    Remove,
    /// Stop iterating and hand the entry just visited back to the caller
    Match,
}

struct Node<T> {
    data: T,
    prev: Option<usize>,
    next: Option<usize>,
}

enum Slot<T> {
    Occupied(Node<T>),
    /// Free slot, linked to the next free slot
    Vacant(Option<usize>),
}

/// Insertion-ordered queue
pub struct Queue<T> {
    /// Node storage; vacant slots are recycled before the vector grows
    slots: Vec<Slot<T>>,

    /// Head of the free-slot list
    free: Option<usize>,

    /// Oldest entry
    head: Option<usize>,

    /// Newest entry
    tail: Option<usize>,

    /// Number of occupied slots
    len: usize,
}

impl<T> Queue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Release the queue.
    ///
    /// A queue that still holds entries is handed back untouched together
    /// with [`QueueError::NotEmpty`].
    pub fn destroy(self) -> Result<(), (Self, QueueError)> {
        if self.len != 0 {
            return Err((self, QueueError::NotEmpty));
        }
        Ok(())
    }

    /// Append `data` at the tail
    pub fn enqueue(&mut self, data: T) -> Result<(), QueueError> {
        if self.free.is_none() {
            self.slots
                .try_reserve(1)
                .map_err(|_| QueueError::AllocationFailed)?;
        }

        let index = self.alloc(Node {
            data,
            prev: self.tail,
            next: None,
        });

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        Ok(())
    }

    /// Make room for at least `additional` more entries, so that the next
    /// `additional` enqueues cannot fail or allocate
    pub fn reserve(&mut self, additional: usize) -> Result<(), QueueError> {
        self.slots
            .try_reserve(additional)
            .map_err(|_| QueueError::AllocationFailed)
    }

    /// Remove and return the head entry
    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        let head = self.head.ok_or(QueueError::Empty)?;
        Ok(self.unlink(head))
    }

    /// Remove the first entry equal to `data`, scanning from the head
    ///
    /// Entries are compared by value. To remove one particular entry among
    /// equal ones, match on identity with [`Queue::delete_by`], for example
    /// `queue.delete_by(|e| Rc::ptr_eq(e, &target))`.
    pub fn delete(&mut self, data: &T) -> Result<T, QueueError>
    where
        T: PartialEq,
    {
        self.delete_by(|entry| entry == data)
    }

    /// Remove the first entry accepted by `pred`, scanning from the head
    pub fn delete_by<F>(&mut self, pred: F) -> Result<T, QueueError>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.position(pred).ok_or(QueueError::NotFound)?;
        Ok(self.unlink(index))
    }

    /// Visit every entry from head to tail.
    ///
    /// The successor of each entry is fetched before `visit` runs, so
    /// answering [`Visit::Remove`] for the current entry never disturbs the
    /// walk. Iteration stops at the first [`Visit::Match`], whose entry is
    /// returned.
    pub fn iterate<F>(&mut self, mut visit: F) -> Option<&mut T>
    where
        F: FnMut(&mut T) -> Visit,
    {
        let mut cursor = self.head;

        while let Some(index) = cursor {
            let next = self.node(index).next;

            match visit(&mut self.node_mut(index).data) {
                Visit::Continue => {}
                Visit::Remove => {
                    self.unlink(index);
                }
                Visit::Match => return Some(&mut self.node_mut(index).data),
            }

            cursor = next;
        }

        None
    }

    /// First entry accepted by `pred`
    pub fn find<F>(&self, pred: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.position(pred).map(|index| &self.node(index).data)
    }

    /// Mutable access to the first entry accepted by `pred`
    pub fn find_mut<F>(&mut self, pred: F) -> Option<&mut T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.position(pred)?;
        Some(&mut self.node_mut(index).data)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the queue holds no entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrowing iterator in insertion order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    fn position<F>(&self, mut pred: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = self.node(index);
            if pred(&node.data) {
                return Some(index);
            }
            cursor = node.next;
        }
        None
    }

    fn alloc(&mut self, node: Node<T>) -> usize {
        match self.free {
            Some(index) => {
                if let Slot::Vacant(next) = self.slots[index] {
                    self.free = next;
                }
                self.slots[index] = Slot::Occupied(node);
                index
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        }
    }

    fn unlink(&mut self, index: usize) -> T {
        let node = match std::mem::replace(&mut self.slots[index], Slot::Vacant(self.free)) {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("queue link points at a vacant slot"),
        };
        self.free = Some(index);

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;

        // Drained: drop the free list and reuse the storage from slot 0.
        if self.len == 0 {
            self.slots.clear();
            self.free = None;
        }

        node.data
    }

    fn node(&self, index: usize) -> &Node<T> {
        match &self.slots[index] {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("queue link points at a vacant slot"),
        }
    }

    fn node_mut(&mut self, index: usize) -> &mut Node<T> {
        match &mut self.slots[index] {
            Slot::Occupied(node) => node,
            Slot::Vacant(_) => unreachable!("queue link points at a vacant slot"),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a, T> IntoIterator for &'a Queue<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`Queue`] in insertion order
pub struct Iter<'a, T> {
    queue: &'a Queue<T>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let node = self.queue.node(index);
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.data)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
