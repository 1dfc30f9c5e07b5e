//! Circular doubly-linked lists threaded through the arena.
//!
//! Node layout (16 bytes):
//! - next: 8 bytes (arena offset of the next node)
//! - prev: 8 bytes (arena offset of the previous node)
//!
//! Every list has a head node living in the header or the hash table. An
//! empty list's head points at itself in both directions. Nodes are embedded
//! in records, so the owning record is found by subtracting the node's field
//! offset.

use mapkv_common::layout::NODE_SIZE;
use mapkv_common::{MapKvError, Result};

use crate::region::Region;

/// Offset of the `prev` field of the node at `off`.
#[inline]
fn prev_field(off: u64) -> Result<u64> {
    off.checked_add(8)
        .ok_or_else(|| MapKvError::corrupted(off, "node offset overflows"))
}

/// Decoded list node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListNode {
    pub(crate) next: u64,
    pub(crate) prev: u64,
}

impl<B: AsRef<[u8]>> Region<B> {
    /// Reads the node at `off`.
    #[inline]
    pub(crate) fn read_node(&self, off: u64) -> Result<ListNode> {
        Ok(ListNode {
            next: self.read_u64(off)?,
            prev: self.read_u64(prev_field(off)?)?,
        })
    }

    /// Returns true when the list headed at `head` has no members.
    pub(crate) fn list_is_empty(&self, head: u64) -> Result<bool> {
        Ok(self.read_node(head)?.next == head)
    }

    /// Iterates the node offsets of the list headed at `head`, front to back.
    pub(crate) fn list_iter(&self, head: u64) -> ListIter<'_, B> {
        ListIter {
            region: self,
            head,
            cursor: head,
            remaining: self.bytes().len() as u64 / NODE_SIZE,
            done: false,
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Region<B> {
    /// Writes the node at `off`.
    #[inline]
    fn write_node(&mut self, off: u64, node: ListNode) -> Result<()> {
        self.write_u64(off, node.next)?;
        self.write_u64(prev_field(off)?, node.prev)
    }

    /// Makes `head` an empty list.
    pub(crate) fn init_head(&mut self, head: u64) -> Result<()> {
        self.write_node(head, ListNode { next: head, prev: head })
    }

    /// Appends `node` at the back of the list headed at `head`.
    pub(crate) fn push_back(&mut self, head: u64, node: u64) -> Result<()> {
        let old_last = self.read_node(head)?.prev;
        self.write_node(
            node,
            ListNode {
                next: head,
                prev: old_last,
            },
        )?;
        self.write_u64(old_last, node)?;
        self.write_u64(prev_field(head)?, node)
    }

    /// Inserts `node` at the front of the list headed at `head`.
    pub(crate) fn push_front(&mut self, head: u64, node: u64) -> Result<()> {
        let old_first = self.read_node(head)?.next;
        self.write_node(
            node,
            ListNode {
                next: old_first,
                prev: head,
            },
        )?;
        self.write_u64(prev_field(old_first)?, node)?;
        self.write_u64(head, node)
    }

    /// Removes `node` from whatever list it is on and clears its links.
    pub(crate) fn unlink(&mut self, node: u64) -> Result<()> {
        let links = self.read_node(node)?;
        let next_prev = prev_field(links.next)?;
        if self.read_u64(links.prev)? != node || self.read_u64(next_prev)? != node {
            return Err(MapKvError::corrupted(node, "list neighbours do not point back"));
        }
        self.write_u64(links.prev, links.next)?;
        self.write_u64(next_prev, links.prev)?;
        self.write_node(node, ListNode { next: 0, prev: 0 })
    }
}

/// Iterator over the node offsets of one list.
///
/// Yields `Err` once and stops if the list runs outside the arena or is
/// longer than the arena could possibly hold (a cycle that misses the head).
pub(crate) struct ListIter<'a, B> {
    region: &'a Region<B>,
    head: u64,
    cursor: u64,
    remaining: u64,
    done: bool,
}

impl<B: AsRef<[u8]>> Iterator for ListIter<'_, B> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match self.region.read_u64(self.cursor) {
            Ok(next) => next,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if next == self.head {
            self.done = true;
            return None;
        }
        if self.remaining == 0 {
            self.done = true;
            return Some(Err(MapKvError::corrupted(
                self.head,
                "list does not return to its head",
            )));
        }
        self.remaining -= 1;
        self.cursor = next;
        Some(Ok(next))
    }
}
