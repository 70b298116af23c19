//! Range Index - mmap offset space
//!
//! Maps disjoint page ranges of the mmap offset space to the objects that own
//! them. Entries hold weak handles: a lookup only hands out a strong reference
//! if it can upgrade one, so an object whose last reference is already gone
//! is invisible even though its entry has not been removed yet. The index
//! lock is held for a single lookup, insert or remove and never longer.
//!
//! Insertion is two-phase. [`RangeIndex::reserve_at`] or
//! [`RangeIndex::allocate`] claims the range with an empty handle, the owner
//! finishes constructing itself, and [`RangeIndex::publish`] makes it
//! visible.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use spin::Mutex;
use thiserror::Error;

/// Errors from claiming a range
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    #[error("empty range")]
    Empty,

    #[error("range {start:#x}+{npages} outside the offset space")]
    OutOfBounds { start: u64, npages: u64 },

    #[error("range {start:#x}+{npages} overlaps an existing entry")]
    Overlap { start: u64, npages: u64 },

    #[error("no free range of {0} pages")]
    NoSpace(u64),
}

struct RangeNode<T> {
    npages: u64,
    object: Weak<T>,
}

/// Ordered index of page ranges
pub struct RangeIndex<T> {
    start: u64,
    npages: u64,
    nodes: Mutex<BTreeMap<u64, RangeNode<T>>>,
}

impl<T> RangeIndex<T> {
    /// Index over the page range `[start, start + npages)`
    pub fn new(start: u64, npages: u64) -> Self {
        Self {
            start,
            npages,
            nodes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Find the object whose range covers all of `[start, start + npages)`
    /// and take a reference to it.
    ///
    /// Returns `None` when no entry covers the range, the entry is not yet
    /// published, or its object is already being torn down.
    pub fn lookup(&self, start: u64, npages: u64) -> Option<Arc<T>> {
        let end = start.checked_add(npages.max(1))?;
        let nodes = self.nodes.lock();
        let (&node_start, node) = nodes.range(..=start).next_back()?;
        if end > node_start + node.npages {
            return None;
        }
        node.object.upgrade()
    }

    /// Claim `[start, start + npages)` for an object that is not yet
    /// published
    pub fn reserve_at(&self, start: u64, npages: u64) -> Result<(), RangeError> {
        if npages == 0 {
            return Err(RangeError::Empty);
        }
        let end = start
            .checked_add(npages)
            .ok_or(RangeError::OutOfBounds { start, npages })?;
        if start < self.start || end > self.start + self.npages {
            return Err(RangeError::OutOfBounds { start, npages });
        }

        let mut nodes = self.nodes.lock();
        let overlaps_prev = nodes
            .range(..=start)
            .next_back()
            .is_some_and(|(&s, n)| s + n.npages > start);
        let overlaps_next = nodes.range(start..end).next().is_some();
        if overlaps_prev || overlaps_next {
            return Err(RangeError::Overlap { start, npages });
        }

        nodes.insert(
            start,
            RangeNode {
                npages,
                object: Weak::new(),
            },
        );
        Ok(())
    }

    /// Claim the lowest free range of `npages` pages, returning its start
    pub fn allocate(&self, npages: u64) -> Result<u64, RangeError> {
        if npages == 0 {
            return Err(RangeError::Empty);
        }

        let mut nodes = self.nodes.lock();
        let limit = self.start + self.npages;
        let mut cursor = self.start;
        for (&node_start, node) in nodes.iter() {
            if node_start >= cursor && node_start - cursor >= npages {
                break;
            }
            cursor = cursor.max(node_start + node.npages);
        }
        if limit.saturating_sub(cursor) < npages {
            return Err(RangeError::NoSpace(npages));
        }

        nodes.insert(
            cursor,
            RangeNode {
                npages,
                object: Weak::new(),
            },
        );
        Ok(cursor)
    }

    /// Make the object owning the range starting at `start` visible to
    /// lookups
    pub fn publish(&self, start: u64, object: &Arc<T>) -> bool {
        match self.nodes.lock().get_mut(&start) {
            Some(node) => {
                node.object = Arc::downgrade(object);
                true
            }
            None => false,
        }
    }

    /// Remove the range starting at `start`
    pub fn remove(&self, start: u64) -> bool {
        self.nodes.lock().remove(&start).is_some()
    }

    /// Number of ranges, published or not
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First page of the offset space
    pub fn space_start(&self) -> u64 {
        self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(index: &RangeIndex<u32>, start: u64, npages: u64, tag: u32) -> Arc<u32> {
        index.reserve_at(start, npages).unwrap();
        let obj = Arc::new(tag);
        assert!(index.publish(start, &obj));
        obj
    }

    #[test]
    fn test_lookup_covering_range() {
        let index = RangeIndex::new(0, 1024);
        let obj = published(&index, 100, 16, 7);

        assert_eq!(index.lookup(100, 16).as_deref(), Some(&7));
        assert_eq!(index.lookup(102, 1).as_deref(), Some(&7));
        assert_eq!(index.lookup(115, 1).as_deref(), Some(&7));
        assert!(index.lookup(115, 2).is_none());
        assert!(index.lookup(116, 1).is_none());
        assert!(index.lookup(99, 1).is_none());

        // Lookup took a strong reference
        let found = index.lookup(100, 1).unwrap();
        assert_eq!(Arc::strong_count(&obj), 2);
        drop(found);
    }

    #[test]
    fn test_unpublished_range_invisible() {
        let index: RangeIndex<u32> = RangeIndex::new(0, 64);
        index.reserve_at(8, 4).unwrap();
        assert!(index.lookup(8, 1).is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dead_object_invisible() {
        let index = RangeIndex::new(0, 64);
        let obj = published(&index, 8, 4, 1);
        drop(obj);
        // Entry still present but the upgrade fails
        assert_eq!(index.len(), 1);
        assert!(index.lookup(8, 1).is_none());
        assert!(index.remove(8));
        assert!(index.is_empty());
    }

    #[test]
    fn test_overlap_rejected() {
        let index: RangeIndex<u32> = RangeIndex::new(0, 64);
        index.reserve_at(8, 8).unwrap();
        assert_eq!(index.reserve_at(4, 5), Err(RangeError::Overlap { start: 4, npages: 5 }));
        assert_eq!(index.reserve_at(15, 1), Err(RangeError::Overlap { start: 15, npages: 1 }));
        assert!(index.reserve_at(16, 1).is_ok());
        assert!(index.reserve_at(4, 4).is_ok());
        assert_eq!(index.reserve_at(0, 0), Err(RangeError::Empty));
        assert_eq!(
            index.reserve_at(60, 8),
            Err(RangeError::OutOfBounds { start: 60, npages: 8 })
        );
    }

    #[test]
    fn test_allocate_first_fit() {
        let index: RangeIndex<u32> = RangeIndex::new(100, 32);
        assert_eq!(index.allocate(8), Ok(100));
        assert_eq!(index.allocate(8), Ok(108));
        assert!(index.remove(100));
        assert_eq!(index.allocate(4), Ok(100));
        assert_eq!(index.allocate(8), Ok(116));
        assert_eq!(index.allocate(16), Err(RangeError::NoSpace(16)));
        assert_eq!(index.allocate(4), Ok(104));
    }
}
