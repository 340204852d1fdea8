use std::ops::Index;

use crate::{
    error::{Result, XferError},
    mem::MemType,
};

use super::{BlobDesc, Desc, DescEntry};

/// Descriptor list used to describe the two sides of a transfer
pub type XferDescList = DescList<Desc>;

/// Descriptor list used to register memory
pub type RegDescList = DescList<BlobDesc>;

/// An ordered list of descriptors of one memory kind.
///
/// When `sorted` is set the list stays in ascending descriptor order. Equal
/// descriptors are all kept, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescList<T> {
    /// Memory kind of every entry
    mem_type: MemType,
    /// Keep entries in ascending order
    sorted: bool,
    /// Entries
    descs: Vec<T>,
}

impl<T: DescEntry> DescList<T> {
    /// Creates an empty list
    #[must_use]
    pub fn new(mem_type: MemType, sorted: bool) -> Self {
        Self::with_capacity(mem_type, sorted, 0)
    }

    /// Creates an empty list with room for `capacity` entries
    #[must_use]
    pub fn with_capacity(mem_type: MemType, sorted: bool, capacity: usize) -> Self {
        Self {
            mem_type,
            sorted,
            descs: Vec::with_capacity(capacity),
        }
    }

    /// Builds a list from `descs`, one entry per input item.
    pub fn from_descs<I>(mem_type: MemType, sorted: bool, descs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        let mut descs: Vec<T> = descs.into_iter().map(Into::into).collect();
        if sorted {
            // stable, keeps duplicates in input order
            descs.sort();
        }
        Self {
            mem_type,
            sorted,
            descs,
        }
    }

    /// Adds an entry, at its ordered position when the list is sorted.
    pub fn add_desc(&mut self, desc: T) {
        if self.sorted {
            let pos = self.descs.partition_point(|d| *d <= desc);
            self.descs.insert(pos, desc);
        } else {
            self.descs.push(desc);
        }
    }

    /// Removes and returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if `index` is not in the list.
    pub fn rem_desc(&mut self, index: usize) -> Result<T> {
        if index >= self.descs.len() {
            return Err(XferError::IndexOutOfRange {
                index,
                len: self.descs.len(),
            });
        }
        Ok(self.descs.remove(index))
    }

    /// Number of entries
    #[must_use]
    pub fn desc_count(&self) -> usize {
        self.descs.len()
    }

    /// Returns `true` if the list has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Whether the list keeps its entries ordered
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Memory kind of the entries
    #[must_use]
    pub fn mem_type(&self) -> MemType {
        self.mem_type
    }

    /// Returns the entry at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.descs.get(index)
    }

    /// Iterates over the entries
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.descs.iter()
    }

    /// Removes every entry
    pub fn clear(&mut self) {
        self.descs.clear();
    }

    /// Finds the index of the first entry whose range equals `query`.
    #[must_use]
    pub fn get_index(&self, query: &Desc) -> Option<usize> {
        if self.sorted {
            let pos = self.descs.partition_point(|d| d.basic() < query);
            return self
                .descs
                .get(pos)
                .filter(|d| d.basic() == query)
                .map(|_| pos);
        }
        self.descs.iter().position(|d| d.basic() == query)
    }

    /// Checks that the entries are in ascending order.
    #[must_use]
    pub fn verify_sorted(&self) -> bool {
        self.descs.windows(2).all(|w| matches!(w, [a, b] if a <= b))
    }
}

impl RegDescList {
    /// Drops the metadata, keeping order, kind and the sorted flag.
    #[must_use]
    pub fn trim(&self) -> XferDescList {
        XferDescList {
            mem_type: self.mem_type,
            sorted: self.sorted,
            descs: self.descs.iter().map(|d| d.desc).collect(),
        }
    }
}

impl<T> Index<usize> for DescList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.descs[index]
    }
}

impl<'a, T> IntoIterator for &'a DescList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.descs.iter()
    }
}
