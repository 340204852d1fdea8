/// Descriptor lists
mod list;

use std::fmt;

pub use list::{DescList, RegDescList, XferDescList};

/// A memory range: start address, length in bytes and device index.
///
/// Descriptors order by device, then address, then length.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Desc {
    /// Device index, or file descriptor for `FILE` memory
    pub dev_id: u64,
    /// Start address, or offset for `FILE` memory
    pub addr: u64,
    /// Length in bytes
    pub len: usize,
}

impl Desc {
    /// Creates a new descriptor
    #[must_use]
    pub fn new(addr: u64, len: usize, dev_id: u64) -> Self {
        Self { dev_id, addr, len }
    }

    /// One past the last address, `None` on overflow.
    #[must_use]
    #[allow(clippy::as_conversions)] // usize to u64
    pub fn end(&self) -> Option<u64> {
        self.addr.checked_add(self.len as u64)
    }

    /// Returns `true` if `other` lies entirely inside `self` on the same device.
    #[must_use]
    pub fn covers(&self, other: &Desc) -> bool {
        if self.dev_id != other.dev_id {
            return false;
        }
        match (self.end(), other.end()) {
            (Some(end), Some(other_end)) => self.addr <= other.addr && other_end <= end,
            _ => false,
        }
    }

    /// Returns `true` if the two ranges share at least one byte on the same device.
    #[must_use]
    pub fn overlaps(&self, other: &Desc) -> bool {
        if self.dev_id != other.dev_id || self.len == 0 || other.len == 0 {
            return false;
        }
        let end = self.end().unwrap_or(u64::MAX);
        let other_end = other.end().unwrap_or(u64::MAX);
        self.addr < other_end && other.addr < end
    }
}

impl fmt::Debug for Desc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Desc")
            .field("addr", &format_args!("{:x}", self.addr))
            .field("len", &self.len)
            .field("dev_id", &self.dev_id)
            .finish()
    }
}

impl From<(u64, usize, u64)> for Desc {
    fn from((addr, len, dev_id): (u64, usize, u64)) -> Self {
        Self::new(addr, len, dev_id)
    }
}

/// A descriptor carrying opaque metadata, used in registration lists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlobDesc {
    /// Memory range
    pub desc: Desc,
    /// Backend specific metadata
    pub meta: Vec<u8>,
}

impl BlobDesc {
    /// Creates a new blob descriptor
    #[must_use]
    pub fn new(desc: Desc, meta: Vec<u8>) -> Self {
        Self { desc, meta }
    }
}

impl From<Desc> for BlobDesc {
    fn from(desc: Desc) -> Self {
        Self::new(desc, Vec::new())
    }
}

impl From<(u64, usize, u64)> for BlobDesc {
    fn from(tuple: (u64, usize, u64)) -> Self {
        Desc::from(tuple).into()
    }
}

/// Entries a `DescList` can hold.
pub trait DescEntry: Ord + Clone {
    /// The memory range of this entry
    fn basic(&self) -> &Desc;
}

impl DescEntry for Desc {
    #[inline]
    fn basic(&self) -> &Desc {
        self
    }
}

impl DescEntry for BlobDesc {
    #[inline]
    fn basic(&self) -> &Desc {
        &self.desc
    }
}
