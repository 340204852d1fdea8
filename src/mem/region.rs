use std::{
    fmt, io,
    ops::{Deref, DerefMut},
};

use log::debug;
use memmap2::{MmapMut, MmapOptions};

/// An owned, contiguous memory region that descriptors can point into.
///
/// Dropping the region releases the memory.
pub trait Region {
    /// Virtual start address of the region
    fn addr(&self) -> u64;

    /// Length of the region in bytes
    fn len(&self) -> usize;

    /// Returns `true` if the region holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allocates memory regions.
pub trait RegionAllocator {
    /// The region type handed out by this allocator
    type Region: Region;

    /// Allocates a region of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is zero or the memory cannot be mapped.
    fn alloc(&mut self, len: usize) -> io::Result<Self::Region>;
}

impl<A: RegionAllocator> RegionAllocator for &mut A {
    type Region = A::Region;

    fn alloc(&mut self, len: usize) -> io::Result<Self::Region> {
        (**self).alloc(len)
    }
}

/// Anonymous host memory mapping.
pub struct HostRegion {
    /// Mmap handle, unmapped on drop
    inner: MmapMut,
    /// Requested length, the mapping itself is page granular
    len: usize,
}

impl HostRegion {
    #[allow(clippy::as_conversions)] // converting *const u8 to u64
    fn start(&self) -> u64 {
        self.inner.as_ptr() as u64
    }
}

impl Region for HostRegion {
    fn addr(&self) -> u64 {
        self.start()
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Deref for HostRegion {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.inner[..self.len]
    }
}

impl DerefMut for HostRegion {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.inner[..self.len]
    }
}

impl fmt::Debug for HostRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRegion")
            .field("addr", &format_args!("{:x}", self.start()))
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for HostRegion {
    fn drop(&mut self) {
        debug!("free host region addr: {:x}, len: {}", self.start(), self.len);
    }
}

/// Allocator for anonymous host memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostAllocator;

impl HostAllocator {
    /// Creates a new `HostAllocator`
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RegionAllocator for HostAllocator {
    type Region = HostRegion;

    fn alloc(&mut self, len: usize) -> io::Result<HostRegion> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero length region",
            ));
        }
        let inner = MmapOptions::new().len(len).map_anon()?;
        let region = HostRegion { inner, len };
        debug!("alloc host region addr: {:x}, len: {len}", region.start());

        Ok(region)
    }
}
