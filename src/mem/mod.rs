/// Host memory region allocation
pub mod region;

/// Page pinning implementations
pub(crate) mod pin;

use std::{fmt, str::FromStr};

use crate::error::{Result, XferError};

pub use pin::{HostPinner, MemoryPinner, Mlock, PageLock};
pub use region::{HostAllocator, HostRegion, Region, RegionAllocator};

/// Returns the current page size
#[allow(
    unsafe_code, // Safe because sysconf(_SC_PAGESIZE) is guaranteed to return a valid value.
    clippy::as_conversions,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Storage domain a descriptor points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemType {
    /// Host memory
    Dram,
    /// Device (GPU) memory
    Vram,
    /// Block device
    Block,
    /// Object store
    Object,
    /// File, `dev_id` carries the file descriptor
    File,
}

impl MemType {
    /// All memory kinds, in tag order.
    pub const ALL: [MemType; 5] = [
        MemType::Dram,
        MemType::Vram,
        MemType::Block,
        MemType::Object,
        MemType::File,
    ];

    /// Returns the string tag of this memory kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MemType::Dram => "DRAM",
            MemType::Vram => "VRAM",
            MemType::Block => "BLK",
            MemType::Object => "OBJ",
            MemType::File => "FILE",
        }
    }

    /// Returns `true` if the memory is host memory that can be pinned.
    #[must_use]
    pub fn is_host(self) -> bool {
        matches!(self, MemType::Dram)
    }
}

impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemType {
    type Err = XferError;

    fn from_str(s: &str) -> Result<Self> {
        MemType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| XferError::InvalidInput(format!("unknown memory type: {s}")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_type_parse() {
        assert_eq!("DRAM".parse::<MemType>().unwrap(), MemType::Dram);
        assert_eq!("vram".parse::<MemType>().unwrap(), MemType::Vram);
        assert_eq!("BLK".parse::<MemType>().unwrap(), MemType::Block);
        assert_eq!("OBJ".parse::<MemType>().unwrap(), MemType::Object);
        assert_eq!("File".parse::<MemType>().unwrap(), MemType::File);
        assert!(matches!(
            "HBM".parse::<MemType>(),
            Err(XferError::InvalidInput(_))
        ));
    }

    #[test]
    fn mem_type_display_parses_back() {
        for kind in MemType::ALL {
            assert_eq!(kind.to_string().parse::<MemType>().unwrap(), kind);
        }
    }

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}
