use std::{
    collections::{hash_map::Entry, HashMap},
    io,
    ops::Range,
};

use log::error;
use parking_lot::Mutex;

use super::page_size;

/// Keeps host pages resident while they are registered.
pub trait MemoryPinner: Send + Sync {
    /// Pins pages in memory to prevent swapping
    ///
    /// # Errors
    ///
    /// Returns an error if the pages could not be locked in memory
    fn pin_pages(&self, addr: u64, length: usize) -> io::Result<()>;

    /// Unpins previously pinned pages
    ///
    /// # Errors
    ///
    /// Returns an error if the pages could not be unlocked
    fn unpin_pages(&self, addr: u64, length: usize) -> io::Result<()>;
}

/// Page-aligned lock primitive, one unlock releases any number of locks.
pub trait PageLock: Send + Sync {
    /// Locks `length` bytes starting at the page-aligned `addr`
    ///
    /// # Errors
    ///
    /// Returns an error if the range could not be locked
    fn lock(&self, addr: u64, length: usize) -> io::Result<()>;

    /// Unlocks `length` bytes starting at the page-aligned `addr`
    ///
    /// # Errors
    ///
    /// Returns an error if the range could not be unlocked
    fn unlock(&self, addr: u64, length: usize) -> io::Result<()>;
}

/// `mlock`/`munlock` on the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mlock;

#[allow(unsafe_code, clippy::as_conversions)]
impl PageLock for Mlock {
    fn lock(&self, addr: u64, length: usize) -> io::Result<()> {
        let result = unsafe { libc::mlock(addr as *const std::ffi::c_void, length) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn unlock(&self, addr: u64, length: usize) -> io::Result<()> {
        let result = unsafe { libc::munlock(addr as *const std::ffi::c_void, length) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Pins host pages, counting pins per page.
///
/// A page is locked when its first pin arrives and unlocked when its last pin
/// goes away, so overlapping ranges can be pinned and unpinned independently.
#[derive(Debug)]
pub struct HostPinner<L = Mlock> {
    lock: L,
    page_size: usize,
    /// Pin count of every pinned page, keyed by page index
    pins: Mutex<HashMap<u64, usize>>,
}

impl HostPinner {
    /// Creates a pinner backed by `mlock`
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock(Mlock)
    }
}

impl Default for HostPinner {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: PageLock> HostPinner<L> {
    /// Creates a pinner backed by `lock`
    pub fn with_lock(lock: L) -> Self {
        Self {
            lock,
            page_size: page_size(),
            pins: Mutex::new(HashMap::new()),
        }
    }

    /// Indices of the pages touched by `[addr, addr + length)`
    fn pages(&self, addr: u64, length: usize) -> io::Result<Range<u64>> {
        if length == 0 {
            return Ok(0..0);
        }
        let page_size = self.page_size_u64();
        let last = u64::try_from(length - 1)
            .ok()
            .and_then(|offset| addr.checked_add(offset))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("range {addr:#x}+{length:#x} overflows"),
                )
            })?;

        Ok(addr / page_size..last / page_size + 1)
    }

    /// Start address and length in bytes of a run of pages
    fn span(&self, run: &Range<u64>) -> io::Result<(u64, usize)> {
        let page_size = self.page_size_u64();
        let len = (run.end - run.start)
            .checked_mul(page_size)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        Ok((run.start * page_size, len))
    }

    #[allow(clippy::as_conversions)] // usize to u64
    fn page_size_u64(&self) -> u64 {
        self.page_size as u64
    }

    fn lock_run(&self, run: &Range<u64>) -> io::Result<()> {
        let (addr, len) = self.span(run)?;
        self.lock.lock(addr, len)
    }

    fn unlock_run(&self, run: &Range<u64>) -> io::Result<()> {
        let (addr, len) = self.span(run)?;
        self.lock.unlock(addr, len)
    }

    /// Number of pages currently pinned
    pub fn pinned_pages(&self) -> usize {
        self.pins.lock().len()
    }
}

impl<L: PageLock> MemoryPinner for HostPinner<L> {
    fn pin_pages(&self, addr: u64, length: usize) -> io::Result<()> {
        let pages = self.pages(addr, length)?;
        let mut pins = self.pins.lock();
        let fresh = page_runs(pages.clone().filter(|page| !pins.contains_key(page)));
        for (i, run) in fresh.iter().enumerate() {
            if let Err(err) = self.lock_run(run) {
                for done in fresh.iter().take(i) {
                    if let Err(unlock_err) = self.unlock_run(done) {
                        error!("failed to unlock pages {done:?}: {unlock_err}");
                    }
                }
                return Err(err);
            }
        }
        for page in pages {
            *pins.entry(page).or_insert(0) += 1;
        }

        Ok(())
    }

    fn unpin_pages(&self, addr: u64, length: usize) -> io::Result<()> {
        let pages = self.pages(addr, length)?;
        let mut pins = self.pins.lock();
        if let Some(page) = pages.clone().find(|page| !pins.contains_key(page)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("page {page:#x} is not pinned"),
            ));
        }
        let mut released = Vec::new();
        for page in pages {
            if let Entry::Occupied(mut entry) = pins.entry(page) {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    let _count = entry.remove();
                    released.push(page);
                }
            }
        }
        let mut result = Ok(());
        for run in page_runs(released) {
            if let Err(err) = self.unlock_run(&run) {
                error!("failed to unlock pages {run:?}: {err}");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }
}

/// Merges ascending page indices into contiguous runs
fn page_runs(pages: impl IntoIterator<Item = u64>) -> Vec<Range<u64>> {
    let mut runs: Vec<Range<u64>> = Vec::new();
    for page in pages {
        match runs.last_mut() {
            Some(run) if run.end == page => run.end += 1,
            _ => runs.push(page..page + 1),
        }
    }
    runs
}

#[cfg(test)]
pub(crate) mod test {
    use std::{
        collections::BTreeSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use super::*;
    use crate::mem::{HostAllocator, Region, RegionAllocator};

    /// Locks like `mlock`: a set of locked page addresses, no nesting.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct PageSet {
        locked: Arc<Mutex<BTreeSet<u64>>>,
        lock_calls: Arc<AtomicUsize>,
        fail_addr: Option<u64>,
    }

    impl PageSet {
        /// A lock that refuses any range containing `addr`
        pub(crate) fn failing_at(addr: u64) -> Self {
            Self {
                fail_addr: Some(addr),
                ..Self::default()
            }
        }

        pub(crate) fn locked(&self) -> BTreeSet<u64> {
            self.locked.lock().clone()
        }

        pub(crate) fn lock_calls(&self) -> usize {
            self.lock_calls.load(Ordering::SeqCst)
        }

        fn page_addrs(addr: u64, length: usize) -> impl Iterator<Item = u64> {
            let end = addr + u64::try_from(length).unwrap();
            (addr..end).step_by(page_size())
        }
    }

    impl PageLock for PageSet {
        fn lock(&self, addr: u64, length: usize) -> io::Result<()> {
            let _prev = self.lock_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_addr
                .is_some_and(|fail| Self::page_addrs(addr, length).any(|page| page == fail))
            {
                return Err(io::Error::from(io::ErrorKind::OutOfMemory));
            }
            self.locked.lock().extend(Self::page_addrs(addr, length));
            Ok(())
        }

        fn unlock(&self, addr: u64, length: usize) -> io::Result<()> {
            let mut locked = self.locked.lock();
            for page in Self::page_addrs(addr, length) {
                let _was_locked = locked.remove(&page);
            }
            Ok(())
        }
    }

    fn page() -> u64 {
        u64::try_from(page_size()).unwrap()
    }

    #[test]
    fn host_pin_unpin_one_page() {
        let region = HostAllocator::new().alloc(page_size()).unwrap();
        let pinner = HostPinner::new();
        // RLIMIT_MEMLOCK may forbid locking, only check the pair is consistent
        if pinner.pin_pages(region.addr(), region.len()).is_ok() {
            assert_eq!(pinner.pinned_pages(), 1);
            pinner.unpin_pages(region.addr(), region.len()).unwrap();
        }
        assert_eq!(pinner.pinned_pages(), 0);
    }

    #[test]
    fn shared_page_is_unlocked_by_last_unpin() {
        let lock = PageSet::default();
        let pinner = HostPinner::with_lock(lock.clone());
        let base = 16 * page();

        pinner.pin_pages(base, 0x100).unwrap();
        pinner.pin_pages(base + 0x80, 0x100).unwrap();
        assert_eq!(lock.lock_calls(), 1);
        assert_eq!(pinner.pinned_pages(), 1);

        pinner.unpin_pages(base, 0x100).unwrap();
        assert_eq!(lock.locked(), BTreeSet::from([base]));
        pinner.unpin_pages(base + 0x80, 0x100).unwrap();
        assert!(lock.locked().is_empty());
        assert_eq!(pinner.pinned_pages(), 0);
    }

    #[test]
    fn only_fresh_pages_are_locked() {
        let lock = PageSet::default();
        let pinner = HostPinner::with_lock(lock.clone());
        let page = page();
        let len = usize::try_from(page).unwrap();

        pinner.pin_pages(2 * page, len).unwrap();
        pinner.pin_pages(4 * page, len).unwrap();
        // pages 1..=5, pages 2 and 4 already locked
        pinner.pin_pages(page, 5 * len).unwrap();
        assert_eq!(lock.lock_calls(), 5);
        assert_eq!(
            lock.locked(),
            BTreeSet::from([page, 2 * page, 3 * page, 4 * page, 5 * page])
        );

        pinner.unpin_pages(page, 5 * len).unwrap();
        assert_eq!(lock.locked(), BTreeSet::from([2 * page, 4 * page]));
    }

    #[test]
    fn lock_failure_leaves_no_pins() {
        let page = page();
        let lock = PageSet::failing_at(3 * page);
        let pinner = HostPinner::with_lock(lock.clone());
        let len = usize::try_from(page).unwrap();

        pinner.pin_pages(2 * page, len).unwrap();
        assert!(pinner.pin_pages(page, 3 * len).is_err());
        assert_eq!(lock.locked(), BTreeSet::from([2 * page]));
        assert_eq!(pinner.pinned_pages(), 1);
    }

    #[test]
    fn unpin_of_unpinned_pages_fails() {
        let lock = PageSet::default();
        let pinner = HostPinner::with_lock(lock.clone());
        let page = page();

        pinner.pin_pages(page, 1).unwrap();
        let err = pinner
            .unpin_pages(page, usize::try_from(2 * page).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(lock.locked(), BTreeSet::from([page]));
        assert_eq!(pinner.pinned_pages(), 1);
    }

    #[test]
    fn empty_and_overflowing_ranges() {
        let lock = PageSet::default();
        let pinner = HostPinner::with_lock(lock.clone());
        pinner.pin_pages(0x1000, 0).unwrap();
        pinner.unpin_pages(0x1000, 0).unwrap();
        assert_eq!(
            pinner.pin_pages(u64::MAX, 2).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
        assert_eq!(lock.lock_calls(), 0);
    }

    #[test]
    fn page_runs_merge_neighbours() {
        assert_eq!(page_runs([1_u64, 2, 3, 5, 7, 8]), vec![1..4, 5..6, 7..9]);
        assert!(page_runs(Vec::new()).is_empty());
    }
}
