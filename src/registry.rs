use std::collections::BTreeMap;

use bitvec::vec::BitVec;
use rand::Rng;

use crate::{
    constants::{MAX_REG_CNT, REG_KEY_KEY_PART_WIDTH},
    desc::Desc,
    error::{Result, XferError},
    mem::MemType,
};

/// Registration key allocator.
///
/// The upper bits of a key index a bitmap slot, the lower bits are random so
/// that a stale key is unlikely to match a newer registration.
#[derive(Debug)]
pub(crate) struct KeyAlloc {
    /// Bit set for every index in use
    bitmap: BitVec<u32>,
}

impl KeyAlloc {
    /// Creates an allocator for at most `capacity` keys, capped at `MAX_REG_CNT`
    pub(crate) fn new(capacity: usize) -> Self {
        let mut bitmap = BitVec::with_capacity(capacity.min(MAX_REG_CNT));
        bitmap.resize(capacity.min(MAX_REG_CNT), false);
        Self { bitmap }
    }

    /// Allocates a new key, `None` if every index is in use
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)] // index < MAX_REG_CNT
    pub(crate) fn alloc(&mut self) -> Option<u32> {
        let index = self.bitmap.first_zero()?;
        self.bitmap.set(index, true);
        let key = rand::thread_rng().gen_range(0..1 << REG_KEY_KEY_PART_WIDTH);

        Some((index as u32) << REG_KEY_KEY_PART_WIDTH | key)
    }

    /// Releases `key`, returns `false` if its index was not in use
    #[allow(clippy::as_conversions)] // u32 to usize
    pub(crate) fn dealloc(&mut self, key: u32) -> bool {
        let index = (key >> REG_KEY_KEY_PART_WIDTH) as usize;
        let ret = self.bitmap.get(index).is_some_and(|x| *x);
        if ret {
            self.bitmap.set(index, false);
        }

        ret
    }
}

/// A registered memory range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Registration {
    pub(crate) desc: Desc,
    pub(crate) key: u32,
}

/// Registered memory, per memory kind, ordered by descriptor.
#[derive(Debug)]
pub(crate) struct MemRegistry {
    keys: KeyAlloc,
    regions: BTreeMap<MemType, Vec<Registration>>,
}

impl MemRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            keys: KeyAlloc::new(capacity),
            regions: BTreeMap::new(),
        }
    }

    /// Checks that `desc` could be inserted, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero length, an address overflow or a
    /// range that is already registered
    pub(crate) fn check_insert(&self, mem_type: MemType, desc: &Desc) -> Result<()> {
        Self::ensure_valid(desc)?;
        if self
            .regions
            .get(&mem_type)
            .is_some_and(|list| list.binary_search_by(|r| r.desc.cmp(desc)).is_ok())
        {
            return Err(XferError::InvalidInput(format!(
                "{mem_type} {desc:?} already registered"
            )));
        }
        Ok(())
    }

    /// Records `desc` as registered and returns its key.
    ///
    /// # Errors
    ///
    /// * `InvalidInput` - zero length, address overflow or already registered
    /// * `ResourceExhausted` - no key available
    pub(crate) fn insert(&mut self, mem_type: MemType, desc: Desc) -> Result<u32> {
        self.check_insert(mem_type, &desc)?;
        let list = self.regions.entry(mem_type).or_default();
        let pos = list.partition_point(|r| r.desc < desc);
        let key = self
            .keys
            .alloc()
            .ok_or(XferError::ResourceExhausted("No registration key available".into()))?;
        list.insert(pos, Registration { desc, key });

        Ok(key)
    }

    /// Forgets the registration of exactly `desc`, returning its key.
    pub(crate) fn remove(&mut self, mem_type: MemType, desc: &Desc) -> Result<u32> {
        let not_found = || XferError::NotFound(format!("{mem_type} {desc:?} not registered"));
        let list = self.regions.get_mut(&mem_type).ok_or_else(not_found)?;
        let pos = list.partition_point(|r| r.desc < *desc);
        if !list.get(pos).is_some_and(|r| r.desc == *desc) {
            return Err(not_found());
        }
        let reg = list.remove(pos);
        let _freed = self.keys.dealloc(reg.key);

        Ok(reg.key)
    }

    /// Finds the registration whose range contains `desc`.
    pub(crate) fn find_covering(&self, mem_type: MemType, desc: &Desc) -> Option<&Registration> {
        let list = self.regions.get(&mem_type)?;
        let upper = list.partition_point(|r| {
            (r.desc.dev_id, r.desc.addr) <= (desc.dev_id, desc.addr)
        });
        list.get(..upper)?
            .iter()
            .rev()
            .take_while(|r| r.desc.dev_id == desc.dev_id)
            .find(|r| r.desc.covers(desc))
    }

    /// Number of live registrations
    pub(crate) fn len(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    /// Validates region parameters
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` error if:
    /// - The length is 0
    /// - The address + length would overflow u64
    fn ensure_valid(desc: &Desc) -> Result<()> {
        if desc.len == 0 {
            return Err(XferError::InvalidInput(format!(
                "zero length region {desc:?}"
            )));
        }
        if desc.end().is_none() {
            return Err(XferError::InvalidInput(format!(
                "region {desc:?} overflows the address space"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_alloc_dealloc_ok() {
        let mut alloc = KeyAlloc::new(4);
        let keys: Vec<_> = std::iter::repeat_with(|| alloc.alloc())
            .take(4)
            .flatten()
            .collect();
        assert_eq!(keys.len(), 4);
        assert!(alloc.alloc().is_none());
        assert!(alloc.dealloc(keys[2]));
        assert!(!alloc.dealloc(keys[2]));
        let key = alloc.alloc().unwrap();
        assert_eq!(key >> REG_KEY_KEY_PART_WIDTH, keys[2] >> REG_KEY_KEY_PART_WIDTH);
    }

    #[test]
    fn key_alloc_capacity_is_capped() {
        let mut alloc = KeyAlloc::new(usize::MAX);
        let count = std::iter::repeat_with(|| alloc.alloc())
            .take_while(Option::is_some)
            .count();
        assert_eq!(count, MAX_REG_CNT);
    }

    #[test]
    fn insert_remove_ok() {
        let mut reg = MemRegistry::new(MAX_REG_CNT);
        let desc = Desc::new(0x1000, 0x100, 0);
        let key = reg.insert(MemType::Dram, desc).unwrap();
        assert_eq!(reg.len(), 1);
        assert!(matches!(
            reg.insert(MemType::Dram, desc),
            Err(XferError::InvalidInput(_))
        ));
        // same range in another kind is a separate registration
        let _vram = reg.insert(MemType::Vram, desc).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.remove(MemType::Dram, &desc).unwrap(), key);
        assert!(matches!(
            reg.remove(MemType::Dram, &desc),
            Err(XferError::NotFound(_))
        ));
        assert!(matches!(
            reg.remove(MemType::File, &desc),
            Err(XferError::NotFound(_))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn insert_rejects_invalid_regions() {
        let mut reg = MemRegistry::new(MAX_REG_CNT);
        assert!(matches!(
            reg.insert(MemType::Dram, Desc::new(0x1000, 0, 0)),
            Err(XferError::InvalidInput(_))
        ));
        assert!(matches!(
            reg.insert(MemType::Dram, Desc::new(u64::MAX, 2, 0)),
            Err(XferError::InvalidInput(_))
        ));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn check_insert_leaves_registry_untouched() {
        let mut reg = MemRegistry::new(MAX_REG_CNT);
        let desc = Desc::new(0x1000, 0x100, 0);
        reg.check_insert(MemType::Dram, &desc).unwrap();
        assert_eq!(reg.len(), 0);
        let _key = reg.insert(MemType::Dram, desc).unwrap();
        assert!(matches!(
            reg.check_insert(MemType::Dram, &desc),
            Err(XferError::InvalidInput(_))
        ));
        assert!(matches!(
            reg.check_insert(MemType::Dram, &Desc::new(u64::MAX - 0x10, 0x100, 0)),
            Err(XferError::InvalidInput(_))
        ));
        reg.check_insert(MemType::Dram, &Desc::new(0x1080, 0x100, 0))
            .unwrap();
        reg.check_insert(MemType::Vram, &desc).unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn insert_exhausts_keys() {
        let mut reg = MemRegistry::new(1);
        let _key = reg.insert(MemType::Dram, Desc::new(0x1000, 1, 0)).unwrap();
        assert!(matches!(
            reg.insert(MemType::Dram, Desc::new(0x2000, 1, 0)),
            Err(XferError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn find_covering_regions() {
        let mut reg = MemRegistry::new(MAX_REG_CNT);
        let big = Desc::new(0x1000, 0x1000, 0);
        let small = Desc::new(0x1800, 0x10, 0);
        let big_key = reg.insert(MemType::Dram, big).unwrap();
        let _small_key = reg.insert(MemType::Dram, small).unwrap();
        let _other_dev = reg.insert(MemType::Dram, Desc::new(0x1000, 0x10000, 1)).unwrap();

        let hit = reg
            .find_covering(MemType::Dram, &Desc::new(0x1f00, 0x100, 0))
            .unwrap();
        assert_eq!(hit.key, big_key);
        assert!(reg
            .find_covering(MemType::Dram, &Desc::new(0x1808, 0x8, 0))
            .is_some());
        assert!(reg
            .find_covering(MemType::Dram, &Desc::new(0x1f00, 0x101, 0))
            .is_none());
        assert!(reg
            .find_covering(MemType::Dram, &Desc::new(0x800, 0x10, 0))
            .is_none());
        assert!(reg
            .find_covering(MemType::Vram, &Desc::new(0x1000, 0x10, 0))
            .is_none());
        assert!(reg
            .find_covering(MemType::Dram, &Desc::new(0x5000, 0x10, 1))
            .is_some());
    }
}
