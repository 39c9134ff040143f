use crate::error::{Error, Result};
use crate::model::OwnerId;
use crate::pool::StringId;
use std::ops::RangeInclusive;

/// `owner id + key id` packed into one ordered `u64`
///
/// Owner ids are multiples of the interval capacity and key ids are below
/// it, so all keys of one owner form a contiguous range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(u64);

impl CompositeKey {
    pub fn new(owner: OwnerId, key: StringId, interval_capacity: u64) -> Result<Self> {
        if u64::from(key) >= interval_capacity {
            return Err(Error::InvalidArgument(format!(
                "key id {} does not fit an interval of {}",
                key, interval_capacity
            )));
        }
        if owner & (interval_capacity - 1) != 0 {
            return Err(Error::InvalidArgument(format!(
                "owner id {} is not aligned to {}",
                owner, interval_capacity
            )));
        }
        Ok(Self(owner | u64::from(key)))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn owner(self, interval_capacity: u64) -> OwnerId {
        self.0 & !(interval_capacity - 1)
    }

    pub fn key(self, interval_capacity: u64) -> StringId {
        (self.0 & (interval_capacity - 1)) as StringId
    }

    /// Every composite key of `owner`
    pub fn owner_range(owner: OwnerId, interval_capacity: u64) -> RangeInclusive<u64> {
        owner..=owner + (interval_capacity - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() -> Result<()> {
        let key = CompositeKey::new(3 * 4096, 17, 4096)?;
        assert_eq!(key.raw(), 3 * 4096 + 17);
        assert_eq!(key.owner(4096), 3 * 4096);
        assert_eq!(key.key(4096), 17);
        assert!(CompositeKey::owner_range(3 * 4096, 4096).contains(&key.raw()));
        assert!(!CompositeKey::owner_range(4 * 4096, 4096).contains(&key.raw()));
        Ok(())
    }

    #[test]
    fn test_rejects_out_of_interval() {
        assert!(CompositeKey::new(0, 4096, 4096).is_err());
        assert!(CompositeKey::new(5, 1, 4096).is_err());
    }

    #[test]
    fn test_ordering_groups_owners() -> Result<()> {
        let a = CompositeKey::new(0, 4095, 4096)?;
        let b = CompositeKey::new(4096, 0, 4096)?;
        assert!(a < b);
        Ok(())
    }
}
