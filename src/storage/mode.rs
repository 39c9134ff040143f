use crate::model::AttributeKind;

/// Physical width of a volume's per-row payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// 1 bit per row
    Boolean,
    /// 32 bits per row
    Int,
    /// 64 bits per row
    Long,
    /// 128 bits per row
    Uuid,
}

impl Mode {
    pub const fn bits_per_row(self) -> usize {
        match self {
            Mode::Boolean => 1,
            Mode::Int => 32,
            Mode::Long => 64,
            Mode::Uuid => 128,
        }
    }

    /// log2 of bytes per row (unused for booleans)
    const fn position_shift(self) -> usize {
        match self {
            Mode::Boolean => 0,
            Mode::Int => 2,
            Mode::Long => 3,
            Mode::Uuid => 4,
        }
    }

    /// Payload bytes of one block
    pub const fn value_bytes(self, block_size: usize) -> usize {
        (self.bits_per_row() * block_size).div_ceil(8)
    }

    /// Flag bytes of one block: two flags per row, four rows per byte
    pub const fn flag_bytes(block_size: usize) -> usize {
        block_size.div_ceil(4)
    }

    /// Byte offset of a row's payload inside the payload region
    pub const fn offset(self, row: usize) -> usize {
        row << self.position_shift()
    }

    /// Mode an attribute kind is stored in
    pub fn for_kind(kind: AttributeKind) -> Mode {
        match kind {
            AttributeKind::Boolean | AttributeKind::Container => Mode::Boolean,
            AttributeKind::Literal | AttributeKind::List => Mode::Int,
            AttributeKind::Discrete | AttributeKind::Continuous | AttributeKind::Timestamp => {
                Mode::Long
            }
            AttributeKind::Id => Mode::Uuid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(Mode::Boolean.value_bytes(16384), 2048);
        assert_eq!(Mode::Int.value_bytes(16384), 65536);
        assert_eq!(Mode::Uuid.value_bytes(16384), 262144);
        assert_eq!(Mode::flag_bytes(16384), 4096);
        assert_eq!(Mode::Boolean.value_bytes(4), 1);
        assert_eq!(Mode::flag_bytes(4), 1);
    }

    #[test]
    fn test_offsets() {
        assert_eq!(Mode::Int.offset(3), 12);
        assert_eq!(Mode::Long.offset(3), 24);
        assert_eq!(Mode::Uuid.offset(3), 48);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Mode::for_kind(AttributeKind::Literal), Mode::Int);
        assert_eq!(Mode::for_kind(AttributeKind::Continuous), Mode::Long);
        assert_eq!(Mode::for_kind(AttributeKind::Container), Mode::Boolean);
        assert_eq!(Mode::for_kind(AttributeKind::Id), Mode::Uuid);
    }
}
