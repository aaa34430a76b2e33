use bitflags::bitflags;

bitflags! {
    /// Bookkeeping flags stored in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// Set while the object is reachable during a trace.
        const MARK = 1 << 0;
        /// Writes through the accessor layer are refused.
        const IMMUTABLE = 1 << 1;
    }
}

const FLAGS_SHIFT: u32 = 0;
const FLAGS_MASK: u64 = 0xFF;
const HASH_SHIFT: u32 = 8;
/// Number of bits in an identity hash.
pub const HASH_BITS: u32 = 22;
pub const HASH_MASK: u32 = (1 << HASH_BITS) - 1;

/// The per-object header word.
///
/// ```text
/// bits 0..8:   flags: Mark | Immutable
/// bits 8..30:  identity hash (never zero once assigned)
/// bits 30..64: reserved (zero)
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Header(u64);

impl Header {
    #[inline]
    pub fn new(hash: u32) -> Self {
        let mut header = Self(0);
        header.set_hash(hash);
        header
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(
            ((self.0 >> FLAGS_SHIFT) & FLAGS_MASK) as u8,
        )
    }

    #[inline(always)]
    pub fn has_flag(self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&mut self, flag: HeaderFlags) {
        self.0 |= (flag.bits() as u64) << FLAGS_SHIFT;
    }

    #[inline(always)]
    pub fn remove_flag(&mut self, flag: HeaderFlags) {
        self.0 &= !((flag.bits() as u64) << FLAGS_SHIFT);
    }

    // ── identity hash ──────────────────────────────────────────────

    #[inline(always)]
    pub const fn hash(self) -> u32 {
        ((self.0 >> HASH_SHIFT) as u32) & HASH_MASK
    }

    #[inline]
    pub fn set_hash(&mut self, hash: u32) {
        debug_assert!(hash & !HASH_MASK == 0, "hash out of range: {hash:#x}");
        self.0 &= !((HASH_MASK as u64) << HASH_SHIFT);
        self.0 |= ((hash & HASH_MASK) as u64) << HASH_SHIFT;
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("hash", &self.hash())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_do_not_disturb_hash() {
        let mut h = Header::new(0x2A_BCDE);
        h.add_flag(HeaderFlags::MARK);
        assert!(h.has_flag(HeaderFlags::MARK));
        assert_eq!(h.hash(), 0x2A_BCDE);
        h.remove_flag(HeaderFlags::MARK);
        assert!(!h.has_flag(HeaderFlags::MARK));
        assert_eq!(h.hash(), 0x2A_BCDE);
    }

    #[test]
    fn hash_replacement_keeps_flags() {
        let mut h = Header::new(1);
        h.add_flag(HeaderFlags::IMMUTABLE);
        h.set_hash(HASH_MASK);
        assert_eq!(h.hash(), HASH_MASK);
        assert!(h.has_flag(HeaderFlags::IMMUTABLE));
    }
}
