/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const IMMEDIATE_TAG: u64 = 0b11;

const SUBTAG_SHIFT: u32 = 2;
const SUBTAG_MASK: u64 = 0b111 << SUBTAG_SHIFT;
const SUBTAG_NIL: u64 = 0;
const SUBTAG_FALSE: u64 = 1;
const SUBTAG_TRUE: u64 = 2;
const SUBTAG_CHAR: u64 = 3;
const CHAR_SHIFT: u32 = 32;

/// Largest value representable as a fixnum.
pub const FIXNUM_MAX: i64 = (1i64 << 62) - 1;
/// Smallest value representable as a fixnum.
pub const FIXNUM_MIN: i64 = -(1i64 << 62);
/// Largest character code point.
pub const CHAR_MAX: u32 = 0x3FFF_FFFF;

/// Index of an object in the [`crate::ObjectMemory`] arena.
pub type Oop = u32;

/// A tagged 64-bit value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0`: 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01`: arena index shifted left by 2.
/// - **Immediate**: `...XXXX11`: subtag in bits 2..5 (nil, false, true,
///   char), character code in the upper 32 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value(IMMEDIATE_TAG | (SUBTAG_NIL << SUBTAG_SHIFT));
    pub const FALSE: Value =
        Value(IMMEDIATE_TAG | (SUBTAG_FALSE << SUBTAG_SHIFT));
    pub const TRUE: Value = Value(IMMEDIATE_TAG | (SUBTAG_TRUE << SUBTAG_SHIFT));

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            (FIXNUM_MIN..=FIXNUM_MAX).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n << 1) as u64)
    }

    #[inline]
    pub fn try_from_i64(n: i64) -> Option<Self> {
        (FIXNUM_MIN..=FIXNUM_MAX)
            .contains(&n)
            .then(|| Self::from_i64(n))
    }

    #[inline(always)]
    pub const fn as_i64(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub const fn from_oop(oop: Oop) -> Self {
        Self(((oop as u64) << 2) | REF_TAG)
    }

    #[inline(always)]
    pub const fn oop(self) -> Option<Oop> {
        if self.is_ref() {
            Some((self.0 >> 2) as Oop)
        } else {
            None
        }
    }

    // ── Immediates ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & TAG_MASK == IMMEDIATE_TAG
    }

    #[inline(always)]
    const fn subtag(self) -> u64 {
        (self.0 & SUBTAG_MASK) >> SUBTAG_SHIFT
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    #[inline(always)]
    pub const fn as_bool(self) -> Option<bool> {
        if self.0 == Self::TRUE.0 {
            Some(true)
        } else if self.0 == Self::FALSE.0 {
            Some(false)
        } else {
            None
        }
    }

    #[inline]
    pub const fn from_char(code: u32) -> Option<Self> {
        if code > CHAR_MAX {
            return None;
        }
        Some(Self(
            ((code as u64) << CHAR_SHIFT)
                | (SUBTAG_CHAR << SUBTAG_SHIFT)
                | IMMEDIATE_TAG,
        ))
    }

    #[inline(always)]
    pub const fn is_char(self) -> bool {
        self.is_immediate() && self.subtag() == SUBTAG_CHAR
    }

    #[inline(always)]
    pub const fn as_char(self) -> Option<u32> {
        if self.is_char() {
            Some((self.0 >> CHAR_SHIFT) as u32)
        } else {
            None
        }
    }

    /// An immediate whose bits decode to none of the known immediates.
    #[inline]
    pub const fn is_malformed(self) -> bool {
        if !self.is_immediate() {
            return false;
        }
        match self.subtag() {
            SUBTAG_NIL | SUBTAG_FALSE | SUBTAG_TRUE => {
                self.0 >> SUBTAG_SHIFT != self.subtag()
            }
            SUBTAG_CHAR => {
                (self.0 >> CHAR_SHIFT) as u32 > CHAR_MAX
                    || (self.0 as u32) >> (SUBTAG_SHIFT + 3) != 0
            }
            _ => true,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.as_i64() {
            write!(f, "Fixnum({n})")
        } else if let Some(oop) = self.oop() {
            write!(f, "Ref({oop})")
        } else if self.is_nil() {
            f.write_str("nil")
        } else if let Some(b) = self.as_bool() {
            write!(f, "{b}")
        } else if let Some(c) = self.as_char() {
            match char::from_u32(c) {
                Some(ch) => write!(f, "${ch}"),
                None => write!(f, "Char(0x{c:x})"),
            }
        } else {
            write!(f, "Malformed(0x{:016x})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value tagging ──────────────────────────────────────────────

    #[test]
    fn fixnum_roundtrip() {
        for n in [0, 1, -1, 42, FIXNUM_MAX, FIXNUM_MIN] {
            let v = Value::from_i64(n);
            assert!(v.is_fixnum());
            assert!(!v.is_ref());
            assert_eq!(v.as_i64(), Some(n));
        }
    }

    #[test]
    fn fixnum_range_is_checked() {
        assert!(Value::try_from_i64(FIXNUM_MAX + 1).is_none());
        assert!(Value::try_from_i64(FIXNUM_MIN - 1).is_none());
        assert!(Value::try_from_i64(i64::MIN + 42).is_none());
    }

    #[test]
    fn reference_tagging() {
        let v = Value::from_oop(1234);
        assert!(v.is_ref());
        assert!(!v.is_fixnum());
        assert!(!v.is_immediate());
        assert_eq!(v.oop(), Some(1234));
    }

    #[test]
    fn immediates_are_distinct() {
        let all = [Value::NIL, Value::TRUE, Value::FALSE];
        for (i, a) in all.iter().enumerate() {
            assert!(a.is_immediate());
            assert!(!a.is_malformed(), "{a:?}");
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(Value::from_bool(true).as_bool(), Some(true));
        assert_eq!(Value::NIL.as_bool(), None);
    }

    #[test]
    fn chars() {
        let a = Value::from_char('a' as u32).unwrap();
        assert!(a.is_char());
        assert_eq!(a.as_char(), Some('a' as u32));
        assert!(Value::from_char(CHAR_MAX).is_some());
        assert!(Value::from_char(CHAR_MAX + 1).is_none());
        assert!(!a.is_malformed());
    }

    #[test]
    fn malformed_immediates() {
        assert!(Value::from_raw(0b111 << 2 | 0b11).is_malformed());
        assert!(Value::from_raw(1 << 40 | 0b11).is_malformed());
        assert!(!Value::from_i64(7).is_malformed());
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", Value::from_i64(5)), "Fixnum(5)");
        assert_eq!(format!("{:?}", Value::NIL), "nil");
        assert_eq!(format!("{:?}", Value::from_oop(3)), "Ref(3)");
    }
}
