//! Adaptive storage for indexable pointer containers.
//!
//! A container starts out as [`ArrayStorage::Empty`] and widens on demand:
//! empty → one homogeneous primitive lane → general object array. Each
//! primitive lane reserves one bit pattern as its nil tag so nil can be stored
//! without falling back to object storage.

use crate::{
    Value,
    error::{Error, Result, check_index},
    value::{CHAR_MAX, FIXNUM_MAX, FIXNUM_MIN},
};

pub const BOOLEAN_NIL_TAG: u8 = 0;
pub const BOOLEAN_TRUE_TAG: u8 = 1;
pub const BOOLEAN_FALSE_TAG: u8 = 0xFF;
/// Above [`CHAR_MAX`], so never a legitimate character.
pub const CHAR_NIL_TAG: u32 = 0xFFFF_FFFE;
/// Outside the fixnum range, so never a legitimate small integer.
pub const LONG_NIL_TAG: i64 = i64::MIN + 42;
pub const DOUBLE_NIL_TAG_BITS: u64 = 0x7FF8_0000_0000_0001;
pub const CANONICAL_NAN_BITS: u64 = 0x7FF8_0000_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Empty,
    Boolean,
    Char,
    Long,
    Double,
    Object,
}

impl StorageKind {
    /// Position in the widening order. Transitions only ever increase it.
    #[inline]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Boolean | Self::Char | Self::Long | Self::Double => 1,
            Self::Object => 2,
        }
    }
}

/// What a logical value looks like to the storage engine.
///
/// The memory classifies a [`Value`] before writing it; boxed floats arrive
/// as [`Element::Double`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Element {
    Nil,
    Boolean(bool),
    Char(u32),
    Long(i64),
    Double(f64),
    Object,
}

impl Element {
    #[inline]
    fn native_kind(self) -> Option<StorageKind> {
        match self {
            Self::Nil => None,
            Self::Boolean(_) => Some(StorageKind::Boolean),
            Self::Char(_) => Some(StorageKind::Char),
            Self::Long(_) => Some(StorageKind::Long),
            Self::Double(_) => Some(StorageKind::Double),
            Self::Object => Some(StorageKind::Object),
        }
    }
}

/// A slot as stored, before doubles are boxed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Value(Value),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayStorage {
    Empty(usize),
    Booleans(Vec<u8>),
    Chars(Vec<u32>),
    Longs(Vec<i64>),
    Doubles(Vec<f64>),
    Objects(Vec<Value>),
}

#[inline]
fn normalize_double(d: f64) -> f64 {
    if d.to_bits() == DOUBLE_NIL_TAG_BITS {
        log::warn!("normalizing reserved NaN pattern in double storage");
        f64::from_bits(CANONICAL_NAN_BITS)
    } else {
        d
    }
}

#[inline]
fn is_double_nil(d: f64) -> bool {
    d.to_bits() == DOUBLE_NIL_TAG_BITS
}

impl ArrayStorage {
    /// Storage for `size` nil elements.
    pub fn new(size: usize, strategies: bool) -> Self {
        if strategies {
            Self::Empty(size)
        } else {
            Self::Objects(vec![Value::NIL; size])
        }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            Self::Empty(_) => StorageKind::Empty,
            Self::Booleans(_) => StorageKind::Boolean,
            Self::Chars(_) => StorageKind::Char,
            Self::Longs(_) => StorageKind::Long,
            Self::Doubles(_) => StorageKind::Double,
            Self::Objects(_) => StorageKind::Object,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Empty(n) => *n,
            Self::Booleans(v) => v.len(),
            Self::Chars(v) => v.len(),
            Self::Longs(v) => v.len(),
            Self::Doubles(v) => v.len(),
            Self::Objects(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Only object storage holds references the collector has to follow.
    #[inline]
    pub fn is_traceable(&self) -> bool {
        matches!(self, Self::Objects(_))
    }

    pub fn objects(&self) -> Option<&[Value]> {
        match self {
            Self::Objects(v) => Some(v),
            _ => None,
        }
    }

    pub fn objects_mut(&mut self) -> Option<&mut [Value]> {
        match self {
            Self::Objects(v) => Some(v),
            _ => None,
        }
    }

    // ── read ───────────────────────────────────────────────────────

    pub fn read_slot(&self, index: usize) -> Result<Slot> {
        check_index(index, self.len())?;
        Ok(self.slot_at(index))
    }

    fn slot_at(&self, index: usize) -> Slot {
        let value = match self {
            Self::Empty(_) => Value::NIL,
            Self::Booleans(v) => match v[index] {
                BOOLEAN_NIL_TAG => Value::NIL,
                BOOLEAN_TRUE_TAG => Value::TRUE,
                _ => Value::FALSE,
            },
            Self::Chars(v) => match v[index] {
                CHAR_NIL_TAG => Value::NIL,
                c => Value::from_char(c).unwrap_or(Value::NIL),
            },
            Self::Longs(v) => match v[index] {
                LONG_NIL_TAG => Value::NIL,
                n => Value::from_i64(n),
            },
            Self::Doubles(v) => {
                let d = v[index];
                if is_double_nil(d) {
                    Value::NIL
                } else {
                    return Slot::Double(d);
                }
            }
            Self::Objects(v) => v[index],
        };
        Slot::Value(value)
    }

    /// Read one element, boxing doubles through `boxer`.
    pub fn read(
        &self,
        index: usize,
        boxer: impl FnOnce(f64) -> Value,
    ) -> Result<Value> {
        Ok(match self.read_slot(index)? {
            Slot::Value(v) => v,
            Slot::Double(d) => boxer(d),
        })
    }

    // ── write ──────────────────────────────────────────────────────

    /// Store `value`, classified as `element`, widening if it does not fit.
    ///
    /// `boxer` is only called when double storage generalizes to objects.
    pub fn write(
        &mut self,
        index: usize,
        value: Value,
        element: Element,
        mut boxer: impl FnMut(f64) -> Value,
    ) -> Result<()> {
        check_index(index, self.len())?;
        loop {
            let stored = match self {
                Self::Empty(_) => match element {
                    Element::Nil => return Ok(()),
                    _ => false,
                },
                Self::Booleans(v) => match element {
                    Element::Nil => {
                        v[index] = BOOLEAN_NIL_TAG;
                        true
                    }
                    Element::Boolean(b) => {
                        v[index] =
                            if b { BOOLEAN_TRUE_TAG } else { BOOLEAN_FALSE_TAG };
                        true
                    }
                    _ => false,
                },
                Self::Chars(v) => match element {
                    Element::Nil => {
                        v[index] = CHAR_NIL_TAG;
                        true
                    }
                    Element::Char(c) => {
                        v[index] = c;
                        true
                    }
                    _ => false,
                },
                Self::Longs(v) => match element {
                    Element::Nil => {
                        v[index] = LONG_NIL_TAG;
                        true
                    }
                    Element::Long(n) => {
                        v[index] = n;
                        true
                    }
                    _ => false,
                },
                Self::Doubles(v) => match element {
                    Element::Nil => {
                        v[index] = f64::from_bits(DOUBLE_NIL_TAG_BITS);
                        true
                    }
                    Element::Double(d) => {
                        v[index] = normalize_double(d);
                        true
                    }
                    _ => false,
                },
                Self::Objects(v) => {
                    v[index] = value;
                    true
                }
            };
            if stored {
                return Ok(());
            }
            let to = match self.kind() {
                StorageKind::Empty => {
                    element.native_kind().unwrap_or(StorageKind::Object)
                }
                _ => StorageKind::Object,
            };
            self.transition(to, &mut boxer);
        }
    }

    /// Replay `elements` through [`ArrayStorage::write`] from index 0.
    ///
    /// Fails without mutation when there are more elements than slots.
    pub fn fill_from_values(
        &mut self,
        elements: &[(Value, Element)],
        mut boxer: impl FnMut(f64) -> Value,
    ) -> Result<()> {
        if elements.len() > self.len() {
            return Err(Error::OutOfBounds {
                index: elements.len() - 1,
                size: self.len(),
            });
        }
        for (i, &(value, element)) in elements.iter().enumerate() {
            self.write(i, value, element, &mut boxer)?;
        }
        Ok(())
    }

    // ── transitions ────────────────────────────────────────────────

    fn transition(
        &mut self,
        to: StorageKind,
        boxer: &mut dyn FnMut(f64) -> Value,
    ) {
        let from = self.kind();
        debug_assert!(to.rank() > from.rank(), "{from:?} -> {to:?}");
        log::debug!("transition from {from:?} to {to:?}");
        let n = self.len();
        let next = match to {
            StorageKind::Empty => Self::Empty(n),
            StorageKind::Boolean => Self::Booleans(vec![BOOLEAN_NIL_TAG; n]),
            StorageKind::Char => Self::Chars(vec![CHAR_NIL_TAG; n]),
            StorageKind::Long => Self::Longs(vec![LONG_NIL_TAG; n]),
            StorageKind::Double => {
                Self::Doubles(vec![f64::from_bits(DOUBLE_NIL_TAG_BITS); n])
            }
            StorageKind::Object => {
                let mut objects = Vec::with_capacity(n);
                for i in 0..n {
                    objects.push(match self.slot_at(i) {
                        Slot::Value(v) => v,
                        Slot::Double(d) => boxer(d),
                    });
                }
                Self::Objects(objects)
            }
        };
        *self = next;
    }

    /// Swap backing buffers with `other` in O(1).
    #[inline]
    pub fn become_same_kind(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }

    // ── raw lane writes ────────────────────────────────────────────

    fn prepare_raw(&mut self, kind: StorageKind, start: usize, count: usize) -> Result<()> {
        let end = start.saturating_add(count);
        if end > self.len() {
            return Err(Error::OutOfBounds {
                index: end.saturating_sub(1),
                size: self.len(),
            });
        }
        match self.kind() {
            StorageKind::Empty => {
                self.transition(kind, &mut |_: f64| Value::NIL);
                Ok(())
            }
            k if k == kind => Ok(()),
            _ => Err(Error::BadReceiver("storage kind does not match raw lane")),
        }
    }

    /// Copy raw boolean tag bytes into `start..`.
    pub fn write_raw_booleans(&mut self, start: usize, raw: &[u8]) -> Result<()> {
        if raw
            .iter()
            .any(|&b| b != BOOLEAN_TRUE_TAG && b != BOOLEAN_FALSE_TAG)
        {
            log::warn!("rejected raw boolean lane write containing a nil tag");
            return Err(Error::UnsupportedValue("boolean nil tag in raw lane"));
        }
        self.prepare_raw(StorageKind::Boolean, start, raw.len())?;
        if let Self::Booleans(v) = self {
            v[start..start + raw.len()].copy_from_slice(raw);
        }
        Ok(())
    }

    pub fn write_raw_chars(&mut self, start: usize, raw: &[u32]) -> Result<()> {
        if raw.iter().any(|&c| c == CHAR_NIL_TAG) {
            log::warn!("rejected raw char lane write containing a nil tag");
            return Err(Error::UnsupportedValue("char nil tag in raw lane"));
        }
        if raw.iter().any(|&c| c > CHAR_MAX) {
            return Err(Error::UnsupportedValue("char code out of range"));
        }
        self.prepare_raw(StorageKind::Char, start, raw.len())?;
        if let Self::Chars(v) = self {
            v[start..start + raw.len()].copy_from_slice(raw);
        }
        Ok(())
    }

    pub fn write_raw_longs(&mut self, start: usize, raw: &[i64]) -> Result<()> {
        if raw.iter().any(|&n| n == LONG_NIL_TAG) {
            log::warn!("rejected raw long lane write containing a nil tag");
            return Err(Error::UnsupportedValue("long nil tag in raw lane"));
        }
        if raw.iter().any(|n| !(FIXNUM_MIN..=FIXNUM_MAX).contains(n)) {
            return Err(Error::UnsupportedValue("long outside fixnum range"));
        }
        self.prepare_raw(StorageKind::Long, start, raw.len())?;
        if let Self::Longs(v) = self {
            v[start..start + raw.len()].copy_from_slice(raw);
        }
        Ok(())
    }

    /// Doubles carrying the nil tag pattern are normalized, not rejected.
    pub fn write_raw_doubles(&mut self, start: usize, raw: &[f64]) -> Result<()> {
        self.prepare_raw(StorageKind::Double, start, raw.len())?;
        if let Self::Doubles(v) = self {
            for (slot, &d) in v[start..start + raw.len()].iter_mut().zip(raw) {
                *slot = normalize_double(d);
            }
        }
        Ok(())
    }
}
