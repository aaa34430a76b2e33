use core::str;

use crate::error::{Error, Result, check_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LaneWidth {
    W8,
    W16,
    W32,
    W64,
}

impl LaneWidth {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    #[inline]
    pub const fn unsigned_max(self) -> u64 {
        match self {
            Self::W64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    #[inline]
    pub const fn signed_range(self) -> (i64, i64) {
        match self {
            Self::W64 => (i64::MIN, i64::MAX),
            _ => {
                let half = 1i64 << (self.bits() - 1);
                (-half, half - 1)
            }
        }
    }
}

/// Flat fixed-width element storage.
///
/// All lanes share one width. Changing it goes through
/// [`NativeStorage::convert_to_width`], which reallocates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeStorage {
    Bytes(Vec<u8>),
    Shorts(Vec<u16>),
    Words(Vec<u32>),
    Longs(Vec<u64>),
}

impl NativeStorage {
    pub fn new(width: LaneWidth, count: usize) -> Self {
        match width {
            LaneWidth::W8 => Self::Bytes(vec![0; count]),
            LaneWidth::W16 => Self::Shorts(vec![0; count]),
            LaneWidth::W32 => Self::Words(vec![0; count]),
            LaneWidth::W64 => Self::Longs(vec![0; count]),
        }
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }

    #[inline]
    pub fn from_text(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    pub fn width(&self) -> LaneWidth {
        match self {
            Self::Bytes(_) => LaneWidth::W8,
            Self::Shorts(_) => LaneWidth::W16,
            Self::Words(_) => LaneWidth::W32,
            Self::Longs(_) => LaneWidth::W64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(v) => v.len(),
            Self::Shorts(v) => v.len(),
            Self::Words(v) => v.len(),
            Self::Longs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len() * self.width().bytes()
    }

    /// Number of 64-bit words the contents occupy when written out.
    #[inline]
    pub fn num_slots(&self) -> usize {
        self.byte_len().div_ceil(8)
    }

    // ── unsigned view ──────────────────────────────────────────────

    pub fn read_unsigned(&self, index: usize) -> Result<u64> {
        check_index(index, self.len())?;
        Ok(match self {
            Self::Bytes(v) => v[index] as u64,
            Self::Shorts(v) => v[index] as u64,
            Self::Words(v) => v[index] as u64,
            Self::Longs(v) => v[index],
        })
    }

    pub fn write_unsigned(&mut self, index: usize, value: u64) -> Result<()> {
        check_index(index, self.len())?;
        if value > self.width().unsigned_max() {
            return Err(Error::UnsupportedValue("value exceeds lane width"));
        }
        match self {
            Self::Bytes(v) => v[index] = value as u8,
            Self::Shorts(v) => v[index] = value as u16,
            Self::Words(v) => v[index] = value as u32,
            Self::Longs(v) => v[index] = value,
        }
        Ok(())
    }

    // ── signed view ────────────────────────────────────────────────

    pub fn read_signed(&self, index: usize) -> Result<i64> {
        check_index(index, self.len())?;
        Ok(match self {
            Self::Bytes(v) => v[index] as i8 as i64,
            Self::Shorts(v) => v[index] as i16 as i64,
            Self::Words(v) => v[index] as i32 as i64,
            Self::Longs(v) => v[index] as i64,
        })
    }

    pub fn write_signed(&mut self, index: usize, value: i64) -> Result<()> {
        check_index(index, self.len())?;
        let (min, max) = self.width().signed_range();
        if !(min..=max).contains(&value) {
            return Err(Error::UnsupportedValue("value exceeds lane width"));
        }
        match self {
            Self::Bytes(v) => v[index] = value as i8 as u8,
            Self::Shorts(v) => v[index] = value as i16 as u16,
            Self::Words(v) => v[index] = value as i32 as u32,
            Self::Longs(v) => v[index] = value as u64,
        }
        Ok(())
    }

    // ── byte image ─────────────────────────────────────────────────

    /// Little-endian byte image of the whole buffer.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bytes(v) => v.clone(),
            Self::Shorts(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Self::Words(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            Self::Longs(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Decode an 8-bit buffer as UTF-8.
    pub fn as_utf8(&self) -> Result<&str> {
        let bytes = self
            .as_bytes()
            .ok_or(Error::BadReceiver("not a byte lane"))?;
        str::from_utf8(bytes).map_err(|_| Error::UnsupportedValue("not utf-8"))
    }

    /// Reinterpret the byte image at `width`, zero-padding a short tail.
    pub fn convert_to_width(&mut self, width: LaneWidth) {
        if width == self.width() {
            return;
        }
        log::debug!("lane conversion from {:?} to {:?}", self.width(), width);
        let mut bytes = self.to_le_bytes();
        let step = width.bytes();
        bytes.resize(bytes.len().div_ceil(step) * step, 0);
        *self = match width {
            LaneWidth::W8 => Self::Bytes(bytes),
            LaneWidth::W16 => Self::Shorts(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            LaneWidth::W32 => Self::Words(
                bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            LaneWidth::W64 => Self::Longs(
                bytes
                    .chunks_exact(8)
                    .map(|c| {
                        let mut word = [0u8; 8];
                        word.copy_from_slice(c);
                        u64::from_le_bytes(word)
                    })
                    .collect(),
            ),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_bounds_per_width() {
        let mut s = NativeStorage::new(LaneWidth::W8, 2);
        s.write_unsigned(0, 255).unwrap();
        assert_eq!(
            s.write_unsigned(1, 256),
            Err(Error::UnsupportedValue("value exceeds lane width"))
        );
        assert_eq!(s.read_unsigned(1).unwrap(), 0);

        let mut s = NativeStorage::new(LaneWidth::W64, 1);
        s.write_unsigned(0, u64::MAX).unwrap();
        assert_eq!(s.read_unsigned(0).unwrap(), u64::MAX);
        assert_eq!(s.read_signed(0).unwrap(), -1);
    }

    #[test]
    fn signed_view_sign_extends() {
        let mut s = NativeStorage::new(LaneWidth::W16, 1);
        s.write_signed(0, -2).unwrap();
        assert_eq!(s.read_unsigned(0).unwrap(), 0xFFFE);
        assert_eq!(s.read_signed(0).unwrap(), -2);
        assert!(s.write_signed(0, 32_768).is_err());
        assert!(s.write_signed(0, -32_769).is_err());
    }

    #[test]
    fn index_out_of_bounds() {
        let s = NativeStorage::new(LaneWidth::W32, 3);
        assert_eq!(
            s.read_unsigned(3),
            Err(Error::OutOfBounds { index: 3, size: 3 })
        );
    }

    #[test]
    fn widen_reinterprets_little_endian() {
        let mut s = NativeStorage::from_bytes(&[1, 0, 0, 0, 2, 0]);
        s.convert_to_width(LaneWidth::W32);
        assert_eq!(s, NativeStorage::Words(vec![1, 2]));
        assert_eq!(s.byte_len(), 8);
    }

    #[test]
    fn narrow_keeps_byte_image() {
        let mut s = NativeStorage::Words(vec![0x0403_0201]);
        s.convert_to_width(LaneWidth::W8);
        assert_eq!(s.as_bytes(), Some(&[1u8, 2, 3, 4][..]));
        s.convert_to_width(LaneWidth::W8);
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn strings_and_slots() {
        let s = NativeStorage::from_text("hello world");
        assert_eq!(s.as_utf8(), Ok("hello world"));
        assert_eq!(s.num_slots(), 2);
        assert!(NativeStorage::Shorts(vec![1]).as_utf8().is_err());
    }
}
