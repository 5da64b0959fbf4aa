// Written over the unused tail of a buffer when a write does not fit.
pub const SENTINEL: u8 = 0xff;

pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unexpected end of buffer")]
    UnexpectedEnd,
    #[error("variable-length integer overflows 64 bits")]
    VarintOverflow,
    #[error("string not terminated within {max} bytes")]
    Unterminated { max: usize },
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("string of {len} bytes does not fit a {max} byte field")]
    StringTooLong { len: usize, max: usize },
    #[error("string contains an interior NUL")]
    InteriorNul,
    #[error("buffer full")]
    BufferFull,
    #[error("unexpected magic {0:#06x}")]
    BadMagic(u16),
    #[error("value {0} out of range")]
    OutOfRange(u64),
}

// Varints are big-endian base-128 with the continuation bit on every byte but the last.
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let (&b, rest) = self.buf.split_first().ok_or(WireError::UnexpectedEnd)?;
        self.buf = rest;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::UnexpectedEnd);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value: u64 = 0;
        for (i, &b) in self.buf.iter().enumerate() {
            if i == MAX_VARINT_LEN || value > (u64::MAX >> 7) {
                return Err(WireError::VarintOverflow);
            }
            value = (value << 7) | u64::from(b & 0x7f);
            if b & 0x80 == 0 {
                self.buf = &self.buf[i + 1..];
                return Ok(value);
            }
        }
        Err(WireError::UnexpectedEnd)
    }

    /// Reads a NUL-terminated string occupying at most `max` bytes including the NUL.
    /// On failure the cursor is left where it was.
    pub fn read_bounded_str(&mut self, max: usize) -> Result<&'a str, WireError> {
        let window = &self.buf[..self.buf.len().min(max)];
        let Some(nul) = window.iter().position(|&b| b == 0) else {
            return Err(if window.len() < max {
                WireError::UnexpectedEnd
            } else {
                WireError::Unterminated { max }
            });
        };
        let s = std::str::from_utf8(&window[..nul]).map_err(|_| WireError::InvalidUtf8)?;
        self.buf = &self.buf[nul + 1..];
        Ok(s)
    }
}

#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn exhaust(&mut self) -> WireError {
        self.buf[self.pos..].fill(SENTINEL);
        self.pos = self.buf.len();
        WireError::BufferFull
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), WireError> {
        if self.remaining() < data.len() {
            return Err(self.exhaust());
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_varint(&mut self, value: u64) -> Result<(), WireError> {
        let len = varint_len(value);
        if self.remaining() < len {
            return Err(self.exhaust());
        }
        for i in (0..len).rev() {
            let group = ((value >> (7 * i)) & 0x7f) as u8;
            self.buf[self.pos] = if i == 0 { group } else { group | 0x80 };
            self.pos += 1;
        }
        Ok(())
    }

    pub fn write_bounded_str(&mut self, s: &str, max: usize) -> Result<(), WireError> {
        if s.as_bytes().contains(&0) {
            self.exhaust();
            return Err(WireError::InteriorNul);
        }
        if s.len() + 1 > max {
            self.exhaust();
            return Err(WireError::StringTooLong { len: s.len(), max });
        }
        if self.remaining() < s.len() + 1 {
            return Err(self.exhaust());
        }
        self.write_bytes(s.as_bytes())?;
        self.write_u8(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varint_known_encodings() {
        let mut buf = [0u8; 16];
        let mut w = WireWriter::new(&mut buf);
        w.write_varint(0).unwrap();
        w.write_varint(0x7f).unwrap();
        w.write_varint(0x80).unwrap();
        w.write_varint(300).unwrap();
        assert_eq!(w.written(), &[0x00, 0x7f, 0x81, 0x00, 0x82, 0x2c]);

        let mut r = WireReader::new(&buf[..6]);
        assert_eq!(r.read_varint(), Ok(0));
        assert_eq!(r.read_varint(), Ok(0x7f));
        assert_eq!(r.read_varint(), Ok(0x80));
        assert_eq!(r.read_varint(), Ok(300));
        assert!(r.is_empty());
    }

    #[test]
    fn test_varint_unterminated() {
        let mut r = WireReader::new(&[0x81, 0x80]);
        assert_eq!(r.read_varint(), Err(WireError::UnexpectedEnd));
    }

    #[test]
    fn test_varint_overflow_rejected() {
        let mut r = WireReader::new(&[0xff; 12]);
        assert_eq!(r.read_varint(), Err(WireError::VarintOverflow));
    }

    #[test]
    fn test_write_failure_fills_sentinel() {
        let mut buf = [0u8; 4];
        let mut w = WireWriter::new(&mut buf);
        w.write_u16(0x0102).unwrap();
        assert_eq!(w.write_u32(7), Err(WireError::BufferFull));
        assert_eq!(w.remaining(), 0);
        assert_eq!(buf, [0x01, 0x02, SENTINEL, SENTINEL]);
    }

    #[test]
    fn test_bounded_str_too_long() {
        let mut buf = [0u8; 64];
        let mut w = WireWriter::new(&mut buf);
        assert!(w.write_bounded_str("abcd", 4).is_err());
        assert!(buf.iter().all(|&b| b == SENTINEL));
    }

    #[test]
    fn test_bounded_str_unterminated() {
        let mut r = WireReader::new(b"abcdef\0");
        assert_eq!(
            r.read_bounded_str(4),
            Err(WireError::Unterminated { max: 4 })
        );
        assert_eq!(r.remaining(), 7);
        assert_eq!(r.read_bounded_str(8), Ok("abcdef"));
    }

    #[test]
    fn test_fixed_width_big_endian() {
        let mut r = WireReader::new(&[0xaa, 0x02, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(r.read_u16(), Ok(0xaa02));
        assert_eq!(r.read_u32(), Ok(0x01020304));
        assert_eq!(r.read_u16(), Err(WireError::UnexpectedEnd));
    }

    proptest! {
        #[test]
        fn prop_varint_roundtrip(value in any::<u64>()) {
            let mut buf = [0u8; MAX_VARINT_LEN];
            let mut w = WireWriter::new(&mut buf);
            w.write_varint(value).unwrap();
            let len = w.position();
            prop_assert_eq!(len, varint_len(value));

            let mut r = WireReader::new(&buf[..len]);
            prop_assert_eq!(r.read_varint(), Ok(value));
            prop_assert!(r.is_empty());
        }

        #[test]
        fn prop_varint_respects_capacity(value in any::<u64>(), cap in 0usize..MAX_VARINT_LEN) {
            let mut buf = [0u8; MAX_VARINT_LEN + 4];
            let mut w = WireWriter::new(&mut buf[..cap]);
            let ok = w.write_varint(value).is_ok();
            prop_assert_eq!(ok, varint_len(value) <= cap);
            prop_assert!(buf[cap..].iter().all(|&b| b == 0));
        }

        #[test]
        fn prop_varint_never_overreads(data in prop::collection::vec(any::<u8>(), 0..16)) {
            let mut r = WireReader::new(&data);
            let before = r.remaining();
            if r.read_varint().is_ok() {
                prop_assert!(r.remaining() < before);
            } else {
                prop_assert_eq!(r.remaining(), before);
            }
        }

        #[test]
        fn prop_bounded_str_roundtrip(s in "[a-zA-Z0-9 _-]{0,31}") {
            let mut buf = [0u8; 32];
            let mut w = WireWriter::new(&mut buf);
            w.write_bounded_str(&s, 32).unwrap();
            let len = w.position();

            let mut r = WireReader::new(&buf[..len]);
            prop_assert_eq!(r.read_bounded_str(32), Ok(s.as_str()));
        }
    }
}
