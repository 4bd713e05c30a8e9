use crate::error::BinaryError;

/// Bounds-checked little-endian reader over an untrusted byte slice.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], BinaryError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(BinaryError::Truncated {
                offset: self.pos,
                needed: len,
                len: self.bytes.len(),
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, BinaryError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn read_magic(&mut self, expected: [u8; 4]) -> Result<(), BinaryError> {
        let raw = self.take(4)?;
        let found = [raw[0], raw[1], raw[2], raw[3]];
        if found != expected {
            return Err(BinaryError::BadMagic { found, expected });
        }
        Ok(())
    }

    /// Reads a NUL-terminated UTF-8 string, consuming the terminator.
    pub(crate) fn read_cstr(&mut self) -> Result<String, BinaryError> {
        let start = self.pos;
        let rest = &self.bytes[start.min(self.bytes.len())..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(BinaryError::InvalidName { offset: start })?;
        let name = core::str::from_utf8(&rest[..nul])
            .map_err(|_| BinaryError::InvalidName { offset: start })?
            .to_owned();
        self.pos = start + nul + 1;
        Ok(name)
    }

    pub(crate) fn align_to(&mut self, alignment: usize) -> Result<(), BinaryError> {
        let padding = (alignment - self.pos % alignment) % alignment;
        self.take(padding)?;
        Ok(())
    }
}

/// Reads `count` elements, rejecting counts above `max` before allocating.
pub(crate) fn checked_count(what: &'static str, count: u32, max: u32) -> Result<usize, BinaryError> {
    if count > max {
        return Err(BinaryError::TooMany { what, count, max });
    }
    Ok(count as usize)
}

pub(crate) fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn to_u32(value: usize, what: &'static str) -> Result<u32, BinaryError> {
    u32::try_from(value).map_err(|_| BinaryError::TooLarge(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_reports_truncation() {
        let bytes = [1u8, 2, 3];
        let mut c = Cursor::new(&bytes);
        assert_eq!(
            c.read_u32(),
            Err(BinaryError::Truncated {
                offset: 0,
                needed: 4,
                len: 3
            })
        );
    }

    #[test]
    fn cstr_and_alignment() {
        let bytes = b"abc\0\0\0\0\0\x07\0\0\0";
        let mut c = Cursor::new(bytes);
        assert_eq!(c.read_cstr().unwrap(), "abc");
        assert_eq!(c.position(), 4);
        c.align_to(4).unwrap();
        assert_eq!(c.position(), 4);
        c.take(1).unwrap();
        c.align_to(4).unwrap();
        assert_eq!(c.position(), 8);
        assert_eq!(c.read_u32().unwrap(), 7);
    }

    #[test]
    fn unterminated_name_is_rejected() {
        let mut c = Cursor::new(b"abc");
        assert_eq!(c.read_cstr(), Err(BinaryError::InvalidName { offset: 0 }));
    }
}
