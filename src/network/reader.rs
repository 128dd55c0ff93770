use crate::PacketError;

/// Bounds-checked cursor over an inbound packet.
///
/// Every read either returns a value and advances, or fails with
/// [`PacketError::Truncated`] and leaves the position where it was.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PacketReader<'a> {
    /// Starts reading at the beginning of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Current byte offset.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Returns `true` once every byte has been read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(PacketError::Truncated {
                offset: self.offset,
            })?;
        let bytes = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a big-endian `i32`.
    pub fn read_i32_be(&mut self) -> Result<i32, PacketError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads bytes up to the next NUL and consumes the NUL.
    ///
    /// The returned slice excludes the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a [u8], PacketError> {
        let rest = &self.bytes[self.offset..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(PacketError::Truncated {
                offset: self.offset,
            })?;
        let text = self.take(len)?;
        self.offset += 1;
        Ok(text)
    }

    /// Skips one input record: a keys byte followed by a NUL-terminated payload.
    pub fn skip_record(&mut self) -> Result<(), PacketError> {
        let start = self.offset;
        let result = self.read_u8().and_then(|_| self.read_cstr());
        if result.is_err() {
            self.offset = start;
        }
        result.map(|_| ())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_integers() {
        let bytes = [0x00, 0x00, 0x01, 0x02, 0xff, 0xff, 0xff, 0xfe];
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_i32_be().unwrap(), 0x0102);
        assert_eq!(reader.read_i32_be().unwrap(), -2);
        assert!(reader.is_empty());
    }

    #[test]
    fn short_read_fails_without_advancing() {
        let bytes = [1, 2, 3];
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(
            reader.read_i32_be(),
            Err(PacketError::Truncated { offset: 1 })
        );
        assert_eq!(reader.offset(), 1);
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn cstr_consumes_terminator() {
        let bytes = b"hi\0\0x";
        let mut reader = PacketReader::new(bytes);
        assert_eq!(reader.read_cstr().unwrap(), b"hi");
        assert_eq!(reader.read_cstr().unwrap(), b"");
        assert_eq!(reader.offset(), 4);
        assert_eq!(reader.read_cstr(), Err(PacketError::Truncated { offset: 4 }));
    }

    #[test]
    fn skip_record_restores_on_truncation() {
        let bytes = [7, b'a', 0, 9, b'b'];
        let mut reader = PacketReader::new(&bytes);
        reader.skip_record().unwrap();
        assert_eq!(reader.offset(), 3);
        assert!(reader.skip_record().is_err());
        assert_eq!(reader.offset(), 3);
    }
}
