use log::trace;

use crate::PacketError;

/// A sparse, offset-addressable run of bytes the packet parser reads from.
///
/// Implementors report only the bytes they actually hold. A short copy is the
/// normal "not arrived yet" case, never an error.
pub trait ByteSource {
    /// Copies the bytes available contiguously from `offset` into `dest` and
    /// returns how many were copied (possibly 0).
    fn copy_bytes_at(&self, offset: u64, dest: &mut [u8]) -> usize;

    /// Whether every byte of `[start, end)` is present.
    fn contains_range(&self, start: u64, end: u64) -> bool;
}

impl ByteSource for [u8] {
    fn copy_bytes_at(&self, offset: u64, dest: &mut [u8]) -> usize {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return 0,
        };
        let count = dest.len().min(self.len() - start);
        dest[..count].copy_from_slice(&self[start..start + count]);
        count
    }

    fn contains_range(&self, start: u64, end: u64) -> bool {
        start <= end && end <= self.len() as u64
    }
}

impl ByteSource for Vec<u8> {
    fn copy_bytes_at(&self, offset: u64, dest: &mut [u8]) -> usize {
        self.as_slice().copy_bytes_at(offset, dest)
    }

    fn contains_range(&self, start: u64, end: u64) -> bool {
        self.as_slice().contains_range(start, end)
    }
}

/// Anything that hands out packet header bits one at a time.
pub trait BitSource {
    fn shift_bit(&mut self) -> Result<u8, PacketError>;
}

/// Position of a bit reader inside its byte source.
///
/// `byte_offset` is the offset of the next byte to fetch. `current_byte` holds
/// the last fetched byte, of which the low `bits_left` bits are still unread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BitCursor {
    byte_offset: u64,
    current_byte: u8,
    bits_left: u8,
    current_is_ff: bool,
}

impl BitCursor {
    pub fn at(byte_offset: u64) -> Self {
        BitCursor {
            byte_offset,
            ..Default::default()
        }
    }

    /// True when no bit of the current byte is pending and the next byte does
    /// not start with a stuffed bit.
    pub fn is_aligned(&self) -> bool {
        self.bits_left == 0 && !self.current_is_ff
    }

    /// Byte offset of the next unread byte.
    ///
    /// Only meaningful when [`is_aligned`](Self::is_aligned) holds.
    pub fn byte_offset(&self) -> Result<u64, PacketError> {
        if !self.is_aligned() {
            debug_assert!(false, "byte offset read from an unaligned bit cursor");
            return Err(PacketError::Usage {
                reason: "byte offset read from an unaligned bit cursor",
            });
        }
        Ok(self.byte_offset)
    }

    /// Offset of the next byte to fetch, aligned or not. For error reporting.
    pub fn byte_offset_hint(&self) -> u64 {
        self.byte_offset
    }
}

/// Reads JPEG 2000 packet header bits out of a [`ByteSource`].
///
/// B.10.1 Bits are packed into bytes from the MSB to the LSB. If the value of
/// a byte is 0xFF, the next byte includes an extra zero bit stuffed into the
/// MSB, which is not part of the data.
///
/// Every operation works on a copy of the cursor and only publishes it on
/// success: an operation returning [`PacketError::NeedMoreData`] leaves the
/// reader exactly as it was.
pub struct BitReader<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    cursor: BitCursor,
    operations: u64,
}

impl<'a, S: ByteSource + ?Sized> BitReader<'a, S> {
    pub fn new(source: &'a S, cursor: BitCursor) -> Self {
        BitReader {
            source,
            cursor,
            operations: 0,
        }
    }

    pub fn cursor(&self) -> BitCursor {
        self.cursor
    }

    /// Number of read operations issued on this reader, successful or not.
    pub fn operations(&self) -> u64 {
        self.operations
    }

    pub fn byte_offset(&self) -> Result<u64, PacketError> {
        self.cursor.byte_offset()
    }

    /// A reader over the same source, starting where this one stands.
    pub fn fork(&self) -> Self {
        BitReader {
            source: self.source,
            cursor: self.cursor,
            operations: 0,
        }
    }

    /// Moves this reader to where `fork` stopped.
    pub fn join(&mut self, fork: Self) {
        self.cursor = fork.cursor;
        self.operations += fork.operations;
    }

    /// Repositions the reader at a byte boundary.
    pub fn set_byte_offset(&mut self, offset: u64) {
        self.cursor = BitCursor::at(offset);
    }

    fn fetch_byte(&self, offset: u64) -> Result<u8, PacketError> {
        let mut byte = [0u8; 1];
        if self.source.copy_bytes_at(offset, &mut byte) == 0 {
            trace!("bit reader waiting for byte {}", offset);
            return Err(PacketError::NeedMoreData);
        }
        Ok(byte[0])
    }

    // Loads the next byte into `cursor`, honouring the stuffed bit after 0xFF.
    fn load_byte(&self, cursor: &mut BitCursor) -> Result<(), PacketError> {
        let byte = self.fetch_byte(cursor.byte_offset)?;
        if cursor.current_is_ff {
            if byte & 0x80 != 0 {
                return Err(PacketError::StuffingViolation {
                    offset: cursor.byte_offset,
                });
            }
            cursor.bits_left = 7;
        } else {
            cursor.bits_left = 8;
        }
        cursor.current_byte = byte;
        cursor.current_is_ff = byte == 0xFF;
        cursor.byte_offset += 1;
        Ok(())
    }

    fn shift_bit_in(&self, cursor: &mut BitCursor) -> Result<u8, PacketError> {
        if cursor.bits_left == 0 {
            self.load_byte(cursor)?;
        }
        cursor.bits_left -= 1;
        Ok((cursor.current_byte >> cursor.bits_left) & 1)
    }

    /// Consumes exactly `count` bits (at most 32) and returns them MSB first.
    pub fn shift_bits(&mut self, count: u32) -> Result<u32, PacketError> {
        debug_assert!(count <= 32);
        self.operations += 1;
        let mut cursor = self.cursor;
        let mut value: u32 = 0;
        for _ in 0..count {
            value = (value << 1) | self.shift_bit_in(&mut cursor)? as u32;
        }
        self.cursor = cursor;
        Ok(value)
    }

    /// Counts consecutive 1-bits (0-bits when `invert`) up to `max_bits`.
    ///
    /// The terminating opposite bit is consumed. When `max_bits` is reached no
    /// terminator is read.
    pub fn count_run_until_terminator(
        &mut self,
        invert: bool,
        max_bits: u32,
    ) -> Result<u32, PacketError> {
        self.operations += 1;
        let run_bit = if invert { 0 } else { 1 };
        let mut cursor = self.cursor;
        let mut count = 0;
        while count < max_bits {
            if self.shift_bit_in(&mut cursor)? != run_bit {
                break;
            }
            count += 1;
        }
        self.cursor = cursor;
        Ok(count)
    }

    /// Discards the rest of the current byte.
    ///
    /// If that byte was 0xFF the stuffed zero bit of the following byte still
    /// belongs to the packet header, so the following byte is consumed too.
    pub fn align_to_byte(&mut self) -> Result<(), PacketError> {
        self.operations += 1;
        let mut cursor = self.cursor;
        cursor.bits_left = 0;
        if cursor.current_is_ff {
            self.load_byte(&mut cursor)?;
            cursor.bits_left = 0;
            cursor.current_is_ff = false;
        }
        self.cursor = cursor;
        Ok(())
    }

    /// Returns the next `N` whole bytes without consuming them.
    ///
    /// The reader must be byte aligned.
    pub fn peek_bytes<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        self.operations += 1;
        let offset = self.cursor.byte_offset()?;
        let mut bytes = [0u8; N];
        if self.source.copy_bytes_at(offset, &mut bytes) < N {
            return Err(PacketError::NeedMoreData);
        }
        Ok(bytes)
    }

    /// Skips `count` whole bytes. The reader must be byte aligned.
    pub fn skip_bytes(&mut self, count: u64) -> Result<(), PacketError> {
        let offset = self.cursor.byte_offset()?;
        self.cursor = BitCursor::at(offset + count);
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> BitSource for BitReader<'_, S> {
    fn shift_bit(&mut self) -> Result<u8, PacketError> {
        self.operations += 1;
        let mut cursor = self.cursor;
        let bit = self.shift_bit_in(&mut cursor)?;
        self.cursor = cursor;
        Ok(bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_bits_msb_first() {
        let bytes = vec![0b1010_0000, 0b1100_0011];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        assert_eq!(reader.shift_bit().unwrap(), 1);
        assert_eq!(reader.shift_bit().unwrap(), 0);
        assert_eq!(reader.shift_bits(6).unwrap(), 0b10_0000);
        assert_eq!(reader.shift_bits(8).unwrap(), 0b1100_0011);
        assert_eq!(reader.shift_bit(), Err(PacketError::NeedMoreData));
    }

    #[test]
    fn test_stuffed_bit_after_ff() {
        let bytes = vec![0xFF, 0x7F, 0x80];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        assert_eq!(reader.shift_bits(8).unwrap(), 0xFF);
        // only 7 data bits follow a 0xFF byte
        assert_eq!(reader.shift_bits(7).unwrap(), 0x7F);
        assert_eq!(reader.shift_bits(8).unwrap(), 0x80);
    }

    #[test]
    fn test_stuffing_violation() {
        let bytes = vec![0xFF, 0x80];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        assert_eq!(reader.shift_bits(8).unwrap(), 0xFF);
        assert_eq!(
            reader.shift_bit(),
            Err(PacketError::StuffingViolation { offset: 1 })
        );
    }

    #[test]
    fn test_insufficient_data_leaves_cursor() {
        let bytes = vec![0b1110_0000];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        reader.shift_bits(2).unwrap();
        let before = reader.cursor();
        assert_eq!(reader.shift_bits(9), Err(PacketError::NeedMoreData));
        assert_eq!(reader.cursor(), before);
        assert_eq!(
            reader.count_run_until_terminator(false, 16),
            Err(PacketError::NeedMoreData)
        );
        assert_eq!(reader.cursor(), before);
    }

    #[test]
    fn test_count_run() {
        // 1110 0001
        let bytes = vec![0b1110_0001];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        assert_eq!(reader.count_run_until_terminator(false, 8).unwrap(), 3);
        assert_eq!(reader.count_run_until_terminator(true, 8).unwrap(), 3);
        // max reached, terminator left in place
        let bytes = vec![0xF0];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        assert_eq!(reader.count_run_until_terminator(false, 2).unwrap(), 2);
        assert_eq!(reader.shift_bits(2).unwrap(), 0b11);
    }

    #[test]
    fn test_align_after_ff_consumes_stuffed_byte() {
        let bytes = vec![0xFF, 0x00, 0xAB];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        reader.shift_bits(8).unwrap();
        assert!(!reader.cursor().is_aligned());
        reader.align_to_byte().unwrap();
        assert_eq!(reader.byte_offset().unwrap(), 2);
        assert_eq!(reader.shift_bits(8).unwrap(), 0xAB);
    }

    #[test]
    fn test_align_mid_byte() {
        let bytes = vec![0b1000_0000, 0x12];
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        reader.shift_bit().unwrap();
        reader.align_to_byte().unwrap();
        assert_eq!(reader.byte_offset().unwrap(), 1);
        assert_eq!(reader.peek_bytes::<1>().unwrap(), [0x12]);
    }
}
