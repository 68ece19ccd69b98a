use crate::bit_reader::{BitReader, ByteSource};
use crate::PacketError;

/// Largest number of coding passes a single packet can signal for a codeblock.
pub const MAX_CODING_PASSES: u32 = 164;

// Table B.4 indexed by the number of leading 1-bits (the terminating 0 already consumed, except
// for the last row): (additional bits to read, value of those bits added to).
//
//   0                      1
//   10                     2
//   110x                   3..4
//   1110                   5
//   1111 0xxxx             6..21
//   1111 10xxx             22..29
//   1111 110xx             30..33
//   1111 1110x             34..35
//   1111 11110             36
//   1111 11111 xxxxxxx     37..164
const CODEWORDS: [(u32, u32); 10] = [
    (0, 1),
    (0, 2),
    (1, 3),
    (0, 5),
    (4, 6),
    (3, 22),
    (2, 30),
    (1, 34),
    (0, 36),
    (7, 37),
];

const MAX_LEADING_ONES: u32 = 9;

/// B.10.6 Number of coding passes included in this packet for one codeblock.
pub fn parse_coding_passes<S: ByteSource + ?Sized>(
    reader: &mut BitReader<'_, S>,
) -> Result<u32, PacketError> {
    let mut scratch = reader.fork();
    let ones = scratch.count_run_until_terminator(false, MAX_LEADING_ONES)?;
    let (extra_bits, base) = CODEWORDS[ones as usize];
    let value = base + scratch.shift_bits(extra_bits)?;
    reader.join(scratch);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_reader::BitCursor;
    use crate::tests::pack_bits;

    fn parse(bits: &str) -> Result<u32, PacketError> {
        let bytes = pack_bits(bits);
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        parse_coding_passes(&mut reader)
    }

    #[test]
    fn test_table_b4() {
        assert_eq!(parse("0"), Ok(1));
        assert_eq!(parse("10"), Ok(2));
        assert_eq!(parse("1100"), Ok(3));
        assert_eq!(parse("1101"), Ok(4));
        assert_eq!(parse("1110"), Ok(5));
        assert_eq!(parse("111100000"), Ok(6));
        assert_eq!(parse("111101111"), Ok(21));
        assert_eq!(parse("111110000"), Ok(22));
        assert_eq!(parse("111111110"), Ok(36));
        assert_eq!(parse("1111111110000000"), Ok(37));
        assert_eq!(parse("1111111111111111"), Ok(MAX_CODING_PASSES));
    }

    #[test]
    fn test_truncated_codeword_consumes_nothing() {
        // 1111 1111 1 and then the 7 bit field is missing
        let bytes = pack_bits("11111111");
        let mut reader = BitReader::new(&bytes, BitCursor::default());
        let before = reader.cursor();
        assert_eq!(
            parse_coding_passes(&mut reader),
            Err(PacketError::NeedMoreData)
        );
        assert_eq!(reader.cursor(), before);
    }
}
