use crate::ack_bitmap::AckBitmapWidth;
use crate::seq_id::SeqId;

/// The acknowledgement part of every packet: the newest transmission id the sender has seen from
///  its peer, plus a bitmap of the transmission ids preceding it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AckHeader {
    pub cumulative_ack: SeqId,
    pub preceding_acks: u64,
}

impl AckHeader {
    /// All transmission ids acknowledged by this header, the cumulative ack first and then
    ///  going back in time
    pub fn acked_ids(&self, width: AckBitmapWidth) -> Vec<SeqId> {
        let mut result = vec![self.cumulative_ack];
        for i in 0..width.bits() {
            if self.preceding_acks & (1u64 << i) != 0 {
                result.push(self.cumulative_ack.wrapping_sub(i as i32 + 1));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::no_bits(AckBitmapWidth::Bits32, 5, 0, vec![5])]
    #[case::scattered(AckBitmapWidth::Bits32, 5, 0b1010, vec![5, 3, 1])]
    #[case::wrap(AckBitmapWidth::Bits32, i16::MIN, 0b1, vec![i16::MIN, i16::MAX])]
    #[case::top_bit_32(AckBitmapWidth::Bits32, 40, 1 << 31, vec![40, 8])]
    #[case::ignores_bits_beyond_width(AckBitmapWidth::Bits32, 40, 1 << 32, vec![40])]
    #[case::top_bit_64(AckBitmapWidth::Bits64, 70, 1 << 63, vec![70, 6])]
    fn test_acked_ids(#[case] width: AckBitmapWidth, #[case] cumulative: i16, #[case] bits: u64, #[case] expected: Vec<i16>) {
        let header = AckHeader {
            cumulative_ack: SeqId::from_raw(cumulative),
            preceding_acks: bits,
        };
        let expected = expected.into_iter()
            .map(SeqId::from_raw)
            .collect::<Vec<_>>();
        assert_eq!(header.acked_ids(width), expected);
    }
}
