use crate::ack_bitmap::AckBitmapWidth;
use crate::ack_header::AckHeader;
use crate::config::ByteOrder;
use crate::safe_converter::PrecheckedCast;
use crate::seq_id::SeqId;
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};

/// A unit as it is put on the wire: its data id, the transmission id of this particular
///  attempt, and the payload
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireSegment {
    pub data_id: SeqId,
    pub last_transmission_id: SeqId,
    pub payload: Bytes,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub ack: AckHeader,
    pub segments: Vec<WireSegment>,
}

/// Serialization of packets. The layout is fixed except for byte order and bitmap width, which
///  are configured and must be identical for both peers.
#[derive(Copy, Clone, Debug)]
pub struct PacketCodec {
    byte_order: ByteOrder,
    width: AckBitmapWidth,
}

impl PacketCodec {
    /// data id, transmission id and payload length
    pub const EMPTY_SEGMENT_HEADER_LEN: usize = size_of::<i16>() + size_of::<i16>() + size_of::<i32>();
    pub const MAX_SEGMENTS_PER_PACKET: usize = 127;

    pub fn new(byte_order: ByteOrder, width: AckBitmapWidth) -> PacketCodec {
        PacketCodec {
            byte_order,
            width,
        }
    }

    pub fn width(&self) -> AckBitmapWidth {
        self.width
    }

    /// cumulative ack, bitmap and segment count
    pub fn empty_packet_header_len(&self) -> usize {
        size_of::<i16>() + self.width.serialized_len() + size_of::<u8>()
    }

    pub fn segment_len(&self, payload_len: usize) -> usize {
        Self::EMPTY_SEGMENT_HEADER_LEN + payload_len
    }

    pub fn serialized_len(&self, packet: &Packet) -> usize {
        self.empty_packet_header_len() + packet.segments.iter()
            .map(|s| self.segment_len(s.payload.len()))
            .sum::<usize>()
    }

    /// NB: The caller is responsible for staying within the segment count and payload size limits
    pub fn ser(&self, packet: &Packet, buf: &mut impl BufMut) {
        self.put_i16(buf, packet.ack.cumulative_ack.to_raw());
        match self.width {
            AckBitmapWidth::Bits32 => self.put_u32(buf, (packet.ack.preceding_acks & u32::MAX as u64) as u32),
            AckBitmapWidth::Bits64 => self.put_u64(buf, packet.ack.preceding_acks),
        }
        buf.put_u8(packet.segments.len().prechecked_cast());

        for segment in &packet.segments {
            self.put_i16(buf, segment.data_id.to_raw());
            self.put_i16(buf, segment.last_transmission_id.to_raw());
            self.put_i32(buf, segment.payload.len().prechecked_cast());
            buf.put_slice(&segment.payload);
        }
    }

    pub fn deser(&self, buf: &mut impl Buf) -> anyhow::Result<Packet> {
        let cumulative_ack = SeqId::from_raw(self.get_i16(buf)?);
        let preceding_acks = match self.width {
            AckBitmapWidth::Bits32 => self.get_u32(buf)? as u64,
            AckBitmapWidth::Bits64 => self.get_u64(buf)?,
        };

        let num_segments = buf.try_get_u8()? as usize;
        if num_segments > Self::MAX_SEGMENTS_PER_PACKET {
            bail!("packet has {} segments, maximum is {}", num_segments, Self::MAX_SEGMENTS_PER_PACKET);
        }

        let mut segments = Vec::with_capacity(num_segments);
        for _ in 0..num_segments {
            let data_id = SeqId::from_raw(self.get_i16(buf)?);
            let last_transmission_id = SeqId::from_raw(self.get_i16(buf)?);

            let payload_len = self.get_i32(buf)?;
            if payload_len < 0 {
                bail!("negative payload length {} for segment {:?}", payload_len, data_id);
            }
            let payload_len = payload_len as usize;
            if buf.remaining() < payload_len {
                bail!("segment {:?} is truncated: payload length {}, {} bytes remaining", data_id, payload_len, buf.remaining());
            }
            let payload = buf.copy_to_bytes(payload_len);

            segments.push(WireSegment {
                data_id,
                last_transmission_id,
                payload,
            });
        }

        if buf.has_remaining() {
            bail!("{} trailing bytes after last segment", buf.remaining());
        }

        Ok(Packet {
            ack: AckHeader {
                cumulative_ack,
                preceding_acks,
            },
            segments,
        })
    }

    fn put_i16(&self, buf: &mut impl BufMut, value: i16) {
        match self.byte_order {
            ByteOrder::BigEndian => buf.put_i16(value),
            ByteOrder::LittleEndian => buf.put_i16_le(value),
        }
    }

    fn put_i32(&self, buf: &mut impl BufMut, value: i32) {
        match self.byte_order {
            ByteOrder::BigEndian => buf.put_i32(value),
            ByteOrder::LittleEndian => buf.put_i32_le(value),
        }
    }

    fn put_u32(&self, buf: &mut impl BufMut, value: u32) {
        match self.byte_order {
            ByteOrder::BigEndian => buf.put_u32(value),
            ByteOrder::LittleEndian => buf.put_u32_le(value),
        }
    }

    fn put_u64(&self, buf: &mut impl BufMut, value: u64) {
        match self.byte_order {
            ByteOrder::BigEndian => buf.put_u64(value),
            ByteOrder::LittleEndian => buf.put_u64_le(value),
        }
    }

    fn get_i16(&self, buf: &mut impl Buf) -> anyhow::Result<i16> {
        Ok(match self.byte_order {
            ByteOrder::BigEndian => buf.try_get_i16()?,
            ByteOrder::LittleEndian => buf.try_get_i16_le()?,
        })
    }

    fn get_i32(&self, buf: &mut impl Buf) -> anyhow::Result<i32> {
        Ok(match self.byte_order {
            ByteOrder::BigEndian => buf.try_get_i32()?,
            ByteOrder::LittleEndian => buf.try_get_i32_le()?,
        })
    }

    fn get_u32(&self, buf: &mut impl Buf) -> anyhow::Result<u32> {
        Ok(match self.byte_order {
            ByteOrder::BigEndian => buf.try_get_u32()?,
            ByteOrder::LittleEndian => buf.try_get_u32_le()?,
        })
    }

    fn get_u64(&self, buf: &mut impl Buf) -> anyhow::Result<u64> {
        Ok(match self.byte_order {
            ByteOrder::BigEndian => buf.try_get_u64()?,
            ByteOrder::LittleEndian => buf.try_get_u64_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;

    fn packet(cumulative_ack: i16, preceding_acks: u64, segments: Vec<(i16, i16, &'static str)>) -> Packet {
        Packet {
            ack: AckHeader {
                cumulative_ack: SeqId::from_raw(cumulative_ack),
                preceding_acks,
            },
            segments: segments.into_iter()
                .map(|(data_id, transmission_id, payload)| WireSegment {
                    data_id: SeqId::from_raw(data_id),
                    last_transmission_id: SeqId::from_raw(transmission_id),
                    payload: Bytes::from_static(payload.as_bytes()),
                })
                .collect(),
        }
    }

    #[rstest]
    #[case::empty_be_32(ByteOrder::BigEndian, AckBitmapWidth::Bits32, packet(-1, 0, vec![]),
        vec![0xff,0xff, 0,0,0,0, 0])]
    #[case::empty_le_32(ByteOrder::LittleEndian, AckBitmapWidth::Bits32, packet(0x0102, 0x0a0b0c0d, vec![]),
        vec![2,1, 0xd,0xc,0xb,0xa, 0])]
    #[case::empty_be_64(ByteOrder::BigEndian, AckBitmapWidth::Bits64, packet(5, 0b1010, vec![]),
        vec![0,5, 0,0,0,0,0,0,0,0b1010, 0])]
    #[case::one_segment_be(ByteOrder::BigEndian, AckBitmapWidth::Bits32, packet(5, 0b1010, vec![(1, 7, "xy")]),
        vec![0,5, 0,0,0,0b1010, 1, 0,1, 0,7, 0,0,0,2, b'x',b'y'])]
    #[case::one_segment_le(ByteOrder::LittleEndian, AckBitmapWidth::Bits32, packet(5, 0b1010, vec![(1, 7, "xy")]),
        vec![5,0, 0b1010,0,0,0, 1, 1,0, 7,0, 2,0,0,0, b'x',b'y'])]
    #[case::empty_payload(ByteOrder::BigEndian, AckBitmapWidth::Bits32, packet(0, 0, vec![(-2, 3, "")]),
        vec![0,0, 0,0,0,0, 1, 0xff,0xfe, 0,3, 0,0,0,0])]
    #[case::two_segments(ByteOrder::BigEndian, AckBitmapWidth::Bits32, packet(0, 0, vec![(1, 1, "a"), (2, 2, "b")]),
        vec![0,0, 0,0,0,0, 2, 0,1, 0,1, 0,0,0,1, b'a', 0,2, 0,2, 0,0,0,1, b'b'])]
    fn test_ser_deser(#[case] byte_order: ByteOrder, #[case] width: AckBitmapWidth, #[case] packet: Packet, #[case] expected: Vec<u8>) {
        let codec = PacketCodec::new(byte_order, width);

        let mut buf = BytesMut::new();
        codec.ser(&packet, &mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(codec.serialized_len(&packet), expected.len());

        let mut b: &[u8] = &buf;
        let deser = codec.deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, packet);
    }

    #[test]
    fn test_ser_masks_bitmap_to_width() {
        let codec = PacketCodec::new(ByteOrder::BigEndian, AckBitmapWidth::Bits32);
        let mut buf = BytesMut::new();
        codec.ser(&packet(0, u64::MAX, vec![]), &mut buf);

        let mut b: &[u8] = &buf;
        assert_eq!(codec.deser(&mut b).unwrap().ack.preceding_acks, u32::MAX as u64);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_ack(vec![0])]
    #[case::truncated_bitmap(vec![0,0, 0,0,0])]
    #[case::missing_count(vec![0,0, 0,0,0,0])]
    #[case::missing_segment(vec![0,0, 0,0,0,0, 1])]
    #[case::truncated_segment_header(vec![0,0, 0,0,0,0, 1, 0,1, 0,1, 0,0])]
    #[case::truncated_payload(vec![0,0, 0,0,0,0, 1, 0,1, 0,1, 0,0,0,3, 1,2])]
    #[case::negative_length(vec![0,0, 0,0,0,0, 1, 0,1, 0,1, 0xff,0xff,0xff,0xff])]
    #[case::too_many_segments(vec![0,0, 0,0,0,0, 128])]
    #[case::trailing_bytes(vec![0,0, 0,0,0,0, 0, 99])]
    fn test_deser_malformed(#[case] bytes: Vec<u8>) {
        let codec = PacketCodec::new(ByteOrder::BigEndian, AckBitmapWidth::Bits32);
        let mut b: &[u8] = &bytes;
        assert!(codec.deser(&mut b).is_err());
    }

    #[rstest]
    #[case(AckBitmapWidth::Bits32, 7)]
    #[case(AckBitmapWidth::Bits64, 11)]
    fn test_header_len(#[case] width: AckBitmapWidth, #[case] expected: usize) {
        let codec = PacketCodec::new(ByteOrder::BigEndian, width);
        assert_eq!(codec.empty_packet_header_len(), expected);
        assert_eq!(codec.segment_len(10), 18);
    }
}
