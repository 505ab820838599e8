use crate::ack_bitmap::AckBitmapWidth;
use crate::retransmit::RetransmitMode;
use anyhow::bail;
use std::time::Duration;

/// Byte order of all multi-byte numbers on the wire. Both peers must agree on it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

/// Bounds for one windowed store, enforced by its eviction passes every time data is inserted
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreLimits {
    /// This is the maximum number of distinct *units* (not keys) held by the store. While there
    ///  are more, the oldest key is dropped.
    pub max_entries: usize,

    /// Keys whose circular distance from the newest key exceeds this are dropped. This must be
    ///  less than half the sequence id ring, otherwise the store's ordering becomes ambiguous.
    pub max_entry_offset: u32,

    /// Units that were not touched for longer than this are dropped. `None` disables the
    ///  timeout.
    pub max_entry_timeout: Option<Duration>,

    /// Units with more keys than this are dropped. For the sent store this is the cap on
    ///  (re)transmission attempts of a unit.
    pub max_entry_occurrences: usize,
}

impl StoreLimits {
    fn validate(&self, store_name: &str) -> anyhow::Result<()> {
        if self.max_entries == 0 {
            bail!("{} store: max_entries must be at least 1", store_name);
        }
        if self.max_entry_occurrences == 0 {
            bail!("{} store: max_entry_occurrences must be at least 1", store_name);
        }
        if self.max_entry_offset >= 32768 {
            bail!("{} store: max_entry_offset must be less than half the sequence id ring", store_name);
        }
        Ok(())
    }
}

pub struct ProtocolConfig {
    /// This is the largest MTU any protocol instance may use. Instances can lower their active
    ///  MTU at runtime (see `Protocol::set_mtu`), but never raise it above this value.
    pub max_mtu: usize,

    /// The MTU a new protocol instance starts with. It is clamped to `max_mtu`.
    ///
    /// Packets are never fragmented by this layer, so all routes between the peers must support
    ///  this MTU. Choosing it too big causes packets to be dropped, choosing it too small wastes
    ///  bandwidth.
    pub mtu: usize,

    /// Bytes of the MTU consumed by the stack below this layer. With IPV4 and UDP and no
    ///  optional IP headers, this is `20 + 8 = 28`; for IPV6 it is `40 + 8 = 48`.
    pub lower_stack_header_size: usize,

    pub byte_order: ByteOrder,

    /// Width of the preceding-acks bitmap in every packet header. Both peers must use the same
    ///  width.
    pub ack_bitmap_width: AckBitmapWidth,

    /// This is the maximum number of units packed into a single packet. The wire format encodes
    ///  the count in a single byte with a maximum of 127.
    pub max_units_per_packet: usize,

    /// Default retransmission behavior for timed-out units. A listener can override this per
    ///  unit.
    pub retransmit_mode: RetransmitMode,

    /// Multiplier for the RTT variance when deriving the RTO
    pub rto_k: u32,
    /// Lower bound for the variance term of the RTO, i.e. the clock granularity
    pub rto_g: Duration,

    /// locally sent units that are waiting to be acknowledged, keyed by transmission id
    pub sent_store: StoreLimits,
    /// units the peer acknowledged, keyed by transmission id
    pub acked_store: StoreLimits,
    /// units received from the peer that are waiting for in-order delivery, keyed by data id
    pub received_store: StoreLimits,
}

impl ProtocolConfig {
    /// IPV4 with a full Ethernet MTU end-to-end and no optional IP headers
    pub fn default_ipv4() -> ProtocolConfig {
        ProtocolConfig {
            max_mtu: 1500,
            mtu: 1500,
            lower_stack_header_size: 28,
            byte_order: ByteOrder::BigEndian,
            ack_bitmap_width: AckBitmapWidth::Bits32,
            max_units_per_packet: 127,
            retransmit_mode: RetransmitMode::Always,
            rto_k: 4,
            rto_g: Duration::from_millis(10),
            sent_store: StoreLimits {
                max_entries: 128,
                max_entry_offset: 256,
                max_entry_timeout: Some(Duration::from_secs(10)),
                max_entry_occurrences: 10,
            },
            acked_store: StoreLimits {
                max_entries: 128,
                max_entry_offset: 256,
                max_entry_timeout: Some(Duration::from_secs(10)),
                max_entry_occurrences: 10,
            },
            received_store: StoreLimits {
                max_entries: 128,
                max_entry_offset: 256,
                max_entry_timeout: Some(Duration::from_secs(1)),
                max_entry_occurrences: 10,
            },
        }
    }

    /// Same as [ProtocolConfig::default_ipv4], but accounting for the bigger IPV6 header
    pub fn default_ipv6() -> ProtocolConfig {
        ProtocolConfig {
            lower_stack_header_size: 48,
            ..Self::default_ipv4()
        }
    }

    /// The size of a packet without the lower stack's headers, for a given MTU
    pub fn max_packet_size(&self, mtu: usize) -> usize {
        mtu.saturating_sub(self.lower_stack_header_size)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // header of an empty packet plus the header of one unit plus one byte of payload
        let min_packet_size = 2 + self.ack_bitmap_width.serialized_len() + 1 + 8 + 1;

        if self.max_mtu > i32::MAX as usize {
            bail!("max MTU {} exceeds the maximum payload length {} of the wire format", self.max_mtu, i32::MAX);
        }
        if self.max_packet_size(self.max_mtu) < min_packet_size {
            bail!("max MTU {} is too small to carry any payload", self.max_mtu);
        }
        if self.max_packet_size(self.mtu) < min_packet_size {
            bail!("MTU {} is too small to carry any payload", self.mtu);
        }
        if self.max_units_per_packet == 0 || self.max_units_per_packet > 127 {
            bail!("max units per packet must be in 1..=127, was {}", self.max_units_per_packet);
        }

        self.sent_store.validate("sent")?;
        self.acked_store.validate("acked")?;
        self.received_store.validate("received")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        ProtocolConfig::default_ipv4().validate().unwrap();
        ProtocolConfig::default_ipv6().validate().unwrap();
        assert_eq!(ProtocolConfig::default_ipv4().max_packet_size(1500), 1472);
        assert_eq!(ProtocolConfig::default_ipv6().max_packet_size(1500), 1452);
    }

    #[test]
    fn test_smallest_valid_mtu() {
        let mut config = ProtocolConfig::default_ipv4();
        config.max_mtu = 28 + 7 + 9;
        config.mtu = 28 + 7 + 9;
        config.validate().unwrap();

        config.mtu -= 1;
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::max_mtu_too_small(|c: &mut ProtocolConfig| c.max_mtu = 30)]
    #[case::max_mtu_exceeds_length_field(|c: &mut ProtocolConfig| c.max_mtu = i32::MAX as usize + 1)]
    #[case::mtu_too_small(|c: &mut ProtocolConfig| c.mtu = 40)]
    #[case::no_units(|c: &mut ProtocolConfig| c.max_units_per_packet = 0)]
    #[case::too_many_units(|c: &mut ProtocolConfig| c.max_units_per_packet = 128)]
    #[case::sent_no_entries(|c: &mut ProtocolConfig| c.sent_store.max_entries = 0)]
    #[case::acked_no_occurrences(|c: &mut ProtocolConfig| c.acked_store.max_entry_occurrences = 0)]
    #[case::received_offset_half_ring(|c: &mut ProtocolConfig| c.received_store.max_entry_offset = 32768)]
    fn test_validate_rejects(#[case] f: fn(&mut ProtocolConfig)) {
        let mut config = ProtocolConfig::default_ipv4();
        f(&mut config);
        assert!(config.validate().is_err());
    }
}
