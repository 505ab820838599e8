/// Running counters of a protocol instance
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProtocolStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// malformed datagrams that were rejected
    pub packets_rejected: u64,

    /// new units submitted by the application
    pub units_sent: u64,
    pub units_retransmitted: u64,
    pub units_acked: u64,
    pub units_unacked: u64,

    pub units_delivered_ordered: u64,
    pub units_delivered_unordered: u64,
    /// received units that were already delivered or buffered
    pub duplicates_dropped: u64,
}
