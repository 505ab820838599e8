//! A reliability layer on top of an unreliable datagram channel (typically UDP). It adds
//!  ordered delivery, retransmission of lost data, round trip time estimation and a picture of
//!  what the peer has acknowledged, without owning the socket itself.
//!
//! ## Design goals
//!
//! * The protocol is a pure state machine: the application passes in payloads and received
//!   datagrams, and it gets back datagrams to put on the wire. There is no I/O, no timer and
//!   no internal threading
//!   * timeouts are evaluated whenever the application calls in, so it should call
//!     `retransmit` at a roughly fixed cadence
//! * Each protocol instance is one end of a point-to-point session. Both peers must be
//!   configured identically (MTU, byte order, bitmap width)
//! * Applications get events rather than a stream: every unit they send is eventually reported
//!   as acked or unacked, and every unit received from the peer as ordered or unordered
//!   * units are delivered in order as long as gaps are filled in time. If a gap is not filled
//!     before the receive window gives up on it, it is skipped
//!   * this favours fresh data over fully reliable delivery
//! * Packets are never fragmented: units are packed into datagrams that fit the configured MTU
//! * There is no handshake. Peers sync on sequence ids 'on the go'
//!
//! ## Sequence ids
//!
//! All ids are 16 bit signed numbers on a ring of 65536 values, compared along the shorter arc
//!  (see [seq_id::SeqId]). There are two independent id spaces per direction:
//! * *data ids* are assigned once per unit submitted by the application
//! * *transmission ids* are assigned per (re)transmission of a unit, so a unit that is
//!   retransmitted has several transmission ids
//!
//! Acknowledgement is by transmission id, reassembly by data id.
//!
//! ## Acknowledgement
//!
//! Every packet carries the newest transmission id the sender has received from its peer
//!  ('cumulative ack') plus a bitmap of the 32 (or 64) transmission ids before it. Bit `i`
//!  stands for `cumulative ack - (i+1)`. This allows a single packet to acknowledge a whole
//!  window of transmissions, and there are no separate ack packets: if there is no data to
//!  send, a packet without units carries the ack header.
//!
//! ## Retransmission
//!
//! Round trip times are sampled from acknowledgements and smoothed (Jacobson / Karels). A unit
//!  that is not acknowledged within the retransmission timeout (RTO) is retransmitted, and the
//!  RTO backs off linearly. An isolated loss of the most recent unit is retransmitted once after
//!  the shorter 'variance timeout' without backing off.
//!
//! ## Packet layout
//!
//! All numbers in the configured byte order (default big endian):
//! ```ascii
//! 0:  cumulative ack (i16)
//! 2:  preceding acks bitmap (u32 or u64)
//! 6 / 10: number of units (u8), max 127
//! then for each unit:
//!     0: data id (i16)
//!     2: transmission id (i16)
//!     4: payload length (i32)
//!     8: payload
//! ```

pub mod ack_bitmap;
pub mod ack_header;
pub mod config;
pub mod listener;
pub mod packet;
pub mod protocol;
pub mod receive_sequencer;
pub mod retransmit;
pub mod rto_estimator;
pub mod safe_converter;
pub mod segment;
pub mod seq_id;
pub mod stats;
pub mod windowed_store;

#[cfg(test)] mod test_util;


#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
