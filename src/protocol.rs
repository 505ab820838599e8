use crate::ack_bitmap::AckBitmap;
use crate::ack_header::AckHeader;
use crate::config::ProtocolConfig;
use crate::listener::ProtocolListener;
use crate::packet::{Packet, PacketCodec, WireSegment};
use crate::receive_sequencer::{Delivery, ReceiveSequencer};
use crate::retransmit::{RetransmitDecision, RetransmitPolicy};
use crate::rto_estimator::RtoEstimator;
use crate::segment::Segment;
use crate::seq_id::SeqId;
use crate::stats::ProtocolStats;
use crate::windowed_store::{AckedDiscardPolicy, SentDiscardPolicy, WindowedStore};
use anyhow::bail;
use bytes::{Bytes, BytesMut};
use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Reference of both ack registers before anything was seen: 'one before the first id'
const INITIAL_ACK_REFERENCE: SeqId = SeqId::from_raw(-1);

/// One end of a point-to-point session.
///
/// The protocol does not do any I/O itself. The application passes in payloads to send and gets
///  back datagrams to put on the wire, and it passes in received datagrams. Everything the
///  protocol learns along the way is reported to the registered [ProtocolListener]s before the
///  call returns.
///
/// There are no timers either: retransmissions and timeouts are evaluated whenever `send`,
///  `retransmit` or `receive` is called, so the application should call `retransmit` at a
///  regular cadence even if it has nothing to send.
///
/// NB: A protocol instance is not internally synchronized. If it is shared between threads, the
///      application must serialize calls.
pub struct Protocol {
    config: Arc<ProtocolConfig>,
    codec: PacketCodec,
    mtu: usize,

    next_data_id: SeqId,
    next_transmission_id: SeqId,
    /// the most recently submitted data id
    newest_data_id: Option<SeqId>,

    sent: WindowedStore<SentDiscardPolicy>,
    acked: WindowedStore<AckedDiscardPolicy>,
    sequencer: ReceiveSequencer,

    estimator: RtoEstimator,
    retransmit_policy: RetransmitPolicy,

    /// the peer's transmission ids we received - this is what goes into outgoing ack headers
    received_acks: AckBitmap,
    /// our own transmission ids the peer reported as received
    peer_acks: AckBitmap,

    listeners: Vec<Box<dyn ProtocolListener>>,
    stats: ProtocolStats,
}

impl Protocol {
    pub fn new(config: Arc<ProtocolConfig>) -> anyhow::Result<Protocol> {
        config.validate()?;

        let width = config.ack_bitmap_width;
        Ok(Protocol {
            codec: PacketCodec::new(config.byte_order, width),
            mtu: min(config.mtu, config.max_mtu),
            next_data_id: SeqId::ZERO,
            next_transmission_id: SeqId::ZERO,
            newest_data_id: None,
            sent: WindowedStore::new(config.sent_store.clone(), SentDiscardPolicy::default()),
            acked: WindowedStore::new(config.acked_store.clone(), AckedDiscardPolicy::default()),
            sequencer: ReceiveSequencer::new(config.received_store.clone()),
            estimator: RtoEstimator::new(config.rto_k, config.rto_g),
            retransmit_policy: RetransmitPolicy::new(config.retransmit_mode),
            received_acks: AckBitmap::new(width, INITIAL_ACK_REFERENCE),
            peer_acks: AckBitmap::new(width, INITIAL_ACK_REFERENCE),
            listeners: Vec::new(),
            stats: ProtocolStats::default(),
            config,
        })
    }

    pub fn add_listener(&mut self, listener: Box<dyn ProtocolListener>) {
        self.listeners.push(listener);
    }

    /// Submits a payload as a new unit, returning the datagrams to send. Due retransmissions
    ///  are packed into the same datagrams.
    ///
    /// A payload bigger than [Protocol::max_payload_size] is rejected without changing any
    ///  state.
    pub fn send(&mut self, payload: &[u8]) -> anyhow::Result<Vec<Bytes>> {
        if payload.len() > self.max_payload_size() {
            bail!("payload of {} bytes exceeds maximum payload size {}", payload.len(), self.max_payload_size());
        }
        Ok(self.do_send(Some(payload)))
    }

    /// Returns datagrams with due retransmissions, or a single datagram that only carries the
    ///  ack header if nothing is due.
    pub fn retransmit(&mut self) -> Vec<Bytes> {
        self.do_send(None)
    }

    /// Processes a received datagram. A malformed datagram is rejected without changing any
    ///  state.
    pub fn receive(&mut self, datagram: &[u8]) -> anyhow::Result<()> {
        let packet = match self.decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("rejecting malformed datagram: {}", e);
                self.stats.packets_rejected += 1;
                return Err(e);
            }
        };
        self.receive_packet(packet);
        Ok(())
    }

    /// Parses a datagram without applying it
    pub fn decode(&self, datagram: &[u8]) -> anyhow::Result<Packet> {
        let mut buf = datagram;
        self.codec.deser(&mut buf)
    }

    pub fn receive_packet(&mut self, packet: Packet) {
        let now = Instant::now();
        self.stats.packets_received += 1;

        self.process_acks(&packet.ack, now);

        self.received_acks.record_seen(packet.segments.iter().map(|s| s.last_transmission_id));

        for wire in packet.segments {
            trace!("received unit {:?} with transmission id {:?}", wire.data_id, wire.last_transmission_id);
            let segment = Segment::received(wire.data_id, wire.last_transmission_id, wire.payload, now);
            if !self.sequencer.on_receive(segment) {
                self.stats.duplicates_dropped += 1;
            }
            self.notify_deliveries();
        }

        self.sequencer.discard_expired();
        self.notify_deliveries();

        if let Some(newest) = self.sequencer.take_newest() {
            for listener in self.listeners.iter_mut() {
                listener.on_newest(newest.data_id(), newest.payload());
            }
        }
    }

    /// Changes the active MTU, clamped to the configured maximum
    pub fn set_mtu(&mut self, mtu: usize) -> anyhow::Result<()> {
        let mtu = min(mtu, self.config.max_mtu);
        let min_packet_size = self.codec.empty_packet_header_len() + self.codec.segment_len(1);
        if self.config.max_packet_size(mtu) < min_packet_size {
            bail!("MTU {} is too small to carry any payload", mtu);
        }

        if mtu != self.mtu {
            debug!("changing MTU from {} to {}", self.mtu, mtu);
        }
        self.mtu = mtu;
        Ok(())
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// the maximum size of a datagram, i.e. the MTU without the lower stack's headers
    pub fn max_packet_size(&self) -> usize {
        self.config.max_packet_size(self.mtu)
    }

    /// the maximum payload of a single unit
    pub fn max_payload_size(&self) -> usize {
        self.max_packet_size()
            .saturating_sub(self.codec.empty_packet_header_len())
            .saturating_sub(PacketCodec::EMPTY_SEGMENT_HEADER_LEN)
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.estimator.smoothed_rtt()
    }

    pub fn rtt_variance(&self) -> Duration {
        self.estimator.rtt_variance()
    }

    pub fn rto(&self) -> Duration {
        self.estimator.rto()
    }

    pub fn vto(&self) -> Duration {
        self.estimator.vto()
    }

    pub fn backoff_factor(&self) -> u32 {
        self.estimator.backoff_factor()
    }

    /// the ack header that goes into the next outgoing packet
    pub fn ack_state(&self) -> AckHeader {
        self.received_acks.to_header()
    }

    /// what the peer reported having received of our transmissions
    pub fn peer_ack_state(&self) -> AckHeader {
        self.peer_acks.to_header()
    }

    pub fn peer_has_acknowledged(&self, transmission_id: SeqId) -> bool {
        self.peer_acks.is_seen(transmission_id)
    }

    /// copies of the units sent and not acknowledged yet
    pub fn in_flight(&self) -> Vec<Segment> {
        self.sent.snapshot()
    }

    /// copies of the recently acknowledged units
    pub fn acked_snapshot(&self) -> Vec<Segment> {
        self.acked.snapshot()
    }

    /// the data id the next in-order unit from the peer will have
    pub fn next_expected_data_id(&self) -> SeqId {
        self.sequencer.next_expected()
    }

    pub fn stats(&self) -> ProtocolStats {
        self.stats.clone()
    }

    fn do_send(&mut self, payload: Option<&[u8]>) -> Vec<Bytes> {
        let now = Instant::now();

        // gaps in the received data time out even if the peer goes silent
        self.sequencer.discard_expired();
        self.notify_deliveries();

        let mut outgoing = Vec::new();

        for data_id in self.select_retransmits(now) {
            let Some(segment) = self.sent.get_unit(data_id).cloned() else {
                // evicted while retransmitting an earlier unit
                continue;
            };
            trace!("retransmitting unit {:?}", data_id);
            if let Some(wire) = self.transmit(segment, now) {
                self.stats.units_retransmitted += 1;
                outgoing.push(wire);
            }
        }

        if let Some(payload) = payload {
            let data_id = self.next_data_id;
            self.next_data_id = data_id.next();
            self.newest_data_id = Some(data_id);

            self.stats.units_sent += 1;
            let segment = Segment::new(data_id, Bytes::copy_from_slice(payload), now);
            if let Some(wire) = self.transmit(segment, now) {
                outgoing.push(wire);
            }
        }

        self.sent.discard_expired();
        self.report_unacked();

        self.package(outgoing)
    }

    fn select_retransmits(&mut self, now: Instant) -> Vec<SeqId> {
        let listeners = &mut self.listeners;
        let mut decide = |segment: &Segment| {
            for listener in listeners.iter_mut() {
                match listener.should_retransmit(segment.data_id(), segment.payload()) {
                    RetransmitDecision::Default => {}
                    decision => return decision,
                }
            }
            RetransmitDecision::Default
        };

        self.retransmit_policy.select(&self.sent, &mut self.estimator, self.newest_data_id, &mut decide, now)
    }

    /// Puts a unit into the sent store under a fresh transmission id. Returns `None` if the
    ///  store evicted the unit right away because it exhausted its transmission attempts.
    fn transmit(&mut self, mut segment: Segment, now: Instant) -> Option<WireSegment> {
        let transmission_id = self.next_transmission_id;
        self.next_transmission_id = transmission_id.next();

        let data_id = segment.data_id();
        segment.add_transmission(transmission_id, now);
        let payload = segment.payload().clone();

        self.sent.insert(transmission_id, segment);
        if self.sent.get_unit(data_id).is_none() {
            debug!("unit {:?} was evicted on transmission {:?} - not sending it", data_id, transmission_id);
            return None;
        }

        Some(WireSegment {
            data_id,
            last_transmission_id: transmission_id,
            payload,
        })
    }

    /// Packs units into as few datagrams as the MTU and the unit count limit allow. There is
    ///  always at least one datagram, so the peer gets acks even if there is no data.
    fn package(&mut self, segments: Vec<WireSegment>) -> Vec<Bytes> {
        let ack = self.received_acks.to_header();
        let max_packet_size = self.max_packet_size();
        let header_len = self.codec.empty_packet_header_len();

        let mut packets = Vec::new();
        let mut current = Vec::new();
        let mut current_len = header_len;

        for segment in segments {
            let segment_len = self.codec.segment_len(segment.payload.len());

            if !current.is_empty() && (current_len + segment_len > max_packet_size || current.len() >= self.config.max_units_per_packet) {
                packets.push(self.seal(&ack, std::mem::take(&mut current)));
                current_len = header_len;
            }

            if header_len + segment_len > max_packet_size {
                warn!("unit {:?} does not fit into a packet after the MTU was reduced to {} - sending it anyway", segment.data_id, self.mtu);
            }
            current_len += segment_len;
            current.push(segment);
        }

        if !current.is_empty() || packets.is_empty() {
            packets.push(self.seal(&ack, current));
        }

        trace!("sending {} packets with ack {:?}", packets.len(), ack);
        self.stats.packets_sent += packets.len() as u64;
        packets
    }

    fn seal(&self, ack: &AckHeader, segments: Vec<WireSegment>) -> Bytes {
        let packet = Packet {
            ack: ack.clone(),
            segments,
        };
        let mut buf = BytesMut::with_capacity(self.codec.serialized_len(&packet));
        self.codec.ser(&packet, &mut buf);
        buf.freeze()
    }

    fn process_acks(&mut self, ack: &AckHeader, now: Instant) {
        if ack.cumulative_ack == INITIAL_ACK_REFERENCE && ack.preceding_acks == 0 {
            trace!("peer did not receive anything yet");
            return;
        }

        let acked_ids = ack.acked_ids(self.codec.width());
        self.peer_acks.record_seen(acked_ids.iter().copied());

        for (idx, transmission_id) in acked_ids.into_iter().enumerate() {
            let Some(segment) = self.sent.remove_by_key(transmission_id) else {
                continue;
            };

            // only the cumulative ack is a fresh round trip
            if idx == 0 {
                if let Some(sent_at) = segment.sent_at(transmission_id) {
                    self.estimator.sample(sent_at, now);
                    trace!("RTT sample for {:?}: RTO is now {:?}", transmission_id, self.estimator.rto());
                }
            }

            trace!("unit {:?} was acked through transmission {:?}", segment.data_id(), transmission_id);
            self.stats.units_acked += 1;
            for listener in self.listeners.iter_mut() {
                listener.on_acked(segment.data_id(), segment.payload());
            }

            let keys = segment.transmission_ids().collect::<Vec<_>>();
            self.acked.insert_all(&keys, segment);
        }
    }

    fn report_unacked(&mut self) {
        for segment in self.sent.policy_mut().take_unacked() {
            self.stats.units_unacked += 1;
            for listener in self.listeners.iter_mut() {
                listener.on_unacked(segment.data_id(), segment.payload());
            }
        }
    }

    fn notify_deliveries(&mut self) {
        for delivery in self.sequencer.take_deliveries() {
            match delivery {
                Delivery::Ordered(segment) => {
                    self.stats.units_delivered_ordered += 1;
                    for listener in self.listeners.iter_mut() {
                        listener.on_ordered(segment.data_id(), segment.payload());
                    }
                }
                Delivery::Unordered(segment) => {
                    self.stats.units_delivered_unordered += 1;
                    for listener in self.listeners.iter_mut() {
                        listener.on_unordered(segment.data_id(), segment.payload());
                    }
                }
            }
        }
    }
}
