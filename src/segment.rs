use crate::seq_id::SeqId;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

/// A single transmission attempt of a segment, i.e. the transmission id it was sent with and
///  the time it was put on the wire
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transmission {
    pub id: SeqId,
    pub at: Instant,
}

/// One unit of application data together with its transmission history.
///
/// The data id is assigned once when the unit is submitted and never changes. Every (re)send
///  gets a fresh transmission id, so a segment can be acknowledged through any of them.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    data_id: SeqId,
    transmissions: Vec<Transmission>,
    payload: Bytes,
    created_at: Instant,
    last_touched_at: Instant,
}

impl Segment {
    pub fn new(data_id: SeqId, payload: Bytes, now: Instant) -> Segment {
        Segment {
            data_id,
            transmissions: Vec::new(),
            payload,
            created_at: now,
            last_touched_at: now,
        }
    }

    /// A segment as seen by the receiver, which only knows about the transmission that
    ///  actually arrived
    pub fn received(data_id: SeqId, transmission_id: SeqId, payload: Bytes, now: Instant) -> Segment {
        let mut result = Segment::new(data_id, payload, now);
        result.add_transmission(transmission_id, now);
        result
    }

    pub fn data_id(&self) -> SeqId {
        self.data_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn transmissions(&self) -> &[Transmission] {
        &self.transmissions
    }

    pub fn transmission_ids(&self) -> impl Iterator<Item = SeqId> + '_ {
        self.transmissions.iter().map(|t| t.id)
    }

    pub fn latest_transmission(&self) -> Option<&Transmission> {
        self.transmissions.last()
    }

    pub fn transmission_count(&self) -> usize {
        self.transmissions.len()
    }

    /// the time at which the segment was sent with a given transmission id, if it was
    pub fn sent_at(&self, transmission_id: SeqId) -> Option<Instant> {
        self.transmissions.iter()
            .find(|t| t.id == transmission_id)
            .map(|t| t.at)
    }

    /// Registers a (re)transmission. Registering the same transmission id twice has no effect
    ///  on the history, but counts as a touch.
    pub fn add_transmission(&mut self, transmission_id: SeqId, now: Instant) {
        if !self.transmissions.iter().any(|t| t.id == transmission_id) {
            self.transmissions.push(Transmission { id: transmission_id, at: now });
        }
        self.last_touched_at = now;
    }

    pub(crate) fn forget_transmission(&mut self, transmission_id: SeqId) {
        self.transmissions.retain(|t| t.id != transmission_id);
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_touched_at(&self) -> Instant {
        self.last_touched_at
    }

    /// time since the segment was last touched
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched_at)
    }
}
