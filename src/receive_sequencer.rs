use crate::config::StoreLimits;
use crate::segment::Segment;
use crate::seq_id::SeqId;
use crate::windowed_store::{DiscardPolicy, Keying, WindowedStore};
use tokio::time::Instant;
use tracing::{debug, trace};

/// A received unit handed to the application
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    /// delivered in data id sequence
    Ordered(Segment),
    /// delivered after skipping a gap in the data id sequence, or late
    Unordered(Segment),
}

/// Discard policy of the received store. It owns the reassembly cursor, because evicting a unit
///  means giving up on everything before it.
pub struct ReceivedDiscardPolicy {
    next_expected: SeqId,
    delivered: Vec<Delivery>,
}

impl ReceivedDiscardPolicy {
    pub fn new(next_expected: SeqId) -> ReceivedDiscardPolicy {
        ReceivedDiscardPolicy {
            next_expected,
            delivered: Vec::new(),
        }
    }
}

impl DiscardPolicy for ReceivedDiscardPolicy {
    fn keying(&self) -> Keying {
        Keying::DataId
    }

    fn on_discard(&mut self, segment: Segment) {
        let data_id = segment.data_id();
        let diff = data_id.compare(self.next_expected);

        if diff == 0 {
            trace!("evicted unit {:?} is the next expected one - delivering it in order", data_id);
            self.next_expected = data_id.next();
            self.delivered.push(Delivery::Ordered(segment));
        }
        else if diff > 0 {
            debug!("skipping gap {:?}..{:?} - delivering unit {:?} out of order", self.next_expected, data_id, data_id);
            self.next_expected = data_id.next();
            self.delivered.push(Delivery::Unordered(segment));
        }
        else {
            self.delivered.push(Delivery::Unordered(segment));
        }
    }
}

/// Turns received units into deliveries in data id order.
///
/// Units are buffered in the received store until the gap before them is filled. If the store
///  evicts a unit before that happens, the gap is skipped and the unit is delivered out of
///  order. Units older than the cursor were delivered (or skipped) already and are dropped.
///
/// Independently of ordering, the unit with the newest data id received so far is tracked for
///  applications that are only interested in the latest state.
pub struct ReceiveSequencer {
    received: WindowedStore<ReceivedDiscardPolicy>,
    newest: Option<Segment>,
    newest_changed: bool,
}

impl ReceiveSequencer {
    pub fn new(limits: StoreLimits) -> ReceiveSequencer {
        ReceiveSequencer {
            received: WindowedStore::new(limits, ReceivedDiscardPolicy::new(SeqId::ZERO)),
            newest: None,
            newest_changed: false,
        }
    }

    pub fn next_expected(&self) -> SeqId {
        self.received.policy().next_expected
    }

    /// number of units buffered while waiting for a gap to be filled
    pub fn num_buffered(&self) -> usize {
        self.received.len()
    }

    /// Processes a received unit, returning `false` if it was a duplicate.
    pub fn on_receive(&mut self, segment: Segment) -> bool {
        let data_id = segment.data_id();

        let is_newest = match &self.newest {
            None => true,
            Some(newest) => data_id.is_newer_than(newest.data_id()),
        };
        if is_newest {
            self.newest = Some(segment.clone());
            self.newest_changed = true;
        }

        if data_id.is_older_than(self.next_expected()) {
            trace!("unit {:?} is older than the next expected {:?} - dropping", data_id, self.next_expected());
            return false;
        }

        let (segment, is_new) = match self.received.get_unit(data_id) {
            Some(buffered) => {
                trace!("unit {:?} is buffered already", data_id);
                let mut merged = buffered.clone();
                if let Some(t) = segment.latest_transmission() {
                    merged.add_transmission(t.id, Instant::now());
                }
                (merged, false)
            }
            None => (segment, true),
        };

        self.received.insert(data_id, segment);
        self.drain_in_order();
        is_new
    }

    /// Runs the received store's eviction passes, e.g. to time out gaps while no data arrives
    pub fn discard_expired(&mut self) {
        self.received.discard_expired();
        self.drain_in_order();
    }

    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.received.policy_mut().delivered)
    }

    /// the newest unit, if it changed since the last call
    pub fn take_newest(&mut self) -> Option<Segment> {
        if !self.newest_changed {
            return None;
        }
        self.newest_changed = false;
        self.newest.clone()
    }

    fn drain_in_order(&mut self) {
        loop {
            let next_expected = self.next_expected();
            if self.received.oldest_key() != Some(next_expected) {
                break;
            }
            let Some(segment) = self.received.remove_unit(next_expected) else {
                break;
            };

            let policy = self.received.policy_mut();
            policy.next_expected = next_expected.next();
            policy.delivered.push(Delivery::Ordered(segment));
        }
    }
}
