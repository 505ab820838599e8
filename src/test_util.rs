use crate::listener::ProtocolListener;
use crate::retransmit::RetransmitDecision;
use crate::seq_id::SeqId;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenerEvent {
    Ordered(SeqId, Vec<u8>),
    Unordered(SeqId, Vec<u8>),
    Acked(SeqId, Vec<u8>),
    Unacked(SeqId, Vec<u8>),
    Newest(SeqId, Vec<u8>),
}

impl ListenerEvent {
    pub fn ordered(data_id: i16, payload: &str) -> ListenerEvent {
        ListenerEvent::Ordered(SeqId::from_raw(data_id), payload.as_bytes().to_vec())
    }
    pub fn unordered(data_id: i16, payload: &str) -> ListenerEvent {
        ListenerEvent::Unordered(SeqId::from_raw(data_id), payload.as_bytes().to_vec())
    }
    pub fn acked(data_id: i16, payload: &str) -> ListenerEvent {
        ListenerEvent::Acked(SeqId::from_raw(data_id), payload.as_bytes().to_vec())
    }
    pub fn unacked(data_id: i16, payload: &str) -> ListenerEvent {
        ListenerEvent::Unacked(SeqId::from_raw(data_id), payload.as_bytes().to_vec())
    }
    pub fn newest(data_id: i16, payload: &str) -> ListenerEvent {
        ListenerEvent::Newest(SeqId::from_raw(data_id), payload.as_bytes().to_vec())
    }
}

/// A listener that records all events. Clones share the same recording, so a test can keep
///  one clone and hand the other to the protocol.
#[derive(Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ListenerEvent>>>,
}

impl RecordingListener {
    pub fn take_events(&self) -> Vec<ListenerEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn record(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ProtocolListener for RecordingListener {
    fn on_ordered(&mut self, data_id: SeqId, payload: &[u8]) {
        self.record(ListenerEvent::Ordered(data_id, payload.to_vec()));
    }

    fn on_unordered(&mut self, data_id: SeqId, payload: &[u8]) {
        self.record(ListenerEvent::Unordered(data_id, payload.to_vec()));
    }

    fn on_acked(&mut self, data_id: SeqId, payload: &[u8]) {
        self.record(ListenerEvent::Acked(data_id, payload.to_vec()));
    }

    fn on_unacked(&mut self, data_id: SeqId, payload: &[u8]) {
        self.record(ListenerEvent::Unacked(data_id, payload.to_vec()));
    }

    fn on_newest(&mut self, data_id: SeqId, payload: &[u8]) {
        self.record(ListenerEvent::Newest(data_id, payload.to_vec()));
    }

    fn should_retransmit(&mut self, _data_id: SeqId, _payload: &[u8]) -> RetransmitDecision {
        RetransmitDecision::Default
    }
}
