use crate::retransmit::RetransmitDecision;
use crate::seq_id::SeqId;
#[cfg(test)] use mockall::automock;

/// Observer for everything that happens to units inside a protocol instance. All methods have
///  no-op defaults, so implementations only override what they are interested in.
///
/// Every unit the application submits is eventually reported exactly once as either acked or
///  unacked, and every unit received from the peer exactly once as either ordered or unordered.
///
/// NB: Callbacks are invoked synchronously from inside `send` / `receive` / `retransmit`, in
///      registration order. They must not call back into the protocol instance.
#[cfg_attr(test, automock)]
pub trait ProtocolListener: Send {
    /// a received unit, delivered in data id sequence
    fn on_ordered(&mut self, _data_id: SeqId, _payload: &[u8]) {}

    /// a received unit, delivered after giving up on a gap before it
    fn on_unordered(&mut self, _data_id: SeqId, _payload: &[u8]) {}

    /// a sent unit was acknowledged by the peer
    fn on_acked(&mut self, _data_id: SeqId, _payload: &[u8]) {}

    /// a sent unit was given up on without being acknowledged
    fn on_unacked(&mut self, _data_id: SeqId, _payload: &[u8]) {}

    /// the received unit with the newest data id, once per received packet if it changed
    fn on_newest(&mut self, _data_id: SeqId, _payload: &[u8]) {}

    /// Per-unit override of the configured retransmit mode for a timed-out unit. The first
    ///  listener returning something other than [RetransmitDecision::Default] decides.
    fn should_retransmit(&mut self, _data_id: SeqId, _payload: &[u8]) -> RetransmitDecision {
        RetransmitDecision::Default
    }
}
