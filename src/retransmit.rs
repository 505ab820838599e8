use crate::rto_estimator::RtoEstimator;
use crate::segment::Segment;
use crate::seq_id::SeqId;
use crate::windowed_store::{SentDiscardPolicy, WindowedStore};
use tokio::time::Instant;
use tracing::trace;

/// What happens to a timed-out unit unless a listener decides otherwise
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetransmitMode {
    Always,
    Never,
    /// only the most recently submitted unit is retransmitted
    Newest,
}

/// A listener's verdict on retransmitting a specific unit
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RetransmitDecision {
    Yes,
    No,
    /// leave the decision to the configured [RetransmitMode]
    Default,
}

pub struct RetransmitPolicy {
    mode: RetransmitMode,
}

impl RetransmitPolicy {
    pub fn new(mode: RetransmitMode) -> RetransmitPolicy {
        RetransmitPolicy { mode }
    }

    /// Selects the in-flight units that are due for retransmission, returning their data ids
    ///  oldest first.
    ///
    /// Units not (re)sent for longer than the RTO are considered lost, and finding any of them
    ///  backs off the estimator. Mode and listeners only decide which of them are resent. Otherwise, and only if the estimator is not backed
    ///  off already, the most recently sent unit is resent once if it is older than the VTO,
    ///  without backoff.
    pub fn select(
        &self,
        sent: &WindowedStore<SentDiscardPolicy>,
        estimator: &mut RtoEstimator,
        newest_data_id: Option<SeqId>,
        decide: &mut dyn FnMut(&Segment) -> RetransmitDecision,
        now: Instant,
    ) -> Vec<SeqId> {
        let rto = estimator.rto();
        let timed_out = sent.units()
            .filter(|s| s.age(now) > rto)
            .collect::<Vec<_>>();

        if !timed_out.is_empty() {
            let timed_out_count = timed_out.len();
            estimator.backoff(now);

            let selected = timed_out.into_iter()
                .filter(|s| self.includes(s, newest_data_id, decide))
                .map(|s| s.data_id())
                .collect::<Vec<_>>();

            trace!("{} units timed out after {:?}, retransmitting {:?}", timed_out_count, rto, selected);
            return selected;
        }

        if estimator.is_backed_off() {
            return Vec::new();
        }

        let Some(newest) = sent.newest_unit() else {
            return Vec::new();
        };
        if newest.transmission_count() == 1 && newest.age(now) > estimator.vto() && self.includes(newest, newest_data_id, decide) {
            trace!("unit {:?} is older than VTO {:?}", newest.data_id(), estimator.vto());
            vec![newest.data_id()]
        }
        else {
            Vec::new()
        }
    }

    fn includes(&self, segment: &Segment, newest_data_id: Option<SeqId>, decide: &mut dyn FnMut(&Segment) -> RetransmitDecision) -> bool {
        match decide(segment) {
            RetransmitDecision::Yes => true,
            RetransmitDecision::No => false,
            RetransmitDecision::Default => match self.mode {
                RetransmitMode::Always => true,
                RetransmitMode::Never => false,
                RetransmitMode::Newest => Some(segment.data_id()) == newest_data_id,
            },
        }
    }
}
