use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const INITIAL_RTO: Duration = Duration::from_millis(1000);
pub const MIN_RTO: Duration = Duration::from_millis(200);
pub const MAX_RTO: Duration = Duration::from_secs(60);
pub const MAX_VTO: Duration = Duration::from_millis(1000);

/// Round trip time estimation (Jacobson / Karels) and the timeouts derived from it.
///
/// Apart from the regular retransmission timeout (RTO), this estimator maintains a 'variance
///  timeout' (VTO) which is only the variance term of the RTO. It is used to resend an isolated
///  lost packet quickly without waiting for a full RTO.
///
/// Backoff is linear: every backoff increments a factor the RTO is multiplied with. A sample
///  for a transmission sent after the most recent backoff resets the factor.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    k: u32,
    g: Duration,

    smoothed_rtt: Option<Duration>,
    rtt_variance: Duration,
    rto: Duration,
    vto: Duration,

    backoff_factor: u32,
    last_backoff_time: Option<Instant>,
}

impl RtoEstimator {
    pub fn new(k: u32, g: Duration) -> RtoEstimator {
        RtoEstimator {
            k,
            g,
            smoothed_rtt: None,
            rtt_variance: Duration::ZERO,
            rto: INITIAL_RTO,
            vto: MAX_VTO,
            backoff_factor: 1,
            last_backoff_time: None,
        }
    }

    /// Adds a round trip sample for a transmission that was sent at `sent_at` and acknowledged
    ///  at `now`.
    pub fn sample(&mut self, sent_at: Instant, now: Instant) {
        let delta = now.saturating_duration_since(sent_at);

        match self.smoothed_rtt {
            None => {
                self.smoothed_rtt = Some(delta);
                self.rtt_variance = delta / 2;
            }
            Some(smoothed_rtt) => {
                let deviation = if smoothed_rtt > delta {
                    smoothed_rtt - delta
                }
                else {
                    delta - smoothed_rtt
                };
                self.rtt_variance = (self.rtt_variance * 3 + deviation) / 4;
                self.smoothed_rtt = Some((smoothed_rtt * 7 + delta) / 8);
            }
        }

        let variance_term = self.g.max(self.rtt_variance * self.k);
        let smoothed_rtt = self.smoothed_rtt.unwrap_or(delta);
        self.rto = (smoothed_rtt + variance_term).clamp(MIN_RTO, MAX_RTO);
        self.vto = variance_term.min(MAX_VTO);

        if let Some(last_backoff_time) = self.last_backoff_time {
            if sent_at >= last_backoff_time {
                debug!("round trip sample after backoff - resetting backoff factor {}", self.backoff_factor);
                self.backoff_factor = 1;
                self.last_backoff_time = None;
            }
        }
    }

    pub fn backoff(&mut self, now: Instant) {
        self.backoff_factor += 1;
        self.last_backoff_time = Some(now);
        debug!("backing off - RTO is now {:?}", self.rto());
    }

    /// the effective retransmission timeout, including backoff
    pub fn rto(&self) -> Duration {
        self.rto * self.backoff_factor
    }

    /// the retransmission timeout without backoff
    pub fn base_rto(&self) -> Duration {
        self.rto
    }

    pub fn vto(&self) -> Duration {
        self.vto
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    pub fn rtt_variance(&self) -> Duration {
        self.rtt_variance
    }

    pub fn backoff_factor(&self) -> u32 {
        self.backoff_factor
    }

    pub fn is_backed_off(&self) -> bool {
        self.backoff_factor > 1
    }
}
