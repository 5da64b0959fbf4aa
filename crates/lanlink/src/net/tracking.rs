use std::time::Duration;

use super::protocol::MAX_SEND_INTERVAL;

pub const SEND_RECORDS: usize = 8;

// ten keepalive intervals
const RTT_CEILING: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRecord {
    pub sent_at: Duration,
    /// Sender sequence once the datagram's messages are counted.
    pub sequence: u16,
}

#[derive(Debug, Default)]
pub struct SendHistory {
    records: [Option<SendRecord>; SEND_RECORDS],
    next: usize,
}

impl SendHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: SendRecord) {
        self.records[self.next] = Some(record);
        self.next = (self.next + 1) % SEND_RECORDS;
    }

    /// Most recent send whose sequence matches an echoed sequence.
    ///
    /// Keepalives carry the sequence of the data send before them, so once the link
    /// idles the match is the latest keepalive and samples can come out short of the
    /// true round trip. Samples below the estimate only pull it down by a tenth.
    pub fn find(&self, sequence: u16) -> Option<&SendRecord> {
        (1..=SEND_RECORDS)
            .map(|back| (self.next + SEND_RECORDS - back) % SEND_RECORDS)
            .filter_map(|i| self.records[i].as_ref())
            .find(|r| r.sequence == sequence)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RttEstimator {
    rtt: Duration,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn sample(&mut self, sample: Duration) {
        if sample < self.rtt {
            self.rtt = self.rtt.mul_f32(0.9) + sample.mul_f32(0.1);
        } else {
            self.rtt = sample;
        }
    }

    /// The echo matched nothing we remember sending, so our estimate is too low.
    pub fn penalize(&mut self) {
        self.rtt = (self.rtt + MAX_SEND_INTERVAL).min(RTT_CEILING);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ms: u64, sequence: u16) -> SendRecord {
        SendRecord {
            sent_at: Duration::from_millis(ms),
            sequence,
        }
    }

    #[test]
    fn test_history_overwrites_oldest() {
        let mut history = SendHistory::new();
        for i in 0..SEND_RECORDS as u16 + 2 {
            history.record(record(i as u64 * 10, i));
        }
        assert!(history.find(0).is_none());
        assert!(history.find(1).is_none());
        assert_eq!(history.find(9).unwrap().sent_at, Duration::from_millis(90));
    }

    #[test]
    fn test_history_prefers_newest_match() {
        let mut history = SendHistory::new();
        history.record(record(10, 4));
        history.record(record(30, 4));
        assert_eq!(history.find(4).unwrap().sent_at, Duration::from_millis(30));
    }

    #[test]
    fn test_keepalive_after_data_shares_sequence() {
        let mut history = SendHistory::new();
        history.record(record(0, 3));
        history.record(record(200, 3));
        history.record(record(400, 3));
        assert_eq!(history.find(3).unwrap().sent_at, Duration::from_millis(400));

        let mut rtt = RttEstimator::new();
        rtt.sample(Duration::from_millis(120));
        // a short sample from the latest keepalive barely moves the estimate
        rtt.sample(Duration::from_millis(20));
        assert!(rtt.rtt() >= Duration::from_millis(109));
    }

    #[test]
    fn test_rtt_peak_follow_then_average_down() {
        let mut rtt = RttEstimator::new();
        rtt.sample(Duration::from_millis(100));
        assert_eq!(rtt.rtt(), Duration::from_millis(100));

        rtt.sample(Duration::from_millis(50));
        let averaged = rtt.rtt().as_secs_f64();
        assert!((averaged - 0.095).abs() < 1e-4);

        rtt.sample(Duration::from_millis(300));
        assert_eq!(rtt.rtt(), Duration::from_millis(300));
    }

    #[test]
    fn test_rtt_penalty_is_clamped() {
        let mut rtt = RttEstimator::new();
        for _ in 0..20 {
            rtt.penalize();
        }
        assert_eq!(rtt.rtt(), Duration::from_secs(2));
    }
}
