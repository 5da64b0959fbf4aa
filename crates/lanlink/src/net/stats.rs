use std::time::Duration;

/// Drops outbound datagrams at random to exercise loss handling.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand::random::<f32>() * 100.0 < self.loss_percent
    }
}

/// Counters for one channel. "Recently" counters reset on every snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub packets_ignored: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub lost_received: u64,
    pub lost_recently_received: u64,
    pub lost_sent: u64,
    pub lost_recently_sent: u64,
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_packet_received: Duration,
    pub rtt: Duration,
}

impl Statistics {
    pub(crate) fn record_lost_sent(&mut self, count: u64) {
        self.lost_sent += count;
        self.lost_recently_sent += count;
    }

    pub(crate) fn record_lost_received(&mut self, count: u64) {
        self.lost_received += count;
        self.lost_recently_received += count;
    }

    /// Copies the counters out and starts a new "recently" window.
    pub(crate) fn snapshot(&mut self) -> Statistics {
        let snapshot = self.clone();
        self.lost_recently_sent = 0;
        self.lost_recently_received = 0;
        snapshot
    }

    pub fn sent_loss_percent(&self) -> f32 {
        if self.messages_sent == 0 {
            return 0.0;
        }
        self.lost_sent as f32 / self.messages_sent as f32 * 100.0
    }
}
