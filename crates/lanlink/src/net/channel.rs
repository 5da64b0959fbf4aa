use std::io;
use std::net::UdpSocket;
use std::rc::Weak;
use std::time::Duration;

use super::address::Address;
use super::endpoint::{recv_datagram, send_datagram};
use super::error::NetError;
use super::protocol::{
    FrameHeader, FRAME_HEADER_SIZE, MAX_DATAGRAM_SIZE, MAX_MESSAGE_SIZE, MAX_QUEUED_TOTAL,
    MAX_SEND_INTERVAL, MIN_SEND_INTERVAL, NORMAL_SEND_INTERVAL, sequence_delta,
};
use super::queue::MessageQueue;
use super::stats::{PacketLossSimulation, Statistics};
use super::tracking::{RttEstimator, SendHistory, SendRecord};
use super::wire::{WireReader, WireWriter, varint_len};

#[derive(Debug)]
pub(crate) enum SocketHandle {
    Owned(UdpSocket),
    Shared(Weak<UdpSocket>),
    Detached,
}

impl SocketHandle {
    fn is_usable(&self) -> bool {
        match self {
            SocketHandle::Owned(_) => true,
            SocketHandle::Shared(weak) => weak.strong_count() > 0,
            SocketHandle::Detached => false,
        }
    }

    fn send(&self, data: &[u8], to: Address) -> io::Result<usize> {
        match self {
            SocketHandle::Owned(socket) => send_datagram(socket, data, to),
            SocketHandle::Shared(weak) => match weak.upgrade() {
                Some(socket) => send_datagram(&socket, data, to),
                None => Err(io::Error::from(io::ErrorKind::NotConnected)),
            },
            SocketHandle::Detached => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }
}

/// Whether a paced send is due. Flush requests are handled by the caller.
pub fn pacing_allows(elapsed: Duration, rtt: Duration, queue_empty: bool, queued_bytes: usize) -> bool {
    if elapsed < MIN_SEND_INTERVAL {
        return false;
    }
    if elapsed >= MAX_SEND_INTERVAL {
        // keepalive
        return true;
    }
    if queue_empty {
        return false;
    }
    if elapsed < NORMAL_SEND_INTERVAL {
        if elapsed < rtt / 4 && queued_bytes < MAX_MESSAGE_SIZE {
            return false;
        }
        if elapsed < rtt / 8 && queued_bytes < MAX_QUEUED_TOTAL / 4 {
            return false;
        }
    }
    true
}

#[derive(Debug)]
pub struct Channel {
    target: Address,
    socket: SocketHandle,
    inbound: MessageQueue,
    outbound: MessageQueue,
    flush_requested: bool,
    history: SendHistory,
    rtt: RttEstimator,
    last_send_seq: u16,
    last_recv_seq: u16,
    loss_to_report: u16,
    last_send_time: Duration,
    now: Duration,
    stats: Statistics,
    loss_simulation: Option<PacketLossSimulation>,
}

impl Channel {
    pub(crate) fn new(target: Address, socket: SocketHandle) -> Self {
        Self {
            target,
            socket,
            inbound: MessageQueue::new(MAX_QUEUED_TOTAL),
            outbound: MessageQueue::new(MAX_QUEUED_TOTAL),
            flush_requested: false,
            history: SendHistory::new(),
            rtt: RttEstimator::new(),
            last_send_seq: 0,
            last_recv_seq: 0,
            loss_to_report: 0,
            last_send_time: Duration::ZERO,
            now: Duration::ZERO,
            stats: Statistics::default(),
            loss_simulation: None,
        }
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn rtt(&self) -> Duration {
        self.rtt.rtt()
    }

    pub fn set_loss_simulation(&mut self, simulation: Option<PacketLossSimulation>) {
        self.loss_simulation = simulation;
    }

    /// Queues one message for the next send. The oldest queued messages are dropped
    /// when the queue grows past its byte budget.
    pub fn enqueue(&mut self, message: &[u8]) -> Result<(), NetError> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::MessageTooLarge {
                len: message.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if !self.socket.is_usable() {
            return Err(NetError::SocketDetached);
        }
        let evicted = self.outbound.push(message.to_vec());
        if evicted > 0 {
            log::debug!("Outbound queue to {} full, dropped {} messages", self.target, evicted);
            self.stats.record_lost_sent(evicted);
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.inbound.len()
    }

    pub fn peek_front(&self) -> Option<&[u8]> {
        self.inbound.front()
    }

    pub fn consume_front(&mut self) -> Option<Vec<u8>> {
        self.inbound.pop_front()
    }

    pub fn flush(&mut self) {
        self.flush_requested = true;
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    pub fn pending_outbound_bytes(&self) -> usize {
        self.outbound.total_bytes()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn stats_snapshot(&mut self) -> Statistics {
        self.stats.rtt = self.rtt.rtt();
        self.stats.snapshot()
    }

    pub(crate) fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    pub(crate) fn detach(&mut self) {
        self.socket = SocketHandle::Detached;
        self.outbound.clear();
    }

    pub(crate) fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, Address)>> {
        match &self.socket {
            SocketHandle::Owned(socket) => recv_datagram(socket, buf),
            _ => Ok(None),
        }
    }

    /// Decodes a sequenced datagram from the peer. `deliver` sees every non-empty
    /// message and decides whether it lands in the inbound queue.
    pub(crate) fn receive_datagram(
        &mut self,
        header: &FrameHeader,
        payload: &[u8],
        mut deliver: impl FnMut(&[u8]) -> bool,
    ) {
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += (FRAME_HEADER_SIZE + payload.len()) as u64;

        match self.history.find(header.ack) {
            Some(record) => self.rtt.sample(self.now.saturating_sub(record.sent_at)),
            None => self.rtt.penalize(),
        }
        self.stats.rtt = self.rtt.rtt();

        let Some(delta) = sequence_delta(header.sequence, self.last_recv_seq) else {
            log::debug!(
                "Stale datagram from {} (seq {}, expected {})",
                self.target,
                header.sequence,
                self.last_recv_seq
            );
            self.stats.packets_ignored += 1;
            self.stats.record_lost_received(1);
            return;
        };

        self.loss_to_report = self.loss_to_report.saturating_add(delta);
        self.last_recv_seq = header.sequence;
        self.stats.record_lost_sent(header.loss as u64);

        let mut reader = WireReader::new(payload);
        while !reader.is_empty() {
            let message = match read_message(&mut reader) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!(
                        "Malformed message from {} after {} bytes: {}",
                        self.target,
                        payload.len() - reader.remaining(),
                        e
                    );
                    break;
                }
            };
            self.last_recv_seq = self.last_recv_seq.wrapping_add(1);
            self.stats.messages_received += 1;
            if !message.is_empty() && deliver(message) {
                let evicted = self.inbound.push(message.to_vec());
                if evicted > 0 {
                    self.stats.record_lost_received(evicted);
                }
            }
        }

        self.stats.last_packet_received = self.now;
    }

    pub(crate) fn write_outgoing(&mut self) {
        if !self.socket.is_usable() {
            return;
        }
        let elapsed = self.now.saturating_sub(self.last_send_time);
        let due = std::mem::take(&mut self.flush_requested)
            || pacing_allows(
                elapsed,
                self.rtt.rtt(),
                self.outbound.is_empty(),
                self.outbound.total_bytes(),
            );
        if !due {
            return;
        }

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut writer = WireWriter::new(&mut buf);
        let header = FrameHeader::new(self.last_send_seq, self.last_recv_seq, self.loss_to_report);
        if let Err(e) = header.write(&mut writer) {
            log::warn!("Failed to frame datagram for {}: {}", self.target, e);
            return;
        }
        self.loss_to_report = 0;

        let mut count: u16 = 0;
        while let Some(message) = self.outbound.front() {
            let needed = varint_len(message.len() as u64) + message.len();
            if needed > writer.remaining() {
                break;
            }
            if writer.write_varint(message.len() as u64).is_err()
                || writer.write_bytes(message).is_err()
            {
                break;
            }
            self.outbound.pop_front();
            count += 1;
        }
        let len = writer.position();

        self.last_send_time = self.now;
        self.last_send_seq = self.last_send_seq.wrapping_add(count);
        self.history.record(SendRecord {
            sent_at: self.now,
            sequence: self.last_send_seq,
        });
        self.stats.messages_sent += count as u64;
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += len as u64;

        if self.loss_simulation.as_ref().is_some_and(|sim| sim.should_drop()) {
            log::trace!("Simulated loss of datagram to {}", self.target);
            return;
        }

        match self.socket.send(&buf[..len], self.target) {
            Ok(written) if written == len => {}
            Ok(written) => {
                log::warn!("Short write to {}: {} of {} bytes", self.target, written, len);
                self.stats.record_lost_sent(count as u64);
            }
            Err(e) => {
                log::warn!("Send to {} failed: {}", self.target, e);
                self.stats.record_lost_sent(count as u64);
            }
        }
    }

    /// Discards queued data and sends `message` alone, immediately.
    pub(crate) fn send_final(&mut self, message: &[u8]) {
        self.outbound.clear();
        if let Err(e) = self.enqueue(message) {
            log::debug!("Final message to {} not sent: {}", self.target, e);
            return;
        }
        self.flush_requested = true;
        self.write_outgoing();
    }
}

fn read_message<'a>(reader: &mut WireReader<'a>) -> Result<&'a [u8], super::wire::WireError> {
    let len = reader.read_varint()?;
    let len = usize::try_from(len).map_err(|_| super::wire::WireError::OutOfRange(len))?;
    reader.read_bytes(len)
}
