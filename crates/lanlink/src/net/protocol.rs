use std::time::Duration;

use super::wire::{WireError, WireReader, WireWriter};

pub const DISCOVERY_MAGIC: u16 = 0xaa01;
pub const CONNECTED_MAGIC: u16 = 0xaa02;

pub const FRAME_HEADER_SIZE: usize = 8;
// Largest single application message.
pub const MAX_MESSAGE_SIZE: usize = 1200;
// Message bytes plus their length prefixes carried by one datagram.
pub const MAX_DATAGRAM_PAYLOAD: usize = MAX_MESSAGE_SIZE + 32;
pub const MAX_DATAGRAM_SIZE: usize = FRAME_HEADER_SIZE + MAX_DATAGRAM_PAYLOAD;
// Ceiling on queued message bytes, per direction, per channel.
pub const MAX_QUEUED_TOTAL: usize = 65536;

// Strings on the wire occupy at most this many bytes including the terminator.
pub const MAX_NAME_FIELD: usize = 32;
pub const MAX_NAME_LEN: usize = MAX_NAME_FIELD - 1;

pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(10);
pub const NORMAL_SEND_INTERVAL: Duration = Duration::from_millis(50);
pub const MAX_SEND_INTERVAL: Duration = Duration::from_millis(200);
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(500);
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(3);
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_PORT: u16 = 27015;

const SEQUENCE_WRAP_THRESHOLD: u16 = u16::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u16,
    pub sequence: u16,
    pub ack: u16,
    pub loss: u16,
}

impl FrameHeader {
    pub fn new(sequence: u16, ack: u16, loss: u16) -> Self {
        Self {
            magic: CONNECTED_MAGIC,
            sequence,
            ack,
            loss,
        }
    }

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            magic: reader.read_u16()?,
            sequence: reader.read_u16()?,
            ack: reader.read_u16()?,
            loss: reader.read_u16()?,
        })
    }

    pub fn write(&self, writer: &mut WireWriter<'_>) -> Result<(), WireError> {
        writer.write_u16(self.magic)?;
        writer.write_u16(self.sequence)?;
        writer.write_u16(self.ack)?;
        writer.write_u16(self.loss)
    }

    pub fn is_valid(&self) -> bool {
        self.magic == CONNECTED_MAGIC
    }
}

pub fn parse_datagram(data: &[u8]) -> Result<(FrameHeader, &[u8]), WireError> {
    let mut reader = WireReader::new(data);
    let header = FrameHeader::read(&mut reader)?;
    if !header.is_valid() {
        return Err(WireError::BadMagic(header.magic));
    }
    Ok((header, reader.rest()))
}

/// How far `received` is ahead of `last`, or `None` when it lies more than half
/// the sequence space behind and must be treated as stale.
#[inline]
pub fn sequence_delta(received: u16, last: u16) -> Option<u16> {
    let delta = received.wrapping_sub(last);
    (delta <= SEQUENCE_WRAP_THRESHOLD).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_delta_wraps() {
        assert_eq!(sequence_delta(150, 100), Some(50));
        assert_eq!(sequence_delta(50, 100), None);
        assert_eq!(sequence_delta(3, 65530), Some(9));
        assert_eq!(sequence_delta(100, 100), Some(0));
        assert_eq!(sequence_delta(100 + 0x7fff, 100), Some(0x7fff));
        assert_eq!(sequence_delta(100u16.wrapping_add(0x8000), 100), None);
    }

    #[test]
    fn test_header_layout() {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        let mut w = WireWriter::new(&mut buf);
        FrameHeader::new(0x0102, 0x0304, 0x0506).write(&mut w).unwrap();
        assert_eq!(buf, [0xaa, 0x02, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

        let (header, payload) = parse_datagram(&buf).unwrap();
        assert_eq!(header.sequence, 0x0102);
        assert_eq!(header.ack, 0x0304);
        assert_eq!(header.loss, 0x0506);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_parse_rejects_foreign_magic() {
        let buf = [0xaa, 0x01, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(parse_datagram(&buf), Err(WireError::BadMagic(DISCOVERY_MAGIC)));
        assert_eq!(parse_datagram(&buf[..5]), Err(WireError::UnexpectedEnd));
    }
}
