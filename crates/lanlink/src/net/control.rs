use super::protocol::MAX_NAME_FIELD;
use super::wire::{WireError, WireReader, WireWriter};

pub type PlayerId = u32;

// The first byte of every message names its kind. Ids `0x60..=0x7f` belong to the
// transport and are never delivered to the application.
pub const RESERVED_FIRST: u8 = 0x60;
pub const RESERVED_LAST: u8 = 0x7f;

pub const C2S_CONNECT: u8 = 0x61;
pub const C2S_DISCONNECT: u8 = 0x62;

pub const S2C_CONNECTED: u8 = 0x61;
pub const S2C_DISCONNECTED: u8 = 0x62;
pub const S2C_PLAYER_INFO: u8 = 0x63;

const CONTROL_BUFFER: usize = 3 * MAX_NAME_FIELD + 1;

#[inline]
pub fn is_reserved(message: &[u8]) -> bool {
    message
        .first()
        .is_some_and(|id| (RESERVED_FIRST..=RESERVED_LAST).contains(id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub game_name: String,
    pub player_name: String,
    pub password: String,
}

impl ConnectRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = [0u8; CONTROL_BUFFER];
        let mut w = WireWriter::new(&mut buf);
        w.write_u8(C2S_CONNECT)?;
        w.write_bounded_str(&self.game_name, MAX_NAME_FIELD)?;
        w.write_bounded_str(&self.player_name, MAX_NAME_FIELD)?;
        w.write_bounded_str(&self.password, MAX_NAME_FIELD)?;
        Ok(w.written().to_vec())
    }

    /// Decodes a full message, leading id included.
    pub fn decode(message: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(message);
        expect_id(&mut r, C2S_CONNECT)?;
        Ok(Self {
            game_name: r.read_bounded_str(MAX_NAME_FIELD)?.to_owned(),
            player_name: r.read_bounded_str(MAX_NAME_FIELD)?.to_owned(),
            password: r.read_bounded_str(MAX_NAME_FIELD)?.to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerControl {
    Connected(PlayerId),
    Disconnected(Vec<PlayerId>),
    PlayerInfo(Vec<(PlayerId, String)>),
}

impl ServerControl {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = vec![0u8; self.encoded_capacity()];
        let mut w = WireWriter::new(&mut buf);
        match self {
            ServerControl::Connected(id) => {
                w.write_u8(S2C_CONNECTED)?;
                w.write_varint(*id as u64)?;
            }
            ServerControl::Disconnected(ids) => {
                w.write_u8(S2C_DISCONNECTED)?;
                for id in ids {
                    w.write_varint(*id as u64)?;
                }
            }
            ServerControl::PlayerInfo(players) => {
                w.write_u8(S2C_PLAYER_INFO)?;
                for (id, name) in players {
                    w.write_varint(*id as u64)?;
                    w.write_bounded_str(name, MAX_NAME_FIELD)?;
                }
            }
        }
        let len = w.position();
        buf.truncate(len);
        Ok(buf)
    }

    pub fn decode(message: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(message);
        match r.read_u8()? {
            S2C_CONNECTED => Ok(ServerControl::Connected(read_player_id(&mut r)?)),
            S2C_DISCONNECTED => {
                let mut ids = Vec::new();
                while !r.is_empty() {
                    ids.push(read_player_id(&mut r)?);
                }
                Ok(ServerControl::Disconnected(ids))
            }
            S2C_PLAYER_INFO => {
                let mut players = Vec::new();
                while !r.is_empty() {
                    let id = read_player_id(&mut r)?;
                    let name = r.read_bounded_str(MAX_NAME_FIELD)?.to_owned();
                    players.push((id, name));
                }
                Ok(ServerControl::PlayerInfo(players))
            }
            other => Err(WireError::OutOfRange(other as u64)),
        }
    }

    fn encoded_capacity(&self) -> usize {
        let per_entry = match self {
            ServerControl::Connected(_) => 5,
            ServerControl::Disconnected(ids) => 5 * ids.len(),
            ServerControl::PlayerInfo(players) => (5 + MAX_NAME_FIELD) * players.len(),
        };
        1 + per_entry
    }
}

pub fn encode_client_disconnect() -> Vec<u8> {
    vec![C2S_DISCONNECT]
}

fn expect_id(r: &mut WireReader<'_>, id: u8) -> Result<(), WireError> {
    let found = r.read_u8()?;
    if found != id {
        return Err(WireError::OutOfRange(found as u64));
    }
    Ok(())
}

fn read_player_id(r: &mut WireReader<'_>) -> Result<PlayerId, WireError> {
    let raw = r.read_varint()?;
    PlayerId::try_from(raw).map_err(|_| WireError::OutOfRange(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_range() {
        assert!(is_reserved(&[0x60]));
        assert!(is_reserved(&[0x7f, 1, 2]));
        assert!(!is_reserved(&[0x5f]));
        assert!(!is_reserved(&[0x80]));
        assert!(!is_reserved(&[]));
    }

    #[test]
    fn test_connect_request_layout() {
        let request = ConnectRequest {
            game_name: String::from("space"),
            player_name: String::from("Bob"),
            password: String::new(),
        };
        let bytes = request.encode().unwrap();
        assert_eq!(bytes, b"\x61space\0Bob\0\0");
        assert_eq!(ConnectRequest::decode(&bytes).unwrap(), request);
        assert!(ConnectRequest::decode(&bytes[..8]).is_err());
        assert!(ConnectRequest::decode(b"\x62space\0Bob\0\0").is_err());
    }

    #[test]
    fn test_server_control_layouts() {
        assert_eq!(ServerControl::Connected(300).encode().unwrap(), vec![0x61, 0x82, 0x2c]);
        assert_eq!(
            ServerControl::Disconnected(vec![1, 2]).encode().unwrap(),
            vec![0x62, 1, 2]
        );

        let info = ServerControl::PlayerInfo(vec![(1, String::from("Al")), (2, String::from("Bo"))]);
        let bytes = info.encode().unwrap();
        assert_eq!(bytes, b"\x63\x01Al\0\x02Bo\0");
        assert_eq!(ServerControl::decode(&bytes).unwrap(), info);
    }

    #[test]
    fn test_malformed_server_control() {
        assert!(ServerControl::decode(&[0x61]).is_err());
        assert!(ServerControl::decode(&[0x63, 1, b'A']).is_err());
        assert!(ServerControl::decode(&[0x6f]).is_err());
        assert!(ServerControl::decode(&[0x61, 0x90, 0x80, 0x80, 0x80, 0x80, 0x00]).is_err());
    }
}
