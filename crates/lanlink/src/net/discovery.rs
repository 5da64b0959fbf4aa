use std::time::Duration;

use super::address::Address;
use super::protocol::{DISCOVERY_MAGIC, MAX_NAME_FIELD};
use super::wire::{WireError, WireReader, WireWriter};

pub const GAME_PARAMS_SIZE: usize = 16;
// Upper bound on an encoded advertisement.
pub const MAX_ADVERTISEMENT_SIZE: usize = 8 + MAX_NAME_FIELD + GAME_PARAMS_SIZE + MAX_NAME_FIELD;

/// Application-defined description of a hosted game. The transport only copies it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GameParams {
    pub game_mode: u8,
    pub game_state: u8,
    pub num_players: u8,
    pub max_players: u8,
    pub extra: [u8; 12],
}

impl GameParams {
    pub fn to_bytes(&self) -> [u8; GAME_PARAMS_SIZE] {
        let mut out = [0u8; GAME_PARAMS_SIZE];
        out[0] = self.game_mode;
        out[1] = self.game_state;
        out[2] = self.num_players;
        out[3] = self.max_players;
        out[4..].copy_from_slice(&self.extra);
        out
    }

    pub fn from_bytes(bytes: &[u8; GAME_PARAMS_SIZE]) -> Self {
        let mut extra = [0u8; 12];
        extra.copy_from_slice(&bytes[4..]);
        Self {
            game_mode: bytes[0],
            game_state: bytes[1],
            num_players: bytes[2],
            max_players: bytes[3],
            extra,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub game_name: String,
    pub params: GameParams,
    pub session_name: String,
}

impl Advertisement {
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, WireError> {
        let mut w = WireWriter::new(buf);
        w.write_u16(DISCOVERY_MAGIC)?;
        for _ in 0..3 {
            w.write_u16(0)?;
        }
        w.write_bounded_str(&self.game_name, MAX_NAME_FIELD)?;
        w.write_bytes(&self.params.to_bytes())?;
        w.write_bounded_str(&self.session_name, MAX_NAME_FIELD)?;
        Ok(w.position())
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(data);
        let magic = r.read_u16()?;
        if magic != DISCOVERY_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        // reserved
        for _ in 0..3 {
            r.read_u16()?;
        }
        let game_name = r.read_bounded_str(MAX_NAME_FIELD)?.to_owned();
        let params = GameParams::from_bytes(&r.read_array::<GAME_PARAMS_SIZE>()?);
        let session_name = r.read_bounded_str(MAX_NAME_FIELD)?.to_owned();
        Ok(Self {
            game_name,
            params,
            session_name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGame {
    pub address: Address,
    pub params: GameParams,
    pub session_name: String,
}

#[derive(Debug, Clone)]
struct Sighting {
    last_seen: Duration,
    game: DiscoveredGame,
}

#[derive(Debug, Default)]
pub struct DiscoveryList {
    entries: Vec<Sighting>,
}

impl DiscoveryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, game: DiscoveredGame, now: Duration) {
        match self
            .entries
            .iter_mut()
            .find(|s| s.game.address == game.address)
        {
            Some(existing) => {
                existing.last_seen = now;
                existing.game = game;
            }
            None => {
                log::debug!("Discovered game '{}' at {}", game.session_name, game.address);
                self.entries.push(Sighting {
                    last_seen: now,
                    game,
                });
            }
        }
    }

    /// Drops every entry not refreshed within `timeout` of `now`.
    pub fn purge(&mut self, now: Duration, timeout: Duration) {
        let Some(cutoff) = now.checked_sub(timeout) else {
            return;
        };
        self.entries.retain(|s| {
            let keep = s.last_seen >= cutoff;
            if !keep {
                log::debug!("Game at {} expired", s.game.address);
            }
            keep
        });
    }

    pub fn get(&self, index: usize) -> Option<&DiscoveredGame> {
        self.entries.get(index).map(|s| &s.game)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredGame> {
        self.entries.iter().map(|s| &s.game)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement() -> Advertisement {
        Advertisement {
            game_name: String::from("space"),
            params: GameParams {
                game_mode: 1,
                game_state: 1,
                num_players: 0,
                max_players: 6,
                extra: [0; 12],
            },
            session_name: String::from("Alpha"),
        }
    }

    #[test]
    fn test_advertisement_layout() {
        let mut buf = [0u8; MAX_ADVERTISEMENT_SIZE];
        let len = advertisement().encode(&mut buf).unwrap();
        assert_eq!(len, 8 + 6 + GAME_PARAMS_SIZE + 6);
        assert_eq!(&buf[..8], &[0xaa, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&buf[8..14], b"space\0");
        assert_eq!(&buf[14..18], &[1, 1, 0, 6]);

        assert_eq!(Advertisement::decode(&buf[..len]).unwrap(), advertisement());
    }

    #[test]
    fn test_truncated_advertisement_rejected() {
        let mut buf = [0u8; MAX_ADVERTISEMENT_SIZE];
        let len = advertisement().encode(&mut buf).unwrap();
        for cut in [4, 12, 20, len - 1] {
            assert!(Advertisement::decode(&buf[..cut]).is_err());
        }
    }

    #[test]
    fn test_overlong_session_name_rejected() {
        let mut ad = advertisement();
        ad.session_name = "x".repeat(MAX_NAME_FIELD);
        let mut buf = [0u8; MAX_ADVERTISEMENT_SIZE];
        assert!(ad.encode(&mut buf).is_err());
    }

    #[test]
    fn test_discovery_list_upsert_and_purge() {
        let mut list = DiscoveryList::new();
        let addr = Address::localhost(9000);
        let game = DiscoveredGame {
            address: addr,
            params: GameParams::default(),
            session_name: String::from("Alpha"),
        };

        list.upsert(game.clone(), Duration::from_secs(1));
        list.upsert(
            DiscoveredGame {
                session_name: String::from("Beta"),
                ..game.clone()
            },
            Duration::from_secs(2),
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0).unwrap().session_name, "Beta");

        list.purge(Duration::from_secs(4), Duration::from_secs(3));
        assert_eq!(list.len(), 1);
        list.purge(Duration::from_millis(5001), Duration::from_secs(3));
        assert!(list.is_empty());
    }
}
