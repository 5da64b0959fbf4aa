use crate::net::{Address, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ConnectionRequested {
        address: Address,
        player_name: String,
    },
    PlayerJoined {
        player_id: PlayerId,
        address: Address,
        name: String,
    },
    PlayerLeft {
        player_id: PlayerId,
        reason: DisconnectReason,
    },
    ConnectionBlocked {
        address: Address,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Kicked,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Kicked => "removed",
            DisconnectReason::Shutdown => "server shut down",
        }
    }
}
