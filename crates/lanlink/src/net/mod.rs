mod address;
mod channel;
pub mod control;
mod discovery;
mod endpoint;
mod error;
mod protocol;
mod queue;
mod stats;
mod tracking;
mod wire;

pub use address::Address;
pub use channel::{Channel, pacing_allows};
pub(crate) use channel::SocketHandle;
pub use control::{ConnectRequest, PlayerId, ServerControl, is_reserved};
pub use discovery::{
    Advertisement, DiscoveredGame, DiscoveryList, GAME_PARAMS_SIZE, GameParams,
    MAX_ADVERTISEMENT_SIZE,
};
pub use endpoint::{bind_broadcast, bind_ephemeral, recv_datagram, send_datagram};
pub use error::NetError;
pub(crate) use error::validate_name;
pub use protocol::{
    BROADCAST_INTERVAL, CONNECTED_MAGIC, DEFAULT_PORT, DISCONNECT_TIMEOUT, DISCOVERY_MAGIC,
    FRAME_HEADER_SIZE, FrameHeader, MAX_DATAGRAM_PAYLOAD, MAX_DATAGRAM_SIZE, MAX_MESSAGE_SIZE,
    MAX_NAME_FIELD, MAX_NAME_LEN, MAX_QUEUED_TOTAL, MAX_SEND_INTERVAL, MIN_SEND_INTERVAL,
    NORMAL_SEND_INTERVAL, SCAN_TIMEOUT, parse_datagram, sequence_delta,
};
pub use queue::MessageQueue;
pub use stats::{PacketLossSimulation, Statistics};
pub use tracking::{RttEstimator, SEND_RECORDS, SendHistory, SendRecord};
pub use wire::{MAX_VARINT_LEN, SENTINEL, WireError, WireReader, WireWriter, varint_len};
