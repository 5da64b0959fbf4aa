pub mod net;
pub mod session;

pub use net::{
    Address, Channel, DEFAULT_PORT, DiscoveredGame, DiscoveryList, GameParams, MAX_MESSAGE_SIZE,
    NetError, PacketLossSimulation, PlayerId, Statistics, WireError,
};
pub use session::{
    AcceptAll, Admission, AdmissionFilter, ClientConfig, ClientSession, ClientState,
    ConnectionRequest, DisconnectReason, NullListener, Player, RequirePassword, ServerConfig,
    ServerEvent, ServerSession, SessionListener,
};
