mod client;
mod config;
mod events;
mod listener;
mod server;

pub use client::{ClientSession, ClientState};
pub use config::{ClientConfig, ServerConfig};
pub use events::{DisconnectReason, ServerEvent};
pub use listener::{
    AcceptAll, Admission, AdmissionFilter, ConnectionRequest, NullListener, RequirePassword,
    SessionListener,
};
pub use server::{Player, ServerSession};
