use std::net::SocketAddr;
use std::time::Duration;

use crate::net::{BROADCAST_INTERVAL, DISCONNECT_TIMEOUT, PacketLossSimulation, SCAN_TIMEOUT};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub advertise_interval: Duration,
    /// Where advertisements go. `None` broadcasts on the server's own port.
    pub advertise_target: Option<SocketAddr>,
    /// Applied to every player channel as it is created.
    pub loss_simulation: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            advertise_interval: BROADCAST_INTERVAL,
            advertise_target: None,
            loss_simulation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub scan_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub loss_simulation: Option<PacketLossSimulation>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout: SCAN_TIMEOUT,
            disconnect_timeout: DISCONNECT_TIMEOUT,
            loss_simulation: None,
        }
    }
}
