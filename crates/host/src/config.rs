use std::net::SocketAddr;
use std::time::Duration;

use lanlink::{DEFAULT_PORT, PacketLossSimulation, ServerConfig};

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub port: u16,
    pub game: String,
    pub session: String,
    pub password: String,
    pub max_players: u8,
    pub tick_rate: u32,
    pub loss_simulation: Option<PacketLossSimulation>,
    pub advertise_target: Option<SocketAddr>,
    /// Stop after this long. `None` runs until the process is killed.
    pub run_for: Option<Duration>,
}

impl HostConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            advertise_target: self.advertise_target,
            loss_simulation: self.loss_simulation.clone(),
            ..ServerConfig::default()
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            game: String::from("lanlink"),
            session: String::from("LAN game"),
            password: String::new(),
            max_players: 8,
            tick_rate: 60,
            loss_simulation: None,
            advertise_target: None,
            run_for: None,
        }
    }
}
