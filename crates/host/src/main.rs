mod chat;
mod config;
mod host;
mod peer;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use config::HostConfig;
use host::GameHost;
use lanlink::{Address, DEFAULT_PORT, PacketLossSimulation};

#[derive(Parser)]
#[command(name = "lanlink")]
#[command(about = "Host, find and join LAN game sessions")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a session and advertise it on the local network
    Host {
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(short, long)]
        game: String,

        #[arg(short, long)]
        session: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(short, long, default_value_t = 8)]
        max_players: u8,

        #[arg(short, long, default_value_t = 60)]
        tick_rate: u32,

        #[arg(long, help = "Outbound packet loss percentage (0-100)")]
        loss_percent: Option<f32>,

        #[arg(long, help = "Send advertisements here instead of broadcasting")]
        advertise_target: Option<SocketAddr>,

        #[arg(long, help = "Stop after this many seconds")]
        seconds: Option<u64>,
    },
    /// List sessions advertised on the local network
    Scan {
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(short, long)]
        game: String,

        #[arg(long, default_value_t = 3)]
        seconds: u64,
    },
    /// Connect to a session and chat
    Join {
        /// Server address, host:port
        address: String,

        #[arg(short, long)]
        game: String,

        #[arg(short, long)]
        name: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(long)]
        seconds: Option<u64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match args.command {
        Command::Host {
            port,
            game,
            session,
            password,
            max_players,
            tick_rate,
            loss_percent,
            advertise_target,
            seconds,
        } => {
            let config = HostConfig {
                port,
                game,
                session,
                password,
                max_players,
                tick_rate,
                loss_simulation: loss_percent.map(PacketLossSimulation::new),
                advertise_target,
                run_for: seconds.map(Duration::from_secs),
            };
            let mut host = GameHost::new(config)?;
            if let Some(addr) = host.local_addr() {
                log::info!("Server started on {}", addr);
            }
            host.run();
            log::info!("Server shutting down");
        }
        Command::Scan {
            port,
            game,
            seconds,
        } => {
            peer::scan(&game, port, Duration::from_secs(seconds))?;
        }
        Command::Join {
            address,
            game,
            name,
            password,
            seconds,
        } => {
            let address = parse_address(&address)?;
            peer::join(&game, address, &name, &password, seconds.map(Duration::from_secs))?;
        }
    }

    Ok(())
}

fn parse_address(text: &str) -> Result<Address> {
    if let Ok(address) = text.parse::<Address>() {
        return Ok(address);
    }
    let (host, port) = text
        .rsplit_once(':')
        .with_context(|| format!("expected host:port, got '{}'", text))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in '{}'", text))?;
    Address::resolve(host, port).with_context(|| format!("could not resolve '{}'", host))
}
