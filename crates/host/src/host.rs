use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lanlink::{
    Admission, ConnectionRequest, GameParams, PlayerId, ServerEvent, ServerSession,
};

use crate::chat;
use crate::config::HostConfig;

/// Runs a session: admits players, relays their messages to everyone else and keeps
/// the advertised player count current.
pub struct GameHost {
    server: ServerSession,
    config: HostConfig,
    params: GameParams,
    requests: Rc<RefCell<VecDeque<ConnectionRequest>>>,
    last_tick_time: Instant,
}

impl GameHost {
    pub fn new(config: HostConfig) -> Result<Self> {
        let mut server = ServerSession::new(&config.game, config.server_config())?;

        let requests: Rc<RefCell<VecDeque<ConnectionRequest>>> = Rc::default();
        let queue = Rc::clone(&requests);
        server
            .start_server(config.port, move |request: &ConnectionRequest| {
                queue.borrow_mut().push_back(request.clone());
                Admission::Pending
            })
            .with_context(|| format!("failed to start server on port {}", config.port))?;

        let params = GameParams {
            game_mode: 1,
            game_state: 1,
            num_players: 0,
            max_players: config.max_players,
            extra: [0; 12],
        };
        server.start_advertising(&config.session, params)?;

        Ok(Self {
            server,
            config,
            params,
            requests,
            last_tick_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn run(&mut self) {
        let started = Instant::now();
        while !self.config.run_for.is_some_and(|limit| started.elapsed() >= limit) {
            self.tick_once();
            std::thread::sleep(self.config.tick_duration());
        }
        self.server.shutdown_server();
        self.log_events();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.step(delta);
    }

    fn step(&mut self, delta: Duration) {
        self.server.tick(delta);
        self.process_admissions();
        self.relay_messages();
        self.refresh_advertisement();
        self.log_events();
    }

    fn process_admissions(&mut self) {
        let pending: Vec<ConnectionRequest> = self.requests.borrow_mut().drain(..).collect();
        for request in pending {
            if self.server.peek_player(request.address).is_some() {
                continue;
            }
            if request.password != self.config.password {
                log::warn!("Wrong password from {}, blocking", request.address);
                if let Err(e) = self.server.block_address(request.address) {
                    log::error!("Could not block {}: {}", request.address, e);
                }
                continue;
            }
            if self.server.num_players() >= self.config.max_players as usize {
                log::info!("Session full, '{}' has to wait", request.player_name);
                continue;
            }
            if let Err(e) = self.server.add_player(&request.player_name, request.address, 0) {
                log::warn!("Could not admit '{}': {}", request.player_name, e);
            }
        }
    }

    fn relay_messages(&mut self) {
        let ids: Vec<PlayerId> = self.server.players().map(|p| p.id()).collect();
        for id in ids {
            let mut messages = Vec::new();
            if let Some(player) = self.server.player_mut(id) {
                while let Some(message) = player.channel_mut().consume_front() {
                    messages.push(message);
                }
            }
            for message in messages {
                if chat::is_chat(&message) {
                    self.server.send_to_all(&message, Some(id));
                } else {
                    log::debug!("Player {} sent a non-chat message, not relayed", id);
                }
            }
        }
    }

    fn refresh_advertisement(&mut self) {
        let num_players = u8::try_from(self.server.num_players()).unwrap_or(u8::MAX);
        if num_players != self.params.num_players {
            self.params.num_players = num_players;
            self.server.set_advertising_parameters(self.params);
        }
    }

    fn log_events(&mut self) {
        for event in self.server.drain_events() {
            match event {
                ServerEvent::ConnectionRequested {
                    address,
                    player_name,
                } => {
                    log::debug!("Connection request from '{}' at {}", player_name, address);
                }
                ServerEvent::PlayerJoined {
                    player_id,
                    address,
                    name,
                } => {
                    log::info!("Player {} '{}' joined from {}", player_id, name, address);
                }
                ServerEvent::PlayerLeft { player_id, reason } => {
                    log::info!("Player {} {}", player_id, reason.as_str());
                }
                ServerEvent::ConnectionBlocked { address } => {
                    log::warn!("Connection from {} blocked", address);
                }
                ServerEvent::Error { message } => {
                    log::error!("{}", message);
                }
            }
        }
    }
}
