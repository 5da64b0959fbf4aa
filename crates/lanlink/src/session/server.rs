use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;
use std::time::Duration;

use crate::net::control::{C2S_CONNECT, C2S_DISCONNECT};
use crate::net::{
    Address, Advertisement, Channel, ConnectRequest, FrameHeader, GameParams,
    MAX_ADVERTISEMENT_SIZE, MAX_DATAGRAM_SIZE, NetError, PlayerId, ServerControl,
    SocketHandle, WireReader, bind_broadcast, is_reserved, parse_datagram, recv_datagram,
    send_datagram, validate_name,
};

use super::config::ServerConfig;
use super::events::{DisconnectReason, ServerEvent};
use super::listener::{Admission, AdmissionFilter, ConnectionRequest};

// keeps each PlayerInfo message well under the message size limit
const PLAYER_INFO_BATCH: usize = 24;

#[derive(Debug)]
pub struct Player {
    id: PlayerId,
    name: String,
    cookie: u64,
    channel: Channel,
}

impl Player {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.channel.target()
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut Channel {
        &mut self.channel
    }
}

struct Advertising {
    session_name: String,
    params: GameParams,
    next_at: Duration,
}

struct Serving {
    socket: Rc<UdpSocket>,
    port: u16,
    filter: Box<dyn AdmissionFilter>,
    players: BTreeMap<Address, Player>,
    addresses: HashMap<PlayerId, Address>,
    blocklist: BTreeSet<Address>,
    advertising: Option<Advertising>,
}

pub struct ServerSession {
    game_name: String,
    config: ServerConfig,
    time: Duration,
    serving: Option<Serving>,
    next_player_id: PlayerId,
    pending_events: VecDeque<ServerEvent>,
    cursor: Cell<Option<(usize, Address)>>,
    ignored: u64,
}

impl ServerSession {
    pub fn new(game_name: &str, config: ServerConfig) -> Result<Self, NetError> {
        validate_name("game name", game_name, false)?;
        Ok(Self {
            game_name: game_name.to_owned(),
            config,
            time: Duration::ZERO,
            serving: None,
            next_player_id: 1,
            pending_events: VecDeque::new(),
            cursor: Cell::new(None),
            ignored: 0,
        })
    }

    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    pub fn accumulated_time(&self) -> Duration {
        self.time
    }

    pub fn is_serving(&self) -> bool {
        self.serving.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().and_then(|s| s.socket.local_addr().ok())
    }

    pub fn ignored_datagrams(&self) -> u64 {
        self.ignored
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Binds the shared socket and starts accepting players. A running server is shut
    /// down first.
    pub fn start_server(
        &mut self,
        port: u16,
        filter: impl AdmissionFilter + 'static,
    ) -> Result<(), NetError> {
        self.shutdown_server();

        let socket = bind_broadcast(port)?;
        let port = socket.local_addr()?.port();
        log::info!("Server for '{}' listening on port {}", self.game_name, port);

        self.serving = Some(Serving {
            socket: Rc::new(socket),
            port,
            filter: Box::new(filter),
            players: BTreeMap::new(),
            addresses: HashMap::new(),
            blocklist: BTreeSet::new(),
            advertising: None,
        });
        Ok(())
    }

    /// Stops serving immediately. Queued data is discarded and every player is released.
    pub fn shutdown_server(&mut self) {
        let Some(mut serving) = self.serving.take() else {
            return;
        };

        for player in serving.players.values_mut() {
            if let Ok(notice) = ServerControl::Disconnected(vec![player.id]).encode() {
                player.channel.send_final(&notice);
            }
            player.channel.detach();
            self.pending_events.push_back(ServerEvent::PlayerLeft {
                player_id: player.id,
                reason: DisconnectReason::Shutdown,
            });
        }
        self.cursor.set(None);
        log::info!(
            "Server on port {} shut down, released {} players",
            serving.port,
            serving.players.len()
        );
    }

    pub fn start_advertising(&mut self, session_name: &str, params: GameParams) -> Result<(), NetError> {
        validate_name("session name", session_name, false)?;
        let serving = self.serving.as_mut().ok_or(NetError::NotServing)?;
        log::info!("Advertising session '{}'", session_name);
        serving.advertising = Some(Advertising {
            session_name: session_name.to_owned(),
            params,
            next_at: self.time,
        });
        Ok(())
    }

    pub fn set_advertising_parameters(&mut self, params: GameParams) {
        if let Some(advertising) = self.serving.as_mut().and_then(|s| s.advertising.as_mut()) {
            advertising.params = params;
        }
    }

    pub fn stop_advertising(&mut self) {
        if let Some(serving) = self.serving.as_mut() {
            serving.advertising = None;
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.serving.as_ref().is_some_and(|s| s.advertising.is_some())
    }

    /// Ignores every future datagram from `address` that does not belong to a player.
    pub fn block_address(&mut self, address: Address) -> Result<(), NetError> {
        let serving = self.serving.as_mut().ok_or(NetError::NotServing)?;
        if serving.blocklist.insert(address) {
            log::info!("Blocked {}", address);
        }
        Ok(())
    }

    pub fn is_blocked(&self, address: Address) -> bool {
        self.serving
            .as_ref()
            .is_some_and(|s| s.blocklist.contains(&address))
    }

    /// Admits a player and sends the confirmation right away.
    pub fn add_player(&mut self, name: &str, address: Address, cookie: u64) -> Result<PlayerId, NetError> {
        validate_name("player name", name, false)?;
        let serving = self.serving.as_mut().ok_or(NetError::NotServing)?;
        if !address.is_connectable() {
            return Err(NetError::InvalidAddress(address));
        }
        if serving.players.contains_key(&address) {
            return Err(NetError::AddressInUse(address));
        }

        let id = self.next_player_id;
        let mut channel = Channel::new(address, SocketHandle::Shared(Rc::downgrade(&serving.socket)));
        channel.set_loss_simulation(self.config.loss_simulation.clone());
        channel.set_time(self.time);
        channel.enqueue(&ServerControl::Connected(id).encode()?)?;

        let roster: Vec<(PlayerId, String)> = serving
            .players
            .values()
            .map(|p| (p.id, p.name.clone()))
            .collect();
        for batch in roster.chunks(PLAYER_INFO_BATCH) {
            channel.enqueue(&ServerControl::PlayerInfo(batch.to_vec()).encode()?)?;
        }
        channel.flush();

        let announcement = ServerControl::PlayerInfo(vec![(id, name.to_owned())]).encode()?;
        for other in serving.players.values_mut() {
            if let Err(e) = other.channel.enqueue(&announcement) {
                log::warn!("Could not announce player {} to {}: {}", id, other.id, e);
            }
        }

        serving.players.insert(
            address,
            Player {
                id,
                name: name.to_owned(),
                cookie,
                channel,
            },
        );
        serving.addresses.insert(id, address);
        self.next_player_id += 1;
        self.cursor.set(None);

        log::info!("Player {} '{}' joined from {}", id, name, address);
        self.pending_events.push_back(ServerEvent::PlayerJoined {
            player_id: id,
            address,
            name: name.to_owned(),
        });
        Ok(id)
    }

    /// Disconnects a player, telling it and everyone else. Returns false for unknown ids.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        self.drop_player(id, DisconnectReason::Kicked)
    }

    pub fn num_players(&self) -> usize {
        self.serving.as_ref().map_or(0, |s| s.players.len())
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.serving.iter().flat_map(|s| s.players.values())
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        let serving = self.serving.as_ref()?;
        serving.players.get(serving.addresses.get(&id)?)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        let serving = self.serving.as_mut()?;
        let address = *serving.addresses.get(&id)?;
        serving.players.get_mut(&address)
    }

    pub fn peek_player(&self, address: Address) -> Option<&Player> {
        self.serving.as_ref()?.players.get(&address)
    }

    /// The player at `index` in address order. Walking indices upwards is cheap.
    pub fn peek_player_at(&self, index: usize) -> Option<&Player> {
        let players = &self.serving.as_ref()?.players;

        if let Some((cached_index, cached_address)) = self.cursor.get() {
            if cached_index <= index {
                if let Some((address, player)) = players.range(cached_address..).nth(index - cached_index) {
                    self.cursor.set(Some((index, *address)));
                    return Some(player);
                }
                return None;
            }
        }

        let (address, player) = players.iter().nth(index)?;
        self.cursor.set(Some((index, *address)));
        Some(player)
    }

    /// Queues `message` for every player but `exclude`. Returns how many accepted it.
    pub fn send_to_all(&mut self, message: &[u8], exclude: Option<PlayerId>) -> usize {
        let Some(serving) = self.serving.as_mut() else {
            return 0;
        };
        let mut accepted = 0;
        for player in serving.players.values_mut() {
            if Some(player.id) == exclude {
                continue;
            }
            match player.channel.enqueue(message) {
                Ok(()) => accepted += 1,
                Err(e) => log::debug!("Message to player {} not queued: {}", player.id, e),
            }
        }
        accepted
    }

    pub fn tick(&mut self, elapsed: Duration) {
        self.time += elapsed;
        let time = self.time;
        let Some(serving) = self.serving.as_mut() else {
            return;
        };
        for player in serving.players.values_mut() {
            player.channel.set_time(time);
        }

        self.advertise_if_due();

        if let Err(e) = self.process_network() {
            log::error!("Receive failed: {}", e);
            self.pending_events.push_back(ServerEvent::Error {
                message: e.to_string(),
            });
        }

        if let Some(serving) = self.serving.as_mut() {
            for player in serving.players.values_mut() {
                player.channel.write_outgoing();
            }
        }
    }

    fn advertise_if_due(&mut self) {
        let Some(serving) = self.serving.as_mut() else {
            return;
        };
        let Some(advertising) = serving.advertising.as_mut() else {
            return;
        };
        if self.time < advertising.next_at {
            return;
        }
        advertising.next_at = self.time + self.config.advertise_interval;

        let advertisement = Advertisement {
            game_name: self.game_name.clone(),
            params: advertising.params,
            session_name: advertising.session_name.clone(),
        };
        let mut buf = [0u8; MAX_ADVERTISEMENT_SIZE];
        let len = match advertisement.encode(&mut buf) {
            Ok(len) => len,
            Err(e) => {
                log::warn!("Could not encode advertisement: {}", e);
                return;
            }
        };
        let target = self
            .config
            .advertise_target
            .map(Address::from)
            .unwrap_or_else(|| Address::broadcast4(serving.port));
        if let Err(e) = send_datagram(&serving.socket, &buf[..len], target) {
            log::warn!("Advertisement to {} failed: {}", target, e);
        }
    }

    fn process_network(&mut self) -> Result<(), NetError> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let Some(serving) = self.serving.as_ref() else {
                return Ok(());
            };
            let Some((size, from)) = recv_datagram(&serving.socket, &mut buf)? else {
                return Ok(());
            };
            self.dispatch(from, &buf[..size]);
        }
    }

    fn dispatch(&mut self, from: Address, data: &[u8]) {
        let (header, payload) = match parse_datagram(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::trace!("Ignoring datagram from {}: {}", from, e);
                self.ignored += 1;
                return;
            }
        };
        let Some(serving) = self.serving.as_mut() else {
            return;
        };

        if serving.players.contains_key(&from) {
            self.dispatch_to_player(from, &header, payload);
            return;
        }
        if serving.blocklist.contains(&from) {
            log::trace!("Ignoring datagram from blocked {}", from);
            self.ignored += 1;
            return;
        }

        let request = match leading_connect_request(payload) {
            Some(request) if request.game_name == self.game_name => request,
            Some(request) => {
                log::debug!("Connect request from {} for other game '{}'", from, request.game_name);
                self.ignored += 1;
                return;
            }
            None => {
                log::debug!("Ignoring datagram from unknown {}", from);
                self.ignored += 1;
                return;
            }
        };

        self.pending_events.push_back(ServerEvent::ConnectionRequested {
            address: from,
            player_name: request.player_name.clone(),
        });
        let admission = serving.filter.consider_new_connection(&ConnectionRequest {
            address: from,
            player_name: request.player_name.clone(),
            password: request.password,
        });

        match admission {
            Admission::Accept { cookie } => match self.add_player(&request.player_name, from, cookie) {
                Ok(_) => {
                    if let Some(player) = self.serving.as_mut().and_then(|s| s.players.get_mut(&from)) {
                        player.channel.receive_datagram(&header, payload, |m| !is_reserved(m));
                    }
                }
                Err(e) => {
                    log::warn!("Could not admit {}: {}", from, e);
                    self.pending_events.push_back(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            },
            Admission::Pending => {
                log::debug!("Admission of {} deferred", from);
            }
            Admission::Block => {
                serving.blocklist.insert(from);
                log::info!("Blocked {} ('{}')", from, request.player_name);
                self.pending_events
                    .push_back(ServerEvent::ConnectionBlocked { address: from });
            }
        }
    }

    fn dispatch_to_player(&mut self, from: Address, header: &FrameHeader, payload: &[u8]) {
        let Some(player) = self.serving.as_mut().and_then(|s| s.players.get_mut(&from)) else {
            return;
        };

        let mut controls: Vec<u8> = Vec::new();
        player.channel.receive_datagram(header, payload, |message| {
            if is_reserved(message) {
                controls.push(message[0]);
                false
            } else {
                true
            }
        });

        let id = player.id;
        for control in controls {
            match control {
                C2S_CONNECT => {
                    // the client missed its confirmation or timed out
                    let confirmation = ServerControl::Connected(id).encode();
                    match confirmation.map_err(NetError::from).and_then(|c| player.channel.enqueue(&c)) {
                        Ok(()) => player.channel.flush(),
                        Err(e) => log::warn!("Could not confirm player {}: {}", id, e),
                    }
                }
                C2S_DISCONNECT => {
                    self.drop_player(id, DisconnectReason::Graceful);
                    return;
                }
                other => log::warn!("Unknown control message {:#04x} from player {}", other, id),
            }
        }
    }

    fn drop_player(&mut self, id: PlayerId, reason: DisconnectReason) -> bool {
        let Some(serving) = self.serving.as_mut() else {
            return false;
        };
        let Some(address) = serving.addresses.remove(&id) else {
            return false;
        };
        let Some(mut player) = serving.players.remove(&address) else {
            return false;
        };

        match ServerControl::Disconnected(vec![id]).encode() {
            Ok(notice) => {
                if reason != DisconnectReason::Graceful {
                    player.channel.send_final(&notice);
                }
                for other in serving.players.values_mut() {
                    if let Err(e) = other.channel.enqueue(&notice) {
                        log::warn!("Could not tell player {} about {}: {}", other.id, id, e);
                    }
                }
            }
            Err(e) => log::warn!("Could not encode disconnect notice: {}", e),
        }
        player.channel.detach();
        self.cursor.set(None);

        log::info!("Player {} '{}' {}", id, player.name, reason.as_str());
        self.pending_events.push_back(ServerEvent::PlayerLeft {
            player_id: id,
            reason,
        });
        true
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.shutdown_server();
    }
}

fn leading_connect_request(payload: &[u8]) -> Option<ConnectRequest> {
    let mut reader = WireReader::new(payload);
    let len = usize::try_from(reader.read_varint().ok()?).ok()?;
    let first = reader.read_bytes(len).ok()?;
    if first.first() != Some(&C2S_CONNECT) {
        return None;
    }
    ConnectRequest::decode(first).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::listener::AcceptAll;

    fn serving() -> ServerSession {
        let mut server = ServerSession::new("space", ServerConfig::default()).unwrap();
        server.start_server(0, AcceptAll).unwrap();
        server
    }

    #[test]
    fn test_requires_running_server() {
        let mut server = ServerSession::new("space", ServerConfig::default()).unwrap();
        assert!(matches!(
            server.add_player("Bob", Address::localhost(4000), 0),
            Err(NetError::NotServing)
        ));
        assert!(matches!(
            server.start_advertising("Alpha", GameParams::default()),
            Err(NetError::NotServing)
        ));
        assert_eq!(server.send_to_all(b"x", None), 0);
        assert!(server.peek_player_at(0).is_none());
    }

    #[test]
    fn test_add_player_assigns_increasing_ids() {
        let mut server = serving();
        let a = server.add_player("Al", Address::localhost(4001), 11).unwrap();
        let b = server.add_player("Bo", Address::localhost(4002), 22).unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(matches!(
            server.add_player("Cy", Address::localhost(4001), 0),
            Err(NetError::AddressInUse(_))
        ));

        assert!(server.remove_player(a));
        assert!(!server.remove_player(a));
        let c = server.add_player("Cy", Address::localhost(4001), 0).unwrap();
        assert_eq!(c, 3);
        assert_eq!(server.player(b).unwrap().cookie(), 22);

        let events: Vec<ServerEvent> = server.drain_events().collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[2],
            ServerEvent::PlayerLeft {
                player_id: 1,
                reason: DisconnectReason::Kicked
            }
        ));
    }

    #[test]
    fn test_peek_player_at_follows_address_order() {
        let mut server = serving();
        for port in [4005, 4003, 4004] {
            server.add_player("p", Address::localhost(port), 0).unwrap();
        }
        let ports: Vec<u16> = (0..3)
            .map(|i| server.peek_player_at(i).unwrap().address().port())
            .collect();
        assert_eq!(ports, vec![4003, 4004, 4005]);
        assert!(server.peek_player_at(3).is_none());

        // backwards after a forward walk falls back to a fresh scan
        assert_eq!(server.peek_player_at(1).unwrap().address().port(), 4004);
        assert_eq!(server.peek_player_at(0).unwrap().address().port(), 4003);

        let id = server.peek_player_at(1).unwrap().id();
        server.remove_player(id);
        assert_eq!(server.peek_player_at(1).unwrap().address().port(), 4005);
    }

    #[test]
    fn test_send_to_all_excludes_one_player() {
        let mut server = serving();
        let ids: Vec<PlayerId> = (0..3)
            .map(|i| server.add_player("p", Address::localhost(4100 + i), 0).unwrap())
            .collect();
        let before: Vec<usize> = ids
            .iter()
            .map(|id| server.player(*id).unwrap().channel().pending_outbound())
            .collect();

        assert_eq!(server.send_to_all(b"hello", Some(ids[0])), 2);

        let after: Vec<usize> = ids
            .iter()
            .map(|id| server.player(*id).unwrap().channel().pending_outbound())
            .collect();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[1] + 1);
        assert_eq!(after[2], before[2] + 1);
    }

    #[test]
    fn test_shutdown_detaches_channels() {
        let mut server = serving();
        let id = server.add_player("Al", Address::localhost(4200), 0).unwrap();
        server.block_address(Address::localhost(4201)).unwrap();
        server.shutdown_server();

        assert!(!server.is_serving());
        assert_eq!(server.num_players(), 0);
        assert!(server.player(id).is_none());
        assert!(!server.is_blocked(Address::localhost(4201)));
        assert!(server.drain_events().any(|e| matches!(
            e,
            ServerEvent::PlayerLeft {
                reason: DisconnectReason::Shutdown,
                ..
            }
        )));
    }

    #[test]
    fn test_leading_connect_request() {
        let request = ConnectRequest {
            game_name: String::from("space"),
            player_name: String::from("Bob"),
            password: String::new(),
        }
        .encode()
        .unwrap();
        let mut payload = vec![request.len() as u8];
        payload.extend_from_slice(&request);
        assert_eq!(leading_connect_request(&payload).unwrap().player_name, "Bob");

        assert!(leading_connect_request(&[2, b'h', b'i']).is_none());
        assert!(leading_connect_request(&[]).is_none());
        assert!(leading_connect_request(&payload[..5]).is_none());
    }
}
