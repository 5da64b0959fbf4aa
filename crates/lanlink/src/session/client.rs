use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::time::Duration;

use crate::net::control::encode_client_disconnect;
use crate::net::{
    Address, Advertisement, Channel, ConnectRequest, DiscoveredGame, DiscoveryList,
    MAX_DATAGRAM_SIZE, NetError, PlayerId, ServerControl, SocketHandle, bind_broadcast,
    bind_ephemeral, is_reserved, parse_datagram, recv_datagram, validate_name,
};

use super::config::ClientConfig;
use super::listener::SessionListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Scanning,
    /// Waiting for the server to confirm a player id.
    Connecting,
    Connected,
    /// Confirmed once, then silent for too long. Still trying to reach the server.
    TimedOut,
}

struct Connection {
    channel: Channel,
    listener: Box<dyn SessionListener>,
    request: ConnectRequest,
    player_id: Option<PlayerId>,
    players: BTreeMap<PlayerId, String>,
    last_datagram: Duration,
    timed_out: bool,
}

enum ControlOutcome {
    Continue,
    Removed,
}

impl Connection {
    fn handle_control(&mut self, message: &[u8]) -> Result<ControlOutcome, NetError> {
        let control = match ServerControl::decode(message) {
            Ok(control) => control,
            Err(e) => {
                log::warn!("Dropping malformed control message from server: {}", e);
                return Ok(ControlOutcome::Continue);
            }
        };

        match control {
            ServerControl::Connected(id) => match self.player_id {
                None => {
                    log::info!("Connected to {} as player {}", self.channel.target(), id);
                    self.player_id = Some(id);
                    self.timed_out = false;
                    self.listener.on_connected(id);
                }
                Some(current) if current == id => {}
                Some(current) => {
                    log::error!("Server confirmed player id {} while connected as {}", id, current);
                    return Err(NetError::ProtocolViolation(format!(
                        "confirmation for player {id} while connected as {current}"
                    )));
                }
            },
            ServerControl::Disconnected(ids) => {
                for id in ids {
                    if self.player_id == Some(id) {
                        return Ok(ControlOutcome::Removed);
                    }
                    if self.players.remove(&id).is_some() {
                        self.listener.on_left(id);
                    }
                }
            }
            ServerControl::PlayerInfo(players) => {
                for (id, name) in players {
                    if self.players.insert(id, name.clone()).is_none() {
                        self.listener.on_joined(id, &name);
                    }
                }
            }
        }
        Ok(ControlOutcome::Continue)
    }
}

enum Mode {
    Idle,
    Scanning { socket: UdpSocket },
    Connection(Box<Connection>),
}

pub struct ClientSession {
    game_name: String,
    config: ClientConfig,
    time: Duration,
    mode: Mode,
    games: DiscoveryList,
    ignored: u64,
}

impl ClientSession {
    pub fn new(game_name: &str, config: ClientConfig) -> Result<Self, NetError> {
        validate_name("game name", game_name, false)?;
        Ok(Self {
            game_name: game_name.to_owned(),
            config,
            time: Duration::ZERO,
            mode: Mode::Idle,
            games: DiscoveryList::new(),
            ignored: 0,
        })
    }

    pub fn game_name(&self) -> &str {
        &self.game_name
    }

    pub fn state(&self) -> ClientState {
        match &self.mode {
            Mode::Idle => ClientState::Idle,
            Mode::Scanning { .. } => ClientState::Scanning,
            Mode::Connection(conn) if conn.player_id.is_some() => ClientState::Connected,
            Mode::Connection(conn) if conn.timed_out => ClientState::TimedOut,
            Mode::Connection(_) => ClientState::Connecting,
        }
    }

    pub fn accumulated_time(&self) -> Duration {
        self.time
    }

    pub fn ignored_datagrams(&self) -> u64 {
        self.ignored
    }

    pub fn start_scanning(&mut self, port: u16) -> Result<(), NetError> {
        if matches!(self.mode, Mode::Connection(_)) {
            return Err(NetError::Busy);
        }
        self.stop_scanning();
        let socket = bind_broadcast(port)?;
        log::info!("Scanning for '{}' games on port {}", self.game_name, port);
        self.mode = Mode::Scanning { socket };
        Ok(())
    }

    pub fn stop_scanning(&mut self) {
        if matches!(self.mode, Mode::Scanning { .. }) {
            log::debug!("Scanning stopped");
            self.mode = Mode::Idle;
        }
        self.games.clear();
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.mode, Mode::Scanning { .. })
    }

    pub fn possible_games(&self) -> &DiscoveryList {
        &self.games
    }

    pub fn possible_game(&self, index: usize) -> Option<&DiscoveredGame> {
        self.games.get(index)
    }

    pub fn num_possible_games(&self) -> usize {
        self.games.len()
    }

    /// Opens a connection to a server. Any previous connection is dropped first.
    pub fn connect_to_game(
        &mut self,
        address: Address,
        listener: Box<dyn SessionListener>,
        player_name: &str,
        password: &str,
    ) -> Result<(), NetError> {
        if !address.is_connectable() || !address.is_ipv4() {
            return Err(NetError::InvalidAddress(address));
        }
        validate_name("player name", player_name, false)?;
        validate_name("password", password, true)?;

        self.stop_scanning();
        self.disconnect_from_game();

        let mut channel = Channel::new(address, SocketHandle::Owned(bind_ephemeral()?));
        channel.set_loss_simulation(self.config.loss_simulation.clone());
        channel.set_time(self.time);

        log::info!("Connecting to {} as '{}'", address, player_name);
        self.mode = Mode::Connection(Box::new(Connection {
            channel,
            listener,
            request: ConnectRequest {
                game_name: self.game_name.clone(),
                player_name: player_name.to_owned(),
                password: password.to_owned(),
            },
            player_id: None,
            players: BTreeMap::new(),
            last_datagram: self.time,
            timed_out: false,
        }));
        Ok(())
    }

    /// Drops the connection, telling the server on a best-effort basis.
    pub fn disconnect_from_game(&mut self) {
        if let Mode::Connection(conn) = &mut self.mode {
            conn.channel.send_final(&encode_client_disconnect());
            log::info!("Disconnected from {}", conn.channel.target());
        }
        self.teardown();
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.mode, Mode::Connection(_))
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.connection().and_then(|conn| conn.player_id)
    }

    /// Other players on the server, as announced by it.
    pub fn players(&self) -> impl Iterator<Item = (PlayerId, &str)> {
        self.connection()
            .into_iter()
            .flat_map(|conn| conn.players.iter().map(|(id, name)| (*id, name.as_str())))
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.connection().map(|conn| &conn.channel)
    }

    pub fn channel_mut(&mut self) -> Option<&mut Channel> {
        match &mut self.mode {
            Mode::Connection(conn) => Some(&mut conn.channel),
            _ => None,
        }
    }

    pub fn tick(&mut self, elapsed: Duration) -> Result<(), NetError> {
        self.time += elapsed;
        match self.mode {
            Mode::Idle => Ok(()),
            Mode::Scanning { .. } => self.tick_scanning(),
            Mode::Connection(_) => self.tick_connection(),
        }
    }

    fn connection(&self) -> Option<&Connection> {
        match &self.mode {
            Mode::Connection(conn) => Some(conn.as_ref()),
            _ => None,
        }
    }

    fn teardown(&mut self) {
        if let Mode::Connection(mut conn) = std::mem::replace(&mut self.mode, Mode::Idle) {
            conn.listener.on_disconnected();
        }
    }

    fn tick_scanning(&mut self) -> Result<(), NetError> {
        let Mode::Scanning { socket } = &self.mode else {
            return Ok(());
        };

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        while let Some((size, from)) = recv_datagram(socket, &mut buf)? {
            match Advertisement::decode(&buf[..size]) {
                Ok(ad) if ad.game_name == self.game_name => self.games.upsert(
                    DiscoveredGame {
                        address: from,
                        params: ad.params,
                        session_name: ad.session_name,
                    },
                    self.time,
                ),
                Ok(ad) => {
                    log::trace!("Ignoring advertisement for '{}' from {}", ad.game_name, from);
                    self.ignored += 1;
                }
                Err(e) => {
                    log::debug!("Ignoring datagram from {} while scanning: {}", from, e);
                    self.ignored += 1;
                }
            }
        }

        self.games.purge(self.time, self.config.scan_timeout);
        Ok(())
    }

    fn tick_connection(&mut self) -> Result<(), NetError> {
        let time = self.time;
        let timeout = self.config.disconnect_timeout;
        let Mode::Connection(conn) = &mut self.mode else {
            return Ok(());
        };
        conn.channel.set_time(time);

        let mut controls: Vec<Vec<u8>> = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        while let Some((size, from)) = conn.channel.recv_from(&mut buf)? {
            if from != conn.channel.target() {
                log::debug!("Ignoring datagram from stranger {}", from);
                self.ignored += 1;
                continue;
            }
            let (header, payload) = match parse_datagram(&buf[..size]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::debug!("Ignoring datagram from {}: {}", from, e);
                    self.ignored += 1;
                    continue;
                }
            };
            conn.last_datagram = time;
            conn.channel.receive_datagram(&header, payload, |message| {
                if is_reserved(message) {
                    controls.push(message.to_vec());
                    false
                } else {
                    true
                }
            });
        }

        let silence = time.saturating_sub(conn.last_datagram);
        conn.listener.on_progress(silence);

        for message in &controls {
            match conn.handle_control(message) {
                Ok(ControlOutcome::Continue) => {}
                Ok(ControlOutcome::Removed) => {
                    log::info!("Removed from the game by {}", conn.channel.target());
                    self.teardown();
                    return Ok(());
                }
                Err(e) => {
                    self.teardown();
                    return Err(e);
                }
            }
        }

        if conn.player_id.is_some() && silence >= timeout {
            log::warn!(
                "No data from {} for {:.1}s, connection timed out",
                conn.channel.target(),
                silence.as_secs_f32()
            );
            conn.player_id = None;
            conn.timed_out = true;
            conn.listener.on_time_out();
        }

        if conn.player_id.is_none() && conn.channel.pending_outbound() == 0 {
            let request = conn.request.encode()?;
            conn.channel.enqueue(&request)?;
        }

        conn.channel.write_outgoing();
        Ok(())
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect_from_game();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Note {
        Connected(PlayerId),
        Disconnected,
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Note>>>);

    impl SessionListener for Recorder {
        fn on_connected(&mut self, player_id: PlayerId) {
            self.0.borrow_mut().push(Note::Connected(player_id));
        }

        fn on_disconnected(&mut self) {
            self.0.borrow_mut().push(Note::Disconnected);
        }
    }

    fn client() -> ClientSession {
        ClientSession::new("space", ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_new_validates_game_name() {
        assert!(ClientSession::new("", ClientConfig::default()).is_err());
        assert!(ClientSession::new(&"g".repeat(32), ClientConfig::default()).is_err());
        assert_eq!(client().state(), ClientState::Idle);
    }

    #[test]
    fn test_connect_rejects_bad_arguments_without_state_change() {
        let mut session = client();
        let listener = || Box::new(Recorder::default()) as Box<dyn SessionListener>;

        let cases = [
            (Address::broadcast4(5000), "pilot", ""),
            ("0.0.0.0:5000".parse().unwrap(), "pilot", ""),
            (Address::localhost(0), "pilot", ""),
            (Address::localhost(5000), "", ""),
            (Address::localhost(5000), "pilot", "p\0w"),
        ];
        for (address, name, password) in cases {
            assert!(session.connect_to_game(address, listener(), name, password).is_err());
            assert_eq!(session.state(), ClientState::Idle);
        }
        let long_password = "p".repeat(32);
        assert!(
            session
                .connect_to_game(Address::localhost(5000), listener(), "pilot", &long_password)
                .is_err()
        );
        assert_eq!(session.state(), ClientState::Idle);
    }

    #[test]
    fn test_connection_change_notifies_previous_listener() {
        let mut session = client();
        let first = Recorder::default();
        session
            .connect_to_game(Address::localhost(5001), Box::new(first.clone()), "pilot", "")
            .unwrap();
        assert_eq!(session.state(), ClientState::Connecting);
        assert!(matches!(session.start_scanning(0), Err(NetError::Busy)));

        session
            .connect_to_game(Address::localhost(5002), Box::new(Recorder::default()), "pilot", "")
            .unwrap();
        assert_eq!(*first.0.borrow(), vec![Note::Disconnected]);
        assert_eq!(session.channel().unwrap().target(), Address::localhost(5002));

        session.disconnect_from_game();
        assert_eq!(session.state(), ClientState::Idle);
        assert!(session.channel().is_none());
    }

    #[test]
    fn test_tick_sends_connect_request() {
        let mut session = client();
        session
            .connect_to_game(Address::localhost(5003), Box::new(Recorder::default()), "pilot", "")
            .unwrap();
        session.tick(Duration::from_millis(250)).unwrap();
        let stats = session.channel().unwrap().statistics();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.datagrams_sent, 1);
    }

    #[test]
    fn test_confirmation_and_removal() {
        let recorder = Recorder::default();
        let mut conn = Connection {
            channel: Channel::new(Address::localhost(5004), SocketHandle::Detached),
            listener: Box::new(recorder.clone()),
            request: ConnectRequest {
                game_name: String::from("space"),
                player_name: String::from("pilot"),
                password: String::new(),
            },
            player_id: None,
            players: BTreeMap::new(),
            last_datagram: Duration::ZERO,
            timed_out: false,
        };

        let connected = ServerControl::Connected(4).encode().unwrap();
        assert!(matches!(conn.handle_control(&connected), Ok(ControlOutcome::Continue)));
        assert!(matches!(conn.handle_control(&connected), Ok(ControlOutcome::Continue)));
        assert_eq!(*recorder.0.borrow(), vec![Note::Connected(4)]);

        let other = ServerControl::Connected(5).encode().unwrap();
        assert!(matches!(
            conn.handle_control(&other),
            Err(NetError::ProtocolViolation(_))
        ));

        let info = ServerControl::PlayerInfo(vec![(1, String::from("Al"))]).encode().unwrap();
        conn.handle_control(&info).unwrap();
        assert_eq!(conn.players.get(&1).map(String::as_str), Some("Al"));

        let gone = ServerControl::Disconnected(vec![1, 4]).encode().unwrap();
        assert!(matches!(conn.handle_control(&gone), Ok(ControlOutcome::Removed)));
        assert!(conn.players.is_empty());
    }
}
