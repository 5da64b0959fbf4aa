use std::time::Duration;

use crate::net::{Address, PlayerId};

/// Notifications from a client session about its connection.
pub trait SessionListener {
    /// Called every tick while a connection exists, with the time since the last
    /// datagram from the server.
    fn on_progress(&mut self, _since_last_datagram: Duration) {}
    fn on_connected(&mut self, _player_id: PlayerId) {}
    fn on_time_out(&mut self) {}
    fn on_disconnected(&mut self) {}
    fn on_joined(&mut self, _player_id: PlayerId, _name: &str) {}
    fn on_left(&mut self, _player_id: PlayerId) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl SessionListener for NullListener {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub address: Address,
    pub player_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Add the player now; the cookie is stored with it.
    Accept { cookie: u64 },
    /// Decide later through `ServerSession::add_player`.
    Pending,
    /// Ignore this address from now on.
    Block,
}

pub trait AdmissionFilter {
    fn consider_new_connection(&mut self, request: &ConnectionRequest) -> Admission;
}

impl<F> AdmissionFilter for F
where
    F: FnMut(&ConnectionRequest) -> Admission,
{
    fn consider_new_connection(&mut self, request: &ConnectionRequest) -> Admission {
        self(request)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl AdmissionFilter for AcceptAll {
    fn consider_new_connection(&mut self, _request: &ConnectionRequest) -> Admission {
        Admission::Accept { cookie: 0 }
    }
}

/// Admits requests carrying the password and leaves the rest pending.
#[derive(Debug, Clone)]
pub struct RequirePassword {
    password: String,
}

impl RequirePassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl AdmissionFilter for RequirePassword {
    fn consider_new_connection(&mut self, request: &ConnectionRequest) -> Admission {
        if request.password == self.password {
            Admission::Accept { cookie: 0 }
        } else {
            log::info!("Wrong password from {}", request.address);
            Admission::Pending
        }
    }
}
