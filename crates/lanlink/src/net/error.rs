use std::io;

use super::address::Address;
use super::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },
    #[error("channel has no usable socket")]
    SocketDetached,
    #[error("address {0} cannot be used as a peer")]
    InvalidAddress(Address),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("server is not running")]
    NotServing,
    #[error("operation not allowed in the current state")]
    Busy,
    #[error("a player is already connected from {0}")]
    AddressInUse(Address),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),
}

pub(crate) fn validate_name(kind: &str, name: &str, allow_empty: bool) -> Result<(), NetError> {
    use super::protocol::MAX_NAME_LEN;

    if name.is_empty() && !allow_empty {
        return Err(NetError::InvalidName(format!("{kind} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NetError::InvalidName(format!(
            "{kind} is {} bytes, at most {MAX_NAME_LEN} allowed",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(NetError::InvalidName(format!("{kind} contains a NUL byte")));
    }
    Ok(())
}
