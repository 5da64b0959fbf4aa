use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use super::address::Address;

/// Binds a non-blocking socket on every interface that may send and receive
/// broadcasts and that shares its port with other sockets on the same host.
pub fn bind_broadcast(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Binds a non-blocking socket on an ephemeral port, used for point-to-point links.
pub fn bind_ephemeral() -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Receives one datagram if one is available. `Ok(None)` means the socket is drained.
pub fn recv_datagram(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Option<(usize, Address)>> {
    match socket.recv_from(buf) {
        Ok((size, from)) => Ok(Some((size, Address::from(from)))),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        // ICMP port-unreachable from an earlier send surfaces here on some platforms
        Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => {
            log::debug!("Ignoring connection reset on datagram socket");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn send_datagram(socket: &UdpSocket, data: &[u8], to: Address) -> io::Result<usize> {
    socket.send_to(data, to.socket_addr())
}
