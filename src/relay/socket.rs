//! UDP socket for one downstream route.
//!
//! The socket is connected to its destination so the kernel reports
//! ICMP port-unreachable back as `ConnectionRefused` on a later send.

use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket as StdUdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Outcome of a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Receiver not listening yet; drop this packet and keep going.
    Refused,
    /// Anything else stops the relay.
    Fatal,
}

impl WriteFailure {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionRefused => WriteFailure::Refused,
            _ => WriteFailure::Fatal,
        }
    }
}

/// Send-only UDP socket connected to a route destination.
pub struct RelaySocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    destination: SocketAddr,
}

impl RelaySocket {
    /// Bind an ephemeral local port and connect it to `destination`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(destination: SocketAddr) -> io::Result<Self> {
        let (domain, local): (Domain, SocketAddr) = match destination {
            SocketAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
            SocketAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&local.into())?;

        // Video bursts after a keyframe request can be large
        let _ = socket.set_send_buffer_size(1024 * 1024);

        socket.connect(&destination.into())?;
        socket.set_nonblocking(true)?;

        let socket: StdUdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        let socket = UdpSocket::from_std(socket)?;

        Ok(RelaySocket {
            socket,
            local_addr,
            destination,
        })
    }

    /// Send one datagram to the destination.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl std::fmt::Debug for RelaySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySocket")
            .field("local_addr", &self.local_addr)
            .field("destination", &self.destination)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_sends_to_destination() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let destination = receiver.local_addr().unwrap();

        let socket = RelaySocket::connect(destination).unwrap();
        assert_eq!(socket.destination(), destination);
        assert_ne!(socket.local_addr().port(), 0);

        socket.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_classify_write_errors() {
        let refused = io::Error::from(ErrorKind::ConnectionRefused);
        assert_eq!(WriteFailure::classify(&refused), WriteFailure::Refused);
        let other = io::Error::from(ErrorKind::PermissionDenied);
        assert_eq!(WriteFailure::classify(&other), WriteFailure::Fatal);
    }
}
