//! Datagram transport used by the client and the server.
//!
//! The protocol logic only ever talks to a [`Transport`]; [`UdpTransport`]
//! is the broadcast UDP implementation used by the binary, and tests plug in
//! in-memory implementations.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Error, Result};

/// Well-known DHCP server port.
pub const DHCP_SERVER_PORT: u16 = 67;

/// Well-known DHCP client port.
pub const DHCP_CLIENT_PORT: u16 = 68;

const RECV_BUFFER_SIZE: usize = 1500;

/// A datagram transport.
pub trait Transport {
    /// Sends `data` to `port` on the transport's destination.
    fn send(&mut self, data: &[u8], port: u16) -> impl Future<Output = Result<()>> + Send;

    /// Waits for the next datagram.
    ///
    /// Returns `Ok(None)` when the transport's receive timeout elapsed
    /// without a datagram. A zero-length datagram is `Ok(Some(..))`.
    fn receive(&mut self) -> impl Future<Output = Result<Option<(Vec<u8>, SocketAddr)>>> + Send;
}

/// Broadcast UDP socket bound to `0.0.0.0:port`.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    destination: Ipv4Addr,
    timeout: Option<Duration>,
}

impl UdpTransport {
    /// Binds a broadcast-capable socket on `port`.
    ///
    /// With `timeout` set, [`receive`](Transport::receive) gives up after
    /// that long; otherwise it waits indefinitely.
    pub fn bind(port: u16, timeout: Option<Duration>) -> Result<Self> {
        let socket = create_socket(port)?;
        debug!("Bound UDP transport on 0.0.0.0:{}", port);
        Ok(Self {
            socket,
            destination: Ipv4Addr::BROADCAST,
            timeout,
        })
    }

    /// Sends to `destination` instead of the limited broadcast address.
    pub fn with_destination(mut self, destination: Ipv4Addr) -> Self {
        self.destination = destination;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

fn create_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

    socket
        .set_reuse_address(true)
        .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

    socket
        .set_broadcast(true)
        .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

    socket
        .set_nonblocking(true)
        .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&bind_addr.into())
        .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

    let std_socket: std::net::UdpSocket = socket.into();
    let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
        Error::Socket(format!("Failed to convert to tokio socket: {}", error))
    })?;

    Ok(tokio_socket)
}

impl Transport for UdpTransport {
    async fn send(&mut self, data: &[u8], port: u16) -> Result<()> {
        let target = SocketAddrV4::new(self.destination, port);
        let sent = self.socket.send_to(data, target).await?;
        debug!("Sent {} bytes to {}", sent, target);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        let (size, source) = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.socket.recv_from(&mut buffer)).await {
                    Ok(received) => received?,
                    Err(_) => return Ok(None),
                }
            }
            None => self.socket.recv_from(&mut buffer).await?,
        };

        Ok(Some((buffer[..size].to_vec(), source)))
    }
}
