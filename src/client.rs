//! DHCP client exchange (DISCOVER → OFFER → REQUEST → ACK).
//!
//! The client drives one exchange at a time over any [`Transport`]. Each
//! phase sends its request up to `repeat_count` times, waiting for one
//! reply per attempt, and gives up without an error when nothing arrives.
//! Replies that belong to another transaction or another server end the
//! exchange the same way.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, random_mac};
use crate::error::Result;
use crate::message::{BOOTREQUEST, DhcpMessage, random_xid};
use crate::options::{DhcpOption, MessageType};
use crate::transport::{Transport, UdpTransport};

/// Progress of the client exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    DiscoverSent,
    OfferReceived,
    RequestSent,
    AckReceived,
    Failed,
}

pub struct DhcpClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    mac: MacAddr6,
    state: ClientState,
    xid: Option<u32>,
    server_identifier: Option<Ipv4Addr>,
}

impl DhcpClient<UdpTransport> {
    /// Binds the client port and builds a client on the broadcast transport.
    pub fn bind(config: ClientConfig) -> Result<Self> {
        let transport = UdpTransport::bind(config.listen_port, Some(config.timeout))?;
        Ok(Self::new(config, transport))
    }
}

impl<T: Transport> DhcpClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let mac = config.mac.unwrap_or_else(random_mac);
        Self {
            config,
            transport,
            mac,
            state: ClientState::Idle,
            xid: None,
            server_identifier: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn mac(&self) -> MacAddr6 {
        self.mac
    }

    /// Transaction id of the current exchange, once DISCOVER was sent.
    pub fn xid(&self) -> Option<u32> {
        self.xid
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs a full exchange and returns the ACK.
    pub async fn start(&mut self) -> Result<Option<DhcpMessage>> {
        self.state = ClientState::Idle;

        let Some(offer) = self.discover().await? else {
            return Ok(None);
        };

        self.request(&offer).await
    }

    /// Broadcasts DISCOVER under a fresh transaction id and returns the
    /// first OFFER for it.
    pub async fn discover(&mut self) -> Result<Option<DhcpMessage>> {
        let xid = random_xid();
        self.xid = Some(xid);
        self.server_identifier = None;

        let message = self
            .base_message(xid)
            .with_option(DhcpOption::MessageType(MessageType::Discover));

        info!("Sending DHCPDISCOVER from {} (xid {:#010x})", self.mac, xid);
        self.state = ClientState::DiscoverSent;

        let Some(reply) = self.exchange(&message).await? else {
            return Ok(self.fail());
        };

        if reply.xid != xid {
            debug!(
                "Ignoring reply with transaction id {:#010x}, expected {:#010x}",
                reply.xid, xid
            );
            return Ok(self.fail());
        }

        if reply.message_type() != Some(MessageType::Offer) {
            debug!("Expected DHCPOFFER, got {:?}", reply.message_type());
            return Ok(self.fail());
        }

        info!(
            "Received DHCPOFFER of {} from {:?}",
            reply.yiaddr,
            reply.server_identifier()
        );
        self.state = ClientState::OfferReceived;
        Ok(Some(reply))
    }

    /// Requests the address from `offer` and returns the server's ACK.
    ///
    /// The offer must answer this client's last DISCOVER: its transaction id
    /// has to match [`xid`](Self::xid).
    pub async fn request(&mut self, offer: &DhcpMessage) -> Result<Option<DhcpMessage>> {
        let Some(xid) = self.xid.filter(|xid| *xid == offer.xid) else {
            warn!(
                "Offer with transaction id {:#010x} does not answer our DISCOVER",
                offer.xid
            );
            return Ok(self.fail());
        };

        let Some(server_identifier) = offer.server_identifier() else {
            warn!("Offer of {} carries no server identifier", offer.yiaddr);
            return Ok(self.fail());
        };

        self.server_identifier = Some(server_identifier);

        let message = self
            .base_message(xid)
            .with_option(DhcpOption::MessageType(MessageType::Request))
            .with_option(DhcpOption::RequestedIpAddress(offer.yiaddr))
            .with_option(DhcpOption::ServerIdentifier(server_identifier));

        info!(
            "Sending DHCPREQUEST for {} to {}",
            offer.yiaddr, server_identifier
        );
        self.state = ClientState::RequestSent;

        let Some(reply) = self.exchange(&message).await? else {
            return Ok(self.fail());
        };

        if reply.xid != xid {
            debug!(
                "Ignoring reply with transaction id {:#010x}, expected {:#010x}",
                reply.xid, xid
            );
            return Ok(self.fail());
        }

        if reply.server_identifier() != Some(server_identifier) {
            debug!(
                "Reply from server {:?}, expected {}",
                reply.server_identifier(),
                server_identifier
            );
            return Ok(self.fail());
        }

        if reply.message_type() != Some(MessageType::Ack) {
            debug!("Expected DHCPACK, got {:?}", reply.message_type());
            return Ok(self.fail());
        }

        info!(
            "Received DHCPACK for {} (lease {:?}s)",
            reply.yiaddr,
            reply.lease_time()
        );
        self.state = ClientState::AckReceived;
        Ok(Some(reply))
    }

    fn base_message(&self, xid: u32) -> DhcpMessage {
        DhcpMessage::new(BOOTREQUEST)
            .with_xid(xid)
            .with_chaddr(self.mac.as_bytes())
            .with_options(self.config.options.iter().cloned())
    }

    /// Sends `message` until a datagram comes back or the attempts run out.
    async fn exchange(&mut self, message: &DhcpMessage) -> Result<Option<DhcpMessage>> {
        let payload = message.encode();
        let attempts = self.config.repeat_count;

        for attempt in 1..=attempts {
            if let Err(error) = self.transport.send(&payload, self.config.server_port).await {
                self.state = ClientState::Failed;
                return Err(error);
            }

            let received = match self.transport.receive().await {
                Ok(received) => received,
                Err(error) => {
                    self.state = ClientState::Failed;
                    return Err(error);
                }
            };

            match received {
                Some((data, source)) => {
                    debug!("Received {} bytes from {}", data.len(), source);
                    return match DhcpMessage::parse(&data) {
                        Ok(reply) => Ok(Some(reply)),
                        Err(error) => {
                            self.state = ClientState::Failed;
                            Err(error)
                        }
                    };
                }
                None => debug!("No reply to attempt {}/{}", attempt, attempts),
            }
        }

        warn!("No server responded after {} attempts", attempts);
        Ok(None)
    }

    fn fail(&mut self) -> Option<DhcpMessage> {
        self.state = ClientState::Failed;
        None
    }
}
