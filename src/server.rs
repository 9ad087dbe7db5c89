//! DHCP server: message dispatch and the receive loop.
//!
//! [`Dispatcher`] is the synchronous core. It routes one decoded request
//! to the lease table and builds the reply, if any. [`DhcpServer`] wraps it
//! with a [`Transport`] and handles datagrams one at a time.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::lease::LeaseTable;
use crate::message::{BOOTREQUEST, DhcpMessage};
use crate::options::{DhcpOption, MessageType, SubOptionEncoding};
use crate::transport::{DHCP_SERVER_PORT, Transport, UdpTransport};

/// Routes requests by message type and builds replies.
#[derive(Debug)]
pub struct Dispatcher {
    config: Arc<ServerConfig>,
    reply_options: Vec<DhcpOption>,
}

impl Dispatcher {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let reply_options = build_reply_options(&config);
        Self {
            config,
            reply_options,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Options carried by every OFFER and ACK, after the message type.
    pub fn reply_options(&self) -> &[DhcpOption] {
        &self.reply_options
    }

    /// Handles one request at time `now` and returns the reply to send.
    ///
    /// The lease table is swept first so that expired offers and leases are
    /// back in the pool before the request is looked at.
    pub fn dispatch(
        &self,
        request: &DhcpMessage,
        leases: &mut LeaseTable,
        now: DateTime<Utc>,
    ) -> Option<DhcpMessage> {
        leases.sweep(now);

        if request.op != BOOTREQUEST {
            debug!("Ignoring message with op {} from {}", request.op, request.format_mac());
            return None;
        }

        let Some(message_type) = request.message_type() else {
            debug!("Ignoring message without type from {}", request.format_mac());
            return None;
        };

        info!("{} from {}", message_type, request.format_mac());

        match message_type {
            MessageType::Discover => self.handle_discover(request, leases, now),
            MessageType::Request => self.handle_request(request, leases, now),
            MessageType::Release => {
                self.handle_release(request, leases);
                None
            }
            MessageType::Decline => {
                self.handle_decline(request, leases);
                None
            }
            MessageType::Inform => {
                debug!("INFORM from {} needs no reply", request.format_mac());
                None
            }
            MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                warn!("Ignoring {} message", message_type);
                None
            }
        }
    }

    fn handle_discover(
        &self,
        request: &DhcpMessage,
        leases: &mut LeaseTable,
        now: DateTime<Utc>,
    ) -> Option<DhcpMessage> {
        let offered_ip = leases.offer(request.chaddr_bytes(), request.xid, now)?;

        info!("OFFER {} to {}", offered_ip, request.format_mac());
        Some(self.build_reply(request, MessageType::Offer, offered_ip))
    }

    fn handle_request(
        &self,
        request: &DhcpMessage,
        leases: &mut LeaseTable,
        now: DateTime<Utc>,
    ) -> Option<DhcpMessage> {
        if !self.is_addressed_to_us(request) {
            return None;
        }

        let Some(requested_ip) = request.requested_ip() else {
            debug!("REQUEST from {} without requested address", request.format_mac());
            return None;
        };

        leases.commit(requested_ip, request.chaddr_bytes(), request.xid, now)?;

        info!("ACK {} to {}", requested_ip, request.format_mac());
        Some(self.build_reply(request, MessageType::Ack, requested_ip))
    }

    fn handle_release(&self, request: &DhcpMessage, leases: &mut LeaseTable) {
        if !self.is_addressed_to_us(request) {
            return;
        }

        leases.release(request.ciaddr, request.chaddr_bytes());
    }

    fn handle_decline(&self, request: &DhcpMessage, leases: &mut LeaseTable) {
        if !self.is_addressed_to_us(request) {
            return;
        }

        match request.requested_ip() {
            Some(declined_ip) => {
                if leases.decline(declined_ip, request.chaddr_bytes()) {
                    warn!(
                        "DECLINE from {} for {} - marked IP as unavailable",
                        request.format_mac(),
                        declined_ip
                    );
                }
            }
            None => debug!("DECLINE from {} without address", request.format_mac()),
        }
    }

    fn is_addressed_to_us(&self, request: &DhcpMessage) -> bool {
        let server_id = request.server_identifier();
        if server_id == Some(self.config.identifier()) {
            return true;
        }

        info!(
            "{:?} from {} is for different server {:?}",
            request.message_type(),
            request.format_mac(),
            server_id
        );
        false
    }

    fn build_reply(
        &self,
        request: &DhcpMessage,
        message_type: MessageType,
        your_ip: Ipv4Addr,
    ) -> DhcpMessage {
        let mut options = self.reply_options.clone();
        if let Some(relay_info) = request.relay_agent_info() {
            options.push(DhcpOption::RelayAgentInfo(relay_info.clone()));
        }

        DhcpMessage::create_reply(request, message_type, your_ip, options)
    }
}

fn build_reply_options(config: &ServerConfig) -> Vec<DhcpOption> {
    let mut options = vec![
        DhcpOption::SubnetMask(config.subnet_mask()),
        DhcpOption::LeaseTime(config.lease_time()),
        DhcpOption::ServerIdentifier(config.identifier()),
    ];

    if !config.gateways().is_empty() {
        options.push(DhcpOption::Router(config.gateways().to_vec()));
    }

    if !config.dns().is_empty() {
        options.push(DhcpOption::DnsServer(config.dns().to_vec()));
    }

    if let Some(domain) = config.domain_name() {
        options.push(DhcpOption::DomainName(domain.to_string()));
    }

    options
}

/// A DHCP server bound to a transport.
pub struct DhcpServer<T: Transport> {
    dispatcher: Dispatcher,
    leases: Arc<Mutex<LeaseTable>>,
    transport: T,
    encoding: SubOptionEncoding,
}

impl DhcpServer<UdpTransport> {
    /// Binds the server port (67) on all interfaces.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let transport = UdpTransport::bind(DHCP_SERVER_PORT, None)?;
        Ok(Self::new(config, transport))
    }
}

impl<T: Transport> DhcpServer<T> {
    pub fn new(config: ServerConfig, transport: T) -> Self {
        let config = Arc::new(config);

        info!(
            "Network {} identifier {}",
            config.network(),
            config.identifier()
        );
        let (start, end) = config.addr_range();
        info!(
            "IP pool: {} - {} ({} addresses)",
            start,
            end,
            config.pool_size()
        );

        Self {
            dispatcher: Dispatcher::new(Arc::clone(&config)),
            leases: Arc::new(Mutex::new(LeaseTable::new(config))),
            transport,
            encoding: SubOptionEncoding::Binary,
        }
    }

    /// Decodes relay agent sub-options as `encoding` instead of raw bytes.
    pub fn with_sub_option_encoding(mut self, encoding: SubOptionEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        self.dispatcher.config()
    }

    pub fn leases(&self) -> Arc<Mutex<LeaseTable>> {
        Arc::clone(&self.leases)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Decodes and dispatches one datagram.
    pub async fn handle_datagram(
        &self,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<DhcpMessage>> {
        let request = DhcpMessage::parse_with(data, self.encoding)?;
        let mut leases = self.leases.lock().await;
        Ok(self.dispatcher.dispatch(&request, &mut leases, now))
    }

    /// Receives one datagram and answers it on the port it came from.
    ///
    /// Returns `Ok(false)` when the receive timed out. Malformed datagrams
    /// are logged and dropped; only transport errors are returned.
    pub async fn serve_once(&mut self) -> Result<bool> {
        let Some((data, source)) = self.transport.receive().await? else {
            return Ok(false);
        };

        let handled = self.handle_datagram(&data, Utc::now()).await;
        match handled {
            Ok(Some(reply)) => {
                self.transport.send(&reply.encode(), source.port()).await?;
            }
            Ok(None) => {}
            Err(error) => warn!("Error handling packet from {}: {}", source, error),
        }

        Ok(true)
    }

    /// Serves requests until the task is cancelled.
    pub async fn run(&mut self) -> Result<()> {
        info!("DHCP server ready and listening");

        loop {
            if let Err(error) = self.serve_once().await {
                error!("Error serving packet: {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSettings;
    use crate::lease::LeaseState;
    use crate::message::{BOOTREPLY, HLEN_ETHERNET, HTYPE_ETHERNET};
    use crate::options::{OptionCode, RelayAgentInfo, SubOptionValue};
    use chrono::{TimeDelta, TimeZone};
    use std::collections::VecDeque;
    use std::net::{SocketAddr, SocketAddrV4};

    const IDENTIFIER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0e];
    const OTHER_MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x0f];

    fn test_settings() -> ServerSettings {
        ServerSettings {
            network: "10.0.0.0/24".to_string(),
            addr_range: Some(vec![Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 20)]),
            dns: vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(8, 8, 8, 8)],
            gateways: vec![Ipv4Addr::new(10, 0, 0, 254)],
            domain_name: Some("lab.local".to_string()),
            lease_time: 3600,
            identifier: Some(IDENTIFIER),
        }
    }

    fn setup() -> (Dispatcher, LeaseTable) {
        let config = Arc::new(test_settings().validate().unwrap());
        (Dispatcher::new(Arc::clone(&config)), LeaseTable::new(config))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn create_dhcp_packet(
        message_type: MessageType,
        mac: [u8; 6],
        xid: u32,
        options: Vec<DhcpOption>,
    ) -> DhcpMessage {
        let message = DhcpMessage::new(BOOTREQUEST)
            .with_xid(xid)
            .with_chaddr(&mac)
            .with_option(DhcpOption::MessageType(message_type))
            .with_option(DhcpOption::Hostname("client".to_string()));

        options
            .into_iter()
            .fold(message, |message, option| message.with_option(option))
    }

    fn discover_and_request(
        dispatcher: &Dispatcher,
        leases: &mut LeaseTable,
        mac: [u8; 6],
        xid: u32,
    ) -> DhcpMessage {
        let discover = create_dhcp_packet(MessageType::Discover, mac, xid, vec![]);
        let offer = dispatcher.dispatch(&discover, leases, t0()).unwrap();

        let request = create_dhcp_packet(
            MessageType::Request,
            mac,
            xid,
            vec![
                DhcpOption::RequestedIpAddress(offer.yiaddr),
                DhcpOption::ServerIdentifier(IDENTIFIER),
            ],
        );
        dispatcher.dispatch(&request, leases, t0()).unwrap()
    }

    #[test]
    fn test_build_reply_options() {
        let (dispatcher, _) = setup();

        assert_eq!(
            dispatcher.reply_options(),
            &[
                DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)),
                DhcpOption::LeaseTime(3600),
                DhcpOption::ServerIdentifier(IDENTIFIER),
                DhcpOption::Router(vec![Ipv4Addr::new(10, 0, 0, 254)]),
                DhcpOption::DnsServer(vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(8, 8, 8, 8)]),
                DhcpOption::DomainName("lab.local".to_string()),
            ]
        );
    }

    #[test]
    fn test_minimal_reply_options() {
        let config = Arc::new(ServerConfig::new("192.168.0.0/16").unwrap());
        let dispatcher = Dispatcher::new(config);

        assert_eq!(
            dispatcher.reply_options(),
            &[
                DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 0, 0)),
                DhcpOption::LeaseTime(3600),
                DhcpOption::ServerIdentifier(Ipv4Addr::UNSPECIFIED),
            ]
        );
    }

    #[test]
    fn test_handle_discover_allocates_ip() {
        let (dispatcher, mut leases) = setup();
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 0x1111, vec![]);

        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();

        assert_eq!(offer.op, BOOTREPLY);
        assert_eq!(offer.xid, 0x1111);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(offer.chaddr_bytes(), &MAC);
        assert_eq!(offer.htype, HTYPE_ETHERNET);
        assert_eq!(offer.hlen, HLEN_ETHERNET);
        assert_eq!(offer.message_type(), Some(MessageType::Offer));
        assert_eq!(offer.server_identifier(), Some(IDENTIFIER));
        assert_eq!(offer.hostname(), None);
        assert_eq!(&offer.options()[1..], dispatcher.reply_options());

        let lease = leases.lease(offer.yiaddr).unwrap();
        assert_eq!(lease.state, LeaseState::Offered);
        assert_eq!(lease.xid, Some(0x1111));
    }

    #[test]
    fn test_full_dora_flow() {
        let (dispatcher, mut leases) = setup();

        let ack = discover_and_request(&dispatcher, &mut leases, MAC, 0xDEADBEEF);

        assert_eq!(ack.message_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(ack.xid, 0xDEADBEEF);
        assert_eq!(ack.lease_time(), Some(3600));

        let lease = leases.lease(ack.yiaddr).unwrap();
        assert_eq!(lease.state, LeaseState::Active);
        assert_eq!(lease.expires_at, Some(t0() + TimeDelta::seconds(3600)));
        assert_eq!(leases.active_count(), 1);
    }

    #[test]
    fn test_handle_request_different_server() {
        let (dispatcher, mut leases) = setup();
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 5, vec![]);
        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();

        let request = create_dhcp_packet(
            MessageType::Request,
            MAC,
            5,
            vec![
                DhcpOption::RequestedIpAddress(offer.yiaddr),
                DhcpOption::ServerIdentifier(Ipv4Addr::new(10, 0, 0, 99)),
            ],
        );

        assert!(dispatcher.dispatch(&request, &mut leases, t0()).is_none());
        assert_eq!(leases.lease(offer.yiaddr).unwrap().state, LeaseState::Offered);
    }

    #[test]
    fn test_handle_request_without_server_identifier() {
        let (dispatcher, mut leases) = setup();
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 5, vec![]);
        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();

        let request = create_dhcp_packet(
            MessageType::Request,
            MAC,
            5,
            vec![DhcpOption::RequestedIpAddress(offer.yiaddr)],
        );

        assert!(dispatcher.dispatch(&request, &mut leases, t0()).is_none());
    }

    #[test]
    fn test_handle_request_wrong_xid_or_mac() {
        let (dispatcher, mut leases) = setup();
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 5, vec![]);
        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();
        let options = vec![
            DhcpOption::RequestedIpAddress(offer.yiaddr),
            DhcpOption::ServerIdentifier(IDENTIFIER),
        ];

        let wrong_xid = create_dhcp_packet(MessageType::Request, MAC, 6, options.clone());
        assert!(dispatcher.dispatch(&wrong_xid, &mut leases, t0()).is_none());

        let wrong_mac = create_dhcp_packet(MessageType::Request, OTHER_MAC, 5, options);
        assert!(dispatcher.dispatch(&wrong_mac, &mut leases, t0()).is_none());

        let unknown_ip = create_dhcp_packet(
            MessageType::Request,
            MAC,
            5,
            vec![
                DhcpOption::RequestedIpAddress(Ipv4Addr::new(10, 0, 0, 15)),
                DhcpOption::ServerIdentifier(IDENTIFIER),
            ],
        );
        assert!(dispatcher.dispatch(&unknown_ip, &mut leases, t0()).is_none());
    }

    #[test]
    fn test_request_after_offer_hold_expired() {
        let (dispatcher, mut leases) = setup();
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 5, vec![]);
        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();

        let request = create_dhcp_packet(
            MessageType::Request,
            MAC,
            5,
            vec![
                DhcpOption::RequestedIpAddress(offer.yiaddr),
                DhcpOption::ServerIdentifier(IDENTIFIER),
            ],
        );
        let late = t0() + TimeDelta::seconds(61);

        assert!(dispatcher.dispatch(&request, &mut leases, late).is_none());
        assert_eq!(leases.lease(offer.yiaddr).unwrap().state, LeaseState::Free);
    }

    #[test]
    fn test_handle_release() {
        let (dispatcher, mut leases) = setup();
        let ack = discover_and_request(&dispatcher, &mut leases, MAC, 9);

        let release = create_dhcp_packet(
            MessageType::Release,
            MAC,
            0x4242,
            vec![DhcpOption::ServerIdentifier(IDENTIFIER)],
        )
        .with_ciaddr(ack.yiaddr);

        assert!(dispatcher.dispatch(&release, &mut leases, t0()).is_none());
        assert_eq!(leases.lease(ack.yiaddr).unwrap().state, LeaseState::Free);
        assert_eq!(leases.active_count(), 0);
    }

    #[test]
    fn test_handle_release_from_other_client() {
        let (dispatcher, mut leases) = setup();
        let ack = discover_and_request(&dispatcher, &mut leases, MAC, 9);

        let release = create_dhcp_packet(
            MessageType::Release,
            OTHER_MAC,
            9,
            vec![DhcpOption::ServerIdentifier(IDENTIFIER)],
        )
        .with_ciaddr(ack.yiaddr);

        assert!(dispatcher.dispatch(&release, &mut leases, t0()).is_none());
        assert_eq!(leases.lease(ack.yiaddr).unwrap().state, LeaseState::Active);
    }

    #[test]
    fn test_handle_decline() {
        let (dispatcher, mut leases) = setup();
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 5, vec![]);
        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();

        let decline = create_dhcp_packet(
            MessageType::Decline,
            MAC,
            77,
            vec![
                DhcpOption::RequestedIpAddress(offer.yiaddr),
                DhcpOption::ServerIdentifier(IDENTIFIER),
            ],
        );
        assert!(dispatcher.dispatch(&decline, &mut leases, t0()).is_none());

        let lease = leases.lease(offer.yiaddr).unwrap();
        assert_eq!(lease.state, LeaseState::Active);
        assert!(lease.declined);

        let later = t0() + TimeDelta::days(2);
        for mac in [MAC, OTHER_MAC] {
            let discover = create_dhcp_packet(MessageType::Discover, mac, 8, vec![]);
            let next = dispatcher.dispatch(&discover, &mut leases, later).unwrap();
            assert_ne!(next.yiaddr, offer.yiaddr);
        }
    }

    #[test]
    fn test_ignored_messages() {
        let (dispatcher, mut leases) = setup();

        let inform = create_dhcp_packet(MessageType::Inform, MAC, 1, vec![]);
        assert!(dispatcher.dispatch(&inform, &mut leases, t0()).is_none());

        let offer = create_dhcp_packet(MessageType::Offer, MAC, 1, vec![]);
        assert!(dispatcher.dispatch(&offer, &mut leases, t0()).is_none());

        let untyped = DhcpMessage::new(BOOTREQUEST).with_chaddr(&MAC);
        assert!(dispatcher.dispatch(&untyped, &mut leases, t0()).is_none());

        let reply = create_dhcp_packet(MessageType::Discover, MAC, 1, vec![]).with_op(BOOTREPLY);
        assert!(dispatcher.dispatch(&reply, &mut leases, t0()).is_none());

        assert_eq!(leases.leases().count(), 0);
    }

    #[test]
    fn test_pool_exhaustion() {
        let (dispatcher, mut leases) = setup();

        for index in 0..11u8 {
            let discover =
                create_dhcp_packet(MessageType::Discover, [0, 0, 0, 0, 1, index], 1, vec![]);
            assert!(dispatcher.dispatch(&discover, &mut leases, t0()).is_some());
        }

        let discover = create_dhcp_packet(MessageType::Discover, MAC, 1, vec![]);
        assert!(dispatcher.dispatch(&discover, &mut leases, t0()).is_none());

        let later = t0() + TimeDelta::seconds(61);
        assert!(dispatcher.dispatch(&discover, &mut leases, later).is_some());
    }

    #[test]
    fn test_relay_agent_info_echoed_in_options() {
        let (dispatcher, mut leases) = setup();
        let relay = RelayAgentInfo::new(
            Some(SubOptionValue::Binary(vec![0, 1])),
            Some(SubOptionValue::Binary(vec![0xca, 0xfe])),
        );
        let giaddr = Ipv4Addr::new(10, 0, 5, 1);

        let discover = create_dhcp_packet(
            MessageType::Discover,
            MAC,
            3,
            vec![DhcpOption::RelayAgentInfo(relay.clone())],
        )
        .with_giaddr(giaddr);

        let offer = dispatcher.dispatch(&discover, &mut leases, t0()).unwrap();
        assert_eq!(offer.relay_agent_info(), Some(&relay));
        assert_eq!(offer.giaddr, giaddr);
        assert_eq!(
            offer.options().last().map(|option| option.code()),
            Some(OptionCode::RelayAgentInfo as u8)
        );
    }

    struct ScriptedTransport {
        incoming: VecDeque<(Vec<u8>, SocketAddr)>,
        sent: Vec<(Vec<u8>, u16)>,
    }

    impl ScriptedTransport {
        fn new(incoming: Vec<Vec<u8>>) -> Self {
            let source = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 68));
            Self {
                incoming: incoming.into_iter().map(|data| (data, source)).collect(),
                sent: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&mut self, data: &[u8], port: u16) -> Result<()> {
            self.sent.push((data.to_vec(), port));
            Ok(())
        }

        async fn receive(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>> {
            Ok(self.incoming.pop_front())
        }
    }

    #[tokio::test]
    async fn test_serve_once_replies_to_source_port() {
        let discover = create_dhcp_packet(MessageType::Discover, MAC, 0xABCD, vec![]).encode();
        let transport = ScriptedTransport::new(vec![vec![0u8; 12], discover]);
        let config = test_settings().validate().unwrap();
        let mut server = DhcpServer::new(config, transport);

        assert!(server.serve_once().await.unwrap());
        assert!(server.transport().sent.is_empty());

        assert!(server.serve_once().await.unwrap());
        assert_eq!(server.transport().sent.len(), 1);

        let (data, port) = &server.transport().sent[0];
        assert_eq!(*port, 68);
        let offer = DhcpMessage::parse(data).unwrap();
        assert_eq!(offer.xid, 0xABCD);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 0, 10));

        assert!(!server.serve_once().await.unwrap());

        let leases = server.leases();
        let leases = leases.lock().await;
        assert_eq!(
            leases.lease(offer.yiaddr).map(|lease| lease.state),
            Some(LeaseState::Offered)
        );
    }

    #[tokio::test]
    async fn test_handle_datagram_with_ascii_relay_info() {
        let relay = RelayAgentInfo::new(
            Some(SubOptionValue::Ascii("eth0/1".to_string())),
            None,
        );
        let discover = create_dhcp_packet(
            MessageType::Discover,
            MAC,
            1,
            vec![DhcpOption::RelayAgentInfo(relay.clone())],
        )
        .encode();

        let config = test_settings().validate().unwrap();
        let server = DhcpServer::new(config, ScriptedTransport::new(vec![]))
            .with_sub_option_encoding(SubOptionEncoding::Ascii);

        let offer = server.handle_datagram(&discover, t0()).await.unwrap().unwrap();
        assert_eq!(offer.relay_agent_info(), Some(&relay));
    }

    /// Feeds every sent message straight into a dispatcher.
    struct LoopbackTransport {
        dispatcher: Dispatcher,
        leases: LeaseTable,
        pending: VecDeque<Vec<u8>>,
    }

    impl Transport for LoopbackTransport {
        async fn send(&mut self, data: &[u8], _port: u16) -> Result<()> {
            let request = DhcpMessage::parse(data)?;
            if let Some(reply) = self.dispatcher.dispatch(&request, &mut self.leases, Utc::now()) {
                self.pending.push_back(reply.encode());
            }
            Ok(())
        }

        async fn receive(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>> {
            let source = SocketAddr::V4(SocketAddrV4::new(IDENTIFIER, DHCP_SERVER_PORT));
            Ok(self.pending.pop_front().map(|data| (data, source)))
        }
    }

    #[tokio::test]
    async fn test_client_against_dispatcher() {
        use crate::client::{ClientState, DhcpClient};
        use crate::config::ClientConfig;
        use macaddr::MacAddr6;

        let (dispatcher, leases) = setup();
        let transport = LoopbackTransport {
            dispatcher,
            leases,
            pending: VecDeque::new(),
        };
        let config = ClientConfig {
            mac: Some(MacAddr6::from(MAC)),
            ..Default::default()
        };
        let mut client = DhcpClient::new(config, transport);

        let ack = client.start().await.unwrap().unwrap();
        assert_eq!(client.state(), ClientState::AckReceived);
        assert_eq!(ack.yiaddr, Ipv4Addr::new(10, 0, 0, 10));
        assert_eq!(ack.server_identifier(), Some(IDENTIFIER));

        let lease = client.transport().leases.lease(ack.yiaddr).unwrap();
        assert_eq!(lease.state, LeaseState::Active);
        assert_eq!(lease.chaddr, MAC);
    }
}
