//! DHCP options as defined in RFC 2132.
//!
//! DHCP uses options to convey configuration parameters between servers and clients.
//! Each option has a code (1 byte), length (1 byte), and variable-length data.
//!
//! Options form a closed set of variants. Every variant has an [`OptionKind`]
//! that decides how its payload is laid out (IPv4 addresses, fixed-width
//! big-endian integer, ASCII text, or nested sub-options). Decoding goes
//! through an explicit code → decoder table; codes that are not in the table
//! are skipped by the caller so that unrecognized options never abort a
//! message.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions
//! - RFC 3046: DHCP Relay Agent Information Option (Option 82)

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Maximum number of IP addresses in Router (3) or DNS Server (6) options.
///
/// Options have a 1-byte length field, so maximum data is 255 bytes.
/// With 4 bytes per IPv4 address, that's 63 addresses maximum.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

/// Largest payload a 1-byte length field can describe.
const MAX_PAYLOAD_LEN: usize = 255;

/// Bytes taken by the code and length fields in front of every payload.
pub const OPTION_HEADER_LEN: usize = 2;

/// Sub-option code for the agent circuit id inside Option 82.
pub const CIRCUIT_ID_SUBOPTION: u8 = 1;

/// Sub-option code for the agent remote id inside Option 82.
pub const REMOTE_ID_SUBOPTION: u8 = 2;

/// DHCP option codes understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Used for alignment.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Client hostname (RFC 2132 §3.14).
    Hostname = 12,
    /// Domain name for DNS resolution (RFC 2132 §3.17).
    DomainName = 15,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Relay agent information (RFC 3046).
    RelayAgentInfo = 82,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            12 => Ok(Self::Hostname),
            15 => Ok(Self::DomainName),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            82 => Ok(Self::RelayAgentInfo),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
///
/// These values indicate the purpose of a DHCP message in the protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(Error::InvalidValue(format!(
                "Invalid DHCP message type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// Payload layout of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// A single IPv4 address (4 bytes).
    Ip,
    /// An ordered list of IPv4 addresses (4 bytes each).
    IpList,
    /// An unsigned big-endian integer of a fixed byte width.
    Integer { width: u8 },
    /// ASCII text.
    Ascii,
    /// Nested code/length/payload sub-options.
    Composite,
}

/// How sub-option payloads inside Option 82 are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubOptionEncoding {
    /// Raw bytes.
    #[default]
    Binary,
    /// ASCII text.
    Ascii,
}

/// Value of a single Option 82 sub-option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubOptionValue {
    Binary(Vec<u8>),
    Ascii(String),
}

impl SubOptionValue {
    fn decode(data: &[u8], encoding: SubOptionEncoding) -> Self {
        match encoding {
            SubOptionEncoding::Binary => Self::Binary(data.to_vec()),
            SubOptionEncoding::Ascii => Self::Ascii(String::from_utf8_lossy(data).to_string()),
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Binary(bytes) => bytes.clone(),
            Self::Ascii(text) => ascii_bytes(text),
        }
    }
}

impl fmt::Display for SubOptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Self::Ascii(text) => f.write_str(text),
        }
    }
}

/// Relay agent information (Option 82): a circuit id and a remote id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayAgentInfo {
    /// Sub-option 1.
    pub circuit_id: Option<SubOptionValue>,
    /// Sub-option 2.
    pub remote_id: Option<SubOptionValue>,
}

impl RelayAgentInfo {
    pub fn new(circuit_id: Option<SubOptionValue>, remote_id: Option<SubOptionValue>) -> Self {
        Self {
            circuit_id,
            remote_id,
        }
    }

    /// Parses the payload of Option 82.
    ///
    /// Sub-options other than circuit id and remote id are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if a sub-option is truncated.
    pub fn parse(data: &[u8], encoding: SubOptionEncoding) -> Result<Self> {
        let mut info = Self::default();
        let mut index = 0;

        while index < data.len() {
            if index + OPTION_HEADER_LEN > data.len() {
                return Err(Error::InvalidPacket(
                    "Relay agent sub-option length missing".to_string(),
                ));
            }

            let code = data[index];
            let length = data[index + 1] as usize;
            let start = index + OPTION_HEADER_LEN;

            if start + length > data.len() {
                return Err(Error::InvalidPacket(
                    "Relay agent sub-option truncated".to_string(),
                ));
            }

            let value = SubOptionValue::decode(&data[start..start + length], encoding);
            match code {
                CIRCUIT_ID_SUBOPTION => info.circuit_id = Some(value),
                REMOTE_ID_SUBOPTION => info.remote_id = Some(value),
                _ => {}
            }

            index = start + length;
        }

        Ok(info)
    }

    /// Sub-options share the 255-byte budget of the enclosing option. A
    /// sub-option that overruns it is shortened, and one whose header no
    /// longer fits is left out.
    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        let sub_options = [
            (CIRCUIT_ID_SUBOPTION, &self.circuit_id),
            (REMOTE_ID_SUBOPTION, &self.remote_id),
        ];
        for (code, value) in sub_options {
            if let Some(value) = value {
                let remaining = MAX_PAYLOAD_LEN - payload.len();
                if remaining < OPTION_HEADER_LEN {
                    break;
                }
                let bytes = value.payload();
                let len = bytes.len().min(remaining - OPTION_HEADER_LEN);
                payload.push(code);
                payload.push(len as u8);
                payload.extend_from_slice(&bytes[..len]);
            }
        }
        payload
    }
}

/// A parsed DHCP option.
///
/// Each variant corresponds to a specific option code. Options whose code
/// is not listed here are skipped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router/gateway addresses (Option 3). First address is the default gateway.
    Router(Vec<Ipv4Addr>),
    /// DNS server addresses (Option 6).
    DnsServer(Vec<Ipv4Addr>),
    /// Client hostname (Option 12). Encoded as ASCII: any other character
    /// is written as `?`.
    Hostname(String),
    /// Domain name for client DNS resolution (Option 15).
    DomainName(String),
    /// Client's requested IP address (Option 50).
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Server identifier - IP of the DHCP server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Relay agent information (Option 82, RFC 3046).
    RelayAgentInfo(RelayAgentInfo),
}

/// Decodes the payload of one option code.
pub type Decoder = fn(&[u8], SubOptionEncoding) -> Result<DhcpOption>;

/// Every option code this crate decodes, with its decoder.
static DECODERS: [(u8, Decoder); 10] = [
    (OptionCode::SubnetMask as u8, decode_subnet_mask),
    (OptionCode::Router as u8, decode_router),
    (OptionCode::DnsServer as u8, decode_dns_server),
    (OptionCode::Hostname as u8, decode_hostname),
    (OptionCode::DomainName as u8, decode_domain_name),
    (OptionCode::RequestedIpAddress as u8, decode_requested_ip),
    (OptionCode::LeaseTime as u8, decode_lease_time),
    (OptionCode::MessageType as u8, decode_message_type),
    (OptionCode::ServerIdentifier as u8, decode_server_identifier),
    (OptionCode::RelayAgentInfo as u8, decode_relay_agent_info),
];

/// Looks up the decoder registered for `code`.
pub fn decoder(code: u8) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(registered, _)| *registered == code)
        .map(|(_, decoder)| *decoder)
}

fn decode_address(data: &[u8], name: &str) -> Result<Ipv4Addr> {
    if data.len() != 4 {
        return Err(Error::InvalidPacket(format!(
            "Invalid {} length: {}",
            name,
            data.len()
        )));
    }
    Ok(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

fn decode_address_list(data: &[u8], name: &str) -> Result<Vec<Ipv4Addr>> {
    if !data.len().is_multiple_of(4) || data.is_empty() {
        return Err(Error::InvalidPacket(format!(
            "Invalid {} option length: {}",
            name,
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

/// Encodes text as one byte per character. Characters outside ASCII
/// become `?`.
pub(crate) fn ascii_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

fn decode_integer(data: &[u8], width: usize, name: &str) -> Result<u64> {
    if data.len() != width {
        return Err(Error::InvalidPacket(format!(
            "Invalid {} length: {}",
            name,
            data.len()
        )));
    }
    Ok(data
        .iter()
        .fold(0u64, |value, byte| (value << 8) | u64::from(*byte)))
}

fn encode_integer(value: u64, width: usize) -> Vec<u8> {
    value.to_be_bytes()[8 - width..].to_vec()
}

fn encode_addresses(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs
        .iter()
        .take(MAX_ADDRESSES_PER_OPTION)
        .flat_map(|addr| addr.octets())
        .collect()
}

fn decode_subnet_mask(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    decode_address(data, "subnet mask").map(DhcpOption::SubnetMask)
}

fn decode_router(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    decode_address_list(data, "router").map(DhcpOption::Router)
}

fn decode_dns_server(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    decode_address_list(data, "DNS server").map(DhcpOption::DnsServer)
}

fn decode_hostname(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    Ok(DhcpOption::Hostname(String::from_utf8_lossy(data).to_string()))
}

fn decode_domain_name(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    Ok(DhcpOption::DomainName(String::from_utf8_lossy(data).to_string()))
}

fn decode_requested_ip(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    decode_address(data, "requested IP address").map(DhcpOption::RequestedIpAddress)
}

fn decode_lease_time(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    let time = decode_integer(data, 4, "lease time")?;
    Ok(DhcpOption::LeaseTime(time as u32))
}

fn decode_message_type(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    let value = decode_integer(data, 1, "message type")? as u8;
    let msg_type = MessageType::try_from(value)
        .map_err(|_| Error::InvalidPacket(format!("Unknown message type: {}", value)))?;
    Ok(DhcpOption::MessageType(msg_type))
}

fn decode_server_identifier(data: &[u8], _: SubOptionEncoding) -> Result<DhcpOption> {
    decode_address(data, "server identifier").map(DhcpOption::ServerIdentifier)
}

fn decode_relay_agent_info(data: &[u8], encoding: SubOptionEncoding) -> Result<DhcpOption> {
    RelayAgentInfo::parse(data, encoding).map(DhcpOption::RelayAgentInfo)
}

impl DhcpOption {
    /// Builds a message type option from its wire value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if `value` is not one of the eight
    /// defined message types.
    pub fn message_type(value: u8) -> Result<Self> {
        MessageType::try_from(value).map(Self::MessageType)
    }

    /// Returns the RFC 2132 option code for this option.
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::Hostname(_) => OptionCode::Hostname as u8,
            Self::DomainName(_) => OptionCode::DomainName as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::RelayAgentInfo(_) => OptionCode::RelayAgentInfo as u8,
        }
    }

    /// Returns the payload layout of this option.
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::SubnetMask(_) | Self::RequestedIpAddress(_) | Self::ServerIdentifier(_) => {
                OptionKind::Ip
            }
            Self::Router(_) | Self::DnsServer(_) => OptionKind::IpList,
            Self::Hostname(_) | Self::DomainName(_) => OptionKind::Ascii,
            Self::LeaseTime(_) => OptionKind::Integer { width: 4 },
            Self::MessageType(_) => OptionKind::Integer { width: 1 },
            Self::RelayAgentInfo(_) => OptionKind::Composite,
        }
    }

    /// Byte count of the encoded payload (the option's length field).
    pub fn length(&self) -> u8 {
        self.payload().len() as u8
    }

    /// Parses an option from its code and payload.
    ///
    /// Returns `Ok(None)` for codes without a registered decoder so the
    /// caller can step over them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if the payload length is invalid for
    /// the option type (e.g., subnet mask must be exactly 4 bytes).
    pub fn parse(code: u8, data: &[u8], encoding: SubOptionEncoding) -> Result<Option<Self>> {
        match decoder(code) {
            Some(decode) => decode(data, encoding).map(Some),
            None => Ok(None),
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = match self {
            Self::SubnetMask(addr) | Self::RequestedIpAddress(addr) | Self::ServerIdentifier(addr) => {
                addr.octets().to_vec()
            }
            Self::Router(addrs) | Self::DnsServer(addrs) => encode_addresses(addrs),
            Self::Hostname(name) | Self::DomainName(name) => ascii_bytes(name),
            Self::LeaseTime(time) => encode_integer(u64::from(*time), 4),
            Self::MessageType(msg_type) => encode_integer(*msg_type as u64, 1),
            Self::RelayAgentInfo(info) => info.payload(),
        };
        payload.truncate(MAX_PAYLOAD_LEN);
        payload
    }

    /// Returns `true` for an address list with no addresses. Such an option
    /// has no valid wire form and is left out of encoded messages.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Router(addrs) | Self::DnsServer(addrs) if addrs.is_empty())
    }

    /// Encodes the option to its wire format (code + length + data).
    ///
    /// Text is written as ASCII, see [`DhcpOption::Hostname`].
    ///
    /// The returned bytes can be directly appended to a DHCP message's
    /// options section.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut result = Vec::with_capacity(OPTION_HEADER_LEN + payload.len());
        result.push(self.code());
        result.push(payload.len() as u8);
        result.extend_from_slice(&payload);
        result
    }
}
