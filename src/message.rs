//! DHCP message parsing and encoding per RFC 2131.
//!
//! A DHCP message consists of a fixed 236-byte header followed by a 4-byte
//! magic cookie and variable-length options. This module handles parsing
//! incoming messages and constructing requests and replies.
//!
//! # Message Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```
//!
//! # References
//!
//! - RFC 2131: Dynamic Host Configuration Protocol

use std::net::Ipv4Addr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::options::{
    DhcpOption, MessageType, OPTION_HEADER_LEN, OptionCode, RelayAgentInfo, SubOptionEncoding,
    ascii_bytes,
};

/// DHCP magic cookie that identifies DHCP messages (vs BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_OP_HTYPE_HLEN_HOPS_SIZE: usize = 4;
const DHCP_XID_SIZE: usize = 4;
const DHCP_SECS_SIZE: usize = 2;
const DHCP_FLAGS_SIZE: usize = 2;
const DHCP_CIADDR_SIZE: usize = 4;
const DHCP_YIADDR_SIZE: usize = 4;
const DHCP_SIADDR_SIZE: usize = 4;
const DHCP_GIADDR_SIZE: usize = 4;
const DHCP_CHADDR_SIZE: usize = 16;
const DHCP_SNAME_SIZE: usize = 64;
const DHCP_FILE_SIZE: usize = 128;

const DHCP_CHADDR_OFFSET: usize = DHCP_OP_HTYPE_HLEN_HOPS_SIZE
    + DHCP_XID_SIZE
    + DHCP_SECS_SIZE
    + DHCP_FLAGS_SIZE
    + DHCP_CIADDR_SIZE
    + DHCP_YIADDR_SIZE
    + DHCP_SIADDR_SIZE
    + DHCP_GIADDR_SIZE;

const DHCP_SNAME_OFFSET: usize = DHCP_CHADDR_OFFSET + DHCP_CHADDR_SIZE;

const DHCP_FILE_OFFSET: usize = DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE;

const DHCP_MAGIC_COOKIE_OFFSET: usize = DHCP_FILE_OFFSET + DHCP_FILE_SIZE;

/// Size of the fixed header portion including magic cookie.
pub const DHCP_FIXED_HEADER_SIZE: usize = DHCP_MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Initial capacity for message encoding buffer.
///
/// 576 bytes is the minimum MTU that all hosts must accept per RFC 791.
const DHCP_ENCODE_CAPACITY: usize = 576;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet (most common).
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware type for IEEE 802 networks.
pub const HTYPE_IEEE802: u8 = 6;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// Flags value asking the server to unicast its reply.
pub const UNICAST_FLAG: u16 = 0;

/// Flags value asking the server to broadcast its reply (bit 15).
pub const BROADCAST_FLAG: u16 = 0x8000;

/// Returns a random non-zero transaction id.
pub fn random_xid() -> u32 {
    rand::random_range(1..=u32::MAX)
}

/// A DHCP message.
///
/// This struct represents both client requests and server replies.
/// Use [`parse`](Self::parse) to decode incoming messages,
/// [`new`](Self::new) to start an outbound request and
/// [`from_message`](Self::from_message) to derive a reply from a request.
///
/// Options are kept unique by code, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub op: u8,

    /// Hardware address type. [`HTYPE_ETHERNET`] (1) for Ethernet.
    pub htype: u8,

    /// Hardware address length. [`HLEN_ETHERNET`] (6) for Ethernet.
    pub hlen: u8,

    /// Hop count, incremented by relay agents.
    pub hops: u8,

    /// Transaction ID chosen by client, echoed in replies.
    pub xid: u32,

    /// Seconds elapsed since client began address acquisition.
    pub secs: u16,

    /// Flags. Bit 15 (0x8000) = broadcast flag.
    pub flags: u16,

    /// Client IP address (set by client in BOUND/RENEWING states and in RELEASE).
    pub ciaddr: Ipv4Addr,

    /// "Your" IP address - the address being assigned to the client.
    pub yiaddr: Ipv4Addr,

    /// Server IP address (next server in BOOTP, or DHCP server).
    pub siaddr: Ipv4Addr,

    /// Gateway IP address - set by relay agents.
    pub giaddr: Ipv4Addr,

    /// Client hardware address. Only the first `hlen` bytes are meaningful.
    pub chaddr: [u8; 16],

    /// Server host name, at most 64 ASCII bytes.
    pub sname: String,

    /// Boot file name, at most 128 ASCII bytes.
    pub file: String,

    options: Vec<DhcpOption>,
}

impl DhcpMessage {
    /// Creates a message with the given op code and default header fields:
    /// Ethernet hardware type, broadcast flag, a random transaction id and
    /// unspecified addresses.
    pub fn new(op: u8) -> Self {
        Self {
            op,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: random_xid(),
            secs: 0,
            flags: BROADCAST_FLAG,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; 16],
            sname: String::new(),
            file: String::new(),
            options: Vec::new(),
        }
    }

    /// Starts a new message that shares every field with `base`.
    ///
    /// Chain the `with_*` methods to override individual fields.
    pub fn from_message(base: &DhcpMessage) -> Self {
        base.clone()
    }

    pub fn with_op(mut self, op: u8) -> Self {
        self.op = op;
        self
    }

    pub fn with_xid(mut self, xid: u32) -> Self {
        self.xid = xid;
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_ciaddr(mut self, ciaddr: Ipv4Addr) -> Self {
        self.ciaddr = ciaddr;
        self
    }

    pub fn with_yiaddr(mut self, yiaddr: Ipv4Addr) -> Self {
        self.yiaddr = yiaddr;
        self
    }

    pub fn with_siaddr(mut self, siaddr: Ipv4Addr) -> Self {
        self.siaddr = siaddr;
        self
    }

    pub fn with_giaddr(mut self, giaddr: Ipv4Addr) -> Self {
        self.giaddr = giaddr;
        self
    }

    /// Sets the client hardware address and `hlen` (at most 16 bytes are kept).
    pub fn with_chaddr(mut self, hardware_address: &[u8]) -> Self {
        let len = hardware_address.len().min(DHCP_CHADDR_SIZE);
        self.chaddr = [0u8; 16];
        self.chaddr[..len].copy_from_slice(&hardware_address[..len]);
        self.hlen = len as u8;
        self
    }

    pub fn with_sname(mut self, sname: impl Into<String>) -> Self {
        self.sname = sname.into();
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    /// Adds an option, replacing any option with the same code.
    pub fn with_option(mut self, option: DhcpOption) -> Self {
        self.set_option(option);
        self
    }

    /// Replaces the whole option set.
    pub fn with_options(mut self, options: impl IntoIterator<Item = DhcpOption>) -> Self {
        self.options.clear();
        for option in options {
            self.set_option(option);
        }
        self
    }

    /// Inserts an option. An existing option with the same code is replaced
    /// in place so that serialization order is preserved.
    pub fn set_option(&mut self, option: DhcpOption) {
        let code = option.code();
        match self.options.iter_mut().find(|existing| existing.code() == code) {
            Some(existing) => *existing = option,
            None => self.options.push(option),
        }
    }

    /// Removes and returns the option with the given code.
    pub fn remove_option(&mut self, code: u8) -> Option<DhcpOption> {
        let index = self.options.iter().position(|opt| opt.code() == code)?;
        Some(self.options.remove(index))
    }

    /// Returns the option with the given code, if present.
    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|opt| opt.code() == code)
    }

    /// Returns all options in serialization order.
    pub fn options(&self) -> &[DhcpOption] {
        &self.options
    }

    /// Parses a DHCP message from raw bytes.
    ///
    /// Relay agent sub-options are decoded as raw bytes; use
    /// [`parse_with`](Self::parse_with) for ASCII sub-options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPacket`] if:
    /// - Message is shorter than 240 bytes (fixed header + magic cookie)
    /// - Magic cookie is invalid (not 99.130.83.99)
    /// - Hardware length exceeds the 16-byte chaddr field
    /// - Options are malformed (truncated length or data)
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with(data, SubOptionEncoding::Binary)
    }

    /// Parses a DHCP message, decoding Option 82 sub-options with `encoding`.
    pub fn parse_with(data: &[u8], encoding: SubOptionEncoding) -> Result<Self> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_FIXED_HEADER_SIZE
            )));
        }

        let magic_cookie = &data[DHCP_MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE];
        if magic_cookie != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        if hlen as usize > DHCP_CHADDR_SIZE {
            return Err(Error::InvalidPacket(format!(
                "Hardware address length {} exceeds {}",
                hlen, DHCP_CHADDR_SIZE
            )));
        }

        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);

        let ciaddr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let siaddr = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let giaddr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        let mut chaddr = [0u8; 16];
        chaddr[..hlen as usize]
            .copy_from_slice(&data[DHCP_CHADDR_OFFSET..DHCP_CHADDR_OFFSET + hlen as usize]);

        let sname = decode_text(&data[DHCP_SNAME_OFFSET..DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE]);
        let file = decode_text(&data[DHCP_FILE_OFFSET..DHCP_FILE_OFFSET + DHCP_FILE_SIZE]);

        let mut message = Self {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options: Vec::new(),
        };
        message.parse_options(&data[DHCP_FIXED_HEADER_SIZE..], encoding)?;

        Ok(message)
    }

    fn parse_options(&mut self, data: &[u8], encoding: SubOptionEncoding) -> Result<()> {
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            }

            let length = data[index + 1] as usize;
            let start = index + OPTION_HEADER_LEN;

            if start + length > data.len() {
                return Err(Error::InvalidPacket(format!(
                    "Option {} data truncated",
                    code
                )));
            }

            match DhcpOption::parse(code, &data[start..start + length], encoding)? {
                Some(option) => self.set_option(option),
                None => debug!("Skipping unrecognized option {} ({} bytes)", code, length),
            }

            index = start + length;
        }

        Ok(())
    }

    /// Encodes the message to bytes for transmission.
    ///
    /// Options are encoded in TLV format in insertion order, followed by a
    /// single End marker. Empty address lists are skipped. `sname` and
    /// `file` are written as ASCII and cut to their field width.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DHCP_ENCODE_CAPACITY);

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());

        let mut chaddr = [0u8; DHCP_CHADDR_SIZE];
        let hlen = self.chaddr_bytes().len();
        chaddr[..hlen].copy_from_slice(self.chaddr_bytes());
        packet.extend_from_slice(&chaddr);

        encode_text(&mut packet, &self.sname, DHCP_SNAME_SIZE);
        encode_text(&mut packet, &self.file, DHCP_FILE_SIZE);

        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in self.options.iter().filter(|option| !option.is_empty()) {
            packet.extend_from_slice(&option.encode());
        }

        packet.push(OptionCode::End as u8);

        packet
    }

    /// Returns the DHCP message type (Option 53) if present.
    pub fn message_type(&self) -> Option<MessageType> {
        match self.option(OptionCode::MessageType as u8) {
            Some(DhcpOption::MessageType(msg_type)) => Some(*msg_type),
            _ => None,
        }
    }

    /// Returns the requested IP address (Option 50) if present.
    ///
    /// Clients include this in REQUEST to confirm the offered IP and in
    /// DECLINE to name the conflicting one.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        match self.option(OptionCode::RequestedIpAddress as u8) {
            Some(DhcpOption::RequestedIpAddress(ip)) => Some(*ip),
            _ => None,
        }
    }

    /// Returns the server identifier (Option 54) if present.
    ///
    /// Clients include this in REQUEST to indicate which server's
    /// offer they are accepting.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        match self.option(OptionCode::ServerIdentifier as u8) {
            Some(DhcpOption::ServerIdentifier(ip)) => Some(*ip),
            _ => None,
        }
    }

    /// Returns the lease time (Option 51) if present.
    pub fn lease_time(&self) -> Option<u32> {
        match self.option(OptionCode::LeaseTime as u8) {
            Some(DhcpOption::LeaseTime(time)) => Some(*time),
            _ => None,
        }
    }

    /// Returns the relay agent information (Option 82) if present.
    ///
    /// This is added by DHCP relay agents and must be echoed in replies.
    pub fn relay_agent_info(&self) -> Option<&RelayAgentInfo> {
        match self.option(OptionCode::RelayAgentInfo as u8) {
            Some(DhcpOption::RelayAgentInfo(info)) => Some(info),
            _ => None,
        }
    }

    /// Returns the client hostname (Option 12) if present.
    pub fn hostname(&self) -> Option<&str> {
        match self.option(OptionCode::Hostname as u8) {
            Some(DhcpOption::Hostname(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Returns the client hardware address bytes (respecting hlen).
    pub fn chaddr_bytes(&self) -> &[u8] {
        let len = (self.hlen as usize).min(self.chaddr.len());
        &self.chaddr[..len]
    }

    /// Formats the client hardware address as a colon-separated string.
    ///
    /// For Ethernet, returns format like "AA:BB:CC:DD:EE:FF".
    pub fn format_mac(&self) -> String {
        use std::fmt::Write;
        let mut result = String::with_capacity(self.chaddr_bytes().len() * 3);
        for (index, byte) in self.chaddr_bytes().iter().enumerate() {
            if index > 0 {
                result.push(':');
            }
            let _ = write!(result, "{:02X}", byte);
        }
        result
    }

    /// Returns true if the broadcast flag (bit 15) is set.
    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }

    /// Creates a DHCP reply from a request.
    ///
    /// The reply shares every header field with the request (xid, flags,
    /// giaddr, chaddr, ...) except `op`, `yiaddr` and the option set. The
    /// message type is added as the first option.
    pub fn create_reply(
        request: &DhcpMessage,
        message_type: MessageType,
        your_ip: Ipv4Addr,
        options: Vec<DhcpOption>,
    ) -> Self {
        let mut all_options = vec![DhcpOption::MessageType(message_type)];
        all_options.extend(options);

        Self::from_message(request)
            .with_op(BOOTREPLY)
            .with_yiaddr(your_ip)
            .with_options(all_options)
    }
}

fn decode_text(field: &[u8]) -> String {
    let end = field.iter().position(|byte| *byte == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).to_string()
}

fn encode_text(packet: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = ascii_bytes(text);
    let len = bytes.len().min(width);
    packet.extend_from_slice(&bytes[..len]);
    packet.resize(packet.len() + width - len, 0);
}
