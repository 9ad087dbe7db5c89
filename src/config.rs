//! Server and client configuration.
//!
//! The server reads a JSON [`ServerSettings`] file (created with defaults on
//! first run) and validates it into an immutable [`ServerConfig`]. The
//! client is configured directly through [`ClientConfig`].

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;
use macaddr::MacAddr6;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::DhcpOption;
use crate::transport::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};

/// Prefix lengths that leave no room for a network and broadcast address
/// plus at least one host.
const EXCLUDED_PREFIXES: [u8; 2] = [31, 32];

/// Default lease duration in seconds.
const DEFAULT_LEASE_TIME: u32 = 3600;

fn default_lease_time() -> u32 {
    DEFAULT_LEASE_TIME
}

/// Raw server settings as stored on disk.
///
/// `network` accepts either prefix notation (`"10.0.0.0/24"`) or a dotted
/// netmask (`"10.0.0.0/255.255.255.0"`). Every other field may be left out
/// of the file.
///
/// [`Default`] is the example written on first run. Fields missing from a
/// file are not taken from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub network: String,
    /// Inclusive `[start, end]` pair. When absent the whole host range minus
    /// the broadcast address is used.
    #[serde(default)]
    pub addr_range: Option<Vec<Ipv4Addr>>,
    /// Not checked against `network`: DNS servers may be off-link.
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    #[serde(default)]
    pub gateways: Vec<Ipv4Addr>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default = "default_lease_time")]
    pub lease_time: u32,
    /// Server identifier, 0.0.0.0 when absent.
    #[serde(default)]
    pub identifier: Option<Ipv4Addr>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            network: "192.168.1.0/24".to_string(),
            addr_range: Some(vec![
                Ipv4Addr::new(192, 168, 1, 100),
                Ipv4Addr::new(192, 168, 1, 200),
            ]),
            dns: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            gateways: vec![Ipv4Addr::new(192, 168, 1, 254)],
            domain_name: None,
            lease_time: DEFAULT_LEASE_TIME,
            identifier: Some(Ipv4Addr::new(192, 168, 1, 1)),
        }
    }
}

impl ServerSettings {
    /// Loads settings from `path`, writing the defaults there first if the
    /// file does not exist. The result is validated before it is returned.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let settings: ServerSettings = serde_json::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            let settings = ServerSettings::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks the settings and builds the runtime configuration from them.
    pub fn validate(&self) -> Result<ServerConfig> {
        ServerConfig::from_settings(self)
    }
}

/// Validated, immutable server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    network: Ipv4Net,
    range_start: Ipv4Addr,
    range_end: Ipv4Addr,
    excluded: [Ipv4Addr; 3],
    dns: Vec<Ipv4Addr>,
    gateways: Vec<Ipv4Addr>,
    domain_name: Option<String>,
    lease_time: u32,
    identifier: Ipv4Addr,
}

impl ServerConfig {
    /// Builds a configuration for `network` with every other setting left at
    /// its neutral value: default range, no DNS, no gateways, no domain,
    /// identifier 0.0.0.0.
    pub fn new(network: &str) -> Result<Self> {
        Self::from_settings(&ServerSettings {
            network: network.to_string(),
            addr_range: None,
            dns: Vec::new(),
            gateways: Vec::new(),
            domain_name: None,
            lease_time: default_lease_time(),
            identifier: None,
        })
    }

    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let network = parse_network(&settings.network)?;

        if EXCLUDED_PREFIXES.contains(&network.prefix_len()) {
            return Err(Error::InvalidConfig(format!(
                "Network prefix must be shorter than /31, got /{}",
                network.prefix_len()
            )));
        }

        let identifier = settings.identifier.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let excluded = [network.network(), network.broadcast(), identifier];

        let mut config = Self {
            network,
            range_start: Ipv4Addr::UNSPECIFIED,
            range_end: Ipv4Addr::UNSPECIFIED,
            excluded,
            dns: settings.dns.clone(),
            gateways: Vec::new(),
            domain_name: settings.domain_name.clone(),
            lease_time: settings.lease_time,
            identifier,
        };

        let (start, end) = match &settings.addr_range {
            Some(range) => {
                let [start, end] = range.as_slice() else {
                    return Err(Error::InvalidConfig(format!(
                        "Address range must contain exactly two addresses, got {}",
                        range.len()
                    )));
                };
                if u32::from(*start) > u32::from(*end) {
                    return Err(Error::InvalidConfig(format!(
                        "Address range start {} is after end {}",
                        start, end
                    )));
                }
                for addr in [start, end] {
                    if !config.is_usable(*addr) {
                        return Err(Error::InvalidConfig(format!(
                            "Address range bound {} is outside {} or reserved",
                            addr, network
                        )));
                    }
                }
                (*start, *end)
            }
            None => {
                let first = Ipv4Addr::from(u32::from(network.network()) + 1);
                let last = Ipv4Addr::from(u32::from(network.broadcast()) - 1);
                (first, last)
            }
        };
        config.range_start = start;
        config.range_end = end;

        for gateway in &settings.gateways {
            if !config.is_usable(*gateway) {
                return Err(Error::InvalidConfig(format!(
                    "Gateway {} is outside {} or reserved",
                    gateway, network
                )));
            }
        }
        config.gateways = settings.gateways.clone();

        if settings.lease_time == 0 {
            return Err(Error::InvalidConfig(
                "lease_time must be greater than 0".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.network.netmask()
    }

    /// Inclusive allocation range.
    pub fn addr_range(&self) -> (Ipv4Addr, Ipv4Addr) {
        (self.range_start, self.range_end)
    }

    pub fn excluded(&self) -> &[Ipv4Addr] {
        &self.excluded
    }

    pub fn dns(&self) -> &[Ipv4Addr] {
        &self.dns
    }

    pub fn gateways(&self) -> &[Ipv4Addr] {
        &self.gateways
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    pub fn lease_time(&self) -> u32 {
        self.lease_time
    }

    pub fn identifier(&self) -> Ipv4Addr {
        self.identifier
    }

    pub fn is_excluded(&self, addr: Ipv4Addr) -> bool {
        self.excluded.contains(&addr)
    }

    pub fn in_range(&self, addr: Ipv4Addr) -> bool {
        let addr = u32::from(addr);
        addr >= u32::from(self.range_start) && addr <= u32::from(self.range_end)
    }

    /// Whether `addr` may be handed to a client: inside the range, not
    /// excluded and not one of the gateways.
    pub fn is_allocatable(&self, addr: Ipv4Addr) -> bool {
        self.in_range(addr) && !self.is_excluded(addr) && !self.gateways.contains(&addr)
    }

    /// Addresses of the allocation range in ascending order.
    pub fn range_addresses(&self) -> impl Iterator<Item = Ipv4Addr> + use<> {
        (u32::from(self.range_start)..=u32::from(self.range_end)).map(Ipv4Addr::from)
    }

    pub fn pool_size(&self) -> u32 {
        u32::from(self.range_end) - u32::from(self.range_start) + 1
    }

    fn is_usable(&self, addr: Ipv4Addr) -> bool {
        self.network.contains(&addr) && !self.is_excluded(addr)
    }
}

impl TryFrom<&ServerSettings> for ServerConfig {
    type Error = Error;

    fn try_from(settings: &ServerSettings) -> Result<Self> {
        Self::from_settings(settings)
    }
}

fn parse_network(value: &str) -> Result<Ipv4Net> {
    let (addr, mask) = value.split_once('/').ok_or_else(|| {
        Error::InvalidConfig(format!("Network {} must be written as address/mask", value))
    })?;

    let addr: Ipv4Addr = addr
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("Invalid network address in {}", value)))?;

    let mask = mask.trim();
    let prefix_len = if mask.contains('.') {
        let netmask: Ipv4Addr = mask
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("Invalid netmask in {}", value)))?;
        let bits = u32::from(netmask);
        if bits.leading_ones() + bits.trailing_zeros() != 32 {
            return Err(Error::InvalidConfig(format!(
                "Netmask {} is not contiguous",
                netmask
            )));
        }
        bits.leading_ones() as u8
    } else {
        mask.parse::<u8>()
            .map_err(|_| Error::InvalidConfig(format!("Invalid prefix length in {}", value)))?
    };

    let network = Ipv4Net::new(addr, prefix_len)
        .map_err(|_| Error::InvalidConfig(format!("Invalid prefix length /{}", prefix_len)))?;

    if network.addr() != network.network() {
        return Err(Error::InvalidConfig(format!(
            "Network {} has host bits set",
            value
        )));
    }

    Ok(network)
}

/// Generates a random unicast, locally administered MAC address.
pub fn random_mac() -> MacAddr6 {
    let mut bytes: [u8; 6] = rand::random();
    bytes[0] = (bytes[0] & 0xFE) | 0x02;
    MacAddr6::from(bytes)
}

/// Client exchange configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_port: u16,
    pub listen_port: u16,
    /// Hardware address to send in `chaddr`. A random locally administered
    /// address is generated when unset.
    pub mac: Option<MacAddr6>,
    /// How long to wait for each reply.
    pub timeout: Duration,
    /// Number of send attempts per phase.
    pub repeat_count: u32,
    /// Options appended to every outgoing request.
    pub options: Vec<DhcpOption>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_port: DHCP_SERVER_PORT,
            listen_port: DHCP_CLIENT_PORT,
            mac: None,
            timeout: Duration::from_secs(5),
            repeat_count: 3,
            options: Vec::new(),
        }
    }
}
