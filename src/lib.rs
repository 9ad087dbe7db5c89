//! # dhcpkit
//!
//! DHCP (RFC 2131/2132) building blocks: a bit-exact message codec, a typed
//! option framework, a server-side lease allocator and a discover/request
//! client.
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhcpkit::{DhcpServer, ServerSettings};
//!
//! #[tokio::main]
//! async fn main() -> dhcpkit::Result<()> {
//!     let settings = ServerSettings::load_or_create("server.json")?;
//!     let mut server = DhcpServer::bind(settings.validate()?)?;
//!     server.run().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`DhcpOption`] - Typed DHCP options and their wire encoding
//! - [`DhcpMessage`] - DHCP message parsing and encoding
//! - [`LeaseTable`] - Address pool and lease state machine
//! - [`DhcpServer`] - Dispatches requests to the lease table
//! - [`DhcpClient`] - Drives DISCOVER/OFFER/REQUEST/ACK
//! - [`Transport`] - Datagram transport shared by client and server

pub mod client;
pub mod config;
pub mod error;
pub mod lease;
pub mod message;
pub mod options;
pub mod server;
pub mod transport;

pub use client::{ClientState, DhcpClient};
pub use config::{ClientConfig, ServerConfig, ServerSettings};
pub use error::{Error, Result};
pub use lease::{Lease, LeaseState, LeaseTable};
pub use message::DhcpMessage;
pub use options::{DhcpOption, MessageType, RelayAgentInfo, SubOptionEncoding, SubOptionValue};
pub use server::{DhcpServer, Dispatcher};
pub use transport::{Transport, UdpTransport};
