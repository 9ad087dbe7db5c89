use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use macaddr::MacAddr6;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dhcpkit::transport::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use dhcpkit::{ClientConfig, DhcpClient, DhcpOption, DhcpServer, Result, ServerSettings};

#[derive(Parser)]
#[command(name = "dhcpkit")]
#[command(author, version, about = "DHCP server and client", long_about = None)]
struct Cli {
    /// Server settings file, created with defaults if missing
    #[arg(short, long, default_value = "server.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve leases on UDP port 67
    Server,
    /// Acquire an address with DISCOVER/REQUEST
    Client {
        /// Hardware address, random if omitted
        #[arg(long)]
        mac: Option<MacAddr6>,

        /// Seconds to wait for each reply
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        /// Send attempts per phase
        #[arg(long, default_value_t = 3)]
        repeat: u32,

        #[arg(long, default_value_t = DHCP_SERVER_PORT)]
        server_port: u16,

        #[arg(long, default_value_t = DHCP_CLIENT_PORT)]
        listen_port: u16,

        /// Host name to send in option 12
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Print the validated server settings
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command.unwrap_or(Commands::Server) {
        Commands::Server => {
            let settings = ServerSettings::load_or_create(&cli.config)?;
            let config = settings.validate()?;

            info!("Starting DHCP server with config: {:?}", cli.config);
            let mut server = DhcpServer::bind(config)?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::Client {
            mac,
            timeout,
            repeat,
            server_port,
            listen_port,
            hostname,
        } => {
            let config = ClientConfig {
                server_port,
                listen_port,
                mac,
                timeout: Duration::from_secs(timeout),
                repeat_count: repeat,
                options: hostname.into_iter().map(DhcpOption::Hostname).collect(),
            };
            let mut client = DhcpClient::bind(config)?;

            let result = tokio::select! {
                result = client.start() => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, aborting exchange");
                    None
                }
            };

            match result {
                Some(ack) => {
                    println!("Address:    {}", ack.yiaddr);
                    if let Some(server) = ack.server_identifier() {
                        println!("Server:     {}", server);
                    }
                    if let Some(lease_time) = ack.lease_time() {
                        println!("Lease time: {}s", lease_time);
                    }
                    for option in ack.options() {
                        match option {
                            DhcpOption::SubnetMask(mask) => println!("Netmask:    {}", mask),
                            DhcpOption::Router(routers) => println!("Routers:    {:?}", routers),
                            DhcpOption::DnsServer(dns) => println!("DNS:        {:?}", dns),
                            DhcpOption::DomainName(domain) => println!("Domain:     {}", domain),
                            _ => {}
                        }
                    }
                }
                None => warn!("No address acquired"),
            }

            Ok(())
        }
        Commands::ShowConfig => {
            let settings = ServerSettings::load_or_create(&cli.config)?;
            let config = settings.validate()?;
            let (start, end) = config.addr_range();

            println!("{}", serde_json::to_string_pretty(&settings)?);
            println!(
                "Pool: {} - {} ({} addresses), excluded {:?}",
                start,
                end,
                config.pool_size(),
                config.excluded()
            );
            Ok(())
        }
    }
}
