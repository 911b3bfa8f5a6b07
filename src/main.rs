//! Skyport CLI - expose local services through an ephemeral cloud host
//!
//! Creates a remote host, links it to this machine and forwards the host's
//! public ports to local services until interrupted.

mod doctor;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skyport_cloud::{CloudError, CommandKeypairGenerator, DigitalOceanConfig, DigitalOceanProvisioner};
use skyport_manager::{Collaborators, LinkKind, ManagerError, ManagerOptions, RetryPolicy, TunnelManager};
use skyport_proto::{format_ports, parse_ports, tunnel_name};
use skyport_relay::{RelayProxy, SessionMode};
use skyport_remote::{RemoteExec, RemoteShell, StateDir};
use std::net::{IpAddr, Ipv4Addr};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_FAILURE: u8 = 1;
const EXIT_ESTABLISH: u8 = 2;
const EXIT_MONITOR: u8 = 3;

/// Skyport - expose local services on a public cloud address
#[derive(Parser, Debug)]
#[command(name = "skyport")]
#[command(about = "Skyport - expose local services on a public cloud address")]
#[command(version = env!("SKYPORT_RELEASE"))]
#[command(long_version = concat!(
    env!("SKYPORT_RELEASE"),
    " (",
    env!("SKYPORT_COMMIT"),
    ", built ",
    env!("SKYPORT_BUILT_AT"),
    ")"
))]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a remote host and forward its public ports to local services
    #[command(long_about = r#"
Create an ephemeral remote host, link it to this machine and forward its
public ports to local services. Runs until interrupted; Ctrl+C destroys
the remote host.

EXAMPLES:
  # Expose a local web server on ports 80 and 443
  skyport up --ports 80,443

  # Public port 80 to local port 8080 on another LAN machine
  skyport up --name web --ports 80:8080 --dest-ip 192.168.1.20

  # Keep DNS stable with a pre-reserved floating IP
  skyport up --name web --ports 443 --floating-ip 198.51.100.7

ENVIRONMENT VARIABLES:
  DIGITALOCEAN_API_TOKEN  Cloud provider API token (required)
  SKYPORT_NAME            Tunnel name
  SKYPORT_PORTS           Service ports
  SKYPORT_DEST_IP         Address of the local services
  SKYPORT_FLOATING_IP     Floating IP to attach
  SKYPORT_REGION          Provider region
  SKYPORT_SIZE            Provider instance size
  SKYPORT_IMAGE           Provider OS image
    "#)]
    Up {
        /// Tunnel name, also used for the remote host
        #[arg(short, long, env = "SKYPORT_NAME", default_value = "skyport")]
        name: String,

        /// Comma-separated service ports, e.g. 80,443/TCP,53/UDP,8443:443
        #[arg(short, long, env = "SKYPORT_PORTS", default_value = "80/TCP,443/TCP")]
        ports: String,

        /// Address of the local services traffic is forwarded to
        #[arg(short, long, env = "SKYPORT_DEST_IP", default_value = "127.0.0.1")]
        dest_ip: IpAddr,

        /// Pre-reserved floating IP to attach to the remote host
        #[arg(short, long, env = "SKYPORT_FLOATING_IP")]
        floating_ip: Option<Ipv4Addr>,

        /// Link type: wireguard or ssh
        #[arg(long, default_value = "wireguard")]
        link: LinkKind,

        /// Seconds between heartbeat probes
        #[arg(long, default_value = "10")]
        heartbeat_interval: u64,

        /// Consecutive failed probes before giving up
        #[arg(long, default_value = "3")]
        heartbeat_retries: u32,

        /// Relay connections concurrently, at most this many per port
        #[arg(long)]
        concurrent_sessions: Option<usize>,
    },

    /// Open an interactive shell on the remote host
    Ssh {
        #[arg(short, long, env = "SKYPORT_NAME", default_value = "skyport")]
        name: String,
    },

    /// Print the public address of the remote host
    Ip {
        #[arg(short, long, env = "SKYPORT_NAME", default_value = "skyport")]
        name: String,
    },

    /// Check that required tools and credentials are available
    Doctor,

    /// Run only the relay workers; assumes the link is already up
    Proxy {
        #[arg(short, long, env = "SKYPORT_PORTS", default_value = "80/TCP,443/TCP")]
        ports: String,

        #[arg(short, long, env = "SKYPORT_DEST_IP", default_value = "127.0.0.1")]
        dest_ip: IpAddr,

        /// Address the relay listeners bind to
        #[arg(short, long, default_value = "127.0.0.1")]
        listen_ip: IpAddr,

        #[arg(long)]
        concurrent_sessions: Option<usize>,
    },
}

/// Setup logging: RUST_LOG wins, then --log-level
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn session_mode(concurrent_sessions: Option<usize>) -> SessionMode {
    match concurrent_sessions {
        Some(limit) => SessionMode::Concurrent { limit },
        None => SessionMode::Sequential,
    }
}

/// Map a failure to the documented exit status
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<ManagerError>() {
        return match e {
            ManagerError::Provisioning(_) | ManagerError::TunnelEstablish(_) => EXIT_ESTABLISH,
            ManagerError::HeartbeatFailure { .. } => EXIT_MONITOR,
            _ => EXIT_FAILURE,
        };
    }
    EXIT_FAILURE
}

#[allow(clippy::too_many_arguments)]
async fn up(
    name: String,
    ports: String,
    dest_ip: IpAddr,
    floating_ip: Option<Ipv4Addr>,
    link: LinkKind,
    heartbeat_interval: u64,
    heartbeat_retries: u32,
    concurrent_sessions: Option<usize>,
) -> Result<()> {
    let config = DigitalOceanConfig::from_env()?;
    let services = parse_ports(&ports).context("Invalid --ports")?;
    let interval = Duration::from_secs(heartbeat_interval);

    let options = ManagerOptions::new(&name, services)
        .with_destination(dest_ip)
        .with_floating_address(floating_ip)
        .with_link(link)
        .with_session_mode(session_mode(concurrent_sessions))
        .with_heartbeat(RetryPolicy::heartbeat(interval, heartbeat_retries));
    let tunnel = options.name.clone();

    let provisioner = DigitalOceanProvisioner::new(config)?;
    let collaborators = Collaborators::new(Arc::new(provisioner), Arc::new(CommandKeypairGenerator::new()));
    let mut manager = TunnelManager::new(options, collaborators)?;

    info!(tunnel = %tunnel, link = %link, ports = %format_ports(manager.services()), "Creating tunnel");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = tokio::select! {
        result = manager.up() => Some(result),
        _ = &mut ctrl_c => None,
    };

    match outcome {
        None => {
            warn!("Interrupted during setup, tearing down");
            manager.cleanup().await?;
            return Ok(());
        }
        Some(Err(e)) => {
            error!("Failed bringing up tunnel: {}", e);
            warn!("Attempting to exit gracefully...");
            if let Err(cleanup) = manager.cleanup().await {
                error!("Cleanup failed: {}", cleanup);
            }
            return Err(e.into());
        }
        Some(Ok(())) => {}
    }

    if let Some(endpoint) = manager.endpoint() {
        info!("Server ready! IPv4 address: {}", endpoint.public_address());
    }
    match manager.relay_address() {
        Some(relay) => info!(relay = %relay, destination = %dest_ip, "Relaying tunnel traffic"),
        None => info!(destination = %dest_ip, "Remote host forwards directly"),
    }
    if tunnel == "skyport" {
        info!("Try logging in with 'skyport ssh'");
    } else {
        info!("Try logging in with 'skyport ssh --name {}'", name);
    }
    info!("Press Ctrl+C to tear down the tunnel and destroy the server");

    if let Err(e) = manager.monitor().await {
        error!("Tunnel monitoring failed: {}", e);
        if let Err(cleanup) = manager.cleanup().await {
            error!("Cleanup failed: {}", cleanup);
        }
        return Err(e.into());
    }

    info!("Skyport stopped");
    Ok(())
}

fn load_endpoint(name: &str) -> Result<(StateDir, skyport_remote::EndpointRecord)> {
    let state = StateDir::for_tunnel(&tunnel_name(name))?;
    let record = state.read_endpoint().with_context(|| {
        format!(
            "Server '{}' not found. Try running 'skyport up' first, or pass --name=<service>",
            state.name()
        )
    })?;
    Ok((state, record))
}

async fn proxy(
    ports: String,
    dest_ip: IpAddr,
    listen_ip: IpAddr,
    concurrent_sessions: Option<usize>,
) -> Result<()> {
    warn!("Subcommand 'proxy' assumes the tunnel already exists");
    let services = parse_ports(&ports).context("Invalid --ports")?;

    let mut handle = RelayProxy::new(listen_ip, dest_ip, &services)
        .with_mode(session_mode(concurrent_sessions))
        .spawn()
        .await;
    if handle.workers().is_empty() {
        anyhow::bail!("No relay ports could be started");
    }
    info!("Relaying {} port(s), press Ctrl+C to stop", handle.workers().len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");
    handle.shutdown();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Up {
            name,
            ports,
            dest_ip,
            floating_ip,
            link,
            heartbeat_interval,
            heartbeat_retries,
            concurrent_sessions,
        } => {
            up(
                name,
                ports,
                dest_ip,
                floating_ip,
                link,
                heartbeat_interval,
                heartbeat_retries,
                concurrent_sessions,
            )
            .await
        }
        Commands::Ssh { name } => {
            let (state, record) = load_endpoint(&name)?;
            debug!(address = %record.public_address(), "Opening shell");
            RemoteShell::for_state_dir(&state, IpAddr::V4(record.public_address()))
                .interactive()
                .await?;
            Ok(())
        }
        Commands::Ip { name } => {
            let (_, record) = load_endpoint(&name)?;
            println!("{}", record.public_address());
            Ok(())
        }
        Commands::Doctor => {
            info!("Running doctor, to determine platform support...");
            let report = doctor::run().await;
            if !report.is_ok() {
                anyhow::bail!("Platform is missing requirements: {}", report.missing().join(", "));
            }
            info!("Platform support looks good! Ready to rock.");
            Ok(())
        }
        Commands::Proxy {
            ports,
            dest_ip,
            listen_ip,
            concurrent_sessions,
        } => proxy(ports, dest_ip, listen_ip, concurrent_sessions).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(CloudError::MissingCredential(var)) = e.downcast_ref::<CloudError>() {
                error!("{} is not set; export it before running 'skyport up'", var);
                return ExitCode::from(EXIT_FAILURE);
            }
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
