use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use pxeboot::reporter::{EventReporter, LogReporter};
use pxeboot::utils::{describe_interface, find_interface};
use pxeboot::{DhcpServer, HttpServer, ServerConfig, TftpServer};

#[derive(Parser)]
#[command(name = "pxeboot")]
#[command(about = "PXE boot server - DHCP, TFTP and HTTP for network boot")]
struct Args {
    /// Config file with `key = value` lines
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network interface to serve on (e.g., eth0)
    #[arg(short, long)]
    interface: Option<String>,

    /// Address of this server on the boot network
    #[arg(long)]
    server_ip: Option<Ipv4Addr>,

    /// First address handed out to clients
    #[arg(long)]
    range_start: Option<Ipv4Addr>,

    /// Last address handed out to clients
    #[arg(long)]
    range_end: Option<Ipv4Addr>,

    #[arg(long)]
    subnet_mask: Option<Ipv4Addr>,

    /// Boot file name given to clients
    #[arg(short, long)]
    boot_file: Option<String>,

    /// TFTP server name advertised to clients (defaults to the server address)
    #[arg(long)]
    tftp_server: Option<String>,

    #[arg(long)]
    tftp_root: Option<PathBuf>,

    #[arg(long)]
    http_root: Option<PathBuf>,

    #[arg(long)]
    http_port: Option<u16>,
}

impl Args {
    /// Command-line flags win over every other source.
    fn apply(self, config: &mut ServerConfig) {
        if let Some(v) = self.interface {
            config.interface = v;
        }
        if let Some(v) = self.server_ip {
            config.server_ip = v;
        }
        if let Some(v) = self.range_start {
            config.range_start = v;
        }
        if let Some(v) = self.range_end {
            config.range_end = v;
        }
        if let Some(v) = self.subnet_mask {
            config.subnet_mask = v;
        }
        if let Some(v) = self.boot_file {
            config.boot_file = v;
        }
        if let Some(v) = self.tftp_server {
            config.tftp_server = Some(v);
        }
        if let Some(v) = self.tftp_root {
            config.tftp_root = v;
        }
        if let Some(v) = self.http_root {
            config.http_root = v;
        }
        if let Some(v) = self.http_port {
            config.http_port = v;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    run(config)
}

fn run(config: ServerConfig) -> Result<()> {
    let interface = find_interface(&config.interface)?;
    info!("Serving on {}", describe_interface(&interface));

    for dir in [&config.tftp_root, &config.http_root] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let reporter: Arc<dyn EventReporter> = Arc::new(LogReporter::new());
    let leases = Arc::new(config.lease_allocator()?);

    let dhcp = DhcpServer::new(config.dhcp_config(), Arc::clone(&leases), reporter.clone());
    let tftp = TftpServer::new(&config.tftp_root, config.tftp_bind_addr(), reporter);
    let http = HttpServer::new(&config.http_root, config.http_bind_addr());

    // Bind everything up front so a port conflict stops startup.
    let dhcp_socket = dhcp.bind()?;
    let tftp_socket = tftp.bind()?;
    let http_listener = http.bind()?;

    let (first, last) = leases.range();
    info!(
        "Leasing {} - {} ({} addresses, mask {}), boot file {}",
        first,
        last,
        leases.capacity(),
        config.subnet_mask,
        config.boot_file
    );

    install_shutdown_handler([dhcp.running_flag(), tftp.running_flag(), http.running_flag()])?;

    let handles = vec![
        spawn_service("dhcp", move || dhcp.serve(dhcp_socket))?,
        spawn_service("tftp", move || tftp.serve(tftp_socket))?,
        spawn_service("http", move || http.serve(http_listener))?,
    ];

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Service failed: {:#}", e),
            Err(_) => error!("Service thread panicked"),
        }
    }

    info!("pxeboot stopped with {} leases", leases.len());
    for lease in leases.leases() {
        debug!("  {} -> {}", lease.mac, lease.ip);
    }
    Ok(())
}

/// Clear every running flag on SIGINT/SIGTERM. In-flight transfers are not
/// waited for.
fn install_shutdown_handler(flags: [Arc<AtomicBool>; 3]) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Shutting down");
        for flag in &flags {
            flag.store(false, Ordering::SeqCst);
        }
    })
    .context("Failed to install signal handler")
}

fn spawn_service<F>(name: &str, body: F) -> Result<JoinHandle<Result<()>>>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("Failed to spawn {} thread", name))
}
