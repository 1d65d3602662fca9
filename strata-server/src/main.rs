//! Strata log server binary.
//!
//! Wires the pieces together: opens the log, loads the ACL policy and TLS
//! material, starts the replicator behind the membership pump, and serves
//! the gRPC API until interrupted.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tonic::transport::{Endpoint, Server};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use strata_api::log_v1::log_client::LogClient;
use strata_api::log_v1::log_server::LogServer;
use strata_cluster::{Handler, MemberEvent, Membership, Replicator};
use strata_log::{Config, Log};
use strata_server::{authenticate, tls, Authorizer, LogService};

/// Strata distributed commit-log server.
#[derive(Parser, Debug)]
#[command(name = "strata-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory for segment files.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Address to listen on for gRPC.
    #[arg(long, default_value = "127.0.0.1:8400")]
    listen_addr: SocketAddr,

    /// This node's cluster-unique name.
    #[arg(long, default_value = "strata-0")]
    node_name: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Maximum bytes per store file (0 uses the built-in default).
    #[arg(long, default_value_t = 0)]
    max_store_bytes: u64,

    /// Maximum bytes per index file (0 uses the built-in default).
    #[arg(long, default_value_t = 0)]
    max_index_bytes: u64,

    /// Server certificate in PEM form; enables TLS together with
    /// --server-key.
    #[arg(long, requires = "server_key")]
    server_cert: Option<PathBuf>,

    /// Server private key in PEM form.
    #[arg(long, requires = "server_cert")]
    server_key: Option<PathBuf>,

    /// CA bundle used to verify client certificates (enables mTLS).
    #[arg(long)]
    client_ca: Option<PathBuf>,

    /// CA bundle used to verify peers when replicating.
    #[arg(long)]
    peer_ca: Option<PathBuf>,

    /// Client certificate presented to peers when replicating.
    #[arg(long, requires = "peer_key")]
    peer_cert: Option<PathBuf>,

    /// Private key for --peer-cert.
    #[arg(long, requires = "peer_cert")]
    peer_key: Option<PathBuf>,

    /// Domain name expected on peer certificates.
    #[arg(long)]
    peer_domain: Option<String>,

    /// ACL policy file (CSV of subject, object, action rules). Omitting it
    /// allows every subject every action.
    #[arg(long)]
    acl_policy: Option<PathBuf>,

    /// Static peer to replicate from, as name=host:port. Repeatable. The
    /// cluster's discovery transport feeds the same join/leave events at
    /// runtime.
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::default()
        .with_max_store_bytes(args.max_store_bytes)
        .with_max_index_bytes(args.max_index_bytes);
    let log = Arc::new(Log::open(&args.data_dir, config)?);
    info!(
        data_dir = %args.data_dir.display(),
        lowest = log.lowest_offset()?,
        highest = log.highest_offset()?,
        "opened log"
    );

    let authorizer = Arc::new(match &args.acl_policy {
        Some(path) => Authorizer::from_policy_file(path)?,
        None => Authorizer::allow_all(),
    });

    // TLS configuration for outbound replication dials, shared with the
    // loopback client so replicated records pass through the same
    // authenticated path as client writes.
    let peer_tls = if args.peer_ca.is_some() || args.peer_cert.is_some() {
        let identity = match (&args.peer_cert, &args.peer_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        };
        Some(tls::client_tls(
            args.peer_ca.as_deref(),
            identity,
            args.peer_domain.as_deref(),
        )?)
    } else {
        None
    };

    let local_scheme = if peer_tls.is_some() { "https" } else { "http" };
    let mut local_endpoint =
        Endpoint::from_shared(format!("{local_scheme}://{}", args.listen_addr))?;
    if let Some(tls) = &peer_tls {
        local_endpoint = local_endpoint.tls_config(tls.clone())?;
    }
    let local_client = LogClient::new(local_endpoint.connect_lazy());

    let replicator = Arc::new(Replicator::new(local_client, peer_tls));
    let membership = Membership::new(Arc::clone(&replicator) as Arc<dyn Handler>);
    let events = membership.event_sender();
    for peer in &args.peers {
        let Some((name, addr)) = peer.split_once('=') else {
            return Err(format!("invalid --peer {peer}, expected name=host:port").into());
        };
        events
            .send(MemberEvent::Join {
                name: name.to_string(),
                rpc_addr: addr.to_string(),
            })
            .await?;
    }

    let service = LogService::new(Arc::clone(&log), authorizer);
    let mut builder = Server::builder();
    if let (Some(cert), Some(key)) = (&args.server_cert, &args.server_key) {
        builder = builder.tls_config(tls::server_tls(cert, key, args.client_ca.as_deref())?)?;
        info!(mtls = args.client_ca.is_some(), "TLS enabled");
    }

    info!(addr = %args.listen_addr, node = %args.node_name, "strata server listening");
    builder
        .add_service(LogServer::with_interceptor(service, authenticate))
        .serve_with_shutdown(args.listen_addr, async {
            let _ = signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = replicator.close();
    log.close()?;
    info!("shut down cleanly");
    Ok(())
}
