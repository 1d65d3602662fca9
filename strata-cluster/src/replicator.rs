//! Pull replication.
//!
//! The replicator keeps one worker task per known peer. A worker tails the
//! peer's `ConsumeStream` from offset 0 and re-produces every record to the
//! local server, so each node eventually holds a copy of every record its
//! peers hold.
//!
//! Replication is best-effort and at-least-once: records from different
//! peers interleave arbitrarily, nothing is deduplicated, and a cycle in the
//! peer graph will amplify copies. Deployments are expected to keep the
//! replication topology acyclic.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::error;

use strata_api::log_v1::log_client::LogClient;
use strata_api::log_v1::{ConsumeRequest, ProduceRequest};

use crate::error::ClusterResult;
use crate::membership::Handler;

/// Buffered records in flight between a worker's receiver and its produce
/// loop.
const RECORD_CHANNEL_CAPACITY: usize = 64;

/// Replicates records from discovered peers into the local server.
///
/// Wired to the membership layer through the [`Handler`] impl: a join spawns
/// a worker, a leave cancels it, and [`close`](Replicator::close) stops
/// everything and makes later joins no-ops.
#[derive(Debug)]
pub struct Replicator {
    /// Client for the local server; every replicated record is produced
    /// through it, so replicated writes face the same authorization as
    /// client writes.
    local: LogClient<Channel>,
    /// TLS configuration for dialing peers, when the cluster runs mTLS.
    tls: Option<ClientTlsConfig>,
    /// Fired once on close; observed by every worker.
    close_tx: watch::Sender<bool>,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Per-peer cancellation signals, keyed by peer name.
    servers: HashMap<String, watch::Sender<bool>>,
    closed: bool,
}

impl Replicator {
    /// Creates a replicator producing into `local`, dialing peers with the
    /// given TLS configuration (plaintext when `None`).
    #[must_use]
    pub fn new(local: LogClient<Channel>, tls: Option<ClientTlsConfig>) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            local,
            tls,
            close_tx,
            inner: Mutex::new(Inner {
                servers: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Number of peers currently being replicated.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.lock().unwrap().servers.len()
    }

    /// Stops all workers and ignores any later joins. Idempotent.
    pub fn close(&self) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        let _ = self.close_tx.send(true);
        Ok(())
    }
}

impl Handler for Replicator {
    /// Starts replicating from the named peer. A no-op when the replicator
    /// is closed or the peer is already known.
    ///
    /// Must be called from within a Tokio runtime.
    fn join(&self, name: &str, addr: &str) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || inner.servers.contains_key(name) {
            return Ok(());
        }

        let (leave_tx, leave_rx) = watch::channel(false);
        inner.servers.insert(name.to_string(), leave_tx);

        tokio::spawn(replicate(
            addr.to_string(),
            self.tls.clone(),
            self.local.clone(),
            leave_rx,
            self.close_tx.subscribe(),
        ));
        Ok(())
    }

    /// Stops replicating from the named peer, if it is known.
    fn leave(&self, name: &str) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(leave_tx) = inner.servers.remove(name) {
            let _ = leave_tx.send(true);
        }
        Ok(())
    }
}

/// One peer's replication worker.
///
/// Dials the peer, tails its `ConsumeStream` from offset 0 through a
/// companion receiver task, and produces each record locally. Exits on the
/// leave signal, the global close signal, or the first failure; failures
/// are logged with the peer address and never propagate.
async fn replicate(
    addr: String,
    tls: Option<ClientTlsConfig>,
    mut local: LogClient<Channel>,
    mut leave: watch::Receiver<bool>,
    mut close: watch::Receiver<bool>,
) {
    let scheme = if tls.is_some() { "https" } else { "http" };
    let endpoint = match Endpoint::from_shared(format!("{scheme}://{addr}")) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            error!(peer = %addr, error = %err, "invalid peer address");
            return;
        }
    };
    let endpoint = match tls {
        Some(tls) => match endpoint.tls_config(tls) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                error!(peer = %addr, error = %err, "invalid peer tls config");
                return;
            }
        },
        None => endpoint,
    };
    let channel = match endpoint.connect().await {
        Ok(channel) => channel,
        Err(err) => {
            error!(peer = %addr, error = %err, "failed to dial");
            return;
        }
    };

    let mut client = LogClient::new(channel);
    let mut stream = match client.consume_stream(ConsumeRequest { offset: 0 }).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            error!(peer = %addr, error = %status, "failed to consume");
            return;
        }
    };

    // Companion receiver: pulls from the stream and hands records off, so
    // the main loop can keep watching the cancellation signals. It unblocks
    // once the worker returns and the connection drops.
    let (record_tx, mut records) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
    let receive_addr = addr.clone();
    tokio::spawn(async move {
        loop {
            match stream.message().await {
                Ok(Some(response)) => {
                    if record_tx.send(response.record).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(status) => {
                    error!(peer = %receive_addr, error = %status, "failed to receive");
                    return;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = close.changed() => return,
            _ = leave.changed() => return,
            received = records.recv() => {
                let Some(record) = received else { return };
                let request = ProduceRequest { record };
                if let Err(status) = local.produce(request).await {
                    error!(peer = %addr, error = %status, "failed to produce");
                    return;
                }
            }
        }
    }
}
