//! Cluster membership plumbing.
//!
//! The discovery transport (a gossip layer, a static seed list, an
//! orchestrator) is external to this crate; its contract is a stream of
//! [`MemberEvent`]s. [`Membership`] pumps those events to a registered
//! [`Handler`], which is how the replicator learns about peers coming and
//! going.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::error::ClusterResult;

/// A component that needs to know when a peer joins or leaves the cluster.
pub trait Handler: Send + Sync + 'static {
    /// A peer with the given cluster-unique name is reachable at `addr`.
    fn join(&self, name: &str, addr: &str) -> ClusterResult<()>;

    /// The named peer has left the cluster.
    fn leave(&self, name: &str) -> ClusterResult<()>;
}

/// A membership change reported by the discovery transport.
#[derive(Debug, Clone)]
pub enum MemberEvent {
    /// A peer joined; `rpc_addr` is the address its log service listens on.
    Join {
        /// Cluster-unique peer name.
        name: String,
        /// The peer's RPC address (`host:port`).
        rpc_addr: String,
    },
    /// A peer left the cluster.
    Leave {
        /// Cluster-unique peer name.
        name: String,
    },
}

/// Dispatches membership events from the discovery transport to a handler.
///
/// The pump runs until every [`event sender`](Membership::event_sender) is
/// dropped. Handler errors are logged with the member's name and do not stop
/// the pump.
#[derive(Debug)]
pub struct Membership {
    events: mpsc::Sender<MemberEvent>,
}

impl Membership {
    /// Spawns the event pump for `handler`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        let (events, mut rx) = mpsc::channel::<MemberEvent>(64);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    MemberEvent::Join { name, rpc_addr } => {
                        if let Err(err) = handler.join(&name, &rpc_addr) {
                            error!(name = %name, rpc_addr = %rpc_addr, error = %err, "failed to join");
                        }
                    }
                    MemberEvent::Leave { name } => {
                        if let Err(err) = handler.leave(&name) {
                            error!(name = %name, error = %err, "failed to leave");
                        }
                    }
                }
            }
        });
        Self { events }
    }

    /// Returns a sender the discovery transport feeds events into.
    #[must_use]
    pub fn event_sender(&self) -> mpsc::Sender<MemberEvent> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl Handler for Recording {
        fn join(&self, name: &str, addr: &str) -> ClusterResult<()> {
            self.calls.lock().unwrap().push(format!("join {name} {addr}"));
            Ok(())
        }

        fn leave(&self, name: &str) -> ClusterResult<()> {
            self.calls.lock().unwrap().push(format!("leave {name}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_reach_handler_in_order() {
        let handler = Arc::new(Recording::default());
        let membership = Membership::new(Arc::clone(&handler) as Arc<dyn Handler>);
        let events = membership.event_sender();

        events
            .send(MemberEvent::Join {
                name: "b".into(),
                rpc_addr: "127.0.0.1:9400".into(),
            })
            .await
            .unwrap();
        events
            .send(MemberEvent::Leave { name: "b".into() })
            .await
            .unwrap();

        // The pump is asynchronous; wait for both events to land.
        for _ in 0..50 {
            if handler.calls.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let calls = handler.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            ["join b 127.0.0.1:9400".to_string(), "leave b".to_string()]
        );
    }
}
