//! Relay client: a thin channel to a rendezvous service that forwards
//! signal envelopes by recipient id. Carries no application data.
//!
//! `RelayTransport`/`RelaySession` are the seam for a real rendezvous
//! service; `LocalRelay` is the in-process implementation used by tests
//! and single-host deployments. Reconnection/backoff is a transport
//! concern and lives behind the trait, not here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::identity::PeerIdentity;
use crate::signal::SignalEnvelope;

/// A rendezvous service that can hand out per-identity sessions.
pub trait RelayTransport: Send + Sync + 'static {
    type Session: RelaySession;

    /// Establish a session authenticated as `identity`.
    fn open(
        &self,
        identity: &PeerIdentity,
    ) -> impl Future<Output = Result<Self::Session, RelayError>> + Send;
}

/// One open channel to the rendezvous service.
pub trait RelaySession: Send + Sync + 'static {
    /// Best-effort send. Fails immediately with `RelayError::Disconnected`
    /// when the channel is down. Signaling is only useful while both ends
    /// are actively negotiating, so there is no local queue; retry policy
    /// belongs to the caller.
    fn send(&self, envelope: &SignalEnvelope) -> Result<(), RelayError>;

    /// Hand over the inbound envelope stream. Envelopes arrive in delivery
    /// order; malformed blobs were already logged and dropped inside the
    /// transport. Yields `None` once per session.
    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<SignalEnvelope>>;

    fn is_connected(&self) -> bool;

    /// Tear down the session. Idempotent.
    fn close(&self);
}

#[derive(Debug)]
struct Registration {
    raw_tx: mpsc::UnboundedSender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

/// In-process rendezvous hub. Routes JSON blobs between registered
/// identities; the per-session decode task parses them back into typed
/// envelopes, dropping anything malformed.
#[derive(Clone, Debug, Default)]
pub struct LocalRelay {
    peers: Arc<Mutex<HashMap<String, Registration>>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill a registered session, as if the peer's relay connection
    /// dropped. Its pending sends start failing with `Disconnected`.
    pub fn drop_peer(&self, id: &str) {
        let mut peers = self.peers.lock().expect("relay registry poisoned");
        if let Some(reg) = peers.remove(id) {
            reg.connected.store(false, Ordering::SeqCst);
            info!(peer = %id, "relay session dropped");
        }
    }

    fn route(&self, to: &str, bytes: Vec<u8>) {
        let peers = self.peers.lock().expect("relay registry poisoned");
        match peers.get(to) {
            Some(reg) => {
                // Recipient vanishing mid-send is the same as unknown: drop.
                let _ = reg.raw_tx.send(bytes);
            }
            None => debug!(to = %to, "no such peer registered, envelope dropped"),
        }
    }
}

impl RelayTransport for LocalRelay {
    type Session = LocalRelaySession;

    async fn open(&self, identity: &PeerIdentity) -> Result<LocalRelaySession, RelayError> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let connected = Arc::new(AtomicBool::new(true));

        {
            let mut peers = self.peers.lock().expect("relay registry poisoned");
            if peers.contains_key(&identity.id) {
                return Err(RelayError::Rejected(format!(
                    "identity {} already registered",
                    identity.id
                )));
            }
            peers.insert(
                identity.id.clone(),
                Registration {
                    raw_tx,
                    connected: connected.clone(),
                },
            );
        }

        // Decode task: raw blobs → typed envelopes, in arrival order.
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel::<SignalEnvelope>();
        let me = identity.id.clone();
        tokio::spawn(async move {
            while let Some(bytes) = raw_rx.recv().await {
                match serde_json::from_slice::<SignalEnvelope>(&bytes) {
                    Ok(env) => {
                        if inbox_tx.send(env).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(peer = %me, error = %e, "malformed signal envelope, dropped");
                    }
                }
            }
        });

        info!(peer = %identity.id, "relay session opened");
        Ok(LocalRelaySession {
            hub: self.clone(),
            id: identity.id.clone(),
            connected,
            inbox: Mutex::new(Some(inbox_rx)),
        })
    }
}

/// A `LocalRelay` session for one identity.
#[derive(Debug)]
pub struct LocalRelaySession {
    hub: LocalRelay,
    id: String,
    connected: Arc<AtomicBool>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<SignalEnvelope>>>,
}

impl RelaySession for LocalRelaySession {
    fn send(&self, envelope: &SignalEnvelope) -> Result<(), RelayError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RelayError::Disconnected);
        }
        let bytes = match serde_json::to_vec(envelope) {
            Ok(bytes) => bytes,
            // Same treatment as inbound malformed blobs: the envelope is
            // dropped, the session stays usable.
            Err(e) => {
                warn!(kind = %envelope.kind(), error = %e, "failed to encode signal envelope, dropped");
                return Ok(());
            }
        };
        self.hub.route(envelope.to_id(), bytes);
        Ok(())
    }

    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<SignalEnvelope>> {
        self.inbox.lock().expect("inbox slot poisoned").take()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.hub.drop_peer(&self.id);
    }
}
