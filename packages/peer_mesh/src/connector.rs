//! The connection primitive seam.
//!
//! `PeerConnector`/`PeerConnection` abstract the platform facility that
//! turns an offer/answer/candidate exchange into an open bidirectional
//! channel. NAT traversal and transport security live behind this trait.
//! `LocalConnector` is the in-memory implementation used by tests: two
//! connections pair up through a shared hub keyed by the offer's session
//! id, and the "channel" is a pair of tokio mpsc pipes.
//!
//! The channel is reliable but makes no ordering promise; sequencing is
//! restored above it (see `ordering`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::NegotiationError;
use crate::identity::PeerIdentity;
use crate::signal::{Candidate, SessionDescription};

/// Frame capacity of each in-memory channel direction.
const CHANNEL_DEPTH: usize = 64;

/// An open bidirectional channel of byte frames.
pub struct Channel {
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
}

impl Channel {
    pub fn from_parts(outbound: mpsc::Sender<Vec<u8>>, inbound: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { outbound, inbound }
    }

    pub fn into_parts(self) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.outbound, self.inbound)
    }
}

/// Factory for per-link connections.
pub trait PeerConnector: Send + Sync + 'static {
    type Conn: PeerConnection;

    /// Create the negotiation state for one (local, remote) link. Locally
    /// gathered candidates are pushed into `candidate_tx` for forwarding
    /// through the relay.
    fn create(
        &self,
        local: &PeerIdentity,
        remote: &PeerIdentity,
        candidate_tx: mpsc::UnboundedSender<Candidate>,
    ) -> Self::Conn;
}

/// One side of a connection under negotiation.
pub trait PeerConnection: Send + Sync + 'static {
    /// Produce a local offer to push to the remote side.
    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, NegotiationError>> + Send;

    /// Consume a remote offer and produce the answer.
    fn apply_offer(
        &self,
        offer: SessionDescription,
    ) -> impl Future<Output = Result<SessionDescription, NegotiationError>> + Send;

    /// Consume the remote answer to a local offer.
    fn apply_answer(
        &self,
        answer: SessionDescription,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Abandon an offer in progress (the polite side yielding in a
    /// collision).
    fn rollback(&self) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Apply remote address information. Valid in any state except closed.
    fn add_candidate(&self, candidate: Candidate) -> Result<(), NegotiationError>;

    /// Resolves once the channel reports bidirectional readiness. May be
    /// awaited once per connection; the mesh owns that single await.
    fn wait_open(&self) -> impl Future<Output = Result<Channel, NegotiationError>> + Send;

    /// Release all negotiation state. Idempotent.
    fn close(&self);
}

#[derive(Default)]
struct ConnectorHub {
    /// Channels created by an answering side, waiting for the offerer to
    /// collect its half on `apply_answer`. Keyed by session id.
    answered: HashMap<String, Channel>,
}

/// In-memory connector. Clone it to hand the same hub to every peer that
/// should be able to reach the others.
#[derive(Clone, Default)]
pub struct LocalConnector {
    hub: Arc<Mutex<ConnectorHub>>,
    next_session: Arc<AtomicU64>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerConnector for LocalConnector {
    type Conn = LocalConnection;

    fn create(
        &self,
        local: &PeerIdentity,
        remote: &PeerIdentity,
        candidate_tx: mpsc::UnboundedSender<Candidate>,
    ) -> LocalConnection {
        LocalConnection {
            hub: self.hub.clone(),
            next_session: self.next_session.clone(),
            local: local.id.clone(),
            remote: remote.id.clone(),
            candidate_tx,
            pending_offer: Mutex::new(None),
            open_slot: Mutex::new(None),
            open_waiter: Mutex::new(None),
            is_open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

/// One side of an in-memory connection.
pub struct LocalConnection {
    hub: Arc<Mutex<ConnectorHub>>,
    next_session: Arc<AtomicU64>,
    local: String,
    remote: String,
    candidate_tx: mpsc::UnboundedSender<Candidate>,
    /// Session id of our outstanding local offer, if any.
    pending_offer: Mutex<Option<String>>,
    open_slot: Mutex<Option<oneshot::Sender<Channel>>>,
    open_waiter: Mutex<Option<oneshot::Receiver<Channel>>>,
    is_open: AtomicBool,
    closed: AtomicBool,
}

impl LocalConnection {
    fn ensure_live(&self) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(NegotiationError::LinkClosed)
        } else {
            Ok(())
        }
    }

    /// Lazily create the oneshot used to hand the channel to `wait_open`.
    fn arm_open_slot(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.open_slot.lock().expect("open slot poisoned");
        if slot.is_none() && !self.is_open.load(Ordering::SeqCst) {
            let (tx, rx) = oneshot::channel();
            *slot = Some(tx);
            *self.open_waiter.lock().expect("open waiter poisoned") = Some(rx);
        }
    }

    fn resolve_open(&self, channel: Channel) {
        self.is_open.store(true, Ordering::SeqCst);
        if let Some(tx) = self.open_slot.lock().expect("open slot poisoned").take() {
            let _ = tx.send(channel);
        }
    }

    fn session_field(desc: &SessionDescription) -> Result<String, NegotiationError> {
        desc.0
            .get("session")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| NegotiationError::Connector("description missing session id".into()))
    }
}

impl PeerConnection for LocalConnection {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_live()?;
        self.arm_open_slot();
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        let session = format!("{}>{}#{}", self.local, self.remote, n);
        *self.pending_offer.lock().expect("pending offer poisoned") = Some(session.clone());
        // One synthetic candidate per offer keeps the trickle path alive.
        let _ = self.candidate_tx.send(Candidate(json!({
            "session": session,
            "endpoint": self.local,
        })));
        Ok(SessionDescription(json!({
            "session": session,
            "renegotiation": self.is_open.load(Ordering::SeqCst),
        })))
    }

    async fn apply_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.ensure_live()?;
        let session = Self::session_field(&offer)?;

        // Renegotiating an open connection keeps the existing channel.
        if self.is_open.load(Ordering::SeqCst) {
            debug!(session = %session, "renegotiation offer answered in place");
            return Ok(SessionDescription(json!({ "session": session })));
        }

        self.arm_open_slot();
        let (to_answerer_tx, to_answerer_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (to_offerer_tx, to_offerer_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let offerer_half = Channel::from_parts(to_answerer_tx, to_offerer_rx);
        let answerer_half = Channel::from_parts(to_offerer_tx, to_answerer_rx);

        self.hub
            .lock()
            .expect("connector hub poisoned")
            .answered
            .insert(session.clone(), offerer_half);

        let _ = self.candidate_tx.send(Candidate(json!({
            "session": session,
            "endpoint": self.local,
        })));
        self.resolve_open(answerer_half);
        Ok(SessionDescription(json!({ "session": session })))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        let session = Self::session_field(&answer)?;
        self.pending_offer
            .lock()
            .expect("pending offer poisoned")
            .take();

        let half = self
            .hub
            .lock()
            .expect("connector hub poisoned")
            .answered
            .remove(&session);
        match half {
            Some(channel) => {
                self.resolve_open(channel);
                Ok(())
            }
            // Renegotiation answers carry no channel.
            None if self.is_open.load(Ordering::SeqCst) => Ok(()),
            None => Err(NegotiationError::Connector(format!(
                "answer for unknown session {session}"
            ))),
        }
    }

    async fn rollback(&self) -> Result<(), NegotiationError> {
        self.ensure_live()?;
        let abandoned = self
            .pending_offer
            .lock()
            .expect("pending offer poisoned")
            .take();
        if let Some(session) = abandoned {
            debug!(session = %session, "local offer rolled back");
        }
        Ok(())
    }

    fn add_candidate(&self, _candidate: Candidate) -> Result<(), NegotiationError> {
        self.ensure_live()
    }

    async fn wait_open(&self) -> Result<Channel, NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NegotiationError::LinkClosed);
        }
        self.arm_open_slot();
        let waiter = self
            .open_waiter
            .lock()
            .expect("open waiter poisoned")
            .take()
            .ok_or_else(|| NegotiationError::Connector("wait_open already consumed".into()))?;
        waiter.await.map_err(|_| NegotiationError::LinkClosed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the sender wakes a pending wait_open with LinkClosed.
        self.open_slot.lock().expect("open slot poisoned").take();
        if let Some(session) = self
            .pending_offer
            .lock()
            .expect("pending offer poisoned")
            .take()
        {
            self.hub
                .lock()
                .expect("connector hub poisoned")
                .answered
                .remove(&session);
        }
    }
}
