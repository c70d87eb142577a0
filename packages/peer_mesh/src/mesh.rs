//! MeshManager: the peer directory and the public mesh surface.
//!
//! One instance per participant. It owns the relay session, drives the
//! per-link negotiation through the connection primitive, and fans
//! ordered application messages in and out of open links. All link state
//! lives in one directory behind an async mutex; the signaling inbox is a
//! single task, so envelopes for a link are handled strictly in arrival
//! order and the negotiation machine is never re-entered.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::connector::{Channel, PeerConnection, PeerConnector};
use crate::error::{MeshError, RelayError};
use crate::identity::{PeerIdentity, PeerRef};
use crate::negotiation::{LinkRole, LinkState, OfferDisposition, offer_disposition};
use crate::ordering::OrderedBuffer;
use crate::relay::{RelaySession, RelayTransport};
use crate::signal::{Candidate, ChannelFrame, DataFrame, Payload, SignalEnvelope};

/// Lifecycle and message events observed by the application.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    Connected { peer: PeerIdentity },
    Disconnected { peer: PeerIdentity },
    MessageReceived { from: PeerIdentity, payload: Payload },
    /// Emitted locally on every `send`, regardless of delivery, so the
    /// application can render its own action optimistically.
    MessageSent { from: PeerIdentity, payload: Payload },
}

/// Why a link left the directory before (or after) reaching open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkFail {
    Timeout,
    Unreachable,
    Remote,
    Cancelled,
}

/// Progress signal for `connect_with` waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Negotiating,
    Open,
    Failed(LinkFail),
}

/// Per-peer connection state. Exactly one per remote peer; removal from
/// the directory is the only "closed" representation.
struct Link<P: PeerConnection> {
    peer: PeerIdentity,
    role: LinkRole,
    state: LinkState,
    conn: Arc<P>,
    /// Populated once the channel opens.
    channel_tx: Option<mpsc::Sender<Vec<u8>>>,
    /// Sequence number of the last payload sent on this link.
    last_sent_seq: u64,
    phase_tx: watch::Sender<LinkPhase>,
    cancel: CancellationToken,
}

struct Shared<S: RelaySession, C: PeerConnector> {
    connector: C,
    config: MeshConfig,
    links: Mutex<HashMap<String, Link<C::Conn>>>,
    events: broadcast::Sender<MeshEvent>,
    session: std::sync::Mutex<Option<Arc<S>>>,
    identity: std::sync::Mutex<Option<PeerIdentity>>,
    cancel: std::sync::Mutex<CancellationToken>,
}

/// The mesh: relay bootstrap, per-peer links, ordered send/receive.
pub struct MeshManager<R: RelayTransport, C: PeerConnector> {
    relay: R,
    shared: Arc<Shared<R::Session, C>>,
}

impl<R: RelayTransport, C: PeerConnector> MeshManager<R, C> {
    pub fn new(relay: R, connector: C, config: MeshConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(Shared {
            connector,
            config,
            links: Mutex::new(HashMap::new()),
            events,
            session: std::sync::Mutex::new(None),
            identity: std::sync::Mutex::new(None),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
        });
        Self { relay, shared }
    }

    /// Subscribe to mesh events. Subscribers joining late miss earlier
    /// events; subscribe before `open_channels` for the full stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.shared.events.subscribe()
    }

    /// Open the relay session as `identity` and start accepting inbound
    /// connect requests.
    pub async fn open_channels(&self, identity: PeerIdentity) -> Result<(), MeshError> {
        if self
            .shared
            .session
            .lock()
            .expect("session slot poisoned")
            .is_some()
        {
            return Err(RelayError::Rejected("channels already open".into()).into());
        }

        let session = Arc::new(self.relay.open(&identity).await?);
        let inbox = session
            .take_inbox()
            .ok_or(MeshError::Relay(RelayError::ConnectFailed(
                "relay session has no inbox".into(),
            )))?;

        let cancel = CancellationToken::new();
        {
            // Re-check after the await: a concurrent open may have claimed
            // the slot while our relay call was in flight. The loser
            // releases its fresh session instead of overwriting the winner.
            let mut slot = self.shared.session.lock().expect("session slot poisoned");
            if slot.is_some() {
                drop(slot);
                session.close();
                return Err(RelayError::Rejected("channels already open".into()).into());
            }
            *self.shared.identity.lock().expect("identity slot poisoned") =
                Some(identity.clone());
            *self.shared.cancel.lock().expect("cancel slot poisoned") = cancel.clone();
            *slot = Some(session);
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            shared.inbox_loop(inbox, cancel).await;
        });

        info!(peer = %identity.id, "mesh channels open");
        Ok(())
    }

    /// Connect to a specific peer. Idempotent: an existing open or
    /// negotiating link resolves immediately. Suspends until the link
    /// opens or fails terminally.
    pub async fn connect_with(&self, peer: &PeerIdentity) -> Result<(), MeshError> {
        self.shared.connect_with(peer).await
    }

    /// Ask `peer` to initiate the offer toward us, for callers whose
    /// connection primitive cannot produce the first message. We end up on
    /// the polite side of the resulting link; watch for `Connected` (or
    /// call `connect_with`, which is idempotent) for readiness. No-op if a
    /// link to `peer` already exists.
    pub async fn request_offer(&self, peer: &PeerRef) -> Result<(), MeshError> {
        self.shared.request_offer(peer).await
    }

    /// Run another offer/answer pass on an open link (e.g. to add a
    /// transport capability). Collisions follow the same polite/impolite
    /// rule as initial negotiation.
    pub async fn renegotiate(&self, peer_id: &str) -> Result<(), MeshError> {
        self.shared.renegotiate(peer_id).await
    }

    /// Send a payload to one peer (`to = Some(id)`; unknown peers are a
    /// silent no-op, since signaling races are expected) or to every open
    /// link (`to = None`). Non-blocking; always emits `MessageSent` locally.
    pub async fn send(&self, payload: Payload, to: Option<&str>) {
        self.shared.send(payload, to).await;
    }

    /// Peers with an open channel, in no particular order.
    pub async fn peers(&self) -> Vec<PeerIdentity> {
        let links = self.shared.links.lock().await;
        links
            .values()
            .filter(|l| l.state.is_open())
            .map(|l| l.peer.clone())
            .collect()
    }

    /// Close every link and the relay session. Pending `connect_with`
    /// calls fail with `Cancelled`. Idempotent; `open_channels` may be
    /// called again afterwards for a fresh session.
    pub async fn close_channels(&self) {
        self.shared
            .cancel
            .lock()
            .expect("cancel slot poisoned")
            .cancel();

        let mut links = self.shared.links.lock().await;
        for (_, link) in links.drain() {
            link.cancel.cancel();
            link.conn.close();
            let _ = link.phase_tx.send(LinkPhase::Failed(LinkFail::Cancelled));
            let _ = self.shared.events.send(MeshEvent::Disconnected {
                peer: link.peer.clone(),
            });
        }
        drop(links);

        let session = self
            .shared
            .session
            .lock()
            .expect("session slot poisoned")
            .take();
        self.shared
            .identity
            .lock()
            .expect("identity slot poisoned")
            .take();
        if let Some(session) = session {
            session.close();
            info!("mesh channels closed");
        }
    }
}

impl<S: RelaySession, C: PeerConnector> Shared<S, C> {
    fn current_session(&self) -> Result<Arc<S>, MeshError> {
        self.session
            .lock()
            .expect("session slot poisoned")
            .clone()
            .ok_or(MeshError::AlreadyClosed)
    }

    fn local_identity(&self) -> Option<PeerIdentity> {
        self.identity.lock().expect("identity slot poisoned").clone()
    }

    fn root_cancel(&self) -> CancellationToken {
        self.cancel.lock().expect("cancel slot poisoned").clone()
    }

    async fn connect_with(self: &Arc<Self>, peer: &PeerIdentity) -> Result<(), MeshError> {
        let mut phase_rx = match self.start_offer_link(peer).await? {
            Some(rx) => rx,
            // Link already exists (open or negotiating): success by contract.
            None => return Ok(()),
        };

        loop {
            let phase = *phase_rx.borrow_and_update();
            match phase {
                LinkPhase::Open => return Ok(()),
                LinkPhase::Failed(fail) => return Err(self.map_fail(peer, fail)),
                LinkPhase::Negotiating => {}
            }
            if phase_rx.changed().await.is_err() {
                // Link vanished without a verdict; the root token tells
                // shutdown apart from negotiation loss.
                return if self.root_cancel().is_cancelled() {
                    Err(MeshError::Cancelled)
                } else {
                    Err(MeshError::Timeout(peer.id.clone()))
                };
            }
        }
    }

    fn map_fail(&self, peer: &PeerIdentity, fail: LinkFail) -> MeshError {
        match fail {
            LinkFail::Timeout => MeshError::Timeout(peer.id.clone()),
            LinkFail::Unreachable | LinkFail::Remote => {
                MeshError::PeerUnreachable(peer.id.clone())
            }
            LinkFail::Cancelled => MeshError::Cancelled,
        }
    }

    /// Create an impolite link toward `peer` and push the first offer.
    /// Returns `None` when a link already exists (idempotent path).
    async fn start_offer_link(
        self: &Arc<Self>,
        peer: &PeerIdentity,
    ) -> Result<Option<watch::Receiver<LinkPhase>>, MeshError> {
        let session = self.current_session()?;
        let me = self.local_identity().ok_or(MeshError::AlreadyClosed)?;

        let mut links = self.links.lock().await;
        if links.contains_key(&peer.id) {
            return Ok(None);
        }

        let conn = self.build_connection(&session, &me, peer);
        let offer = conn
            .create_offer()
            .await
            .map_err(|_| MeshError::PeerUnreachable(peer.id.clone()))?;
        session
            .send(&SignalEnvelope::Offer {
                from: me,
                to: PeerRef::from(peer),
                payload: offer,
            })
            .map_err(|_| MeshError::PeerUnreachable(peer.id.clone()))?;

        let rx = self.insert_link(
            &mut links,
            peer.clone(),
            LinkRole::Impolite,
            LinkState::Negotiating { making_offer: true },
            conn,
        );
        info!(peer = %peer.id, role = "impolite", "link negotiating");
        Ok(Some(rx))
    }

    /// Wire a fresh connection to the candidate forwarder.
    fn build_connection(
        self: &Arc<Self>,
        session: &Arc<S>,
        me: &PeerIdentity,
        peer: &PeerIdentity,
    ) -> Arc<C::Conn> {
        let (cand_tx, mut cand_rx) = mpsc::unbounded_channel::<Candidate>();
        let conn = Arc::new(self.connector.create(me, peer, cand_tx));

        let session = session.clone();
        let from = me.clone();
        let to = PeerRef::from(peer);
        tokio::spawn(async move {
            while let Some(payload) = cand_rx.recv().await {
                let env = SignalEnvelope::Candidate {
                    from: from.clone(),
                    to: to.clone(),
                    payload,
                };
                if let Err(e) = session.send(&env) {
                    // Dropped candidates are a transient negotiation detail,
                    // retried by the primitive, never surfaced to callers.
                    debug!(to = %env.to_id(), error = %e, "candidate not forwarded");
                }
            }
        });

        conn
    }

    /// Register the link and spawn its open-watcher.
    fn insert_link(
        self: &Arc<Self>,
        links: &mut HashMap<String, Link<C::Conn>>,
        peer: PeerIdentity,
        role: LinkRole,
        state: LinkState,
        conn: Arc<C::Conn>,
    ) -> watch::Receiver<LinkPhase> {
        let (phase_tx, phase_rx) = watch::channel(LinkPhase::Negotiating);
        let cancel = self.root_cancel().child_token();

        links.insert(
            peer.id.clone(),
            Link {
                peer: peer.clone(),
                role,
                state,
                conn: conn.clone(),
                channel_tx: None,
                last_sent_seq: 0,
                phase_tx,
                cancel: cancel.clone(),
            },
        );

        let shared = self.clone();
        tokio::spawn(async move {
            shared.watch_open(peer, conn, cancel).await;
        });

        phase_rx
    }

    /// Await channel readiness for one link, bounded by the connect
    /// timeout. Every link gets exactly one watcher.
    async fn watch_open(self: Arc<Self>, peer: PeerIdentity, conn: Arc<C::Conn>, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = timeout(self.config.connect_timeout, conn.wait_open()) => {
                match result {
                    Ok(Ok(channel)) => self.link_opened(&peer, channel).await,
                    Ok(Err(e)) => {
                        warn!(peer = %peer.id, error = %e, "negotiation failed");
                        self.close_link(&peer.id, LinkFail::Unreachable).await;
                    }
                    Err(_) => {
                        info!(peer = %peer.id, "negotiation timed out");
                        self.close_link(&peer.id, LinkFail::Timeout).await;
                    }
                }
            }
        }
    }

    /// The channel is up: register it, notify waiters, start the reader,
    /// and exchange peer directories for mesh discovery.
    async fn link_opened(self: &Arc<Self>, peer: &PeerIdentity, channel: Channel) {
        let (frame_tx, frame_rx) = channel.into_parts();
        let known_peers;
        {
            let mut links = self.links.lock().await;

            // Snapshot of peers that were already connected, for discovery.
            known_peers = links
                .values()
                .filter(|l| l.state.is_open() && l.peer.id != peer.id)
                .map(|l| l.peer.clone())
                .collect::<Vec<_>>();

            let Some(link) = links.get_mut(&peer.id) else {
                // Closed while the channel was opening; nothing to register.
                return;
            };
            link.state = LinkState::Open {
                making_offer: false,
            };
            link.channel_tx = Some(frame_tx.clone());
            let _ = link.phase_tx.send(LinkPhase::Open);

            let reader_cancel = link.cancel.clone();
            let shared = self.clone();
            let reader_peer = peer.clone();
            tokio::spawn(async move {
                shared.link_reader(reader_peer, frame_rx, reader_cancel).await;
            });
        }

        info!(peer = %peer.id, "link open");
        let _ = self.events.send(MeshEvent::Connected { peer: peer.clone() });

        if !known_peers.is_empty() {
            let frame = ChannelFrame::Peers { peers: known_peers };
            match serde_json::to_vec(&frame) {
                Ok(bytes) => {
                    if frame_tx.try_send(bytes).is_err() {
                        debug!(peer = %peer.id, "discovery frame dropped, channel busy");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode discovery frame"),
            }
        }
    }

    /// Per-link reader: reorder data frames, expand the mesh on discovery
    /// frames, and surface remote close.
    async fn link_reader(
        self: Arc<Self>,
        peer: PeerIdentity,
        mut frame_rx: mpsc::Receiver<Vec<u8>>,
        cancel: CancellationToken,
    ) {
        let mut buffer = OrderedBuffer::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frame_rx.recv() => {
                    let Some(bytes) = frame else {
                        info!(peer = %peer.id, "channel closed by remote");
                        self.close_link(&peer.id, LinkFail::Remote).await;
                        break;
                    };
                    match serde_json::from_slice::<ChannelFrame>(&bytes) {
                        Ok(ChannelFrame::Data(DataFrame { seq, payload })) => {
                            for ready in buffer.accept(seq, payload) {
                                let _ = self.events.send(MeshEvent::MessageReceived {
                                    from: peer.clone(),
                                    payload: ready,
                                });
                            }
                        }
                        Ok(ChannelFrame::Peers { peers }) => {
                            self.discover(peers).await;
                        }
                        Err(e) => {
                            warn!(peer = %peer.id, error = %e, "malformed channel frame dropped");
                        }
                    }
                }
            }
        }
    }

    /// Connect to every advertised peer we do not already hold.
    ///
    /// Two peers can discover each other at the same moment (each learned
    /// the other's id from a different link). Two locally initiated offers
    /// would both be impolite and cancel each other out, so the edge is
    /// tie-broken by id: the lesser id offers, the greater id asks the
    /// other side to offer. Exactly one side of any pair initiates.
    async fn discover(self: &Arc<Self>, peers: Vec<PeerIdentity>) {
        let me = match self.local_identity() {
            Some(me) => me,
            None => return,
        };
        for peer in peers {
            if peer.id == me.id {
                continue;
            }
            let held = self.links.lock().await.contains_key(&peer.id);
            if held {
                continue;
            }
            let shared = self.clone();
            if me.id > peer.id {
                info!(peer = %peer.id, "discovered peer, requesting offer");
                tokio::spawn(async move {
                    if let Err(e) = shared.request_offer(&PeerRef::from(&peer)).await {
                        warn!(peer = %peer.id, error = %e, "discovery offer request failed");
                    }
                });
            } else {
                info!(peer = %peer.id, "discovered peer, connecting");
                tokio::spawn(async move {
                    if let Err(e) = shared.connect_with(&peer).await {
                        warn!(peer = %peer.id, error = %e, "discovery connect failed");
                    }
                });
            }
        }
    }

    async fn request_offer(self: &Arc<Self>, peer: &PeerRef) -> Result<(), MeshError> {
        let session = self.current_session()?;
        let me = self.local_identity().ok_or(MeshError::AlreadyClosed)?;
        if self.links.lock().await.contains_key(&peer.id) {
            return Ok(());
        }
        session
            .send(&SignalEnvelope::Handshake {
                from: me,
                to: peer.clone(),
            })
            .map_err(|_| MeshError::PeerUnreachable(peer.id.clone()))?;
        debug!(peer = %peer.id, "offer requested");
        Ok(())
    }

    async fn renegotiate(self: &Arc<Self>, peer_id: &str) -> Result<(), MeshError> {
        let session = self.current_session()?;
        let me = self.local_identity().ok_or(MeshError::AlreadyClosed)?;

        let mut links = self.links.lock().await;
        let link = links
            .get_mut(peer_id)
            .filter(|l| l.state.is_open())
            .ok_or_else(|| MeshError::PeerUnreachable(peer_id.to_string()))?;

        link.state.set_making_offer(true);
        let offer = link
            .conn
            .create_offer()
            .await
            .map_err(|_| MeshError::PeerUnreachable(peer_id.to_string()))?;
        session
            .send(&SignalEnvelope::Offer {
                from: me,
                to: PeerRef {
                    id: peer_id.to_string(),
                },
                payload: offer,
            })
            .map_err(|_| MeshError::PeerUnreachable(peer_id.to_string()))?;
        debug!(peer = %peer_id, "renegotiation offer sent");
        Ok(())
    }

    async fn send(self: &Arc<Self>, payload: Payload, to: Option<&str>) {
        {
            let mut links = self.links.lock().await;
            match to {
                Some(peer_id) => {
                    if let Some(link) = links.get_mut(peer_id) {
                        Self::send_on_link(link, &payload);
                    } else {
                        // Unknown peer: signaling/application races are
                        // expected, not errors.
                        debug!(peer = %peer_id, "send to unknown peer, dropped");
                    }
                }
                None => {
                    for link in links.values_mut() {
                        Self::send_on_link(link, &payload);
                    }
                }
            }
        }

        if let Some(me) = self.local_identity() {
            let _ = self.events.send(MeshEvent::MessageSent { from: me, payload });
        }
    }

    fn send_on_link(link: &mut Link<C::Conn>, payload: &Payload) {
        if !link.state.is_open() {
            return;
        }
        let Some(tx) = &link.channel_tx else { return };
        link.last_sent_seq += 1;
        let frame = ChannelFrame::Data(DataFrame {
            seq: link.last_sent_seq,
            payload: payload.clone(),
        });
        match serde_json::to_vec(&frame) {
            Ok(bytes) => {
                if tx.try_send(bytes).is_err() {
                    warn!(peer = %link.peer.id, seq = link.last_sent_seq, "outbound channel full, frame dropped");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode data frame"),
        }
    }

    /// Remove a link, release its negotiation state, and tell everyone.
    /// A failure on one link never touches any other link.
    async fn close_link(self: &Arc<Self>, peer_id: &str, fail: LinkFail) {
        let removed = self.links.lock().await.remove(peer_id);
        if let Some(link) = removed {
            link.cancel.cancel();
            link.conn.close();
            let _ = link.phase_tx.send(LinkPhase::Failed(fail));
            info!(peer = %peer_id, reason = ?fail, "link closed");
            let _ = self.events.send(MeshEvent::Disconnected { peer: link.peer });
        }
    }

    /// Signaling inbox: one task, strict arrival order.
    async fn inbox_loop(
        self: Arc<Self>,
        mut inbox: mpsc::UnboundedReceiver<SignalEnvelope>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                env = inbox.recv() => {
                    match env {
                        Some(env) => self.handle_envelope(env).await,
                        None => {
                            info!("relay inbox closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_envelope(self: &Arc<Self>, env: SignalEnvelope) {
        match env {
            SignalEnvelope::Handshake { from, .. } => {
                // The sender asked us to initiate; we become the impolite side.
                let held = self.links.lock().await.contains_key(&from.id);
                if held {
                    debug!(peer = %from.id, "handshake for existing link ignored");
                    return;
                }
                if let Err(e) = self.start_offer_link(&from).await {
                    warn!(peer = %from.id, error = %e, "handshake-initiated offer failed");
                }
            }
            SignalEnvelope::Offer { from, payload, .. } => {
                self.handle_offer(from, payload).await;
            }
            SignalEnvelope::Answer { from, payload, .. } => {
                let mut links = self.links.lock().await;
                let Some(link) = links.get_mut(&from.id) else {
                    debug!(peer = %from.id, "answer for unknown link dropped");
                    return;
                };
                match link.conn.apply_answer(payload).await {
                    Ok(()) => link.state.set_making_offer(false),
                    Err(e) => {
                        warn!(peer = %from.id, error = %e, "failed to apply answer");
                        drop(links);
                        self.close_link(&from.id, LinkFail::Unreachable).await;
                    }
                }
            }
            SignalEnvelope::Candidate { from, payload, .. } => {
                let links = self.links.lock().await;
                match links.get(&from.id) {
                    Some(link) => {
                        if let Err(e) = link.conn.add_candidate(payload) {
                            debug!(peer = %from.id, error = %e, "candidate not applied");
                        }
                    }
                    // No link (never existed, or already closed): drop
                    // silently rather than guess reconnection intent.
                    None => debug!(peer = %from.id, "candidate for unknown link dropped"),
                }
            }
        }
    }

    async fn handle_offer(
        self: &Arc<Self>,
        from: PeerIdentity,
        offer: crate::signal::SessionDescription,
    ) {
        let session = match self.current_session() {
            Ok(s) => s,
            Err(_) => return,
        };
        let Some(me) = self.local_identity() else {
            return;
        };

        let mut links = self.links.lock().await;

        let conn = match links.get_mut(&from.id) {
            Some(link) => {
                match offer_disposition(link.role, link.state) {
                    OfferDisposition::Ignore => {
                        debug!(peer = %from.id, "glare: competing offer ignored");
                        return;
                    }
                    OfferDisposition::Accept { rollback } => {
                        if rollback {
                            if let Err(e) = link.conn.rollback().await {
                                warn!(peer = %from.id, error = %e, "rollback failed");
                                drop(links);
                                self.close_link(&from.id, LinkFail::Unreachable).await;
                                return;
                            }
                            link.state.set_making_offer(false);
                            debug!(peer = %from.id, "glare: yielded to remote offer");
                        }
                        link.conn.clone()
                    }
                }
            }
            None => {
                // Unsolicited offer for an unknown link: we are polite.
                let conn = self.build_connection(&session, &me, &from);
                self.insert_link(
                    &mut links,
                    from.clone(),
                    LinkRole::Polite,
                    LinkState::Negotiating {
                        making_offer: false,
                    },
                    conn.clone(),
                );
                info!(peer = %from.id, role = "polite", "link negotiating");
                conn
            }
        };

        match conn.apply_offer(offer).await {
            Ok(answer) => {
                let env = SignalEnvelope::Answer {
                    from: me,
                    to: PeerRef::from(&from),
                    payload: answer,
                };
                if let Err(e) = session.send(&env) {
                    warn!(peer = %from.id, error = %e, "failed to send answer");
                    drop(links);
                    self.close_link(&from.id, LinkFail::Unreachable).await;
                }
            }
            Err(e) => {
                warn!(peer = %from.id, error = %e, "failed to apply offer");
                drop(links);
                self.close_link(&from.id, LinkFail::Unreachable).await;
            }
        }
    }
}
