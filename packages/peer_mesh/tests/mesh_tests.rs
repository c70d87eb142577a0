//! End-to-end mesh tests: several MeshManager instances wired through one
//! in-process relay and connector hub.
//!
//! These tests prove the full pipeline works across real task boundaries:
//! relay session → signaling inbox → negotiation → open channel → ordered
//! delivery and discovery.

use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, timeout};

use peer_mesh::relay::LocalRelaySession;
use peer_mesh::{
    LocalConnector, LocalRelay, MeshConfig, MeshError, MeshEvent, MeshManager, Payload,
    PeerIdentity, PeerRef, RelayError, RelayTransport,
};

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn peer(id: &str) -> PeerIdentity {
    PeerIdentity::new(id, id.to_uppercase())
}

fn payload(text: &str) -> Payload {
    let mut map = Payload::new();
    map.insert("text".into(), json!(text));
    map
}

/// One relay + one connector hub shared by every mesh in a test.
#[derive(Clone, Default)]
struct TestNet {
    relay: LocalRelay,
    connector: LocalConnector,
}

impl TestNet {
    fn mesh(&self) -> MeshManager<LocalRelay, LocalConnector> {
        self.mesh_with_timeout(Duration::from_secs(3))
    }

    fn mesh_with_timeout(&self, connect_timeout: Duration) -> MeshManager<LocalRelay, LocalConnector> {
        MeshManager::new(
            self.relay.clone(),
            self.connector.clone(),
            MeshConfig {
                connect_timeout,
                ..MeshConfig::default()
            },
        )
    }
}

/// Start a mesh registered as `id`, with its event stream subscribed
/// before anything can happen.
async fn open_mesh(
    net: &TestNet,
    id: &str,
) -> (
    MeshManager<LocalRelay, LocalConnector>,
    tokio::sync::broadcast::Receiver<MeshEvent>,
) {
    let mesh = net.mesh();
    let events = mesh.subscribe();
    mesh.open_channels(peer(id)).await.expect("open_channels failed");
    (mesh, events)
}

/// Drain events until one matches `predicate`.
async fn wait_for(
    events: &mut tokio::sync::broadcast::Receiver<MeshEvent>,
    predicate: impl Fn(&MeshEvent) -> bool,
) -> MeshEvent {
    loop {
        let event = timeout(TEST_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed");
        if predicate(&event) {
            return event;
        }
    }
}

fn connected_to(id: &str) -> impl Fn(&MeshEvent) -> bool + '_ {
    move |e| matches!(e, MeshEvent::Connected { peer } if peer.id == id)
}

fn disconnected_from(id: &str) -> impl Fn(&MeshEvent) -> bool + '_ {
    move |e| matches!(e, MeshEvent::Disconnected { peer } if peer.id == id)
}

/// Poll until `mesh` has an open link to every id in `expected`.
async fn wait_for_peers(mesh: &MeshManager<LocalRelay, LocalConnector>, expected: &[&str]) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let mut ids: Vec<String> = mesh.peers().await.into_iter().map(|p| p.id).collect();
        ids.sort();
        let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        want.sort();
        if ids == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("peers never converged: have {ids:?}, want {want:?}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn two_peers_connect_and_exchange_messages() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut a_events, connected_to("b")).await;
    wait_for(&mut b_events, connected_to("a")).await;

    // a → b
    a.send(payload("hello"), Some("b")).await;
    let received = wait_for(&mut b_events, |e| {
        matches!(e, MeshEvent::MessageReceived { from, .. } if from.id == "a")
    })
    .await;
    match received {
        MeshEvent::MessageReceived { payload, .. } => {
            assert_eq!(payload["text"], "hello");
            // Sequencing is internal; the application payload is clean.
            assert!(payload.get("seq").is_none());
        }
        other => panic!("wrong event: {other:?}"),
    }

    // The sender sees its own message locally.
    let sent = wait_for(&mut a_events, |e| matches!(e, MeshEvent::MessageSent { .. })).await;
    match sent {
        MeshEvent::MessageSent { from, payload } => {
            assert_eq!(from.id, "a");
            assert_eq!(payload["text"], "hello");
        }
        other => panic!("wrong event: {other:?}"),
    }

    // b → a over the same link
    b.send(payload("hi back"), Some("a")).await;
    wait_for(&mut a_events, |e| {
        matches!(e, MeshEvent::MessageReceived { from, payload } if from.id == "b" && payload["text"] == "hi back")
    })
    .await;
}

#[tokio::test]
async fn connect_with_is_idempotent_under_concurrency() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (_b, mut b_events) = open_mesh(&net, "b").await;

    let peer_b = peer("b");
    let (r1, r2) = tokio::join!(a.connect_with(&peer_b), a.connect_with(&peer_b));
    r1.expect("first connect failed");
    r2.expect("second connect failed");

    wait_for(&mut a_events, connected_to("b")).await;
    wait_for(&mut b_events, connected_to("a")).await;

    // Exactly one link, and a later connect resolves immediately.
    assert_eq!(a.peers().await.len(), 1);
    a.connect_with(&peer("b")).await.expect("repeat connect failed");
    assert_eq!(a.peers().await.len(), 1);
}

#[tokio::test]
async fn connect_times_out_against_a_silent_peer() {
    let net = TestNet::default();
    let a = net.mesh_with_timeout(Duration::from_millis(200));
    let mut a_events = a.subscribe();
    a.open_channels(peer("a")).await.expect("open_channels failed");

    // "ghost" never registers with the relay, so the offer goes nowhere.
    let err = a
        .connect_with(&peer("ghost"))
        .await
        .expect_err("connect should time out");
    assert!(matches!(err, MeshError::Timeout(id) if id == "ghost"));

    // The half-built link is fully released.
    wait_for(&mut a_events, disconnected_from("ghost")).await;
    assert!(a.peers().await.is_empty());
}

#[tokio::test]
async fn handshake_requests_an_offer_from_the_target() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (b, mut b_events) = open_mesh(&net, "b").await;

    // b asks a to initiate; a offers back and the link opens.
    b.request_offer(&PeerRef { id: "a".into() })
        .await
        .expect("request_offer failed");

    wait_for(&mut a_events, connected_to("b")).await;
    wait_for(&mut b_events, connected_to("a")).await;

    a.send(payload("ping"), Some("b")).await;
    wait_for(&mut b_events, |e| {
        matches!(e, MeshEvent::MessageReceived { from, .. } if from.id == "a")
    })
    .await;
}

#[tokio::test]
async fn three_peer_mesh_converges_through_discovery() {
    let net = TestNet::default();
    let (a, _a_events) = open_mesh(&net, "a").await;
    let (b, _b_events) = open_mesh(&net, "b").await;
    let (c, _c_events) = open_mesh(&net, "c").await;

    // Two pairwise connections; the third edge comes from discovery.
    a.connect_with(&peer("b")).await.expect("a-b connect failed");
    c.connect_with(&peer("a")).await.expect("c-a connect failed");

    wait_for_peers(&a, &["b", "c"]).await;
    wait_for_peers(&b, &["a", "c"]).await;
    wait_for_peers(&c, &["a", "b"]).await;
}

#[tokio::test]
async fn broadcast_reaches_every_open_link() {
    let net = TestNet::default();
    let (a, _a_events) = open_mesh(&net, "a").await;
    let (_b, mut b_events) = open_mesh(&net, "b").await;
    let (_c, mut c_events) = open_mesh(&net, "c").await;

    a.connect_with(&peer("b")).await.expect("a-b connect failed");
    a.connect_with(&peer("c")).await.expect("a-c connect failed");

    a.send(payload("to everyone"), None).await;

    for events in [&mut b_events, &mut c_events] {
        wait_for(events, |e| {
            matches!(e, MeshEvent::MessageReceived { from, payload } if from.id == "a" && payload["text"] == "to everyone")
        })
        .await;
    }
}

#[tokio::test]
async fn send_to_unknown_peer_is_a_noop() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (_b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut a_events, connected_to("b")).await;

    // Nothing crashes, nothing is delivered, but the local event still fires.
    a.send(payload("into the void"), Some("nobody")).await;
    wait_for(&mut a_events, |e| matches!(e, MeshEvent::MessageSent { .. })).await;

    wait_for(&mut b_events, connected_to("a")).await;
    sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        b_events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn ordered_delivery_across_the_wire() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (_b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut a_events, connected_to("b")).await;

    for i in 0..10 {
        a.send(payload(&format!("msg-{i}")), Some("b")).await;
    }

    let mut texts = Vec::new();
    while texts.len() < 10 {
        let event = wait_for(&mut b_events, |e| {
            matches!(e, MeshEvent::MessageReceived { .. })
        })
        .await;
        if let MeshEvent::MessageReceived { payload, .. } = event {
            texts.push(payload["text"].as_str().unwrap_or_default().to_string());
        }
    }
    let expected: Vec<String> = (0..10).map(|i| format!("msg-{i}")).collect();
    assert_eq!(texts, expected);
}

#[tokio::test]
async fn remote_close_surfaces_as_disconnected() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut a_events, connected_to("b")).await;
    wait_for(&mut b_events, connected_to("a")).await;

    b.close_channels().await;

    wait_for(&mut a_events, disconnected_from("b")).await;
    assert!(a.peers().await.is_empty());
}

#[tokio::test]
async fn renegotiation_glare_leaves_the_link_working() {
    let net = TestNet::default();
    let (a, mut a_events) = open_mesh(&net, "a").await;
    let (b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut a_events, connected_to("b")).await;
    wait_for(&mut b_events, connected_to("a")).await;

    // Offers cross: the impolite side's pass wins, the polite side yields.
    let (ra, rb) = tokio::join!(a.renegotiate("b"), b.renegotiate("a"));
    ra.expect("a renegotiate failed");
    rb.expect("b renegotiate failed");

    // Still exactly one link each way, and it still carries traffic.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(a.peers().await.len(), 1);
    assert_eq!(b.peers().await.len(), 1);

    a.send(payload("after glare"), Some("b")).await;
    wait_for(&mut b_events, |e| {
        matches!(e, MeshEvent::MessageReceived { payload, .. } if payload["text"] == "after glare")
    })
    .await;
}

#[tokio::test]
async fn close_channels_cancels_pending_connects() {
    let net = TestNet::default();
    let a = std::sync::Arc::new(net.mesh());
    a.open_channels(peer("a")).await.expect("open_channels failed");

    let pending = {
        let a = a.clone();
        tokio::spawn(async move { a.connect_with(&peer("ghost")).await })
    };
    // Let the connect register its link before we tear everything down.
    sleep(Duration::from_millis(50)).await;
    a.close_channels().await;

    let result = timeout(TEST_TIMEOUT, pending)
        .await
        .expect("pending connect never resolved")
        .expect("join failed");
    assert!(matches!(result, Err(MeshError::Cancelled)));
}

#[tokio::test]
async fn close_channels_is_idempotent_and_reopenable() {
    let net = TestNet::default();
    let (a, _a_events) = open_mesh(&net, "a").await;
    let (_b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut b_events, connected_to("a")).await;

    a.close_channels().await;
    a.close_channels().await;
    wait_for(&mut b_events, disconnected_from("a")).await;

    // The identity is free again; a fresh session works.
    a.open_channels(peer("a")).await.expect("reopen failed");
    a.connect_with(&peer("b")).await.expect("reconnect failed");
    wait_for(&mut b_events, connected_to("a")).await;
}

#[tokio::test]
async fn connect_after_close_fails() {
    let net = TestNet::default();
    let (a, _a_events) = open_mesh(&net, "a").await;
    a.close_channels().await;
    let err = a
        .connect_with(&peer("b"))
        .await
        .expect_err("connect on a closed mesh should fail");
    assert!(matches!(err, MeshError::AlreadyClosed));
}

#[tokio::test]
async fn bridged_meshes_converge_without_mutual_offer_deadlock() {
    let net = TestNet::default();
    let (a, _a_events) = open_mesh(&net, "a").await;
    let (b, _b_events) = open_mesh(&net, "b").await;
    let (c, _c_events) = open_mesh(&net, "c").await;
    let (d, _d_events) = open_mesh(&net, "d").await;

    // Two separate pairs first.
    a.connect_with(&peer("b")).await.expect("a-b connect failed");
    c.connect_with(&peer("d")).await.expect("c-d connect failed");

    // Bridging them makes b and d learn of each other at the same moment
    // (b from the c-b open, d from the a-d open). The discovery tie-break
    // must give that edge exactly one initiator.
    a.connect_with(&peer("c")).await.expect("a-c connect failed");

    wait_for_peers(&a, &["b", "c", "d"]).await;
    wait_for_peers(&b, &["a", "c", "d"]).await;
    wait_for_peers(&c, &["a", "b", "d"]).await;
    wait_for_peers(&d, &["a", "b", "c"]).await;
}

#[tokio::test]
async fn broadcast_skips_links_still_negotiating() {
    let net = TestNet::default();
    let a = std::sync::Arc::new(net.mesh_with_timeout(Duration::from_secs(10)));
    let mut a_events = a.subscribe();
    a.open_channels(peer("a")).await.expect("open_channels failed");
    let (_b, mut b_events) = open_mesh(&net, "b").await;
    let (_c, mut c_events) = open_mesh(&net, "c").await;

    a.connect_with(&peer("b")).await.expect("a-b connect failed");
    a.connect_with(&peer("c")).await.expect("a-c connect failed");

    // "mute" holds a relay session but never answers, so its link sits in
    // negotiating for the whole test.
    let _mute = net.relay.open(&peer("mute")).await.expect("mute open failed");
    let pending = {
        let a = a.clone();
        tokio::spawn(async move { a.connect_with(&peer("mute")).await })
    };
    sleep(Duration::from_millis(50)).await;
    assert_eq!(a.peers().await.len(), 2);

    a.send(payload("open links only"), None).await;

    for events in [&mut b_events, &mut c_events] {
        wait_for(events, |e| {
            matches!(e, MeshEvent::MessageReceived { from, payload } if from.id == "a" && payload["text"] == "open links only")
        })
        .await;
    }
    wait_for(&mut a_events, |e| matches!(e, MeshEvent::MessageSent { .. })).await;

    pending.abort();
}

#[tokio::test]
async fn concurrent_opens_keep_exactly_one_session() {
    // A relay that yields before registering, so both opens get past the
    // pre-flight check and race for the session slot.
    #[derive(Clone)]
    struct SlowRelay(LocalRelay);

    impl RelayTransport for SlowRelay {
        type Session = LocalRelaySession;

        async fn open(&self, identity: &PeerIdentity) -> Result<LocalRelaySession, RelayError> {
            tokio::task::yield_now().await;
            self.0.open(identity).await
        }
    }

    let net = TestNet::default();
    let mesh = MeshManager::new(
        SlowRelay(net.relay.clone()),
        net.connector.clone(),
        MeshConfig::default(),
    );

    let (r1, r2) = tokio::join!(mesh.open_channels(peer("a1")), mesh.open_channels(peer("a2")));
    assert!(
        r1.is_ok() ^ r2.is_ok(),
        "exactly one open should win: {r1:?} / {r2:?}"
    );

    let (winner, loser) = if r1.is_ok() { ("a1", "a2") } else { ("a2", "a1") };
    // The losing session was released, freeing its identity on the relay;
    // the winning session is still registered.
    assert!(net.relay.open(&peer(loser)).await.is_ok());
    assert!(matches!(
        net.relay.open(&peer(winner)).await,
        Err(RelayError::Rejected(_))
    ));

    // And a third open is turned away up front.
    assert!(mesh.open_channels(peer("a3")).await.is_err());
}

#[tokio::test]
async fn one_failing_link_does_not_touch_the_others() {
    let net = TestNet::default();
    let a = net.mesh_with_timeout(Duration::from_millis(200));
    let mut a_events = a.subscribe();
    a.open_channels(peer("a")).await.expect("open_channels failed");
    let (_b, mut b_events) = open_mesh(&net, "b").await;

    a.connect_with(&peer("b")).await.expect("connect failed");
    wait_for(&mut a_events, connected_to("b")).await;

    // A doomed connect runs to timeout while the a-b link keeps working.
    let err = a
        .connect_with(&peer("ghost"))
        .await
        .expect_err("ghost connect should time out");
    assert!(matches!(err, MeshError::Timeout(_)));

    a.send(payload("still here"), Some("b")).await;
    wait_for(&mut b_events, |e| {
        matches!(e, MeshEvent::MessageReceived { payload, .. } if payload["text"] == "still here")
    })
    .await;
    assert_eq!(a.peers().await.len(), 1);
}
