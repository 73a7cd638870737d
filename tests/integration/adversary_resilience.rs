use ed25519_dalek::SigningKey;
use edge_mesh::{EdgeRegistry, FirstAvailable, InMemoryTransport, KeyStore, MeshContext};
use edgetrust_adversary::{GossipInspector, RadioControl, RadioOffAttack, RadioOffSchedule};
use edgetrust_node::{spawn_mesh_task, LoggingWatchdog, SimulatedRadio};
use edgetrust_types::NodeAddr;
use hyper::{Body, Client, Method, Request, StatusCode};
use std::time::{Duration, Instant};

const MAX_CONTENT: usize = 16;
const SIGNATURE_SIZE: usize = 8;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn eavesdrop_endpoint_enforces_length_window() {
    init_logging();

    let inspector = GossipInspector::new(MAX_CONTENT, SIGNATURE_SIZE);
    let (addr, server) = edgetrust_adversary::bind("127.0.0.1:0".parse().unwrap(), "/trust", inspector).unwrap();
    let server = tokio::spawn(server);
    let client = Client::new();
    let uri = format!("http://{}/trust", addr);

    for len in 0..=MAX_CONTENT + SIGNATURE_SIZE + 2 {
        let req = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .body(Body::from(vec![0xab; len]))
            .unwrap();
        let status = client.request(req).await.unwrap().status();

        let expected = if len == 0 || len > MAX_CONTENT + SIGNATURE_SIZE {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::NO_CONTENT
        };
        assert_eq!(status, expected, "payload length {}", len);
    }

    server.abort();
}

#[tokio::test]
async fn radio_off_holds_the_scheduler_for_its_duration() {
    init_logging();

    let radio = SimulatedRadio::new();
    let observer = radio.clone();
    let schedule = RadioOffSchedule::new(Duration::from_millis(5), Duration::from_millis(30));
    let mut attack = RadioOffAttack::new(radio, schedule)
        .with_watchdog(LoggingWatchdog::default(), Duration::from_millis(5))
        .unwrap();

    // a cooperative task that wants to run every millisecond
    let ticker = tokio::spawn(async {
        let mut longest = Duration::ZERO;
        let mut last = Instant::now();
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            longest = longest.max(last.elapsed());
            last = Instant::now();
        }
        longest
    });

    attack.run_cycles(1).await;
    assert!(observer.is_on());
    assert_eq!(observer.toggles(), 2);
    assert!(attack.watchdog().unwrap().feeds() >= 5);

    let longest_gap = ticker.await.unwrap();
    assert!(longest_gap >= Duration::from_millis(30), "ticker was never starved: {:?}", longest_gap);
}

#[tokio::test]
async fn associations_stay_consistent_under_radio_off() {
    init_logging();

    let context = MeshContext::new(
        KeyStore::new(4),
        EdgeRegistry::new(4, 4),
        Box::new(FirstAvailable),
        InMemoryTransport::new(),
        "/",
    );
    let (mesh, task) = spawn_mesh_task(context);
    let edge = NodeAddr::link_local(1);
    let key = SigningKey::from_bytes(&[1; 32]).verifying_key().to_bytes();
    mesh.announce_key(edge, key).await.unwrap();
    mesh.advertise(edge, "edge-1".into(), vec!["infer".into(), "store".into()])
        .await
        .unwrap();

    let schedule = RadioOffSchedule::new(Duration::from_millis(3), Duration::from_millis(2));
    let attack = tokio::spawn(RadioOffAttack::new(SimulatedRadio::new(), schedule).run());

    for round in 0..20 {
        let capability = if round % 2 == 0 { "infer" } else { "store" };
        let delegation = mesh.delegate(capability.to_string()).await.unwrap().unwrap();
        assert_eq!(mesh.snapshot().await.unwrap().keys[0].pin_count(), 1);
        assert!(mesh.release(delegation.edge, delegation.uri).await.unwrap());
        tokio::task::yield_now().await;
    }

    attack.abort();
    let snapshot = mesh.snapshot().await.unwrap();
    assert_eq!(snapshot.keys[0].pin_count(), 0);
    assert!(snapshot.associations.is_empty());

    assert_eq!(mesh.shutdown().await.unwrap(), 0);
    assert!(task.await.unwrap().is_none());
}
