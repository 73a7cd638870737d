use ed25519_dalek::SigningKey;
use edge_mesh::{
    AssociationError, AssociationManager, EdgeNode, EdgeRegistry, FirstAvailable, HighestTrust,
    InMemoryTransport, KeyStore, MeshContext, MeshError, RecordedScore, SelectionPolicy,
};
use edgetrust_config::load_config;
use edgetrust_types::{ErrorClass, NodeAddr};
use std::io::Write;

fn addr(n: u64) -> NodeAddr {
    NodeAddr::link_local(n)
}

fn public_key(seed: u8) -> [u8; 32] {
    SigningKey::from_bytes(&[seed; 32]).verifying_key().to_bytes()
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Three edges all offering "infer"; bit 2i of `mask` is edge i's active flag,
/// bit 2i+1 its capability flag.
fn registry_from_mask(mask: u32) -> EdgeRegistry {
    let mut registry = EdgeRegistry::new(3, 2);
    for i in 0..3u64 {
        let n = i + 1;
        registry.add_edge(addr(n), &format!("edge-{}", n)).unwrap();
        registry.advertise_capability(&addr(n), "infer").unwrap();
        registry.set_active(&addr(n), mask & (1 << (2 * i)) != 0).unwrap();
        registry
            .set_capability_active(&addr(n), "infer", mask & (1 << (2 * i + 1)) != 0)
            .unwrap();
    }
    registry
}

fn eligible(edge: &EdgeNode) -> bool {
    edge.is_active() && edge.capability("infer").map_or(false, |c| c.is_active())
}

#[test]
fn first_available_matches_first_eligible_for_every_activity_combination() {
    for mask in 0..64 {
        let registry = registry_from_mask(mask);
        let expected = registry.iterate().find(|e| eligible(e)).map(EdgeNode::addr);
        let chosen = FirstAvailable
            .choose_edge(&registry, "infer")
            .unwrap()
            .map(EdgeNode::addr);
        assert_eq!(chosen, expected, "mask {:06b}", mask);
    }
}

#[test]
fn highest_trust_is_maximal_and_breaks_ties_by_order() {
    let score_sets: [[f64; 3]; 4] = [[0.1, 0.5, 0.3], [0.5, 0.5, 0.1], [0.0, 0.0, 0.0], [0.2, 0.9, 0.9]];

    for scores in score_sets {
        for mask in 0..64 {
            let mut registry = registry_from_mask(mask);
            for (i, score) in scores.iter().enumerate() {
                registry.set_trust_score(&addr(i as u64 + 1), "infer", *score).unwrap();
            }

            let chosen = HighestTrust::new(RecordedScore).choose_edge(&registry, "infer").unwrap();
            let candidates: Vec<&EdgeNode> = registry.iterate().filter(|e| eligible(e)).collect();

            match chosen {
                None => assert!(candidates.is_empty()),
                Some(best) => {
                    let score_of = |e: &EdgeNode| e.capability("infer").unwrap().trust().score;
                    let best_score = score_of(best);
                    assert!(candidates.iter().all(|c| best_score >= score_of(*c)));
                    let first_max = candidates.iter().find(|c| score_of(**c) == best_score).unwrap();
                    assert_eq!(first_max.addr(), best.addr());
                }
            }
        }
    }
}

#[test]
fn bind_then_unbind_restores_pin_count() {
    let mut keys = KeyStore::new(4);
    keys.announce(addr(1), public_key(1)).unwrap();
    keys.pin(&addr(1)).unwrap();
    keys.pin(&addr(1)).unwrap();
    let mut manager = AssociationManager::new(InMemoryTransport::new());

    manager.bind(&mut keys, addr(1), "/infer").unwrap();
    assert_eq!(keys.find(&addr(1)).unwrap().pin_count(), 3);
    manager.unbind(&mut keys, addr(1), "/infer").unwrap();
    assert_eq!(keys.find(&addr(1)).unwrap().pin_count(), 2);
}

#[test]
fn repeated_unbind_never_drops_below_pre_bind_count() {
    let mut keys = KeyStore::new(4);
    keys.announce(addr(1), public_key(1)).unwrap();
    let mut manager = AssociationManager::new(InMemoryTransport::new());

    manager.bind(&mut keys, addr(1), "/infer").unwrap();
    assert!(manager.unbind(&mut keys, addr(1), "/infer").unwrap());
    assert!(!manager.unbind(&mut keys, addr(1), "/infer").unwrap());
    assert_eq!(keys.find(&addr(1)).unwrap().pin_count(), 0);

    // the unpinned record is evictable again
    keys.evict(&addr(1)).unwrap();
}

#[test]
fn bind_with_empty_keystore_is_fatal() {
    let mut keys = KeyStore::new(4);
    let mut manager = AssociationManager::new(InMemoryTransport::new());

    let err = manager.bind(&mut keys, addr(7), "/infer").unwrap_err();
    assert!(matches!(err, AssociationError::InvariantViolation(_)));
    assert_eq!(err.class(), ErrorClass::InvariantViolation);
}

#[test]
fn pinned_keys_survive_capacity_pressure() {
    let mut keys = KeyStore::new(2);
    keys.announce(addr(1), public_key(1)).unwrap();
    keys.announce(addr(2), public_key(2)).unwrap();
    let mut manager = AssociationManager::new(InMemoryTransport::new());
    manager.bind(&mut keys, addr(1), "/infer").unwrap();

    // evicts the unpinned record for edge 2
    keys.announce(addr(3), public_key(3)).unwrap();
    assert!(keys.find(&addr(1)).is_some());
    assert!(keys.find(&addr(2)).is_none());

    manager.bind(&mut keys, addr(3), "/infer").unwrap();
    let err = keys.announce(addr(4), public_key(4)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::External);
}

#[test]
fn key_pressure_never_strands_a_selectable_edge() {
    init_logging();

    let mut ctx = MeshContext::new(
        KeyStore::new(4),
        EdgeRegistry::new(2, 2),
        Box::new(FirstAvailable),
        InMemoryTransport::new(),
        "/",
    );
    let infer = vec!["infer".to_string()];
    for n in 1..=5u64 {
        ctx.announce_key(addr(n), public_key(n as u8)).unwrap();
        let advertised = ctx.advertise(addr(n), &format!("edge-{}", n), &infer);
        assert_eq!(advertised.is_ok(), n <= 2, "edge {}", n);
    }

    // every edge the registry can select still has its key
    for edge in ctx.registry().iterate() {
        assert!(ctx.keys().find(&edge.addr()).is_some(), "{} lost its key", edge.addr());
    }
    let delegation = ctx.delegate("infer").unwrap().unwrap();
    assert_eq!(delegation.edge, addr(1));

    ctx.set_edge_active(&addr(1), false).unwrap();
    assert_eq!(ctx.delegate("infer").unwrap().unwrap().edge, addr(2));
    assert_eq!(ctx.shutdown().unwrap(), 2);
}

#[test]
fn toggles_are_idempotent() {
    let mut registry = registry_from_mask(0b111111);

    assert!(registry.set_active(&addr(1), false).unwrap());
    assert!(!registry.set_active(&addr(1), false).unwrap());
    assert!(!registry.find(&addr(1)).unwrap().is_active());

    assert!(registry.set_capability_active(&addr(2), "infer", false).unwrap());
    assert!(!registry.set_capability_active(&addr(2), "infer", false).unwrap());
    assert!(!registry.find_capability(&addr(2), "infer").unwrap().is_active());
}

#[test]
fn configured_node_delegates_to_most_trusted_edge() {
    init_logging();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[node]
name = "sensor-1"

[policy]
strategy = "highest-trust"

[[static_edges]]
addr = "fd00::a"
name = "edge-a"
public_key = "{a}"
capabilities = ["infer"]

[[static_edges]]
addr = "fd00::b"
name = "edge-b"
public_key = "{b}"
capabilities = ["infer"]

[[static_edges]]
addr = "fd00::c"
name = "edge-c"
public_key = "{c}"
capabilities = ["infer"]
"#,
        a = hex::encode(public_key(0xa)),
        b = hex::encode(public_key(0xb)),
        c = hex::encode(public_key(0xc)),
    )
    .unwrap();

    let config = load_config(file.path()).unwrap();
    let mut ctx = MeshContext::from_config(&config, InMemoryTransport::new()).unwrap();
    let (a, b, c): (NodeAddr, NodeAddr, NodeAddr) =
        ("fd00::a".parse().unwrap(), "fd00::b".parse().unwrap(), "fd00::c".parse().unwrap());

    ctx.set_trust_score(&a, "infer", 0.2).unwrap();
    ctx.set_trust_score(&b, "infer", 1.0).unwrap();
    ctx.set_trust_score(&c, "infer", 0.9).unwrap();
    ctx.set_edge_active(&b, false).unwrap();

    let delegation = ctx.delegate("infer").unwrap().unwrap();
    assert_eq!(delegation.edge, c);
    assert_eq!(ctx.keys().find(&c).unwrap().pin_count(), 1);
    assert!(ctx.associations().transport().has_context(c, "/infer"));

    // C drops out; a fresh request goes to A while C's association stays until released
    ctx.set_edge_active(&c, false).unwrap();
    assert_eq!(ctx.delegate("infer").unwrap().unwrap().edge, a);

    assert!(ctx.release(c, "/infer").unwrap());
    assert_eq!(ctx.shutdown().unwrap(), 1);
    for edge in [a, b, c] {
        assert_eq!(ctx.keys().find(&edge).unwrap().pin_count(), 0);
    }
}

#[test]
fn invalid_score_is_a_configuration_error() {
    let mut ctx = MeshContext::new(
        KeyStore::new(2),
        EdgeRegistry::new(2, 2),
        Box::new(HighestTrust::new(|_: &EdgeNode, _: &edge_mesh::Capability| -1.0)),
        InMemoryTransport::new(),
        "/",
    );
    ctx.announce_key(addr(1), public_key(1)).unwrap();
    ctx.advertise(addr(1), "edge-1", &["infer".to_string()]).unwrap();

    let err = ctx.delegate("infer").unwrap_err();
    assert!(matches!(err, MeshError::Policy(_)));
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(ctx.associations().is_empty());
}
