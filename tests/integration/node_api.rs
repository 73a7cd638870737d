use ed25519_dalek::SigningKey;
use edge_mesh::{InMemoryTransport, MeshContext, MeshMetrics};
use edgetrust_config::parse_config;
use edgetrust_node::{spawn_mesh_task, start_api_server};
use hyper::{Body, Client, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;

async fn send(addr: SocketAddr, method: Method, path: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(format!("http://{}{}", addr, path))
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = Client::new().request(req).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn get_text(addr: SocketAddr, path: &str) -> String {
    let resp = Client::new()
        .get(format!("http://{}{}", addr, path).parse().unwrap())
        .await
        .unwrap();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn admin_api_drives_delegation() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = parse_config(
        r#"
        [policy]
        strategy = "highest-trust"

        [security]
        resource_prefix = "/svc"
        "#,
    )?;
    let registry = prometheus::Registry::new();
    let context = MeshContext::from_config(&config, InMemoryTransport::new())?
        .with_metrics(MeshMetrics::new(&registry)?);
    let (mesh, task) = spawn_mesh_task(context);
    let api = start_api_server(mesh.clone(), registry, "127.0.0.1:0")?;
    let addr = api.local_addr;

    for (n, host) in [(1u8, "fd00::1"), (2u8, "fd00::2")] {
        let key = SigningKey::from_bytes(&[n; 32]).verifying_key().to_bytes();
        let (status, _) = send(
            addr,
            Method::POST,
            "/edges",
            json!({ "addr": host, "name": format!("edge-{}", n), "public_key": hex::encode(key), "capabilities": ["infer"] }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = send(addr, Method::PUT, "/edges/fd00::2/capabilities/infer/score", json!({ "score": 0.8 })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, delegation) = send(addr, Method::POST, "/delegate", json!({ "capability": "infer" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delegation["edge"], "fd00::2");
    assert_eq!(delegation["uri"], "/svc/infer");

    // pulling the capability does not tear down the existing association
    let (_, body) = send(
        addr,
        Method::PUT,
        "/edges/fd00::2/capabilities/infer/active",
        json!({ "active": false }),
    )
    .await;
    assert_eq!(body["changed"], true);
    let (_, delegation) = send(addr, Method::POST, "/delegate", json!({ "capability": "infer" })).await;
    assert_eq!(delegation["edge"], "fd00::1");

    let (_, state) = send(addr, Method::GET, "/state", Value::Null).await;
    assert_eq!(state["associations"].as_array().map(Vec::len), Some(2));

    let (status, _) = send(addr, Method::POST, "/delegate", json!({ "capability": "sense" })).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let metrics = get_text(addr, "/metrics").await;
    assert!(metrics.contains("edgetrust_selections_total"));
    assert!(metrics.contains("edgetrust_live_associations 2"));

    let (_, body) = send(addr, Method::POST, "/release", json!({ "edge": "fd00::2", "uri": "/svc/infer" })).await;
    assert_eq!(body["changed"], true);

    api.stop().await;
    assert_eq!(mesh.shutdown().await?, 1);
    assert!(task.await?.is_none());
    Ok(())
}

#[tokio::test]
async fn bad_ingestion_is_rejected_without_stopping_the_mesh() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = parse_config(
        r#"
        [policy]
        strategy = "highest-trust"

        [keystore]
        capacity = 2

        [registry]
        max_edges = 2
        "#,
    )?;
    let context = MeshContext::from_config(&config, InMemoryTransport::new())?;
    let (mesh, task) = spawn_mesh_task(context);
    let api = start_api_server(mesh.clone(), prometheus::Registry::new(), "127.0.0.1:0")?;
    let addr = api.local_addr;

    for n in 1..=4u8 {
        let key = SigningKey::from_bytes(&[n; 32]).verifying_key().to_bytes();
        let (status, _) = send(
            addr,
            Method::POST,
            "/edges",
            json!({ "addr": format!("fd00::{}", n), "name": format!("edge-{}", n), "public_key": hex::encode(key), "capabilities": ["infer"] }),
        )
        .await;
        let expected = if n <= 2 { StatusCode::CREATED } else { StatusCode::BAD_REQUEST };
        assert_eq!(status, expected, "edge {}", n);
    }

    let (status, _) = send(addr, Method::PUT, "/edges/fd00::1/capabilities/infer/score", json!({ "score": -0.5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(addr, Method::PUT, "/edges/fd00::2/capabilities/infer/score", json!({ "score": 0.4 })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, delegation) = send(addr, Method::POST, "/delegate", json!({ "capability": "infer" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delegation["edge"], "fd00::2");

    let (_, state) = send(addr, Method::GET, "/state", Value::Null).await;
    assert_eq!(state["keys"].as_array().map(Vec::len), Some(2));
    assert!(mesh.is_running());

    api.stop().await;
    assert_eq!(mesh.shutdown().await?, 1);
    assert!(task.await?.is_none());
    Ok(())
}

#[tokio::test]
async fn stopped_mesh_reports_unavailable() -> anyhow::Result<()> {
    let config = parse_config("")?;
    let context = MeshContext::from_config(&config, InMemoryTransport::new())?;
    let (mesh, task) = spawn_mesh_task(context);
    let api = start_api_server(mesh.clone(), prometheus::Registry::new(), "127.0.0.1:0")?;

    mesh.shutdown().await?;
    task.await?;

    let (status, _) = send(api.local_addr, Method::GET, "/state", Value::Null).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, body) = send(api.local_addr, Method::GET, "/health", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    api.stop().await;
    Ok(())
}
