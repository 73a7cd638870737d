use crate::mesh_task::{MeshHandle, NodeError};
use edge_mesh::{MeshError, RegistryError};
use edgetrust_types::{ErrorClass, NodeAddr};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Deserialize)]
pub struct ActiveUpdate {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct EdgeAdvertisement {
    pub addr: NodeAddr,
    pub name: String,
    /// Hex encoded Ed25519 public key
    pub public_key: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegateRequest {
    pub capability: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub edge: NodeAddr,
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeReport {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScoreUpdate {
    pub score: f64,
}

#[derive(Serialize)]
struct Changed {
    changed: bool,
}

struct ApiState {
    mesh: MeshHandle,
    metrics: prometheus::Registry,
}

/// Running admin API server
pub struct ApiHandle {
    pub local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ApiHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!("API server task failed: {}", e);
        }
    }
}

/// Starts the admin HTTP API.
pub fn start_api_server(
    mesh: MeshHandle,
    metrics: prometheus::Registry,
    listen_address: &str,
) -> anyhow::Result<ApiHandle> {
    let addr: SocketAddr = listen_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid API listen address '{}': {}", listen_address, e))?;

    let state = Arc::new(ApiState { mesh, metrics });
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| handle_request(req, state.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    tracing::info!("API server listening on http://{}", local_addr);

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let server = server.with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(ApiHandle { local_addr, shutdown, task })
}

async fn handle_request(
    req: Request<Body>,
    state: Arc<ApiState>,
) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = req.into_body();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => json(StatusCode::OK, &serde_json::json!({ "status": "ok" })),

        (&Method::GET, ["state"]) => match state.mesh.snapshot().await {
            Ok(snapshot) => json(StatusCode::OK, &snapshot),
            Err(e) => node_error(e),
        },

        (&Method::GET, ["metrics"]) => metrics(&state.metrics),

        (&Method::POST, ["edges"]) => {
            let adv: EdgeAdvertisement = match read_json(body).await? {
                Ok(adv) => adv,
                Err(resp) => return Ok(resp),
            };
            let public_key = match decode_key(&adv.public_key) {
                Some(key) => key,
                None => return Ok(bad_request("public_key must be 32 hex encoded bytes")),
            };
            match state
                .mesh
                .add_edge(adv.addr, adv.name, public_key, adv.capabilities)
                .await
            {
                Ok(()) => empty(StatusCode::CREATED),
                Err(e) => node_error(e),
            }
        }

        (&Method::PUT, ["edges", addr, "active"]) => {
            let addr = match parse_addr(addr) {
                Ok(addr) => addr,
                Err(resp) => return Ok(resp),
            };
            let update: ActiveUpdate = match read_json(body).await? {
                Ok(update) => update,
                Err(resp) => return Ok(resp),
            };
            changed(state.mesh.set_edge_active(addr, update.active).await)
        }

        (&Method::PUT, ["edges", addr, "capabilities", name, "active"]) => {
            let addr = match parse_addr(addr) {
                Ok(addr) => addr,
                Err(resp) => return Ok(resp),
            };
            let update: ActiveUpdate = match read_json(body).await? {
                Ok(update) => update,
                Err(resp) => return Ok(resp),
            };
            changed(
                state
                    .mesh
                    .set_capability_active(addr, name.to_string(), update.active)
                    .await,
            )
        }

        (&Method::POST, ["edges", addr, "capabilities", name, "outcome"]) => {
            let addr = match parse_addr(addr) {
                Ok(addr) => addr,
                Err(resp) => return Ok(resp),
            };
            let report: OutcomeReport = match read_json(body).await? {
                Ok(report) => report,
                Err(resp) => return Ok(resp),
            };
            match state.mesh.record_outcome(addr, name.to_string(), report.success).await {
                Ok(()) => empty(StatusCode::NO_CONTENT),
                Err(e) => node_error(e),
            }
        }

        (&Method::PUT, ["edges", addr, "capabilities", name, "score"]) => {
            let addr = match parse_addr(addr) {
                Ok(addr) => addr,
                Err(resp) => return Ok(resp),
            };
            let update: ScoreUpdate = match read_json(body).await? {
                Ok(update) => update,
                Err(resp) => return Ok(resp),
            };
            match state.mesh.set_trust_score(addr, name.to_string(), update.score).await {
                Ok(()) => empty(StatusCode::NO_CONTENT),
                Err(e) => node_error(e),
            }
        }

        (&Method::POST, ["delegate"]) => {
            let request: DelegateRequest = match read_json(body).await? {
                Ok(request) => request,
                Err(resp) => return Ok(resp),
            };
            match state.mesh.delegate(request.capability).await {
                Ok(Some(delegation)) => json(StatusCode::OK, &delegation),
                Ok(None) => error_response(StatusCode::SERVICE_UNAVAILABLE, "No provider"),
                Err(e) => node_error(e),
            }
        }

        (&Method::POST, ["release"]) => {
            let request: ReleaseRequest = match read_json(body).await? {
                Ok(request) => request,
                Err(resp) => return Ok(resp),
            };
            changed(state.mesh.release(request.edge, request.uri).await)
        }

        _ => not_found(),
    };

    Ok(response)
}

/// Reads a JSON body. The outer error is a transport failure, the inner one
/// a ready-made 400 response.
async fn read_json<T: serde::de::DeserializeOwned>(
    body: Body,
) -> Result<Result<T, Response<Body>>, hyper::Error> {
    let bytes = hyper::body::to_bytes(body).await?;
    Ok(serde_json::from_slice(&bytes).map_err(|e| bad_request(&format!("Malformed JSON: {}", e))))
}

fn parse_addr(segment: &str) -> Result<NodeAddr, Response<Body>> {
    segment
        .parse()
        .map_err(|e| bad_request(&format!("Invalid node address '{}': {}", segment, e)))
}

fn decode_key(encoded: &str) -> Option<[u8; 32]> {
    hex::decode(encoded.trim()).ok()?.try_into().ok()
}

fn changed(result: Result<bool, NodeError>) -> Response<Body> {
    match result {
        Ok(changed) => json(StatusCode::OK, &Changed { changed }),
        Err(e) => node_error(e),
    }
}

fn metrics(registry: &prometheus::Registry) -> Response<Body> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error")))
}

fn node_error(e: NodeError) -> Response<Body> {
    let status = match &e {
        NodeError::MeshStopped => StatusCode::SERVICE_UNAVAILABLE,
        NodeError::Mesh(MeshError::Registry(
            RegistryError::UnknownEdge(_) | RegistryError::UnknownCapability { .. },
        )) => StatusCode::NOT_FOUND,
        NodeError::Mesh(e) => match e.class() {
            ErrorClass::ProtocolRejection | ErrorClass::PolicyAnomaly => StatusCode::BAD_REQUEST,
            ErrorClass::External => StatusCode::BAD_GATEWAY,
            ErrorClass::InvariantViolation | ErrorClass::Configuration => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    };
    error_response(status, &e.to_string())
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error"))),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn empty(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(status: StatusCode, msg: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": msg }).to_string();
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error")))
}

// Helper for 400 Bad Request responses
fn bad_request(msg: &str) -> Response<Body> {
    error_response(StatusCode::BAD_REQUEST, msg)
}

// Helper for 404 Not Found responses
fn not_found() -> Response<Body> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}
