use edgetrust_config::EavesdropConfig;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Framing errors for intercepted gossip. The signature is never checked, so
/// length is the only thing that can be wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    #[error("Empty gossip payload")]
    Empty,

    #[error("Gossip payload of {len} bytes exceeds limit of {max}")]
    TooLong { len: usize, max: usize },
}

/// What an eavesdropper sees in one gossip message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterceptedGossip<'a> {
    pub content: &'a [u8],
    pub signature: &'a [u8],
}

/// Splits `content || signature` payloads after checking their length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipInspector {
    max_content: usize,
    signature_size: usize,
}

impl GossipInspector {
    pub fn new(max_content: usize, signature_size: usize) -> Self {
        Self {
            max_content,
            signature_size,
        }
    }

    pub fn from_config(config: &EavesdropConfig) -> Self {
        Self::new(config.max_content, config.signature_size)
    }

    /// Largest accepted payload, content plus signature.
    pub fn max_payload(&self) -> usize {
        self.max_content.saturating_add(self.signature_size)
    }

    /// Accept payloads whose length lies in `(0, max_content + signature_size]`.
    ///
    /// A payload shorter than the signature yields empty content and the whole
    /// payload as the claimed signature.
    pub fn inspect<'a>(&self, payload: &'a [u8]) -> Result<InterceptedGossip<'a>, GossipError> {
        let len = payload.len();
        if len == 0 {
            return Err(GossipError::Empty);
        }
        if len > self.max_payload() {
            return Err(GossipError::TooLong {
                len,
                max: self.max_payload(),
            });
        }

        let (content, signature) = payload.split_at(len.saturating_sub(self.signature_size));
        Ok(InterceptedGossip { content, signature })
    }
}

/// Bind the eavesdrop endpoint without starting it.
///
/// Returns the bound address (useful with port 0) and the server future.
pub fn bind(
    listen: SocketAddr,
    path: &str,
    inspector: GossipInspector,
) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>> + Send), hyper::Error> {
    let path: Arc<str> = Arc::from(path);

    let make_svc = make_service_fn(move |_conn| {
        let path = path.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                handle_request(req, path.clone(), inspector)
            }))
        }
    });

    let server = Server::try_bind(&listen)?.serve(make_svc);
    let local_addr = server.local_addr();
    info!("Eavesdrop endpoint listening on http://{}", local_addr);
    Ok((local_addr, server))
}

/// Run the eavesdrop endpoint until the server fails.
pub async fn serve(listen: SocketAddr, path: &str, inspector: GossipInspector) -> Result<(), hyper::Error> {
    let (_, server) = bind(listen, path, inspector)?;
    server.await
}

async fn handle_request(
    req: Request<Body>,
    path: Arc<str>,
    inspector: GossipInspector,
) -> Result<Response<Body>, hyper::Error> {
    if req.uri().path() != &*path {
        return Ok(not_found());
    }
    if req.method() != Method::POST {
        return Ok(method_not_allowed());
    }

    let payload = hyper::body::to_bytes(req.into_body()).await?;
    match inspector.inspect(&payload) {
        Ok(gossip) => {
            info!(
                content_len = gossip.content.len(),
                signature_len = gossip.signature.len(),
                "Intercepted trust gossip"
            );
            info!("  content:   {}", hex::encode(gossip.content));
            info!("  signature: {}", hex::encode(gossip.signature));
            Ok(no_content())
        }
        Err(e) => {
            warn!("Rejected gossip payload: {}", e);
            Ok(bad_request(&e.to_string()))
        }
    }
}

fn no_content() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn bad_request(msg: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(msg.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from("Bad Request")))
}

fn method_not_allowed() -> Response<Body> {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(hyper::header::ALLOW, "POST")
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
