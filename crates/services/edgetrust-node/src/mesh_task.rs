use edge_mesh::{Delegation, MeshContext, MeshError, MeshSnapshot, SecureTransport, PUBLIC_KEY_LENGTH};
use edgetrust_types::NodeAddr;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Reply<T> = oneshot::Sender<Result<T, MeshError>>;

/// Errors seen by callers of [`MeshHandle`]
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("Mesh task is not running")]
    MeshStopped,
}

/// Requests processed by the mesh task, one at a time.
pub enum MeshCommand {
    AnnounceKey {
        addr: NodeAddr,
        public_key: [u8; PUBLIC_KEY_LENGTH],
        reply: Reply<()>,
    },
    Advertise {
        addr: NodeAddr,
        name: String,
        capabilities: Vec<String>,
        reply: Reply<()>,
    },
    AddEdge {
        addr: NodeAddr,
        name: String,
        public_key: [u8; PUBLIC_KEY_LENGTH],
        capabilities: Vec<String>,
        reply: Reply<()>,
    },
    SetEdgeActive {
        addr: NodeAddr,
        active: bool,
        reply: Reply<bool>,
    },
    SetCapabilityActive {
        addr: NodeAddr,
        capability: String,
        active: bool,
        reply: Reply<bool>,
    },
    RecordOutcome {
        addr: NodeAddr,
        capability: String,
        success: bool,
        reply: Reply<()>,
    },
    SetTrustScore {
        addr: NodeAddr,
        capability: String,
        score: f64,
        reply: Reply<()>,
    },
    Delegate {
        capability: String,
        reply: Reply<Option<Delegation>>,
    },
    Release {
        edge: NodeAddr,
        uri: String,
        reply: Reply<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<MeshSnapshot>,
    },
    Shutdown {
        reply: Reply<usize>,
    },
}

/// Cloneable handle for talking to the mesh task.
#[derive(Clone)]
pub struct MeshHandle {
    tx: mpsc::UnboundedSender<MeshCommand>,
}

impl MeshHandle {
    async fn request<U>(&self, make: impl FnOnce(Reply<U>) -> MeshCommand) -> Result<U, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| NodeError::MeshStopped)?;
        let result = rx.await.map_err(|_| NodeError::MeshStopped)?;
        Ok(result?)
    }

    pub async fn announce_key(
        &self,
        addr: NodeAddr,
        public_key: [u8; PUBLIC_KEY_LENGTH],
    ) -> Result<(), NodeError> {
        self.request(|reply| MeshCommand::AnnounceKey { addr, public_key, reply }).await
    }

    pub async fn advertise(
        &self,
        addr: NodeAddr,
        name: String,
        capabilities: Vec<String>,
    ) -> Result<(), NodeError> {
        self.request(|reply| MeshCommand::Advertise { addr, name, capabilities, reply }).await
    }

    /// Announce the key and advertise the edge as one request.
    pub async fn add_edge(
        &self,
        addr: NodeAddr,
        name: String,
        public_key: [u8; PUBLIC_KEY_LENGTH],
        capabilities: Vec<String>,
    ) -> Result<(), NodeError> {
        self.request(|reply| MeshCommand::AddEdge { addr, name, public_key, capabilities, reply })
            .await
    }

    pub async fn set_edge_active(&self, addr: NodeAddr, active: bool) -> Result<bool, NodeError> {
        self.request(|reply| MeshCommand::SetEdgeActive { addr, active, reply }).await
    }

    pub async fn set_capability_active(
        &self,
        addr: NodeAddr,
        capability: String,
        active: bool,
    ) -> Result<bool, NodeError> {
        self.request(|reply| MeshCommand::SetCapabilityActive { addr, capability, active, reply })
            .await
    }

    pub async fn record_outcome(
        &self,
        addr: NodeAddr,
        capability: String,
        success: bool,
    ) -> Result<(), NodeError> {
        self.request(|reply| MeshCommand::RecordOutcome { addr, capability, success, reply }).await
    }

    pub async fn set_trust_score(
        &self,
        addr: NodeAddr,
        capability: String,
        score: f64,
    ) -> Result<(), NodeError> {
        self.request(|reply| MeshCommand::SetTrustScore { addr, capability, score, reply }).await
    }

    /// `Ok(None)` means no provider; callers may retry later.
    pub async fn delegate(&self, capability: String) -> Result<Option<Delegation>, NodeError> {
        self.request(|reply| MeshCommand::Delegate { capability, reply }).await
    }

    pub async fn release(&self, edge: NodeAddr, uri: String) -> Result<bool, NodeError> {
        self.request(|reply| MeshCommand::Release { edge, uri, reply }).await
    }

    pub async fn snapshot(&self) -> Result<MeshSnapshot, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MeshCommand::Snapshot { reply })
            .map_err(|_| NodeError::MeshStopped)?;
        rx.await.map_err(|_| NodeError::MeshStopped)
    }

    /// Release every association and stop the task.
    pub async fn shutdown(&self) -> Result<usize, NodeError> {
        self.request(|reply| MeshCommand::Shutdown { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the task that owns the mesh context.
///
/// The task resolves to the fatal error that stopped it, or `None` after a
/// clean shutdown.
pub fn spawn_mesh_task<T>(mut context: MeshContext<T>) -> (MeshHandle, JoinHandle<Option<MeshError>>)
where
    T: SecureTransport + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<MeshCommand>();

    tracing::info!("Spawning mesh task (strategy {})", context.strategy());
    let task = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            let fatal = match cmd {
                MeshCommand::AnnounceKey { addr, public_key, reply } => {
                    respond(reply, context.announce_key(addr, public_key))
                }
                MeshCommand::Advertise { addr, name, capabilities, reply } => {
                    respond(reply, context.advertise(addr, &name, &capabilities))
                }
                MeshCommand::AddEdge { addr, name, public_key, capabilities, reply } => {
                    respond(reply, context.add_edge(addr, &name, public_key, &capabilities))
                }
                MeshCommand::SetEdgeActive { addr, active, reply } => {
                    respond(reply, context.set_edge_active(&addr, active))
                }
                MeshCommand::SetCapabilityActive { addr, capability, active, reply } => {
                    respond(reply, context.set_capability_active(&addr, &capability, active))
                }
                MeshCommand::RecordOutcome { addr, capability, success, reply } => {
                    respond(reply, context.record_outcome(&addr, &capability, success))
                }
                MeshCommand::SetTrustScore { addr, capability, score, reply } => {
                    respond(reply, context.set_trust_score(&addr, &capability, score))
                }
                MeshCommand::Delegate { capability, reply } => {
                    respond(reply, context.delegate(&capability))
                }
                MeshCommand::Release { edge, uri, reply } => {
                    respond(reply, context.release(edge, &uri))
                }
                MeshCommand::Snapshot { reply } => {
                    let _ = reply.send(context.snapshot());
                    None
                }
                MeshCommand::Shutdown { reply } => {
                    tracing::info!("Mesh task received Shutdown command.");
                    return respond(reply, context.shutdown());
                }
            };

            if let Some(e) = fatal {
                tracing::error!("Mesh subsystem terminated: {} ({})", e, e.class());
                return Some(e);
            }
        }

        tracing::info!("Mesh command channel closed. Releasing associations.");
        context.shutdown().err()
    });

    (MeshHandle { tx }, task)
}

fn respond<U>(reply: Reply<U>, result: Result<U, MeshError>) -> Option<MeshError> {
    let fatal = match &result {
        Err(e) if e.is_fatal() => Some(e.clone()),
        Err(e) => {
            tracing::warn!("Mesh request failed: {}", e);
            None
        }
        Ok(_) => None,
    };
    let _ = reply.send(result);
    fatal
}
