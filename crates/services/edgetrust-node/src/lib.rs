//! edgetrust node service
//!
//! Wires the mesh context, the admin API and the optional adversary tasks
//! together on a single-threaded runtime.

pub mod api;
pub mod mesh_task;
pub mod sim;

pub use api::{start_api_server, ApiHandle};
pub use mesh_task::{spawn_mesh_task, MeshCommand, MeshHandle, NodeError};
pub use sim::{LoggingWatchdog, SimulatedRadio};

use anyhow::Context;
use edge_mesh::{InMemoryTransport, MeshContext, MeshMetrics};
use edgetrust_adversary::{GossipInspector, RadioOffAttack, RadioOffSchedule};
use edgetrust_config::{AdversaryConfig, EdgeTrustConfig};
use std::future::Future;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Run the node until Ctrl-C.
pub async fn run_node(config: EdgeTrustConfig) -> anyhow::Result<()> {
    run_node_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await
}

/// Run the node until `shutdown` resolves or the mesh subsystem stops.
pub async fn run_node_until<F>(config: EdgeTrustConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    tracing::info!("Starting edgetrust node {}", config.node.name);

    let metrics_registry = prometheus::Registry::new();
    let metrics = MeshMetrics::new(&metrics_registry).context("Failed to register mesh metrics")?;
    let context = MeshContext::from_config(&config, InMemoryTransport::new())
        .context("Failed to build mesh context")?
        .with_metrics(metrics);

    let (mesh, mut mesh_task) = spawn_mesh_task(context);

    let api = if config.api.enabled {
        Some(start_api_server(mesh.clone(), metrics_registry, &config.api.listen_address)?)
    } else {
        None
    };
    let attacks = spawn_attacks(&config.adversary)?;

    let stopped = tokio::select! {
        _ = shutdown => {
            tracing::info!("Shutdown signal received.");
            None
        }
        res = &mut mesh_task => Some(res),
    };

    for attack in &attacks {
        attack.abort();
    }
    if let Some(api) = api {
        api.stop().await;
    }

    let fatal = match stopped {
        Some(res) => res.context("Mesh task panicked")?,
        None => {
            let released = mesh.shutdown().await?;
            tracing::info!("Released {} associations", released);
            mesh_task.await.context("Mesh task panicked")?
        }
    };

    match fatal {
        Some(e) => Err(anyhow::anyhow!("Mesh subsystem terminated: {}", e)),
        None => {
            tracing::info!("Node stopped.");
            Ok(())
        }
    }
}

fn spawn_attacks(config: &AdversaryConfig) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();

    if let Some(eavesdrop) = &config.eavesdrop {
        let listen: SocketAddr = eavesdrop
            .listen_address
            .parse()
            .with_context(|| format!("Invalid eavesdrop listen address '{}'", eavesdrop.listen_address))?;
        let (_, server) = edgetrust_adversary::bind(listen, &eavesdrop.path, GossipInspector::from_config(eavesdrop))
            .context("Failed to bind eavesdrop endpoint")?;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("Eavesdrop endpoint error: {}", e);
            }
        }));
    }

    if let Some(radio_off) = &config.radio_off {
        let schedule = RadioOffSchedule::from_config(radio_off)?;
        let attack = RadioOffAttack::new(SimulatedRadio::new(), schedule);
        tracing::warn!(
            "Radio-off attack enabled: {:?} off every {:?}",
            schedule.duration(),
            schedule.interval()
        );
        let task = match radio_off.watchdog_period() {
            Some(period) => tokio::spawn(attack.with_watchdog(LoggingWatchdog::default(), period)?.run()),
            None => tokio::spawn(attack.run()),
        };
        tasks.push(task);
    }

    Ok(tasks)
}
