// DistriSearch Server
//
// Entry point for a cluster node. Loads the node configuration, starts the
// TCP transport and the coordinator, and runs until interrupted.

use distrisearch::network::{TcpTransport, Transport};
use distrisearch::{ClusterConfig, Coordinator, Result, SearchError, VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DISTRISEARCH_CONFIG").ok())
        .unwrap_or_else(|| "distrisearch.json".to_string());
    let config = ClusterConfig::from_file(&config_path)?;

    info!("DistriSearch {} starting", VERSION);
    info!(
        node_id = %config.node_id,
        members = config.peers.len(),
        replication_factor = config.replication_factor,
        config = %config_path,
        "configuration loaded"
    );

    let listen_addr = config
        .peers
        .iter()
        .find(|peer| peer.id == config.node_id)
        .map(|peer| peer.addr.clone())
        .ok_or_else(|| {
            SearchError::Configuration("own node id missing from membership".to_string())
        })?;
    let addresses: HashMap<_, _> = config
        .peers
        .iter()
        .map(|peer| (peer.id, peer.addr.clone()))
        .collect();

    let transport: Arc<dyn Transport> =
        Arc::new(TcpTransport::new(config.node_id, addresses));
    let coordinator = Coordinator::bootstrap(config, transport).await?;

    let server = TcpTransport::serve(&listen_addr, coordinator.clone()).await?;

    // Periodic status line until shutdown.
    let status_coordinator = coordinator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            ticker.tick().await;
            let status = status_coordinator.status().await;
            info!(
                role = %status.raft_role,
                term = status.term,
                leader = ?status.leader_id,
                docs = status.doc_count,
                "node status"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    coordinator.shutdown().await;
    server.abort();
    Ok(())
}
