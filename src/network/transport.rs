// Transport Abstraction
//
// An addressed request/reply bus between nodes. Core protocols only see
// the `Transport` trait: send a message to a node id under a deadline, get
// its reply. Inbound traffic reaches the node's `MessageHandler` with the
// sender identified.
//
// `InMemoryHub` wires a whole cluster inside one process and doubles as
// the fault injector for integration tests: node kill, symmetric
// partitions, and selective message drops.

use super::message::ClusterMessage;
use crate::error::{Result, SearchError};
use crate::types::NodeId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Inbound side of a node: one handler for every message kind.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, from: NodeId, message: ClusterMessage) -> Result<ClusterMessage>;
}

/// Outbound side of a node.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The node this transport sends as.
    fn local_node(&self) -> NodeId;

    /// Send a message and wait for the reply, up to the deadline.
    async fn send(
        &self,
        target: NodeId,
        message: ClusterMessage,
        deadline: Duration,
    ) -> Result<ClusterMessage>;
}

type DropFilter = Arc<dyn Fn(NodeId, NodeId, &ClusterMessage) -> bool + Send + Sync>;

/// In-process message bus connecting every node of a test cluster.
#[derive(Default)]
pub struct InMemoryHub {
    handlers: DashMap<NodeId, Arc<dyn MessageHandler>>,

    /// Nodes taken down by fault injection
    down: DashMap<NodeId, ()>,

    /// Partition groups; communication only flows within a group
    partitions: parking_lot::RwLock<Option<Vec<HashSet<NodeId>>>>,

    /// Returns true for messages the network should silently lose
    drop_filter: parking_lot::RwLock<Option<DropFilter>>,
}

impl InMemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node's handler to the bus.
    pub fn register(&self, node: NodeId, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(node, handler);
    }

    /// A transport handle sending as `node`.
    pub fn transport(self: &Arc<Self>, node: NodeId) -> InMemoryTransport {
        InMemoryTransport {
            hub: self.clone(),
            node,
        }
    }

    /// Take a node off the network.
    pub fn kill(&self, node: NodeId) {
        self.down.insert(node, ());
    }

    /// Bring a killed node back.
    pub fn revive(&self, node: NodeId) {
        self.down.remove(&node);
    }

    /// Split the cluster; traffic crosses group boundaries only as lost
    /// messages (the sender times out).
    pub fn partition(&self, groups: Vec<Vec<NodeId>>) {
        let groups = groups
            .into_iter()
            .map(|group| group.into_iter().collect())
            .collect();
        *self.partitions.write() = Some(groups);
    }

    /// Remove any partition.
    pub fn heal(&self) {
        *self.partitions.write() = None;
    }

    /// Install a message-drop predicate.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: Fn(NodeId, NodeId, &ClusterMessage) -> bool + Send + Sync + 'static,
    {
        *self.drop_filter.write() = Some(Arc::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        *self.drop_filter.write() = None;
    }

    fn route_open(&self, from: NodeId, to: NodeId) -> bool {
        if self.down.contains_key(&from) || self.down.contains_key(&to) {
            return false;
        }
        match self.partitions.read().as_ref() {
            None => true,
            Some(groups) => groups
                .iter()
                .any(|group| group.contains(&from) && group.contains(&to)),
        }
    }

    async fn deliver(
        &self,
        from: NodeId,
        to: NodeId,
        message: ClusterMessage,
        deadline: Duration,
    ) -> Result<ClusterMessage> {
        // An address that never joined the bus fails fast, like a refused
        // connection; an unreachable peer looks like a lost packet and
        // costs the caller its deadline.
        let handler = match self.handlers.get(&to) {
            Some(handler) => handler.clone(),
            None => {
                return Err(SearchError::Transport(format!(
                    "node {to} is not registered"
                )))
            }
        };

        let dropped = self
            .drop_filter
            .read()
            .as_ref()
            .is_some_and(|filter| filter(from, to, &message));
        if dropped || !self.route_open(from, to) {
            tokio::time::sleep(deadline).await;
            return Err(SearchError::Timeout(format!(
                "no reply from node {to} within {deadline:?}"
            )));
        }

        // The handler runs detached, like a server-side task: a caller that
        // stops waiting does not abort the remote work mid-protocol.
        let work = tokio::spawn(async move { handler.handle(from, message).await });
        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SearchError::Internal(format!(
                "handler on node {to} panicked: {join_error}"
            ))),
            Err(_) => Err(SearchError::Timeout(format!(
                "node {to} did not reply within {deadline:?}"
            ))),
        }
    }
}

/// Transport handle bound to one node of an `InMemoryHub`.
#[derive(Clone)]
pub struct InMemoryTransport {
    hub: Arc<InMemoryHub>,
    node: NodeId,
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn local_node(&self) -> NodeId {
        self.node
    }

    async fn send(
        &self,
        target: NodeId,
        message: ClusterMessage,
        deadline: Duration,
    ) -> Result<ClusterMessage> {
        self.hub.deliver(self.node, target, message, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(NodeId);

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, _from: NodeId, message: ClusterMessage) -> Result<ClusterMessage> {
            match message {
                ClusterMessage::Ping => Ok(ClusterMessage::Pong),
                other => Ok(other),
            }
        }
    }

    #[tokio::test]
    async fn test_request_reply() {
        let hub = InMemoryHub::new();
        hub.register(NodeId::new(1), Arc::new(Echo(NodeId::new(1))));
        let transport = hub.transport(NodeId::new(0));

        let reply = transport
            .send(NodeId::new(1), ClusterMessage::Ping, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(reply, ClusterMessage::Pong));
    }

    #[tokio::test]
    async fn test_unregistered_target_fails_fast() {
        let hub = InMemoryHub::new();
        let transport = hub.transport(NodeId::new(0));

        let start = std::time::Instant::now();
        let result = transport
            .send(NodeId::new(9), ClusterMessage::Ping, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(SearchError::Transport(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_killed_node_times_out() {
        let hub = InMemoryHub::new();
        hub.register(NodeId::new(1), Arc::new(Echo(NodeId::new(1))));
        hub.kill(NodeId::new(1));
        let transport = hub.transport(NodeId::new(0));

        let result = transport
            .send(
                NodeId::new(1),
                ClusterMessage::Ping,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(SearchError::Timeout(_))));

        hub.revive(NodeId::new(1));
        let reply = transport
            .send(NodeId::new(1), ClusterMessage::Ping, Duration::from_secs(1))
            .await;
        assert!(reply.is_ok());
    }

    #[tokio::test]
    async fn test_partition_blocks_cross_group_traffic() {
        let hub = InMemoryHub::new();
        for i in 0..4 {
            hub.register(NodeId::new(i), Arc::new(Echo(NodeId::new(i))));
        }
        hub.partition(vec![
            vec![NodeId::new(0), NodeId::new(1)],
            vec![NodeId::new(2), NodeId::new(3)],
        ]);

        let transport = hub.transport(NodeId::new(0));
        let same_side = transport
            .send(NodeId::new(1), ClusterMessage::Ping, Duration::from_secs(1))
            .await;
        assert!(same_side.is_ok());

        let cross = transport
            .send(
                NodeId::new(2),
                ClusterMessage::Ping,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(cross, Err(SearchError::Timeout(_))));

        hub.heal();
        let healed = transport
            .send(NodeId::new(2), ClusterMessage::Ping, Duration::from_secs(1))
            .await;
        assert!(healed.is_ok());
    }

    #[tokio::test]
    async fn test_drop_filter_loses_selected_messages() {
        let hub = InMemoryHub::new();
        hub.register(NodeId::new(1), Arc::new(Echo(NodeId::new(1))));
        hub.set_drop_filter(|_, _, message| matches!(message, ClusterMessage::Ping));

        let transport = hub.transport(NodeId::new(0));
        let dropped = transport
            .send(
                NodeId::new(1),
                ClusterMessage::Ping,
                Duration::from_millis(50),
            )
            .await;
        assert!(dropped.is_err());

        let passed = transport
            .send(NodeId::new(1), ClusterMessage::Pong, Duration::from_secs(1))
            .await;
        assert!(passed.is_ok());

        hub.clear_drop_filter();
        let restored = transport
            .send(NodeId::new(1), ClusterMessage::Ping, Duration::from_secs(1))
            .await;
        assert!(restored.is_ok());
    }
}
