use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::node::{AudioNode, NodeEvent, NodeId, NodeStats};
use crate::error::{PlaybackError, Result};

struct NodeSlot {
    node: Arc<dyn AudioNode>,
    connected: bool,
    sessions: HashSet<GuildId>,
    stats: Option<NodeStats>,
}

/// Public view of one node for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub id: NodeId,
    pub connected: bool,
    pub sessions: usize,
    pub stats: Option<NodeStats>,
}

/// Set of audio nodes with per-node health and load.
///
/// Load is the number of sessions assigned to a node. Assignment picks the
/// least-loaded connected node; migration only happens when a node goes
/// away, never to rebalance.
pub struct NodePool {
    nodes: Mutex<HashMap<NodeId, NodeSlot>>,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl NodePool {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let pool = Self {
            nodes: Mutex::new(HashMap::new()),
            events,
        };
        (pool, rx)
    }

    /// Canal por el que los nodos publican sus eventos.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<NodeEvent> {
        self.events.clone()
    }

    pub fn register(&self, node: Arc<dyn AudioNode>, connected: bool) {
        let id = node.id().clone();
        info!("🎼 Nodo registrado: {} (conectado: {})", id, connected);
        self.nodes.lock().insert(
            id,
            NodeSlot {
                node,
                connected,
                sessions: HashSet::new(),
                stats: None,
            },
        );
    }

    /// Selects the least-loaded connected node and records the assignment.
    pub fn assign_node(&self, guild_id: GuildId) -> Result<NodeId> {
        let mut nodes = self.nodes.lock();

        let (id, slot) = nodes
            .iter_mut()
            .filter(|(_, slot)| slot.connected)
            .min_by(|(a_id, a), (b_id, b)| {
                a.sessions
                    .len()
                    .cmp(&b.sessions.len())
                    .then_with(|| a_id.cmp(b_id))
            })
            .ok_or(PlaybackError::NoNodesAvailable)?;

        slot.sessions.insert(guild_id);
        debug!(
            "📍 Guild {} asignado al nodo {} (carga: {})",
            guild_id,
            id,
            slot.sessions.len()
        );
        Ok(id.clone())
    }

    pub fn release(&self, guild_id: GuildId, id: &NodeId) {
        if let Some(slot) = self.nodes.lock().get_mut(id) {
            slot.sessions.remove(&guild_id);
        }
    }

    /// Marks a node unavailable and hands back every session assigned to it.
    ///
    /// The caller is responsible for migrating the returned guilds.
    pub fn report_disconnect(&self, id: &NodeId) -> Vec<GuildId> {
        let mut nodes = self.nodes.lock();
        let Some(slot) = nodes.get_mut(id) else {
            warn!("Desconexión reportada para nodo desconocido: {}", id);
            return Vec::new();
        };

        if slot.connected {
            warn!("🔌 Nodo {} marcado como no disponible", id);
        }
        slot.connected = false;
        slot.stats = None;
        slot.node.request_reconnect();
        slot.sessions.drain().collect()
    }

    /// Marks a node available; it is eligible for new sessions immediately.
    pub fn report_connect(&self, id: &NodeId) -> bool {
        match self.nodes.lock().get_mut(id) {
            Some(slot) => {
                if !slot.connected {
                    info!("✅ Nodo {} disponible", id);
                }
                slot.connected = true;
                true
            }
            None => false,
        }
    }

    pub fn update_stats(&self, id: &NodeId, stats: NodeStats) {
        if let Some(slot) = self.nodes.lock().get_mut(id) {
            slot.stats = Some(stats);
        }
    }

    /// Handle de control de un nodo, solo si está conectado.
    pub fn node(&self, id: &NodeId) -> Option<Arc<dyn AudioNode>> {
        self.nodes
            .lock()
            .get(id)
            .filter(|slot| slot.connected)
            .map(|slot| Arc::clone(&slot.node))
    }

    /// Cualquier nodo conectado, el de menor carga primero.
    pub fn any_connected(&self) -> Option<Arc<dyn AudioNode>> {
        self.nodes
            .lock()
            .iter()
            .filter(|(_, slot)| slot.connected)
            .min_by(|(a_id, a), (b_id, b)| {
                a.sessions
                    .len()
                    .cmp(&b.sessions.len())
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(_, slot)| Arc::clone(&slot.node))
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        let mut statuses: Vec<NodeStatus> = self
            .nodes
            .lock()
            .iter()
            .map(|(id, slot)| NodeStatus {
                id: id.clone(),
                connected: slot.connected,
                sessions: slot.sessions.len(),
                stats: slot.stats.clone(),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeNode;
    use pretty_assertions::assert_eq;

    fn guild(id: u64) -> GuildId {
        GuildId::new(id)
    }

    fn pool_with(nodes: &[(&str, bool)]) -> NodePool {
        let (pool, _rx) = NodePool::new();
        for (id, connected) in nodes {
            pool.register(FakeNode::new(id), *connected);
        }
        pool
    }

    #[test]
    fn assigns_least_loaded_connected_node() {
        let pool = pool_with(&[("a", true), ("b", true), ("c", false)]);

        assert_eq!(pool.assign_node(guild(1)).unwrap().as_str(), "a");
        assert_eq!(pool.assign_node(guild(2)).unwrap().as_str(), "b");
        assert_eq!(pool.assign_node(guild(3)).unwrap().as_str(), "a");

        pool.release(guild(1), &NodeId::from("a"));
        pool.release(guild(3), &NodeId::from("a"));
        assert_eq!(pool.assign_node(guild(4)).unwrap().as_str(), "a");
    }

    #[test]
    fn no_connected_nodes_is_an_error() {
        let pool = pool_with(&[("a", false)]);
        assert!(matches!(
            pool.assign_node(guild(1)),
            Err(PlaybackError::NoNodesAvailable)
        ));
    }

    #[test]
    fn disconnect_returns_assigned_sessions_and_excludes_node() {
        let pool = pool_with(&[("a", true), ("b", true)]);
        let a = NodeId::from("a");
        pool.assign_node(guild(1)).unwrap();
        pool.assign_node(guild(2)).unwrap();
        pool.assign_node(guild(3)).unwrap();

        let mut orphaned = pool.report_disconnect(&a);
        orphaned.sort();
        assert_eq!(orphaned, vec![guild(1), guild(3)]);
        assert!(pool.node(&a).is_none());

        assert_eq!(pool.assign_node(guild(4)).unwrap().as_str(), "b");
        assert!(pool.report_disconnect(&a).is_empty());
    }

    #[test]
    fn disconnect_asks_the_node_to_reconnect() {
        let (pool, _rx) = NodePool::new();
        let node = FakeNode::new("a");
        pool.register(node.clone(), true);

        pool.report_disconnect(&NodeId::from("a"));
        assert_eq!(node.reconnect_requests(), 1);
    }

    #[test]
    fn reconnect_makes_node_eligible_without_rebalancing() {
        let pool = pool_with(&[("a", true), ("b", false)]);
        let b = NodeId::from("b");
        pool.assign_node(guild(1)).unwrap();
        pool.assign_node(guild(2)).unwrap();

        assert!(pool.report_connect(&b));
        let statuses = pool.statuses();
        assert_eq!(statuses[0].sessions, 2);
        assert_eq!(statuses[1].sessions, 0);

        assert_eq!(pool.assign_node(guild(3)).unwrap(), b);
        assert!(!pool.report_connect(&NodeId::from("missing")));
    }
}
