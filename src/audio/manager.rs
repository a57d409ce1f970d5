//! # Session Manager
//!
//! Entry point of the playback core. Owns the [`SessionRegistry`], talks to
//! the [`NodePool`] and the voice gateway, and turns node events into
//! session transitions.
//!
//! ## Ordering
//!
//! Every session has a mailbox task. Node events for a guild are routed to
//! its mailbox and applied one at a time under the session lock, so they
//! interleave with commands but never overlap them. Node-level events
//! (ready, disconnect, stats) are handled by [`SessionManager::run`].
//!
//! ## Node failures
//!
//! A node call that fails with a disconnect-equivalent error (timeout,
//! unreachable) is reported back into the pool channel as a disconnect, so
//! migration always runs from the event pump and never while a session lock
//! is held.

use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::gateway::VoiceGateway;
use crate::audio::node::{NodeEvent, NodeId};
use crate::audio::node_pool::{NodePool, NodeStatus};
use crate::audio::queue::LoopMode;
use crate::audio::registry::{SessionHandle, SessionRegistry};
use crate::audio::resolver::TrackResolver;
use crate::audio::session::{
    EndOutcome, Enqueued, PlayOutcome, PlaybackSession, SessionSettings, SessionSnapshot,
};
use crate::audio::track::{ResolveResult, Track};
use crate::error::{PlaybackError, Result};

/// Códigos de cierre de voz que significan que el bot ya no está en el canal.
const VOICE_GONE_CODES: [u16; 2] = [4006, 4014];

/// Notifications for the presentation layer, addressed to a text channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TrackStarted {
        guild_id: GuildId,
        text_channel_id: ChannelId,
        track: Track,
    },
    QueueEnded {
        guild_id: GuildId,
        text_channel_id: ChannelId,
    },
    Migrated {
        guild_id: GuildId,
        text_channel_id: ChannelId,
        from: NodeId,
        to: NodeId,
    },
    Fatal {
        guild_id: GuildId,
        text_channel_id: ChannelId,
        reason: String,
    },
}

impl SessionEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackStarted { guild_id, .. }
            | Self::QueueEnded { guild_id, .. }
            | Self::Migrated { guild_id, .. }
            | Self::Fatal { guild_id, .. } => *guild_id,
        }
    }

    pub fn text_channel_id(&self) -> ChannelId {
        match self {
            Self::TrackStarted { text_channel_id, .. }
            | Self::QueueEnded { text_channel_id, .. }
            | Self::Migrated { text_channel_id, .. }
            | Self::Fatal { text_channel_id, .. } => *text_channel_id,
        }
    }
}

pub struct SessionManager {
    registry: SessionRegistry,
    pool: Arc<NodePool>,
    gateway: Arc<dyn VoiceGateway>,
    resolver: TrackResolver,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        pool: Arc<NodePool>,
        gateway: Arc<dyn VoiceGateway>,
        resolver: TrackResolver,
        settings: SessionSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            registry: SessionRegistry::new(),
            pool,
            gateway,
            resolver,
            settings,
            events,
        });
        (manager, rx)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &TrackResolver {
        &self.resolver
    }

    pub fn node_statuses(&self) -> Vec<NodeStatus> {
        self.pool.statuses()
    }

    /// Returns the guild's session, creating and connecting it if needed.
    ///
    /// The boolean is `true` when this call created the session.
    pub async fn create(
        self: &Arc<Self>,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
        volume: u8,
    ) -> Result<(Arc<SessionHandle>, bool)> {
        loop {
            let mut mailbox = None;
            let (handle, created) = self.registry.get_or_try_insert_with(guild_id, || {
                let node_id = self.pool.assign_node(guild_id)?;
                let (tx, rx) = mpsc::unbounded_channel();
                mailbox = Some(rx);
                let session = PlaybackSession::new(
                    guild_id,
                    voice_channel_id,
                    text_channel_id,
                    node_id,
                    Arc::clone(&self.pool),
                    volume,
                    self.settings,
                );
                Ok(SessionHandle::new(session, tx))
            })?;

            if let Some(rx) = mailbox.take() {
                info!("🎶 Nueva sesión para guild {}", guild_id);
                tokio::spawn(Arc::clone(self).drain_mailbox(Arc::downgrade(&handle), rx));
            }

            let mut session = handle.lock().await;
            if session.is_destroyed() {
                // Destruida entre la búsqueda y el lock; crear otra.
                continue;
            }
            if let Err(e) = session.connect(self.gateway.as_ref()).await {
                warn!("❌ No se pudo conectar a voz en guild {}: {}", guild_id, e);
                self.teardown_locked(&handle, &mut session).await;
                return Err(e);
            }
            drop(session);
            return Ok((handle, created));
        }
    }

    pub fn session(&self, guild_id: GuildId) -> Result<Arc<SessionHandle>> {
        self.registry
            .get(guild_id)
            .ok_or(PlaybackError::NoActiveSession)
    }

    /// Current view of the guild's session without waiting for its lock.
    pub fn snapshot(&self, guild_id: GuildId) -> Result<SessionSnapshot> {
        let snapshot = self.session(guild_id)?.snapshot();
        if !snapshot.is_active() {
            return Err(PlaybackError::NoActiveSession);
        }
        Ok(snapshot)
    }

    /// Resolves a query on the session's node, or any connected node.
    ///
    /// Node failures come back as [`ResolveResult::LoadError`].
    pub async fn resolve(&self, handle: &SessionHandle, query: &str, requester: UserId) -> Result<ResolveResult> {
        let assigned = handle.snapshot().node_id;
        let node = self
            .pool
            .node(&assigned)
            .or_else(|| self.pool.any_connected())
            .ok_or(PlaybackError::NoNodesAvailable)?;

        match self.resolver.resolve(node.as_ref(), query, requester).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("❌ Error resolviendo '{}' en nodo {}: {}", query, node.id(), e);
                if e.is_disconnect() {
                    self.report_node_failure(node.id());
                }
                Ok(ResolveResult::LoadError(e.to_string()))
            }
        }
    }

    /// Adds tracks to the session behind `handle`.
    ///
    /// If the session was destroyed or replaced while the caller was
    /// resolving, the tracks are discarded and `NoActiveSession` returned.
    pub async fn enqueue(&self, handle: &Arc<SessionHandle>, tracks: Vec<Track>) -> Result<Enqueued> {
        let mut session = handle.lock().await;
        if session.is_destroyed() || !self.registry.is_owner(handle) {
            debug!(
                "Resultado descartado: la sesión de guild {} ya no existe",
                handle.guild_id()
            );
            return Err(PlaybackError::NoActiveSession);
        }
        let result = session.enqueue(tracks).await;
        self.observe(result)
    }

    pub async fn pause(&self, guild_id: GuildId, paused: bool) -> Result<()> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        let result = session.pause(paused).await;
        self.observe(result)
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<Track> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        let result = session.skip().await;
        self.observe(result)
    }

    pub async fn set_volume(&self, guild_id: GuildId, volume: i64) -> Result<u8> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        let result = session.set_volume(volume).await;
        self.observe(result)
    }

    pub async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<()> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        let result = session.seek(position).await;
        self.observe(result)
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> Result<()> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        session.shuffle()
    }

    pub async fn clear(&self, guild_id: GuildId) -> Result<usize> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        session.clear()
    }

    pub async fn remove(&self, guild_id: GuildId, position: i64) -> Result<Track> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        session.remove(position)
    }

    pub async fn set_loop_mode(&self, guild_id: GuildId, mode: Option<LoopMode>) -> Result<LoopMode> {
        let handle = self.session(guild_id)?;
        let mut session = handle.lock().await;
        session.set_loop_mode(mode)
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<()> {
        let handle = self.session(guild_id)?;
        self.destroy(&handle).await
    }

    /// Destroys the session behind `handle` and unregisters it.
    pub async fn destroy(&self, handle: &Arc<SessionHandle>) -> Result<()> {
        let mut session = handle.lock().await;
        if session.is_destroyed() {
            return Err(PlaybackError::NoActiveSession);
        }
        self.teardown_locked(handle, &mut session).await;
        Ok(())
    }

    /// Destroys the session only if it has nothing queued or playing.
    ///
    /// The check and the teardown share one lock, so a concurrent `enqueue`
    /// either lands first and keeps the session alive or finds it destroyed.
    /// Returns whether the session was destroyed.
    pub async fn destroy_if_unused(&self, handle: &Arc<SessionHandle>) -> bool {
        let mut session = handle.lock().await;
        if session.is_destroyed() || session.queue().total_len() > 0 {
            return false;
        }
        info!("🧹 Sesión sin tracks descartada en guild {}", handle.guild_id());
        self.teardown_locked(handle, &mut session).await;
        true
    }

    async fn teardown_locked(&self, handle: &Arc<SessionHandle>, session: &mut PlaybackSession) {
        session.teardown(self.gateway.as_ref()).await;
        self.registry.remove_if_same(handle.guild_id(), handle);
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if let Some(node) = e.failed_node() {
                self.report_node_failure(node);
            }
        }
        result
    }

    /// Encola una desconexión sintética; la migración corre en el pump.
    fn report_node_failure(&self, node: &NodeId) {
        warn!("⚠️ Nodo {} no responde, se tratará como desconectado", node);
        let event = NodeEvent::Disconnected {
            node: node.clone(),
            reason: "node call failed".to_string(),
        };
        if self.pool.event_sender().send(event).is_err() {
            error!("Canal de eventos de nodos cerrado");
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Nadie escucha los eventos de sesión");
        }
    }

    /// Event pump for the node pool channel. Runs until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
        info!("🎧 Procesando eventos de nodos");
        while let Some(event) = events.recv().await {
            self.handle_node_event(event).await;
        }
        info!("Canal de eventos de nodos cerrado, deteniendo");
    }

    pub async fn handle_node_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Ready { node, resumed } => {
                info!("✅ Nodo {} listo (resumido: {})", node, resumed);
                self.pool.report_connect(&node);
            }
            NodeEvent::Disconnected { node, reason } => {
                warn!("🔌 Nodo {} desconectado: {}", node, reason);
                self.node_disconnected(&node).await;
            }
            NodeEvent::Stats { node, stats } => {
                self.pool.update_stats(&node, stats);
            }
            player_event => {
                let Some(guild_id) = player_event.guild_id() else {
                    return;
                };
                match self.registry.get(guild_id) {
                    Some(handle) => {
                        if !handle.deliver(player_event) {
                            debug!("Buzón cerrado para guild {}", guild_id);
                        }
                    }
                    None => debug!("Evento para guild {} sin sesión activa", guild_id),
                }
            }
        }
    }

    async fn drain_mailbox(
        self: Arc<Self>,
        handle: Weak<SessionHandle>,
        mut mailbox: mpsc::UnboundedReceiver<NodeEvent>,
    ) {
        while let Some(event) = mailbox.recv().await {
            let Some(handle) = handle.upgrade() else {
                break;
            };
            self.apply_event(&handle, event).await;
        }
    }

    async fn apply_event(&self, handle: &Arc<SessionHandle>, event: NodeEvent) {
        let mut session = handle.lock().await;
        if session.is_destroyed() {
            return;
        }
        let guild_id = session.guild_id();
        let text_channel_id = session.text_channel_id();

        let result = match event {
            NodeEvent::TrackStart { node, track, .. } => {
                if let Some(track) = session.on_track_start(&node, &track) {
                    self.emit(SessionEvent::TrackStarted {
                        guild_id,
                        text_channel_id,
                        track,
                    });
                }
                Ok(())
            }
            NodeEvent::TrackEnd {
                node, track, reason, ..
            } => match session.on_track_end(&node, &track, reason).await {
                Ok(EndOutcome::Ignored) | Ok(EndOutcome::Advanced(PlayOutcome::Started(_))) => Ok(()),
                Ok(EndOutcome::Advanced(PlayOutcome::Exhausted)) => {
                    self.teardown_locked(handle, &mut session).await;
                    self.emit(SessionEvent::QueueEnded {
                        guild_id,
                        text_channel_id,
                    });
                    Ok(())
                }
                Ok(EndOutcome::Halted { failures, message }) => {
                    self.emit(SessionEvent::Fatal {
                        guild_id,
                        text_channel_id,
                        reason: format!(
                            "Stopped after {failures} tracks in a row failed to play (last error: {message})."
                        ),
                    });
                    Ok(())
                }
                Err(e) => Err(e),
            },
            NodeEvent::TrackException {
                node,
                track,
                message,
                ..
            } => {
                session.on_track_exception(&node, &track, &message);
                Ok(())
            }
            NodeEvent::TrackStuck {
                node,
                track,
                threshold,
                ..
            } => session.on_track_stuck(&node, &track, threshold).await,
            NodeEvent::PlayerUpdate { node, position, .. } => {
                session.on_player_update(&node, position);
                Ok(())
            }
            NodeEvent::VoiceClosed { code, reason, .. } if VOICE_GONE_CODES.contains(&code) => {
                warn!(
                    "🔇 Conexión de voz cerrada en guild {} ({}): {}",
                    guild_id, code, reason
                );
                self.teardown_locked(handle, &mut session).await;
                self.emit(SessionEvent::Fatal {
                    guild_id,
                    text_channel_id,
                    reason: "Disconnected from the voice channel.".to_string(),
                });
                Ok(())
            }
            NodeEvent::VoiceClosed { code, reason, .. } => {
                debug!("Voz cerrada en guild {} ({}): {}", guild_id, code, reason);
                Ok(())
            }
            NodeEvent::Ready { .. } | NodeEvent::Disconnected { .. } | NodeEvent::Stats { .. } => Ok(()),
        };

        if let Err(e) = result {
            warn!("❌ Error aplicando evento de nodo en guild {}: {}", guild_id, e);
            if let Some(node) = e.failed_node() {
                self.report_node_failure(node);
            }
        }
    }

    /// Marks `node` down and moves each of its sessions to a healthy node.
    ///
    /// Sessions that cannot be moved are destroyed with a fatal event.
    pub async fn node_disconnected(&self, node: &NodeId) {
        let orphaned = self.pool.report_disconnect(node);
        if orphaned.is_empty() {
            return;
        }
        info!("🔀 Migrando {} sesiones del nodo {}", orphaned.len(), node);

        let handles: Vec<Arc<SessionHandle>> = orphaned
            .into_iter()
            .filter_map(|guild_id| self.registry.get(guild_id))
            .collect();
        join_all(handles.iter().map(|handle| self.migrate_or_destroy(handle, node))).await;
    }

    async fn migrate_or_destroy(&self, handle: &Arc<SessionHandle>, failed: &NodeId) {
        let mut session = handle.lock().await;
        if session.is_destroyed() || session.node_id() != failed {
            return;
        }
        let guild_id = session.guild_id();
        let text_channel_id = session.text_channel_id();

        let reason = match self.pool.assign_node(guild_id) {
            Ok(target) => match session.migrate(target.clone()).await {
                Ok(from) => {
                    self.emit(SessionEvent::Migrated {
                        guild_id,
                        text_channel_id,
                        from,
                        to: target,
                    });
                    return;
                }
                Err(e) => {
                    error!("❌ Migración fallida en guild {}: {}", guild_id, e);
                    if let Some(node) = e.failed_node() {
                        self.report_node_failure(node);
                    }
                    format!("Lost the audio node and could not resume playback: {e}")
                }
            },
            Err(_) => {
                error!("❌ Sin nodos disponibles para guild {}", guild_id);
                "Lost connection to the audio node and no other node is available.".to_string()
            }
        };

        self.teardown_locked(handle, &mut session).await;
        self.emit(SessionEvent::Fatal {
            guild_id,
            text_channel_id,
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::gateway::MockVoiceGateway;
    use crate::audio::node::{NodeError, TrackEndReason};
    use crate::audio::session::SessionState;
    use crate::audio::testing::{channel, guild, track, user, voice, FakeNode};
    use crate::audio::track::LoadResult;
    use crate::cache::ResolveCache;
    use pretty_assertions::assert_eq;

    struct Harness {
        manager: Arc<SessionManager>,
        pool: Arc<NodePool>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        node_events: Option<mpsc::UnboundedReceiver<NodeEvent>>,
    }

    impl Harness {
        fn new(nodes: &[&Arc<FakeNode>]) -> Self {
            let mut gateway = MockVoiceGateway::new();
            gateway.expect_open().returning(|_, _| Ok(voice()));
            gateway.expect_close().returning(|_| Ok(()));
            Self::with_gateway(nodes, gateway)
        }

        fn with_gateway(nodes: &[&Arc<FakeNode>], gateway: MockVoiceGateway) -> Self {
            let (pool, node_events) = NodePool::new();
            for node in nodes {
                let node: Arc<FakeNode> = Arc::clone(node);
                pool.register(node, true);
            }
            let resolver = TrackResolver::new(
                "ytmsearch",
                Duration::from_secs(1),
                ResolveCache::new(10, Duration::from_secs(60)),
            );
            let settings = SessionSettings {
                max_queue_size: 100,
                failure_threshold: 3,
                node_timeout: Duration::from_millis(500),
            };
            let pool = Arc::new(pool);
            let (manager, events) =
                SessionManager::new(Arc::clone(&pool), Arc::new(gateway), resolver, settings);

            Self {
                manager,
                pool,
                events,
                node_events: Some(node_events),
            }
        }

        fn start_pump(&mut self) {
            if let Some(rx) = self.node_events.take() {
                tokio::spawn(Arc::clone(&self.manager).run(rx));
            }
        }

        async fn playing(&self, guild_id: GuildId, ids: &[&str]) -> Arc<SessionHandle> {
            let (handle, _) = self
                .manager
                .create(guild_id, channel(10), channel(20), 50)
                .await
                .unwrap();
            let tracks = ids.iter().map(|id| track(id)).collect();
            self.manager.enqueue(&handle, tracks).await.unwrap();
            handle
        }

        fn drain_events(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn create_is_idempotent_and_joins_voice_once() {
        let node = FakeNode::new("main");
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_open().times(1).returning(|_, _| Ok(voice()));
        let harness = Harness::with_gateway(&[&node], gateway);

        let (first, created) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();
        assert!(created);
        let (second, created) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(harness.pool.statuses()[0].sessions, 1);
    }

    #[tokio::test]
    async fn create_without_nodes_fails_cleanly() {
        let harness = Harness::new(&[]);
        let result = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await;

        assert!(matches!(result, Err(PlaybackError::NoNodesAvailable)));
        assert!(harness.manager.registry().is_empty());
    }

    #[tokio::test]
    async fn failed_voice_join_destroys_the_new_session() {
        let node = FakeNode::new("main");
        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_open()
            .returning(|_, _| Err(anyhow::anyhow!("missing permissions")));
        let harness = Harness::with_gateway(&[&node], gateway);

        let result = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await;

        assert!(matches!(result, Err(PlaybackError::Voice(_))));
        assert!(harness.manager.registry().is_empty());
        assert_eq!(harness.pool.statuses()[0].sessions, 0);
    }

    #[tokio::test]
    async fn playlist_on_empty_session_starts_the_first_track() {
        let node = FakeNode::new("main");
        node.set_load(
            "https://example.com/mix",
            LoadResult::Playlist {
                name: "Mix".into(),
                tracks: vec![track("1"), track("2"), track("3")],
            },
        );
        let harness = Harness::new(&[&node]);
        let (handle, _) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();
        assert_eq!(handle.snapshot().state, SessionState::Connecting);

        let resolved = harness
            .manager
            .resolve(&handle, "https://example.com/mix", user(5))
            .await
            .unwrap();
        let ResolveResult::Playlist { tracks, .. } = resolved else {
            panic!("expected a playlist");
        };
        harness.manager.enqueue(&handle, tracks).await.unwrap();

        let snapshot = harness.manager.snapshot(guild(1)).unwrap();
        assert_eq!(snapshot.state, SessionState::Playing);
        assert_eq!(snapshot.current.as_ref().map(|t| t.id.as_str()), Some("1"));
        assert_eq!(snapshot.current.and_then(|t| t.requester_id), Some(user(5)));
        assert_eq!(snapshot.items.len() + 1, 3);
    }

    #[tokio::test]
    async fn unreachable_node_during_resolve_is_a_load_error() {
        let node = FakeNode::new("main");
        let harness = Harness::new(&[&node]);
        let (handle, _) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();
        node.fail_loads(NodeError::Unreachable("connection refused".into()));

        let result = harness.manager.resolve(&handle, "lofi", user(1)).await.unwrap();
        assert!(matches!(result, ResolveResult::LoadError(_)));
    }

    #[tokio::test]
    async fn volume_range_is_enforced() {
        let node = FakeNode::new("main");
        let harness = Harness::new(&[&node]);
        harness.playing(guild(1), &["a"]).await;

        for invalid in [101, -1] {
            assert!(matches!(
                harness.manager.set_volume(guild(1), invalid).await,
                Err(PlaybackError::InvalidVolume(v)) if v == invalid
            ));
        }
        assert_eq!(harness.manager.set_volume(guild(1), 0).await.unwrap(), 0);
        assert_eq!(harness.manager.set_volume(guild(1), 100).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn commands_without_a_session_report_no_active_session() {
        let harness = Harness::new(&[]);
        assert!(matches!(
            harness.manager.skip(guild(9)).await,
            Err(PlaybackError::NoActiveSession)
        ));
        assert!(matches!(
            harness.manager.snapshot(guild(9)),
            Err(PlaybackError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn skip_racing_a_natural_end_advances_exactly_once() {
        let node = FakeNode::new("main");
        let mut harness = Harness::new(&[&node]);
        node.emit_end_on_stop(harness.pool.event_sender(), Duration::from_millis(50));
        harness.start_pump();
        harness.playing(guild(1), &["a", "b", "c"]).await;

        let manager = Arc::clone(&harness.manager);
        let skip = tokio::spawn(async move { manager.skip(guild(1)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        harness
            .pool
            .event_sender()
            .send(NodeEvent::TrackEnd {
                node: node.node_id(),
                guild_id: guild(1),
                track: "enc:a".into(),
                reason: TrackEndReason::Finished,
            })
            .unwrap();

        assert_eq!(skip.await.unwrap().unwrap(), track("a"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        let snapshot = harness.manager.snapshot(guild(1)).unwrap();
        assert_eq!(snapshot.current.map(|t| t.id), Some("b".to_string()));
        assert_eq!(
            snapshot.items.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["c"]
        );
        assert_eq!(node.play_count(), 2);
        assert_eq!(node.stop_count(), 1);
    }

    #[tokio::test]
    async fn unused_check_waits_for_a_concurrent_enqueue() {
        let node = FakeNode::new("main");
        let harness = Harness::new(&[&node]);
        let (handle, created) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();
        assert!(created);

        let mut guard = handle.lock().await;
        let manager = Arc::clone(&harness.manager);
        let pending = Arc::clone(&handle);
        let discard = tokio::spawn(async move { manager.destroy_if_unused(&pending).await });
        settle().await;

        guard.enqueue(vec![track("b")]).await.unwrap();
        drop(guard);

        assert!(!discard.await.unwrap());
        assert!(harness.manager.registry().is_owner(&handle));
        assert_eq!(handle.snapshot().current, Some(track("b")));
        assert_eq!(node.play_count(), 1);
    }

    #[tokio::test]
    async fn unused_session_is_destroyed() {
        let node = FakeNode::new("main");
        let harness = Harness::new(&[&node]);
        let (handle, _) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();

        assert!(harness.manager.destroy_if_unused(&handle).await);
        assert!(harness.manager.registry().is_empty());
        assert!(!harness.manager.destroy_if_unused(&handle).await);
    }

    #[tokio::test]
    async fn exhausted_queue_destroys_the_session() {
        let node = FakeNode::new("main");
        let mut harness = Harness::new(&[&node]);
        harness.playing(guild(1), &["a"]).await;

        harness
            .manager
            .handle_node_event(NodeEvent::TrackEnd {
                node: node.node_id(),
                guild_id: guild(1),
                track: "enc:a".into(),
                reason: TrackEndReason::Finished,
            })
            .await;
        settle().await;

        assert!(harness.manager.registry().is_empty());
        assert_eq!(node.destroyed(), vec![guild(1)]);
        assert_eq!(
            harness.drain_events(),
            vec![SessionEvent::QueueEnded {
                guild_id: guild(1),
                text_channel_id: channel(20),
            }]
        );
    }

    #[tokio::test]
    async fn track_start_is_announced() {
        let node = FakeNode::new("main");
        let mut harness = Harness::new(&[&node]);
        harness.playing(guild(1), &["a"]).await;

        harness
            .manager
            .handle_node_event(NodeEvent::TrackStart {
                node: node.node_id(),
                guild_id: guild(1),
                track: "enc:a".into(),
            })
            .await;
        settle().await;

        assert_eq!(
            harness.drain_events(),
            vec![SessionEvent::TrackStarted {
                guild_id: guild(1),
                text_channel_id: channel(20),
                track: track("a"),
            }]
        );
    }

    #[tokio::test]
    async fn destroyed_session_discards_late_results() {
        let node = FakeNode::new("main");
        let harness = Harness::new(&[&node]);
        let (stale, _) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();

        harness.manager.stop(guild(1)).await.unwrap();
        assert!(matches!(
            harness.manager.enqueue(&stale, vec![track("a")]).await,
            Err(PlaybackError::NoActiveSession)
        ));

        let (fresh, created) = harness
            .manager
            .create(guild(1), channel(10), channel(20), 50)
            .await
            .unwrap();
        assert!(created);
        assert!(matches!(
            harness.manager.enqueue(&stale, vec![track("b")]).await,
            Err(PlaybackError::NoActiveSession)
        ));
        assert_eq!(fresh.snapshot().items.len(), 0);
        assert_eq!(node.play_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_migrates_sessions_to_the_healthy_node() {
        let failing = FakeNode::new("a");
        let healthy = FakeNode::new("b");
        let mut harness = Harness::new(&[&failing]);
        harness.playing(guild(1), &["x", "y"]).await;
        harness.playing(guild(2), &["z"]).await;
        harness.pool.register(healthy.clone(), true);

        harness.manager.node_disconnected(&failing.node_id()).await;

        for guild_id in [guild(1), guild(2)] {
            let snapshot = harness.manager.snapshot(guild_id).unwrap();
            assert_eq!(snapshot.node_id, healthy.node_id());
            assert_eq!(snapshot.state, SessionState::Playing);
        }
        assert_eq!(harness.manager.registry().len(), 2);
        assert_eq!(healthy.play_count(), 2);

        let migrated = harness
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Migrated { .. }))
            .count();
        assert_eq!(migrated, 2);
    }

    #[tokio::test]
    async fn disconnect_without_healthy_nodes_destroys_every_session() {
        let only = FakeNode::new("a");
        let mut harness = Harness::new(&[&only]);
        let first = harness.playing(guild(1), &["x"]).await;
        let second = harness.playing(guild(2), &["y"]).await;

        harness.manager.node_disconnected(&only.node_id()).await;

        assert_eq!(first.snapshot().state, SessionState::Destroyed);
        assert_eq!(second.snapshot().state, SessionState::Destroyed);
        assert!(harness.manager.registry().is_empty());

        let mut fatal: Vec<GuildId> = harness
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Fatal { guild_id, .. } => Some(guild_id),
                _ => None,
            })
            .collect();
        fatal.sort();
        assert_eq!(fatal, vec![guild(1), guild(2)]);
    }

    #[tokio::test]
    async fn node_timeouts_trigger_migration_through_the_pump() {
        let failing = FakeNode::new("a");
        let healthy = FakeNode::new("b");
        let mut harness = Harness::new(&[&failing]);
        harness.start_pump();
        harness.playing(guild(1), &["x", "y"]).await;
        harness.pool.register(healthy.clone(), true);

        failing.fail_plays(Some(NodeError::Timeout));
        harness
            .manager
            .handle_node_event(NodeEvent::TrackEnd {
                node: failing.node_id(),
                guild_id: guild(1),
                track: "enc:x".into(),
                reason: TrackEndReason::Finished,
            })
            .await;
        settle().await;

        let snapshot = harness.manager.snapshot(guild(1)).unwrap();
        assert_eq!(snapshot.node_id, healthy.node_id());
        assert_eq!(snapshot.state, SessionState::Playing);
        assert_eq!(healthy.plays()[0].encoded, "enc:y");
        let failing_status = harness
            .pool
            .statuses()
            .into_iter()
            .find(|status| status.id == failing.node_id())
            .unwrap();
        assert!(!failing_status.connected);
    }

    #[tokio::test]
    async fn voice_kick_destroys_the_session() {
        let node = FakeNode::new("main");
        let mut harness = Harness::new(&[&node]);
        harness.playing(guild(1), &["a"]).await;

        harness
            .manager
            .handle_node_event(NodeEvent::VoiceClosed {
                node: node.node_id(),
                guild_id: guild(1),
                code: 4014,
                reason: "Disconnected".into(),
            })
            .await;
        settle().await;

        assert!(harness.manager.registry().is_empty());
        assert!(matches!(
            harness.drain_events().as_slice(),
            [SessionEvent::Fatal { .. }]
        ));
    }
}
