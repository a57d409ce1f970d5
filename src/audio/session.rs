//! # Playback Session
//!
//! Per-guild playback state machine. A session owns its [`Queue`], the voice
//! credentials for its channel and the playback flags, and drives its
//! assigned audio node through the [`AudioNode`] control channel.
//!
//! ```text
//! Connecting ──play──▶ Playing ⇄ Paused
//!     │                  │
//!     └──── exhausted ───┴──▶ Idle        (any) ──teardown──▶ Destroyed
//! ```
//!
//! A session does no locking of its own: callers hold it behind the
//! per-guild mutex in [`SessionHandle`](crate::audio::registry::SessionHandle)
//! for the whole duration of every `async` method, node round trips
//! included.

use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::audio::gateway::VoiceGateway;
use crate::audio::node::{
    AudioNode, NodeError, NodeId, PlayOptions, TrackEndReason, VoiceConnection,
};
use crate::audio::node_pool::NodePool;
use crate::audio::queue::{paginate, LoopMode, Queue, QueuePage};
use crate::audio::track::Track;
use crate::error::{PlaybackError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Playing,
    Paused,
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Límites compartidos por todas las sesiones.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_queue_size: usize,
    pub failure_threshold: u32,
    pub node_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            failure_threshold: 3,
            node_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Started(Track),
    /// Nothing left to play; the session is idle.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// Stale, foreign or non-advancing end event.
    Ignored,
    Advanced(PlayOutcome),
    /// Too many consecutive failures; auto-advance stopped.
    Halted { failures: u32, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    /// Posición (1-based) del primer track agregado.
    pub position: usize,
    pub added: usize,
    pub started: Option<Track>,
}

/// Read-only copy of a session, published after every locked operation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub voice_channel_id: ChannelId,
    pub text_channel_id: ChannelId,
    pub state: SessionState,
    pub current: Option<Track>,
    pub items: Vec<Track>,
    pub loop_mode: LoopMode,
    pub volume: u8,
    pub node_id: NodeId,
    pub position: Duration,
    pub connected_at: DateTime<Utc>,
    pub total_duration: Duration,
}

impl SessionSnapshot {
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage {
        paginate(&self.items, page, per_page)
    }

    pub fn is_active(&self) -> bool {
        self.state != SessionState::Destroyed
    }
}

pub struct PlaybackSession {
    guild_id: GuildId,
    voice_channel_id: ChannelId,
    text_channel_id: ChannelId,
    queue: Queue,
    node_id: NodeId,
    pool: Arc<NodePool>,
    voice: Option<VoiceConnection>,
    state: SessionState,
    volume: u8,
    position: Duration,
    connected_at: DateTime<Utc>,
    awaiting_end: bool,
    pending_skip: bool,
    current_failure: Option<String>,
    consecutive_failures: u32,
    settings: SessionSettings,
}

impl PlaybackSession {
    pub fn new(
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        text_channel_id: ChannelId,
        node_id: NodeId,
        pool: Arc<NodePool>,
        volume: u8,
        settings: SessionSettings,
    ) -> Self {
        Self {
            guild_id,
            voice_channel_id,
            text_channel_id,
            queue: Queue::new(settings.max_queue_size),
            node_id,
            pool,
            voice: None,
            state: SessionState::Connecting,
            volume: volume.min(100),
            position: Duration::ZERO,
            connected_at: Utc::now(),
            awaiting_end: false,
            pending_skip: false,
            current_failure: None,
            consecutive_failures: 0,
            settings,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn text_channel_id(&self) -> ChannelId {
        self.text_channel_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == SessionState::Destroyed
    }

    fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Connecting)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(PlaybackError::NoActiveSession);
        }
        Ok(())
    }

    fn node(&self) -> Result<Arc<dyn AudioNode>> {
        self.pool.node(&self.node_id).ok_or_else(|| {
            PlaybackError::node(
                &self.node_id,
                NodeError::Unreachable("node is not connected".to_string()),
            )
        })
    }

    /// Ejecuta una llamada al nodo con timeout; el timeout cuenta como desconexión.
    async fn call<T>(&self, request: impl Future<Output = std::result::Result<T, NodeError>>) -> Result<T> {
        match tokio::time::timeout(self.settings.node_timeout, request).await {
            Ok(result) => result.map_err(|e| PlaybackError::node(&self.node_id, e)),
            Err(_) => Err(PlaybackError::node(&self.node_id, NodeError::Timeout)),
        }
    }

    /// Opens the voice connection if the session does not have one yet.
    pub async fn connect(&mut self, gateway: &dyn VoiceGateway) -> Result<()> {
        self.ensure_alive()?;
        if self.voice.is_some() {
            return Ok(());
        }

        let opened = tokio::time::timeout(
            self.settings.node_timeout,
            gateway.open(self.guild_id, self.voice_channel_id),
        )
        .await
        .map_err(|_| PlaybackError::Voice("timed out joining the voice channel".to_string()))?
        .map_err(|e| PlaybackError::Voice(e.to_string()))?;

        info!(
            "🔊 Conectado al canal de voz {} en guild {}",
            self.voice_channel_id, self.guild_id
        );
        self.voice = Some(opened);
        self.connected_at = Utc::now();
        Ok(())
    }

    /// Advances the queue and starts the next track.
    pub async fn play(&mut self) -> Result<PlayOutcome> {
        self.ensure_alive()?;
        if !self.is_idle() {
            return Err(PlaybackError::AlreadyInState(self.state));
        }

        self.pending_skip = false;
        let next = self.queue.advance().cloned();
        self.start_next(next).await
    }

    async fn start_next(&mut self, next: Option<Track>) -> Result<PlayOutcome> {
        match next {
            Some(track) => {
                // Si el nodo falla, una migración debe arrancar este track desde cero.
                self.position = Duration::ZERO;
                self.current_failure = None;
                self.start(&track, Duration::ZERO, false).await?;
                Ok(PlayOutcome::Started(track))
            }
            None => {
                self.state = SessionState::Idle;
                self.awaiting_end = false;
                self.position = Duration::ZERO;
                info!("📭 Cola terminada en guild {}", self.guild_id);
                Ok(PlayOutcome::Exhausted)
            }
        }
    }

    async fn start(&mut self, track: &Track, start: Duration, paused: bool) -> Result<()> {
        let voice = self
            .voice
            .clone()
            .ok_or_else(|| PlaybackError::Voice("not connected to a voice channel".to_string()))?;
        let node = self.node()?;
        let options = PlayOptions {
            volume: self.volume,
            start,
            paused,
        };

        self.call(node.play(self.guild_id, track, &voice, options)).await?;

        self.state = if paused {
            SessionState::Paused
        } else {
            SessionState::Playing
        };
        self.awaiting_end = true;
        self.position = start;
        self.current_failure = None;
        info!(
            "🎵 Reproduciendo en guild {} (nodo {}): {}",
            self.guild_id, self.node_id, track.title
        );
        Ok(())
    }

    /// Appends tracks and starts playback when nothing is playing.
    pub async fn enqueue(&mut self, tracks: Vec<Track>) -> Result<Enqueued> {
        self.ensure_alive()?;

        let requested = tracks.len();
        let position = self.queue.len() + 1;
        let added = self.queue.add_all(tracks);
        if added == 0 && requested > 0 {
            return Err(PlaybackError::QueueFull(self.settings.max_queue_size));
        }

        let started = if self.is_idle() && added > 0 {
            match self.play().await? {
                PlayOutcome::Started(track) => Some(track),
                PlayOutcome::Exhausted => None,
            }
        } else {
            None
        };

        Ok(Enqueued {
            position,
            added,
            started,
        })
    }

    pub async fn pause(&mut self, paused: bool) -> Result<()> {
        match (self.state, paused) {
            (SessionState::Playing, true) | (SessionState::Paused, false) => {}
            (SessionState::Paused, true) | (SessionState::Playing, false) => {
                return Err(PlaybackError::AlreadyInState(self.state))
            }
            (SessionState::Destroyed, _) => return Err(PlaybackError::NoActiveSession),
            _ => return Err(PlaybackError::NothingPlaying),
        }

        let node = self.node()?;
        self.call(node.set_paused(self.guild_id, paused)).await?;
        self.state = if paused {
            SessionState::Paused
        } else {
            SessionState::Playing
        };
        info!(
            "{} guild {}",
            if paused { "⏸️ Pausado" } else { "▶️ Reanudado" },
            self.guild_id
        );
        Ok(())
    }

    /// Stops the current track; the node's end event performs the advance.
    pub async fn skip(&mut self) -> Result<Track> {
        self.ensure_alive()?;
        let current = match self.state {
            SessionState::Playing | SessionState::Paused => self
                .queue
                .current()
                .cloned()
                .ok_or(PlaybackError::NothingPlaying)?,
            _ => return Err(PlaybackError::NothingPlaying),
        };
        if self.queue.is_empty() {
            return Err(PlaybackError::NothingToSkip);
        }

        let node = self.node()?;
        self.pending_skip = true;
        if let Err(e) = self.call(node.stop(self.guild_id)).await {
            self.pending_skip = false;
            return Err(e);
        }

        info!("⏭️ Saltando en guild {}: {}", self.guild_id, current.title);
        Ok(current)
    }

    pub async fn set_volume(&mut self, volume: i64) -> Result<u8> {
        self.ensure_alive()?;
        let volume = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(PlaybackError::InvalidVolume(volume))?;

        if matches!(self.state, SessionState::Playing | SessionState::Paused) {
            let node = self.node()?;
            self.call(node.set_volume(self.guild_id, volume)).await?;
        }

        self.volume = volume;
        info!("🔊 Volumen en guild {}: {}%", self.guild_id, volume);
        Ok(volume)
    }

    pub async fn seek(&mut self, position: Duration) -> Result<()> {
        self.ensure_alive()?;
        if !matches!(self.state, SessionState::Playing | SessionState::Paused) {
            return Err(PlaybackError::NothingPlaying);
        }
        let track = self.queue.current().ok_or(PlaybackError::NothingPlaying)?;
        if track.is_stream || !track.is_seekable {
            return Err(PlaybackError::NotSeekable);
        }
        if position > track.duration() {
            return Err(PlaybackError::InvalidPosition);
        }

        let node = self.node()?;
        self.call(node.seek(self.guild_id, position)).await?;
        self.position = position;
        Ok(())
    }

    pub fn shuffle(&mut self) -> Result<()> {
        self.ensure_alive()?;
        if self.queue.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }
        self.queue.shuffle();
        Ok(())
    }

    pub fn clear(&mut self) -> Result<usize> {
        self.ensure_alive()?;
        if self.queue.is_empty() {
            return Err(PlaybackError::EmptyQueue);
        }
        Ok(self.queue.clear())
    }

    pub fn remove(&mut self, position: i64) -> Result<Track> {
        self.ensure_alive()?;
        self.queue.remove(position)
    }

    /// Sets the loop mode, or toggles off/queue when `mode` is `None`.
    pub fn set_loop_mode(&mut self, mode: Option<LoopMode>) -> Result<LoopMode> {
        self.ensure_alive()?;
        Ok(match mode {
            Some(mode) => {
                self.queue.set_loop_mode(mode);
                mode
            }
            None => self.queue.toggle_loop(),
        })
    }

    fn is_for_current(&self, node: &NodeId, encoded: &str) -> bool {
        !self.is_destroyed()
            && *node == self.node_id
            && self
                .queue
                .current()
                .is_some_and(|track| track.is_encoded(encoded))
    }

    /// Confirms the current track started; resets the failure streak.
    pub fn on_track_start(&mut self, node: &NodeId, encoded: &str) -> Option<Track> {
        if !self.is_for_current(node, encoded) {
            return None;
        }
        self.consecutive_failures = 0;
        self.queue.current().cloned()
    }

    pub fn on_track_exception(&mut self, node: &NodeId, encoded: &str, message: &str) {
        if self.is_for_current(node, encoded) {
            warn!("⚠️ Error en track (guild {}): {}", self.guild_id, message);
            self.current_failure = Some(message.to_string());
        }
    }

    /// A stuck track counts as failed and is stopped so the node ends it.
    pub async fn on_track_stuck(&mut self, node: &NodeId, encoded: &str, threshold: Duration) -> Result<()> {
        if !self.is_for_current(node, encoded) || !self.awaiting_end {
            return Ok(());
        }
        warn!(
            "⚠️ Track atascado en guild {} tras {:?}, deteniendo",
            self.guild_id, threshold
        );
        self.current_failure = Some(format!("track stuck for {}ms", threshold.as_millis()));
        let node = self.node()?;
        self.call(node.stop(self.guild_id)).await
    }

    pub fn on_player_update(&mut self, node: &NodeId, position: Duration) {
        if *node == self.node_id && !self.is_destroyed() {
            self.position = position;
        }
    }

    /// Applies a node `TrackEnd` event.
    ///
    /// The event only advances the queue if it comes from the assigned node,
    /// names the current track and the session is still waiting for that
    /// track to end. Every other end event is dropped, which is what keeps a
    /// `skip` and a natural end from advancing twice.
    pub async fn on_track_end(
        &mut self,
        node: &NodeId,
        encoded: &str,
        reason: TrackEndReason,
    ) -> Result<EndOutcome> {
        if !self.awaiting_end || !self.is_for_current(node, encoded) {
            debug!(
                "Evento de fin ignorado en guild {} (nodo {}, {:?})",
                self.guild_id, node, reason
            );
            return Ok(EndOutcome::Ignored);
        }
        if !reason.may_advance() {
            return Ok(EndOutcome::Ignored);
        }

        self.awaiting_end = false;
        self.state = SessionState::Idle;
        let forced = std::mem::take(&mut self.pending_skip);

        let failure = match reason {
            TrackEndReason::LoadFailed => Some(
                self.current_failure
                    .take()
                    .unwrap_or_else(|| "track failed to load".to_string()),
            ),
            _ => self.current_failure.take(),
        };

        let next = match failure {
            Some(message) => {
                self.consecutive_failures += 1;
                warn!(
                    "❌ Track fallido en guild {} ({} consecutivos): {}",
                    self.guild_id, self.consecutive_failures, message
                );

                if self.consecutive_failures > self.settings.failure_threshold {
                    let failures = std::mem::take(&mut self.consecutive_failures);
                    self.queue.drop_current();
                    self.position = Duration::ZERO;
                    warn!(
                        "🛑 Demasiados fallos en guild {}, reproducción detenida",
                        self.guild_id
                    );
                    return Ok(EndOutcome::Halted { failures, message });
                }
                self.queue.skip_current().cloned()
            }
            None if forced => self.queue.skip_current().cloned(),
            None => self.queue.advance().cloned(),
        };

        Ok(EndOutcome::Advanced(self.start_next(next).await?))
    }

    /// Moves the session to `node_id`, replaying the current track where it
    /// left off. Returns the previous node.
    pub async fn migrate(&mut self, node_id: NodeId) -> Result<NodeId> {
        self.ensure_alive()?;
        let previous = std::mem::replace(&mut self.node_id, node_id);
        info!(
            "🔀 Guild {} migrado del nodo {} al nodo {}",
            self.guild_id, previous, self.node_id
        );

        self.pending_skip = false;
        if let (Some(track), true) = (self.queue.current().cloned(), self.voice.is_some()) {
            let paused = self.state == SessionState::Paused;
            self.start(&track, self.position, paused).await?;
        }
        Ok(previous)
    }

    /// Releases every resource held by the session. Node and gateway
    /// failures are logged and otherwise ignored.
    pub async fn teardown(&mut self, gateway: &dyn VoiceGateway) {
        if self.is_destroyed() {
            return;
        }

        self.queue.clear();
        self.queue.drop_current();
        self.awaiting_end = false;
        self.pending_skip = false;

        if let Some(node) = self.pool.node(&self.node_id) {
            if let Err(e) = self.call(node.destroy_player(self.guild_id)).await {
                warn!("Error destruyendo player en guild {}: {}", self.guild_id, e);
            }
        }
        if self.voice.take().is_some() {
            if let Err(e) = gateway.close(self.guild_id).await {
                warn!("Error al salir del canal de voz en guild {}: {}", self.guild_id, e);
            }
        }

        self.pool.release(self.guild_id, &self.node_id);
        self.state = SessionState::Destroyed;
        info!("👋 Sesión destruida en guild {}", self.guild_id);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            guild_id: self.guild_id,
            voice_channel_id: self.voice_channel_id,
            text_channel_id: self.text_channel_id,
            state: self.state,
            current: self.queue.current().cloned(),
            items: self.queue.items().cloned().collect(),
            loop_mode: self.queue.loop_mode(),
            volume: self.volume,
            node_id: self.node_id.clone(),
            position: self.position,
            connected_at: self.connected_at,
            total_duration: self.queue.total_duration(),
        }
    }
}
