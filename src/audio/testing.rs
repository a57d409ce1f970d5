//! Test doubles shared by the audio module tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::audio::node::{
    AudioNode, NodeError, NodeEvent, NodeId, PlayOptions, TrackEndReason, VoiceConnection,
};
use crate::audio::track::{LoadResult, Track};

pub fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        encoded: format!("enc:{id}"),
        title: format!("Track {id}"),
        author: "Artist".to_string(),
        duration_ms: 180_000,
        source_uri: Some(format!("https://example.com/{id}")),
        artwork_url: None,
        source_name: "youtube".to_string(),
        is_stream: false,
        is_seekable: true,
        requester_id: None,
    }
}

pub fn voice() -> VoiceConnection {
    VoiceConnection {
        session_id: "voice-session".to_string(),
        token: "voice-token".to_string(),
        endpoint: "voice.example.com".to_string(),
    }
}

pub fn guild(id: u64) -> GuildId {
    GuildId::new(id)
}

pub fn channel(id: u64) -> ChannelId {
    ChannelId::new(id)
}

pub fn user(id: u64) -> UserId {
    UserId::new(id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayCall {
    pub guild_id: GuildId,
    pub encoded: String,
    pub start: Duration,
    pub paused: bool,
    pub volume: u8,
}

#[derive(Default)]
struct FakeState {
    loads: HashMap<String, LoadResult>,
    load_error: Option<NodeError>,
    play_error: Option<NodeError>,
    plays: Vec<PlayCall>,
    playing: HashMap<GuildId, String>,
    paused: Vec<(GuildId, bool)>,
    volumes: Vec<(GuildId, u8)>,
    seeks: Vec<(GuildId, Duration)>,
    destroyed: Vec<GuildId>,
    stop_delay: Duration,
    emit_on_stop: Option<mpsc::UnboundedSender<NodeEvent>>,
}

/// In-memory audio node recording every directive it receives.
pub struct FakeNode {
    id: NodeId,
    state: Mutex<FakeState>,
    stops: AtomicUsize,
    loads: AtomicUsize,
    reconnects: AtomicUsize,
}

impl FakeNode {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::from(id),
            state: Mutex::new(FakeState::default()),
            stops: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.id.clone()
    }

    pub fn set_load(&self, identifier: &str, result: LoadResult) {
        self.state.lock().loads.insert(identifier.to_string(), result);
    }

    pub fn fail_loads(&self, error: NodeError) {
        self.state.lock().load_error = Some(error);
    }

    pub fn fail_plays(&self, error: Option<NodeError>) {
        self.state.lock().play_error = error;
    }

    /// Simula la latencia de `stop` y el `TrackEnd(stopped)` que emite el nodo real.
    pub fn emit_end_on_stop(&self, events: mpsc::UnboundedSender<NodeEvent>, delay: Duration) {
        let mut state = self.state.lock();
        state.emit_on_stop = Some(events);
        state.stop_delay = delay;
    }

    pub fn plays(&self) -> Vec<PlayCall> {
        self.state.lock().plays.clone()
    }

    pub fn play_count(&self) -> usize {
        self.state.lock().plays.len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> Vec<(GuildId, bool)> {
        self.state.lock().paused.clone()
    }

    pub fn volumes(&self) -> Vec<(GuildId, u8)> {
        self.state.lock().volumes.clone()
    }

    pub fn seeks(&self) -> Vec<(GuildId, Duration)> {
        self.state.lock().seeks.clone()
    }

    pub fn destroyed(&self) -> Vec<GuildId> {
        self.state.lock().destroyed.clone()
    }

    pub fn reconnect_requests(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioNode for FakeNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, NodeError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(error) = &state.load_error {
            return Err(error.clone());
        }
        Ok(state
            .loads
            .get(identifier)
            .cloned()
            .unwrap_or(LoadResult::Empty))
    }

    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
        _voice: &VoiceConnection,
        options: PlayOptions,
    ) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        if let Some(error) = &state.play_error {
            return Err(error.clone());
        }
        state.plays.push(PlayCall {
            guild_id,
            encoded: track.encoded.clone(),
            start: options.start,
            paused: options.paused,
            volume: options.volume,
        });
        state.playing.insert(guild_id, track.encoded.clone());
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> Result<(), NodeError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let (delay, emitter) = {
            let state = self.state.lock();
            (state.stop_delay, state.emit_on_stop.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let stopped = self.state.lock().playing.remove(&guild_id);
        if let (Some(events), Some(track)) = (emitter, stopped) {
            let _ = events.send(NodeEvent::TrackEnd {
                node: self.id.clone(),
                guild_id,
                track,
                reason: TrackEndReason::Stopped,
            });
        }
        Ok(())
    }

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), NodeError> {
        self.state.lock().paused.push((guild_id, paused));
        Ok(())
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), NodeError> {
        self.state.lock().volumes.push((guild_id, volume));
        Ok(())
    }

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<(), NodeError> {
        self.state.lock().seeks.push((guild_id, position));
        Ok(())
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let mut state = self.state.lock();
        state.playing.remove(&guild_id);
        state.destroyed.push(guild_id);
        Ok(())
    }

    fn request_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
}
