//! Contract between the playback core and an external audio node.
//!
//! A node performs search and audio streaming. The core talks to it over a
//! control channel ([`AudioNode`]) and receives its asynchronous events as
//! [`NodeEvent`]s on the pool channel.

use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{fmt, sync::Arc, time::Duration};

use crate::audio::track::{LoadResult, Track};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("node call timed out")]
    Timeout,

    #[error("node has no active session")]
    NotReady,

    #[error("node rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected node response: {0}")]
    Protocol(String),
}

impl NodeError {
    /// Errores que equivalen a perder el nodo.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout | Self::NotReady)
    }
}

/// Voice credentials handed over by the chat platform gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceConnection {
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}

/// Parameters for a play directive.
#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    pub volume: u8,
    pub start: Duration,
    pub paused: bool,
}

#[async_trait]
pub trait AudioNode: Send + Sync {
    fn id(&self) -> &NodeId;

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, NodeError>;

    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
        voice: &VoiceConnection,
        options: PlayOptions,
    ) -> Result<(), NodeError>;

    async fn stop(&self, guild_id: GuildId) -> Result<(), NodeError>;

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), NodeError>;

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), NodeError>;

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<(), NodeError>;

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError>;

    /// Pide al nodo que rehaga su canal de eventos (tras un timeout).
    fn request_reconnect(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "finished" => Some(Self::Finished),
            "loadFailed" => Some(Self::LoadFailed),
            "stopped" => Some(Self::Stopped),
            "replaced" => Some(Self::Replaced),
            "cleanup" => Some(Self::Cleanup),
            _ => None,
        }
    }

    pub fn may_advance(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed | Self::Stopped)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: Duration,
    pub lavalink_load: f64,
}

/// Asynchronous events flowing from the nodes back into the core.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Ready {
        node: NodeId,
        resumed: bool,
    },
    Disconnected {
        node: NodeId,
        reason: String,
    },
    Stats {
        node: NodeId,
        stats: NodeStats,
    },
    TrackStart {
        node: NodeId,
        guild_id: GuildId,
        track: String,
    },
    TrackEnd {
        node: NodeId,
        guild_id: GuildId,
        track: String,
        reason: TrackEndReason,
    },
    TrackException {
        node: NodeId,
        guild_id: GuildId,
        track: String,
        message: String,
    },
    TrackStuck {
        node: NodeId,
        guild_id: GuildId,
        track: String,
        threshold: Duration,
    },
    PlayerUpdate {
        node: NodeId,
        guild_id: GuildId,
        position: Duration,
        connected: bool,
    },
    VoiceClosed {
        node: NodeId,
        guild_id: GuildId,
        code: u16,
        reason: String,
    },
}

impl NodeEvent {
    /// Guild al que va dirigido el evento, si es un evento de player.
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::PlayerUpdate { guild_id, .. }
            | Self::VoiceClosed { guild_id, .. } => Some(*guild_id),
            Self::Ready { .. } | Self::Disconnected { .. } | Self::Stats { .. } => None,
        }
    }
}
