//! # Command Dispatcher
//!
//! Turns a parsed text command into calls on the [`SessionManager`] and
//! answers with a structured [`Feedback`]. Rendering is left to the
//! caller (see [`crate::ui::embeds`]).
//!
//! Read-only commands (`queue`, `nowplaying`, `status`, `help`) work from
//! the published session snapshot and never wait for a session lock.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audio::manager::SessionManager;
use crate::audio::node_pool::NodeStatus;
use crate::audio::queue::{LoopMode, QueuePage};
use crate::audio::registry::SessionHandle;
use crate::audio::session::{SessionSnapshot, SessionState};
use crate::audio::track::{ResolveResult, Track};
use crate::error::PlaybackError;
use crate::storage::JsonStorage;

pub const QUEUE_PAGE_SIZE: usize = 10;

/// `(usage, description)` for every command, in help order.
pub const COMMANDS: &[(&str, &str)] = &[
    ("play <query>", "Play a song or playlist"),
    ("pause", "Pause the current track"),
    ("resume", "Resume the current track"),
    ("skip", "Skip the current track"),
    ("stop", "Stop playback and clear queue"),
    ("queue [page]", "Show the current queue"),
    ("nowplaying", "Show current track info"),
    ("volume <0-100>", "Adjust player volume"),
    ("shuffle", "Shuffle the current queue"),
    ("loop [off|track|queue]", "Toggle queue loop mode"),
    ("remove <position>", "Remove a track from queue"),
    ("clear", "Clear the current queue"),
    ("seek <time>", "Jump to a position in the current track"),
    ("status", "Show player status"),
    ("help", "Show this help message"),
];

/// Comandos que exigen que el autor esté en un canal de voz.
const MUSIC_COMMANDS: &[&str] = &[
    "play", "skip", "stop", "pause", "resume", "queue", "nowplaying", "volume", "shuffle", "loop",
    "remove", "clear", "seek",
];

/// One inbound text command with the context it was sent from.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    pub guild_id: GuildId,
    pub voice_channel_id: Option<ChannelId>,
    pub text_channel_id: ChannelId,
    pub requester_id: UserId,
}

impl Command {
    /// Parses `content` if it starts with `prefix`. Aliases are normalised.
    pub fn parse(
        content: &str,
        prefix: &str,
        guild_id: GuildId,
        voice_channel_id: Option<ChannelId>,
        text_channel_id: ChannelId,
        requester_id: UserId,
    ) -> Option<Self> {
        let body = content.strip_prefix(prefix)?.trim();
        let mut words = body.split_whitespace();
        let name = words.next()?.to_lowercase();
        let name = match name.as_str() {
            "np" => "nowplaying".to_string(),
            "q" => "queue".to_string(),
            _ => name,
        };

        Some(Self {
            name,
            args: words.map(str::to_string).collect(),
            guild_id,
            voice_channel_id,
            text_channel_id,
            requester_id,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("Please provide a search query!")]
    MissingQuery,

    #[error("No results found! Try with a different search term.")]
    NoMatches,

    #[error("Invalid argument! Usage: `{usage}`")]
    InvalidArgument { usage: &'static str },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// What happened, for the presentation layer to render.
#[derive(Debug, Clone)]
pub enum Feedback {
    Help {
        prefix: String,
    },
    AddedTrack {
        track: Track,
        position: usize,
        started: bool,
    },
    AddedPlaylist {
        name: String,
        count: usize,
        started: Option<Track>,
    },
    Paused,
    Resumed,
    Skipped(Track),
    Stopped,
    Queue {
        current: Option<Track>,
        page: QueuePage,
        loop_mode: LoopMode,
        total: usize,
        total_duration: Duration,
    },
    NowPlaying {
        track: Track,
        position: Duration,
        paused: bool,
    },
    Volume(u8),
    Shuffled(usize),
    LoopMode(LoopMode),
    Removed(Track),
    Cleared(usize),
    Seeked(Duration),
    Status {
        session: Option<SessionSnapshot>,
        nodes: Vec<NodeStatus>,
    },
}

pub struct Dispatcher {
    manager: Arc<SessionManager>,
    storage: Arc<Mutex<JsonStorage>>,
    prefix: String,
}

impl Dispatcher {
    pub fn new(manager: Arc<SessionManager>, storage: Arc<Mutex<JsonStorage>>, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            storage,
            prefix: prefix.into(),
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub async fn dispatch(&self, cmd: Command) -> Result<Feedback, CommandError> {
        if MUSIC_COMMANDS.contains(&cmd.name.as_str()) && cmd.voice_channel_id.is_none() {
            return Err(PlaybackError::NotInVoiceChannel.into());
        }
        debug!("Comando '{}' en guild {}", cmd.name, cmd.guild_id);

        let guild_id = cmd.guild_id;
        match cmd.name.as_str() {
            "help" => Ok(Feedback::Help {
                prefix: self.prefix.clone(),
            }),
            "play" => self.play(&cmd).await,
            "pause" => {
                self.manager.pause(guild_id, true).await?;
                Ok(Feedback::Paused)
            }
            "resume" => {
                self.manager.pause(guild_id, false).await?;
                Ok(Feedback::Resumed)
            }
            "skip" => Ok(Feedback::Skipped(self.manager.skip(guild_id).await?)),
            "stop" => {
                self.manager.stop(guild_id).await?;
                Ok(Feedback::Stopped)
            }
            "queue" => self.queue(&cmd),
            "nowplaying" => {
                let snapshot = self.manager.snapshot(guild_id)?;
                let track = snapshot.current.ok_or(PlaybackError::NothingPlaying)?;
                Ok(Feedback::NowPlaying {
                    track,
                    position: snapshot.position,
                    paused: snapshot.state == SessionState::Paused,
                })
            }
            "volume" => self.volume(&cmd).await,
            "shuffle" => {
                self.manager.shuffle(guild_id).await?;
                let count = self.manager.snapshot(guild_id)?.items.len();
                Ok(Feedback::Shuffled(count))
            }
            "loop" => {
                let mode = match cmd.args.first() {
                    Some(arg) => Some(LoopMode::parse(arg).ok_or(CommandError::InvalidArgument {
                        usage: "loop [off|track|queue]",
                    })?),
                    None => None,
                };
                Ok(Feedback::LoopMode(self.manager.set_loop_mode(guild_id, mode).await?))
            }
            "remove" => {
                let len = self.manager.snapshot(guild_id)?.items.len();
                let position = cmd
                    .args
                    .first()
                    .and_then(|arg| arg.parse::<i64>().ok())
                    .ok_or(PlaybackError::OutOfRange { position: 0, len })?;
                Ok(Feedback::Removed(self.manager.remove(guild_id, position).await?))
            }
            "clear" => Ok(Feedback::Cleared(self.manager.clear(guild_id).await?)),
            "seek" => {
                let position = cmd
                    .args
                    .first()
                    .and_then(|arg| parse_timestamp(arg))
                    .ok_or(CommandError::InvalidArgument { usage: "seek <seconds|m:ss>" })?;
                self.manager.seek(guild_id, position).await?;
                Ok(Feedback::Seeked(position))
            }
            "status" => Ok(Feedback::Status {
                session: self.manager.snapshot(guild_id).ok(),
                nodes: self.manager.node_statuses(),
            }),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    async fn play(&self, cmd: &Command) -> Result<Feedback, CommandError> {
        let voice_channel_id = cmd.voice_channel_id.ok_or(PlaybackError::NotInVoiceChannel)?;
        let query = cmd.args.join(" ");
        if query.trim().is_empty() {
            return Err(CommandError::MissingQuery);
        }

        let volume = self.storage.lock().await.guild_settings(cmd.guild_id.get()).volume;
        let (handle, created) = self
            .manager
            .create(cmd.guild_id, voice_channel_id, cmd.text_channel_id, volume)
            .await?;

        let resolved = match self.manager.resolve(&handle, &query, cmd.requester_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.discard_if_unused(&handle, created).await;
                return Err(e.into());
            }
        };

        match resolved {
            ResolveResult::Single(track) => {
                let enqueued = self.manager.enqueue(&handle, vec![track.clone()]).await?;
                info!("➕ '{}' agregado en guild {}", track.title, cmd.guild_id);
                Ok(Feedback::AddedTrack {
                    track,
                    position: enqueued.position,
                    started: enqueued.started.is_some(),
                })
            }
            ResolveResult::Playlist { name, tracks } => {
                let enqueued = self.manager.enqueue(&handle, tracks).await?;
                info!(
                    "📋 Playlist '{}' agregada en guild {} ({} tracks)",
                    name, cmd.guild_id, enqueued.added
                );
                Ok(Feedback::AddedPlaylist {
                    name,
                    count: enqueued.added,
                    started: enqueued.started,
                })
            }
            ResolveResult::Empty => {
                self.discard_if_unused(&handle, created).await;
                Err(CommandError::NoMatches)
            }
            ResolveResult::LoadError(message) => {
                self.discard_if_unused(&handle, created).await;
                Err(PlaybackError::LoadError(message).into())
            }
        }
    }

    /// Destruye la sesión creada para este `play` si quedó sin nada que reproducir.
    async fn discard_if_unused(&self, handle: &Arc<SessionHandle>, created: bool) {
        if created && !self.manager.destroy_if_unused(handle).await {
            debug!("Sesión de guild {} conservada: tiene tracks o ya no existe", handle.guild_id());
        }
    }

    fn queue(&self, cmd: &Command) -> Result<Feedback, CommandError> {
        let snapshot = self.manager.snapshot(cmd.guild_id)?;
        if snapshot.current.is_none() && snapshot.items.is_empty() {
            return Err(PlaybackError::EmptyQueue.into());
        }

        let page = cmd
            .args
            .first()
            .and_then(|arg| arg.parse::<usize>().ok())
            .unwrap_or(1);

        Ok(Feedback::Queue {
            page: snapshot.page(page, QUEUE_PAGE_SIZE),
            total: snapshot.items.len(),
            current: snapshot.current,
            loop_mode: snapshot.loop_mode,
            total_duration: snapshot.total_duration,
        })
    }

    async fn volume(&self, cmd: &Command) -> Result<Feedback, CommandError> {
        let requested = cmd
            .args
            .first()
            .and_then(|arg| arg.parse::<i64>().ok())
            .ok_or(CommandError::InvalidArgument { usage: "volume <0-100>" })?;

        let volume = self.manager.set_volume(cmd.guild_id, requested).await?;
        if let Err(e) = self
            .storage
            .lock()
            .await
            .set_volume(cmd.guild_id.get(), volume)
            .await
        {
            warn!("No se pudo guardar el volumen de guild {}: {:?}", cmd.guild_id, e);
        }
        Ok(Feedback::Volume(volume))
    }
}

/// Parses `90`, `1:30` or `1:02:03` into a duration.
pub fn parse_timestamp(raw: &str) -> Option<Duration> {
    let mut seconds: u64 = 0;
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for (index, part) in parts.iter().enumerate() {
        let value: u64 = part.parse().ok()?;
        if index > 0 && value >= 60 {
            return None;
        }
        seconds = seconds.checked_mul(60)?.checked_add(value)?;
    }
    Some(Duration::from_secs(seconds))
}
