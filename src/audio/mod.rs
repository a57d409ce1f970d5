//! # Audio Module
//!
//! Per-guild playback sessions on top of a pool of external audio nodes.
//!
//! The bot never decodes audio itself. It keeps, for every guild, the queue
//! and playback state, and tells an audio node (Lavalink) what to stream
//! into the guild's voice channel.
//!
//! ## Architecture
//!
//! ### [`manager`] - Session Manager
//! - Creates, looks up and destroys sessions through the [`registry`]
//! - Routes node events to the owning session, in order
//! - Migrates sessions off nodes that disconnect or stop responding
//!
//! ### [`session`] - Playback Session
//! - State machine `Connecting → Playing ⇄ Paused → Idle`, `Destroyed` terminal
//! - Play, pause, skip, seek and volume directives to the assigned node
//! - Repeated-failure guard for tracks that will not play
//!
//! ### [`queue`] - Queue Management
//! - Pending tracks plus the one now playing
//! - Shuffle, removal by position and loop modes (off, track, queue)
//!
//! ### [`node_pool`] - Node Pool
//! - Health and load (session count) per node
//! - Least-loaded assignment, no rebalancing on reconnect
//!
//! ### [`resolver`] / [`lavalink`] - Search and transport
//! - Query classification (URL vs. search term) and result caching
//! - Lavalink v4 REST control channel and websocket event stream
//!
//! ## Concurrency
//!
//! Sessions of different guilds never share a lock. Within a guild, every
//! mutation holds the session mutex for the whole operation, node round
//! trips included, so a `skip` and a node track-end event cannot both
//! advance the queue.

pub mod gateway;
pub mod lavalink;
pub mod manager;
pub mod node;
pub mod node_pool;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;
