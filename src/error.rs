//! Error kinds surfaced by the playback core.
//!
//! Every variant is recoverable: the dispatcher turns it into user-visible
//! feedback and the process keeps running.

use crate::audio::{
    node::{NodeError, NodeId},
    session::SessionState,
};

#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    #[error("You must be in a voice channel!")]
    NotInVoiceChannel,

    #[error("Nothing is playing!")]
    NoActiveSession,

    #[error("Queue is empty! Add some tracks with the play command.")]
    EmptyQueue,

    #[error("No track is currently playing!")]
    NothingPlaying,

    #[error("Please provide a valid track position between 1 and {len}!")]
    OutOfRange { position: i64, len: usize },

    #[error("Please provide a valid volume between 0 and 100!")]
    InvalidVolume(i64),

    #[error("No more tracks in queue to skip to!")]
    NothingToSkip,

    #[error("{}", already_in_state_message(.0))]
    AlreadyInState(SessionState),

    #[error("No audio nodes are available right now, try again later.")]
    NoNodesAvailable,

    #[error("Failed to load tracks: {0}")]
    LoadError(String),

    #[error("The queue is full (maximum {0} tracks)!")]
    QueueFull(usize),

    #[error("The current track cannot be seeked!")]
    NotSeekable,

    #[error("That position is past the end of the current track!")]
    InvalidPosition,

    #[error("Voice connection failed: {0}")]
    Voice(String),

    #[error("Audio node {node} failed: {source}")]
    Node {
        node: NodeId,
        #[source]
        source: NodeError,
    },
}

fn already_in_state_message(state: &SessionState) -> &'static str {
    match state {
        SessionState::Paused => "The player is already paused!",
        SessionState::Playing => "The player is already playing!",
        _ => "The player is already in that state!",
    }
}

impl PlaybackError {
    pub fn node(node: &NodeId, source: NodeError) -> Self {
        Self::Node {
            node: node.clone(),
            source,
        }
    }

    /// Nodo que debe tratarse como desconectado a raíz de este error, si lo hay.
    pub fn failed_node(&self) -> Option<&NodeId> {
        match self {
            Self::Node { node, source } if source.is_disconnect() => Some(node),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_disconnect_equivalent_node_errors_name_a_failed_node() {
        let node = NodeId::from("main");

        let timeout = PlaybackError::node(&node, NodeError::Timeout);
        assert_eq!(timeout.failed_node(), Some(&node));

        let rejected = PlaybackError::node(
            &node,
            NodeError::Rejected {
                status: 400,
                message: "bad request".into(),
            },
        );
        assert_eq!(rejected.failed_node(), None);
        assert_eq!(PlaybackError::NothingToSkip.failed_node(), None);
    }

    #[test]
    fn already_in_state_reads_naturally() {
        assert_eq!(
            PlaybackError::AlreadyInState(SessionState::Paused).to_string(),
            "The player is already paused!"
        );
        assert_eq!(
            PlaybackError::AlreadyInState(SessionState::Playing).to_string(),
            "The player is already playing!"
        );
    }
}
