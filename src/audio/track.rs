use serenity::model::id::UserId;
use std::time::Duration;

/// A resolved, playable audio item.
///
/// `encoded` is the opaque handle the audio node needs to play the track;
/// the rest is display metadata. `requester_id` is attached when the track
/// is handed to a caller, never by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: String,
    pub encoded: String,
    pub title: String,
    pub author: String,
    pub duration_ms: u64,
    pub source_uri: Option<String>,
    pub artwork_url: Option<String>,
    pub source_name: String,
    pub is_stream: bool,
    pub is_seekable: bool,
    pub requester_id: Option<UserId>,
}

impl Track {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester_id = Some(requester);
        self
    }

    /// Dos tracks son "el mismo" para el nodo si comparten el handle codificado.
    pub fn is_encoded(&self, encoded: &str) -> bool {
        self.encoded == encoded
    }
}

/// What an audio node returned for a load request.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult {
    Track(Track),
    Playlist {
        name: String,
        tracks: Vec<Track>,
    },
    Search(Vec<Track>),
    Empty,
    Error {
        message: String,
        severity: String,
    },
}

impl LoadResult {
    /// Solo se cachean resultados con contenido reproducible.
    pub fn is_cacheable(&self) -> bool {
        match self {
            Self::Track(_) => true,
            Self::Playlist { tracks, .. } | Self::Search(tracks) => !tracks.is_empty(),
            Self::Empty | Self::Error { .. } => false,
        }
    }
}

/// Classified outcome of resolving a user query.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveResult {
    Playlist { name: String, tracks: Vec<Track> },
    Single(Track),
    Empty,
    LoadError(String),
}
