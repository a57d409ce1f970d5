use serenity::model::id::UserId;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audio::node::{AudioNode, NodeError};
use crate::audio::track::{LoadResult, ResolveResult, Track};
use crate::cache::ResolveCache;

/// Prefijos de búsqueda que el nodo entiende tal cual.
const SEARCH_PREFIXES: &[&str] = &[
    "ytsearch:",
    "ytmsearch:",
    "scsearch:",
    "spsearch:",
    "amsearch:",
    "dzsearch:",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Direct URI or an already-prefixed search, passed through verbatim.
    Direct(String),
    /// Bare search term, prefixed with the default search platform.
    Search(String),
}

impl QueryKind {
    pub fn identifier(&self) -> &str {
        match self {
            Self::Direct(identifier) | Self::Search(identifier) => identifier,
        }
    }
}

/// Turns user queries into tracks by asking an audio node.
pub struct TrackResolver {
    search_platform: String,
    timeout: Duration,
    cache: ResolveCache,
}

impl TrackResolver {
    pub fn new(search_platform: impl Into<String>, timeout: Duration, cache: ResolveCache) -> Self {
        Self {
            search_platform: search_platform.into(),
            timeout,
            cache,
        }
    }

    pub fn classify(&self, query: &str) -> QueryKind {
        let query = query.trim();
        let is_uri = url::Url::parse(query)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);

        if is_uri || SEARCH_PREFIXES.iter().any(|prefix| query.starts_with(prefix)) {
            QueryKind::Direct(query.to_string())
        } else {
            QueryKind::Search(format!("{}:{}", self.search_platform, query))
        }
    }

    /// Resolves `query` against `node` and attaches `requester` to every track.
    ///
    /// `Err` means the node could not be reached or timed out; a failure the
    /// node reports itself comes back as `Ok(ResolveResult::LoadError)`.
    pub async fn resolve(
        &self,
        node: &dyn AudioNode,
        query: &str,
        requester: UserId,
    ) -> Result<ResolveResult, NodeError> {
        let kind = self.classify(query);
        let identifier = kind.identifier().to_string();

        let loaded = match self.cache.get(&identifier) {
            Some(cached) => {
                debug!("💾 Resultado en cache para: {}", identifier);
                cached
            }
            None => {
                let loaded = tokio::time::timeout(self.timeout, node.load_tracks(&identifier))
                    .await
                    .map_err(|_| NodeError::Timeout)??;
                if loaded.is_cacheable() {
                    self.cache.insert(identifier.clone(), loaded.clone());
                }
                loaded
            }
        };

        let attach = |track: Track| track.with_requester(requester);
        let result = match loaded {
            LoadResult::Track(track) => ResolveResult::Single(attach(track)),
            LoadResult::Search(tracks) => match tracks.into_iter().next() {
                Some(track) => ResolveResult::Single(attach(track)),
                None => ResolveResult::Empty,
            },
            LoadResult::Playlist { name, tracks } if tracks.is_empty() => {
                warn!("Playlist vacía: {}", name);
                ResolveResult::Empty
            }
            LoadResult::Playlist { name, tracks } => ResolveResult::Playlist {
                name,
                tracks: tracks.into_iter().map(attach).collect(),
            },
            LoadResult::Empty => {
                info!("No se encontraron resultados para: {}", identifier);
                ResolveResult::Empty
            }
            LoadResult::Error { message, severity } => {
                warn!("Error al cargar '{}' ({}): {}", identifier, severity, message);
                ResolveResult::LoadError(message)
            }
        };

        Ok(result)
    }

    pub fn cache(&self) -> &ResolveCache {
        &self.cache
    }
}
