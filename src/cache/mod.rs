//! # Cache Module
//!
//! Short-lived cache of audio node load results.
//!
//! Popular queries ("play lofi", a shared playlist URL) tend to arrive in
//! bursts from the same guild. Caching what the node answered for an
//! identifier saves a REST round trip per repeat.
//!
//! Only playable results are cached. Empty results and load errors always
//! go back to the node, so a transient failure is never remembered.
//!
//! ```env
//! RESOLVE_CACHE_SIZE=100      # Maximum number of identifiers
//! RESOLVE_CACHE_TTL_SECS=600  # Time-to-live in seconds
//! ```

pub mod lru_cache;

use lru_cache::LruCache;
use tracing::info;

use crate::audio::track::LoadResult;

/// Load results keyed by the identifier sent to the node.
pub type ResolveCache = LruCache<String, LoadResult>;

impl ResolveCache {
    /// Limpieza periódica de entradas vencidas.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Cache cleanup: removed {} expired entries", removed);
        }
    }
}
