use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::debug;

use crate::audio::node::NodeEvent;
use crate::audio::session::{PlaybackSession, SessionSnapshot};
use crate::error::Result;

/// Shared handle to one guild's session.
///
/// Mutations go through [`SessionHandle::lock`], which serializes them for
/// the whole async operation. Readers that only need to display state use
/// [`SessionHandle::snapshot`] and never wait on the lock.
pub struct SessionHandle {
    guild_id: GuildId,
    session: Mutex<PlaybackSession>,
    snapshot: RwLock<SessionSnapshot>,
    mailbox: mpsc::UnboundedSender<NodeEvent>,
}

impl SessionHandle {
    pub fn new(session: PlaybackSession, mailbox: mpsc::UnboundedSender<NodeEvent>) -> Self {
        Self {
            guild_id: session.guild_id(),
            snapshot: RwLock::new(session.snapshot()),
            session: Mutex::new(session),
            mailbox,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            handle: self,
            session: self.session.lock().await,
        }
    }

    /// Última vista publicada; no toma el lock de la sesión.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    /// Entrega un evento del nodo a la cola de eventos de esta sesión.
    pub fn deliver(&self, event: NodeEvent) -> bool {
        self.mailbox.send(event).is_ok()
    }
}

/// Exclusive access to a session. Dropping the guard publishes a fresh
/// snapshot before the lock is released.
pub struct SessionGuard<'a> {
    handle: &'a SessionHandle,
    session: MutexGuard<'a, PlaybackSession>,
}

impl Deref for SessionGuard<'_> {
    type Target = PlaybackSession;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.handle.snapshot.write() = self.session.snapshot();
    }
}

/// Guild → session map; the only owner of session lifetimes.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the guild's session, creating it with `make` if there is none.
    ///
    /// The boolean is `true` when the session was created by this call.
    /// `make` runs with the guild's map shard locked, so two concurrent
    /// callers can never both create a session for the same guild.
    pub fn get_or_try_insert_with<F>(&self, guild_id: GuildId, make: F) -> Result<(Arc<SessionHandle>, bool)>
    where
        F: FnOnce() -> Result<SessionHandle>,
    {
        match self.sessions.entry(guild_id) {
            Entry::Occupied(entry) => Ok((Arc::clone(entry.get()), false)),
            Entry::Vacant(entry) => {
                let handle = Arc::new(make()?);
                entry.insert(Arc::clone(&handle));
                debug!("📝 Sesión registrada para guild {}", guild_id);
                Ok((handle, true))
            }
        }
    }

    /// Removes the entry only if it still points at `handle`.
    pub fn remove_if_same(&self, guild_id: GuildId, handle: &Arc<SessionHandle>) -> bool {
        let removed = self
            .sessions
            .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some();
        if removed {
            debug!("🗑️ Sesión eliminada del registro: guild {}", guild_id);
        }
        removed
    }

    /// Whether `handle` is still the registered session for its guild.
    pub fn is_owner(&self, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .get(&handle.guild_id())
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), handle))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::node::NodeId;
    use crate::audio::node_pool::NodePool;
    use crate::audio::session::{SessionSettings, SessionState};
    use crate::audio::testing::{channel, guild};
    use crate::error::PlaybackError;

    fn handle(guild_id: GuildId) -> SessionHandle {
        let (pool, _rx) = NodePool::new();
        let session = PlaybackSession::new(
            guild_id,
            channel(10),
            channel(20),
            NodeId::from("main"),
            Arc::new(pool),
            50,
            SessionSettings::default(),
        );
        let (mailbox, _events) = mpsc::unbounded_channel();
        SessionHandle::new(session, mailbox)
    }

    #[test]
    fn create_is_idempotent_per_guild() {
        let registry = SessionRegistry::new();

        let (first, created) = registry
            .get_or_try_insert_with(guild(1), || Ok(handle(guild(1))))
            .unwrap();
        assert!(created);

        let (second, created) = registry
            .get_or_try_insert_with(guild(1), || panic!("must not build a second session"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_creation_leaves_no_entry() {
        let registry = SessionRegistry::new();
        let result = registry.get_or_try_insert_with(guild(1), || Err(PlaybackError::NoNodesAvailable));

        assert!(matches!(result, Err(PlaybackError::NoNodesAvailable)));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_only_drops_the_same_handle() {
        let registry = SessionRegistry::new();
        let (stale, _) = registry
            .get_or_try_insert_with(guild(1), || Ok(handle(guild(1))))
            .unwrap();
        assert!(registry.remove_if_same(guild(1), &stale));
        assert!(!registry.is_owner(&stale));

        let (fresh, _) = registry
            .get_or_try_insert_with(guild(1), || Ok(handle(guild(1))))
            .unwrap();
        assert!(!registry.remove_if_same(guild(1), &stale));
        assert!(registry.is_owner(&fresh));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_guard_publishes_a_snapshot() {
        let handle = handle(guild(3));
        assert_eq!(handle.snapshot().state, SessionState::Connecting);

        {
            let mut session = handle.lock().await;
            session.set_loop_mode(None).unwrap();
            assert_eq!(handle.snapshot().loop_mode, crate::audio::queue::LoopMode::None);
        }

        assert_eq!(handle.snapshot().loop_mode, crate::audio::queue::LoopMode::Queue);
    }
}
