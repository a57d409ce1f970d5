use rand::seq::SliceRandom;
use std::{collections::VecDeque, fmt, time::Duration};
use tracing::{debug, info};

use crate::audio::track::Track;
use crate::error::{PlaybackError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    None,
    Track,
    Queue,
}

impl LoopMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" | "none" | "disable" => Some(Self::None),
            "track" | "song" | "single" => Some(Self::Track),
            "queue" | "all" => Some(Self::Queue),
            _ => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "off"),
            Self::Track => write!(f, "track"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Per-session ordered list of pending tracks plus the one now playing.
///
/// `current` is never a member of `items`: advancing moves a track out of
/// `items` into `current`, it does not copy it.
#[derive(Debug)]
pub struct Queue {
    items: VecDeque<Track>,
    current: Option<Track>,
    loop_mode: LoopMode,
    max_size: usize,
}

impl Queue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            loop_mode: LoopMode::None,
            max_size,
        }
    }

    /// Agrega un track al final; devuelve su posición (1-based) en la cola.
    pub fn add(&mut self, track: Track) -> Result<usize> {
        if self.items.len() >= self.max_size {
            return Err(PlaybackError::QueueFull(self.max_size));
        }

        debug!("➕ Agregado a la cola: {}", track.title);
        self.items.push_back(track);
        Ok(self.items.len())
    }

    /// Agrega varios tracks (playlist) hasta llenar la cola.
    pub fn add_all(&mut self, tracks: Vec<Track>) -> usize {
        let available = self.max_size.saturating_sub(self.items.len());
        let to_add = tracks.len().min(available);

        self.items.extend(tracks.into_iter().take(to_add));
        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Removes and returns the track at the 1-based `position`.
    pub fn remove(&mut self, position: i64) -> Result<Track> {
        let len = self.items.len();
        let index = usize::try_from(position)
            .ok()
            .filter(|p| (1..=len).contains(p))
            .map(|p| p - 1)
            .ok_or(PlaybackError::OutOfRange { position, len })?;

        let removed = self
            .items
            .remove(index)
            .ok_or(PlaybackError::OutOfRange { position, len })?;
        debug!("❌ Track eliminado en posición {}: {}", position, removed.title);
        Ok(removed)
    }

    /// Mezcla los pendientes; `current` no se toca.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} tracks)", self.items.len());
    }

    /// Vacía los pendientes sin tocar `current`.
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        cleared
    }

    /// Moves the next track into `current` according to the loop mode.
    ///
    /// Returns `None` when the queue is exhausted, in which case `current`
    /// is cleared as well.
    pub fn advance(&mut self) -> Option<&Track> {
        if self.loop_mode == LoopMode::Track && self.current.is_some() {
            return self.current.as_ref();
        }
        self.pop_next()
    }

    /// Avanza ignorando el loop de track (skip explícito o track fallido).
    pub fn skip_current(&mut self) -> Option<&Track> {
        self.pop_next()
    }

    fn pop_next(&mut self) -> Option<&Track> {
        let previous = self.current.take();
        if self.loop_mode == LoopMode::Queue {
            if let Some(previous) = previous {
                self.items.push_back(previous);
            }
        }

        self.current = self.items.pop_front();
        match &self.current {
            Some(track) => debug!("➡️ Siguiente en cola: {}", track.title),
            None => debug!("📭 Cola agotada"),
        }
        self.current.as_ref()
    }

    /// Descarta el track actual sin avanzar (track que falló definitivamente).
    pub fn drop_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::None => info!("➡️ Repetición desactivada"),
            LoopMode::Track => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    /// Alterna entre sin repetición y repetir cola.
    pub fn toggle_loop(&mut self) -> LoopMode {
        let next = match self.loop_mode {
            LoopMode::None => LoopMode::Queue,
            LoopMode::Track | LoopMode::Queue => LoopMode::None,
        };
        self.set_loop_mode(next);
        next
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn items(&self) -> impl ExactSizeIterator<Item = &Track> {
        self.items.iter()
    }

    /// Pending tracks only.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pendientes más el actual.
    pub fn total_len(&self) -> usize {
        self.items.len() + usize::from(self.current.is_some())
    }

    pub fn total_duration(&self) -> Duration {
        self.items
            .iter()
            .chain(self.current.iter())
            .filter(|track| !track.is_stream)
            .map(Track::duration)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<(usize, Track)>,
    pub current_page: usize,
    pub total_pages: usize,
}

/// Obtiene una página específica de la lista de pendientes.
pub fn paginate(items: &[Track], page: usize, per_page: usize) -> QueuePage {
    let per_page = per_page.max(1);
    let total_pages = items.len().div_ceil(per_page).max(1);
    let current_page = page.clamp(1, total_pages);
    let start = (current_page - 1) * per_page;

    QueuePage {
        items: items
            .iter()
            .enumerate()
            .skip(start)
            .take(per_page)
            .map(|(index, track)| (index + 1, track.clone()))
            .collect(),
        current_page,
        total_pages,
    }
}
