use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{manager::SessionEvent, queue::LoopMode, track::Track},
    bot::dispatcher::{CommandError, Feedback, COMMANDS, QUEUE_PAGE_SIZE},
    config::Config,
    error::PlaybackError,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Bot name and accent colour shared by every embed.
#[derive(Debug, Clone)]
pub struct Theme {
    pub accent: Colour,
    pub footer: String,
}

impl Theme {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accent: Colour::new(config.embed_color),
            footer: format!("🎵 {}", config.bot_name),
        }
    }

    fn base(&self) -> CreateEmbed {
        CreateEmbed::default()
            .timestamp(Timestamp::now())
            .footer(CreateEmbedFooter::new(&self.footer))
    }

    fn success(&self, description: impl Into<String>) -> CreateEmbed {
        self.base()
            .description(format!("✅ {}", description.into()))
            .color(colors::SUCCESS_GREEN)
    }
}

/// Renders the outcome of a command.
pub fn feedback_embed(theme: &Theme, feedback: &Feedback) -> CreateEmbed {
    match feedback {
        Feedback::Help { prefix } => help_embed(theme, prefix),
        Feedback::AddedTrack {
            track,
            position,
            started,
        } => {
            let mut embed = track_embed(theme, track)
                .title("✅ Canción Agregada")
                .field("📍 Posición", position.to_string(), true);
            if *started {
                embed = embed.footer(CreateEmbedFooter::new("▶️ Reproduciendo ahora"));
            }
            embed
        }
        Feedback::AddedPlaylist { name, count, .. } => theme
            .base()
            .title("📋 Playlist Agregada")
            .description(format!(
                "Se agregaron **{}** canciones de **{}** a la cola",
                count, name
            ))
            .color(colors::SUCCESS_GREEN),
        Feedback::Paused => theme.success("Paused the music!"),
        Feedback::Resumed => theme.success("Resumed the music!"),
        Feedback::Skipped(track) => theme.success(format!("Skipped **{}**!", track.title)),
        Feedback::Stopped => theme.success("Stopped the music and cleared the queue!"),
        Feedback::Queue {
            current,
            page,
            loop_mode,
            total,
            total_duration,
        } => {
            let mut embed = theme
                .base()
                .title("📋 Cola de Reproducción")
                .color(colors::INFO_BLUE);

            if let Some(current) = current {
                embed = embed.field(
                    format!("{} Reproduciendo", loop_emoji(*loop_mode)),
                    format!("**{}** - {}", current.title, current.author),
                    false,
                );
            }

            if page.items.is_empty() {
                embed = embed.field("Próximas canciones", "😴 Nada más en cola", false);
            } else {
                let lines: Vec<String> = page
                    .items
                    .iter()
                    .map(|(position, track)| {
                        format!(
                            "**{}**. {} - {} `[{}]`",
                            position,
                            track.title,
                            track.author,
                            track_length(track)
                        )
                    })
                    .collect();
                embed = embed.field("Próximas canciones", lines.join("\n"), false);
            }

            embed = embed.field(
                "Información",
                format!(
                    "**Total:** {} canciones • **Duración:** {} • **Loop:** {}",
                    total,
                    format_duration(*total_duration),
                    loop_mode
                ),
                false,
            );

            if page.total_pages > 1 {
                embed = embed.footer(CreateEmbedFooter::new(format!(
                    "Página {} de {} • {} por página",
                    page.current_page, page.total_pages, QUEUE_PAGE_SIZE
                )));
            }
            embed
        }
        Feedback::NowPlaying {
            track,
            position,
            paused,
        } => track_embed(theme, track)
            .title(if *paused {
                "⏸️ En Pausa"
            } else {
                "🎵 Reproduciendo Ahora"
            })
            .field("⏳ Progreso", progress_bar(*position, track), false),
        Feedback::Volume(volume) => theme.success(format!("Set volume to {}%", volume)),
        Feedback::Shuffled(count) => theme.success(format!("🔀 Shuffled {} tracks!", count)),
        Feedback::LoopMode(mode) => theme.success(match mode {
            LoopMode::None => "Disabled loop mode!".to_string(),
            LoopMode::Track => "🔂 Looping the current track!".to_string(),
            LoopMode::Queue => "🔁 Enabled queue loop mode!".to_string(),
        }),
        Feedback::Removed(track) => {
            theme.success(format!("Removed **{}** from the queue!", track.title))
        }
        Feedback::Cleared(count) => theme.success(format!("Cleared {} tracks from the queue!", count)),
        Feedback::Seeked(position) => theme.success(format!("Seeked to {}", format_duration(*position))),
        Feedback::Status { session, nodes } => {
            let mut embed = theme
                .base()
                .title("📊 Estado del Reproductor")
                .color(colors::INFO_BLUE);

            match session {
                Some(snapshot) => {
                    let uptime = (chrono::Utc::now() - snapshot.connected_at)
                        .to_std()
                        .unwrap_or_default();
                    embed = embed
                        .field("Estado", snapshot.state.to_string(), true)
                        .field("🔊 Volumen", format!("{}%", snapshot.volume), true)
                        .field("🔁 Loop", snapshot.loop_mode.to_string(), true)
                        .field("📋 En cola", snapshot.items.len().to_string(), true)
                        .field("🎼 Nodo", snapshot.node_id.to_string(), true)
                        .field(
                            "⏱️ Conectado hace",
                            humantime::format_duration(Duration::from_secs(uptime.as_secs())).to_string(),
                            true,
                        );
                    if let Some(current) = &snapshot.current {
                        embed = embed.field("🎵 Actual", current.title.clone(), false);
                    }
                }
                None => {
                    embed = embed.description("No active player found!");
                }
            }

            let node_lines: Vec<String> = nodes
                .iter()
                .map(|node| {
                    let health = if node.connected { "🟢" } else { "🔴" };
                    let load = node
                        .stats
                        .as_ref()
                        .map(|s| format!(" • {} players • carga {:.2}", s.players, s.lavalink_load))
                        .unwrap_or_default();
                    format!("{} **{}** • {} sesiones{}", health, node.id, node.sessions, load)
                })
                .collect();
            embed.field("🎼 Nodos", node_lines.join("\n"), false)
        }
    }
}

/// Renders a command failure.
pub fn error_embed(theme: &Theme, error: &CommandError) -> CreateEmbed {
    let color = match error {
        CommandError::Playback(PlaybackError::NoNodesAvailable)
        | CommandError::Playback(PlaybackError::Node { .. }) => colors::WARNING_ORANGE,
        _ => colors::ERROR_RED,
    };
    theme
        .base()
        .description(format!("❌ {}", error))
        .color(color)
}

/// Renders an asynchronous session notification.
pub fn event_embed(theme: &Theme, event: &SessionEvent) -> CreateEmbed {
    match event {
        SessionEvent::TrackStarted { track, .. } => {
            track_embed(theme, track).title("🎵 Reproduciendo Ahora")
        }
        SessionEvent::QueueEnded { .. } => theme
            .base()
            .description("🏁 Queue has ended! Leaving the voice channel.")
            .color(colors::NEUTRAL_GRAY),
        SessionEvent::Migrated { from, to, .. } => theme
            .base()
            .description(format!("🔄 Nodo **{}** caído, reproducción movida a **{}**", from, to))
            .color(colors::WARNING_ORANGE),
        SessionEvent::Fatal { reason, .. } => theme
            .base()
            .title("❌ Reproducción detenida")
            .description(reason.clone())
            .color(colors::ERROR_RED),
    }
}

fn track_embed(theme: &Theme, track: &Track) -> CreateEmbed {
    let mut embed = theme
        .base()
        .description(format!("**{}**", track.title))
        .color(theme.accent)
        .field("🎤 Artista", track.author.clone(), true)
        .field("⏱️ Duración", track_length(track), true);

    if let Some(requester) = track.requester_id {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", requester), true);
    }
    if let Some(uri) = &track.source_uri {
        embed = embed.url(uri);
    }
    if let Some(artwork) = &track.artwork_url {
        embed = embed.thumbnail(artwork);
    }
    embed
}

fn help_embed(theme: &Theme, prefix: &str) -> CreateEmbed {
    let lines: Vec<String> = COMMANDS
        .iter()
        .map(|(usage, description)| format!("`{}{}` - {}", prefix, usage, description))
        .collect();

    theme
        .base()
        .title("🎵 Comandos")
        .description(lines.join("\n"))
        .color(theme.accent)
}

fn loop_emoji(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Track => "🔂",
        LoopMode::Queue => "🔁",
        LoopMode::None => "▶️",
    }
}

fn track_length(track: &Track) -> String {
    if track.is_stream {
        "🔴 En vivo".to_string()
    } else {
        format_duration(track.duration())
    }
}

/// Barra de progreso de 20 segmentos con la posición actual.
fn progress_bar(position: Duration, track: &Track) -> String {
    if track.is_stream || track.duration_ms == 0 {
        return format!("🔴 En vivo • {}", format_duration(position));
    }

    let segments = 20u64;
    let filled = (position.as_millis() as u64)
        .saturating_mul(segments)
        .checked_div(track.duration_ms)
        .unwrap_or(0)
        .min(segments) as usize;

    format!(
        "`[{}{}]` {} / {}",
        "█".repeat(filled),
        "▒".repeat(segments as usize - filled),
        format_duration(position),
        format_duration(track.duration())
    )
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
