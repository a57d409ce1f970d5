//! # Bot Module
//!
//! Discord surface of the bot: prefix text commands in, embeds out.
//!
//! ## Architecture
//!
//! The bot is built around the [`MusicBot`] struct which implements
//! Serenity's [`EventHandler`] trait. It:
//!
//! - Parses prefixed messages into a [`dispatcher::Command`]
//! - Looks up the author's voice channel in the cache
//! - Hands the command to the [`dispatcher::Dispatcher`] and renders the
//!   result with [`crate::ui::embeds`]
//! - Destroys the guild's session when the bot is disconnected from voice
//!
//! Voice signalling lives in [`voice`]; asynchronous session notifications
//! are posted by [`events::announce`].

use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
    builder::CreateMessage,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod dispatcher;
pub mod events;
pub mod voice;

use crate::{
    config::Config,
    error::PlaybackError,
    ui::embeds::{self, Theme},
};
use dispatcher::{Command, CommandError, Dispatcher};

/// Main Discord event handler.
pub struct MusicBot {
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    theme: Theme,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, dispatcher: Arc<Dispatcher>) -> Self {
        let theme = Theme::from_config(&config);
        Self {
            config,
            dispatcher,
            theme,
        }
    }
}

/// Canal de voz del usuario según la cache del gateway.
fn voice_channel_of(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id);
    channel_id
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!("{}help", self.config.prefix))));
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || !msg.content.starts_with(&self.config.prefix) {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let voice_channel_id = voice_channel_of(&ctx, guild_id, msg.author.id);
        let Some(command) = Command::parse(
            &msg.content,
            &self.config.prefix,
            guild_id,
            voice_channel_id,
            msg.channel_id,
            msg.author.id,
        ) else {
            return;
        };

        let name = command.name.clone();
        let embed = match self.dispatcher.dispatch(command).await {
            Ok(feedback) => embeds::feedback_embed(&self.theme, &feedback),
            Err(CommandError::UnknownCommand(name)) => {
                debug!("Comando desconocido '{}' en guild {}", name, guild_id);
                return;
            }
            Err(e) => {
                warn!("Comando '{}' falló en guild {}: {}", name, guild_id, e);
                embeds::error_embed(&self.theme, &e)
            }
        };

        if let Err(e) = msg
            .channel_id
            .send_message(&ctx.http, CreateMessage::new().embed(embed))
            .await
        {
            error!("Error al responder en canal {}: {:?}", msg.channel_id, e);
        }
    }

    /// Destroys the session when the bot itself leaves or is kicked from voice.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot desconectado de voz en guild {}", guild_id);
        match self.dispatcher.manager().stop(guild_id).await {
            Ok(()) => info!("🧹 Sesión de guild {} destruida tras la desconexión", guild_id),
            Err(PlaybackError::NoActiveSession) => {}
            Err(e) => error!("Error al limpiar la sesión de guild {}: {}", guild_id, e),
        }
    }
}
