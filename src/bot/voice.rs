use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::gateway::VoiceGateway;
use crate::audio::node::VoiceConnection;

/// Voice signalling through songbird's gateway-only mode.
///
/// Songbird joins the channel and collects the voice credentials; the audio
/// itself is streamed by the Lavalink node, never by this process.
pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self { songbird }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn open(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<VoiceConnection> {
        let (info, _call) = self
            .songbird
            .join_gateway(guild_id, channel_id)
            .await
            .with_context(|| format!("Error al conectar al canal de voz {} en guild {}", channel_id, guild_id))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(VoiceConnection {
            session_id: info.session_id,
            token: info.token,
            endpoint: info.endpoint,
        })
    }

    async fn close(&self, guild_id: GuildId) -> Result<()> {
        if self.songbird.get(guild_id).is_none() {
            debug!("Sin llamada de voz activa en guild {}", guild_id);
            return Ok(());
        }

        self.songbird
            .remove(guild_id)
            .await
            .with_context(|| format!("Error al salir del canal de voz en guild {}", guild_id))?;
        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}
