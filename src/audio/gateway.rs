use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};

use crate::audio::node::VoiceConnection;

/// Chat-platform voice signalling, as seen by the playback core.
///
/// Opening a connection yields the voice credentials an audio node needs to
/// stream into the channel; the platform-specific handshake stays behind
/// this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn open(&self, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<VoiceConnection>;

    async fn close(&self, guild_id: GuildId) -> anyhow::Result<()>;
}
