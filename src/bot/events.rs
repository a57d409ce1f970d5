use serenity::{builder::CreateMessage, http::Http};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::audio::manager::SessionEvent;
use crate::ui::embeds::{self, Theme};

/// Posts session notifications to the text channel each session was started from.
///
/// Runs until the session manager drops its sender.
pub async fn announce(http: Arc<Http>, theme: Theme, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    info!("📣 Anunciador de eventos de sesión iniciado");

    while let Some(event) = events.recv().await {
        let channel_id = event.text_channel_id();
        debug!("Evento de sesión en guild {}: {:?}", event.guild_id(), event);

        let embed = embeds::event_embed(&theme, &event);
        if let Err(e) = channel_id
            .send_message(&*http, CreateMessage::new().embed(embed))
            .await
        {
            error!(
                "Error al enviar evento al canal {} (guild {}): {:?}",
                channel_id,
                event.guild_id(),
                e
            );
        }
    }

    info!("Canal de eventos de sesión cerrado");
}
