use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, model::id::UserId, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod storage;
mod ui;

use crate::audio::lavalink::LavalinkNode;
use crate::audio::manager::SessionManager;
use crate::audio::node_pool::NodePool;
use crate::audio::resolver::TrackResolver;
use crate::bot::dispatcher::Dispatcher;
use crate::bot::voice::SongbirdGateway;
use crate::bot::MusicBot;
use crate::cache::ResolveCache;
use crate::config::Config;
use crate::storage::JsonStorage;
use crate::ui::embeds::Theme;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lavaqueue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Lavaqueue v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Inicializar almacenamiento JSON
    let storage = Arc::new(Mutex::new(
        JsonStorage::new(config.data_dir.clone(), config.default_volume).await?,
    ));

    // Núcleo de reproducción
    let (pool, node_events) = NodePool::new();
    let pool = Arc::new(pool);
    let songbird = Songbird::serenity();
    let resolver = TrackResolver::new(
        config.search_platform.clone(),
        config.node_timeout(),
        ResolveCache::new(config.resolve_cache_size, config.resolve_cache_ttl()),
    );
    let (manager, session_events) = SessionManager::new(
        Arc::clone(&pool),
        Arc::new(SongbirdGateway::new(Arc::clone(&songbird))),
        resolver,
        config.session_settings(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&manager),
        storage,
        config.prefix.clone(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Construir cliente
    let handler = MusicBot::new(Arc::clone(&config), dispatcher);
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(Arc::clone(&songbird))
        .await?;

    // Conectar nodos Lavalink
    info!("🎼 Conectando {} nodo(s) Lavalink...", config.nodes.len());
    let user_id = client.http.get_current_user().await?.id;
    let shutdown = CancellationToken::new();
    let mut sockets = Vec::with_capacity(config.nodes.len());
    for node_config in &config.nodes {
        let node = LavalinkNode::new(node_config, user_id, pool.event_sender())?;
        sockets.push(node.spawn(shutdown.clone()));
        pool.register(node, false);
    }

    tokio::spawn(Arc::clone(&manager).run(node_events));
    tokio::spawn(bot::events::announce(
        Arc::clone(&client.http),
        Theme::from_config(&config),
        session_events,
    ));
    tokio::spawn(maintenance_tasks(Arc::clone(&manager)));

    // Manejar shutdown graceful
    let shard_manager = Arc::clone(&client.shard_manager);
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        signal_shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    shutdown.cancel();
    for socket in sockets {
        if let Err(e) = socket.await {
            warn!("Tarea de nodo terminó con error: {:?}", e);
        }
    }
    info!("👋 Lavaqueue detenido");

    Ok(())
}

/// Comprueba que cada nodo configurado responde a `/version`.
async fn health_check(config: &Config) -> Result<()> {
    // El user id solo se usa en el websocket, no en REST.
    let (events, _rx) = mpsc::unbounded_channel();
    let mut healthy = true;

    for node_config in &config.nodes {
        let node = LavalinkNode::new(node_config, UserId::new(1), events.clone())?;
        match node.version().await {
            Ok(version) => println!("{}: OK (Lavalink {})", node_config.name, version.trim()),
            Err(e) => {
                println!("{}: FAIL ({})", node_config.name, e);
                healthy = false;
            }
        }
    }

    if healthy {
        Ok(())
    } else {
        anyhow::bail!("Hay nodos Lavalink sin respuesta");
    }
}

/// Limpieza periódica de la cache de búsquedas.
async fn maintenance_tasks(manager: Arc<SessionManager>) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));

    loop {
        interval.tick().await;
        manager.resolver().cache().cleanup_old_entries();
        info!(
            "🧹 Tareas de mantenimiento completadas ({} sesiones activas)",
            manager.registry().len()
        );
    }
}
