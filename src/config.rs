use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::session::SessionSettings;

/// Connection details for one Lavalink node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub prefix: String,
    pub bot_name: String,
    pub embed_color: u32,

    // Lavalink
    pub nodes: Vec<NodeConfig>,
    pub search_platform: String,

    // Reproducción
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub failure_threshold: u32,
    pub node_timeout_secs: u64,

    // Cache de búsquedas
    pub resolve_cache_size: usize,
    pub resolve_cache_ttl_secs: u64,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let nodes = match std::env::var("LAVALINK_NODES") {
            Ok(raw) if !raw.trim().is_empty() => parse_nodes(&raw)?,
            _ => vec![NodeConfig {
                name: "main".to_string(),
                host: std::env::var("LAVALINK_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("LAVALINK_PORT")
                    .unwrap_or_else(|_| "2333".to_string())
                    .parse()
                    .context("LAVALINK_PORT inválido")?,
                password: std::env::var("LAVALINK_PASSWORD")
                    .unwrap_or_else(|_| "youshallnotpass".to_string()),
                secure: false,
            }],
        };

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no configurado")?,
            prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),
            bot_name: std::env::var("BOT_NAME").unwrap_or_else(|_| "Lavaqueue".to_string()),
            embed_color: parse_color(
                &std::env::var("EMBED_COLOR").unwrap_or_else(|_| "0061ff".to_string()),
            )?,

            // Lavalink
            nodes,
            search_platform: std::env::var("SEARCH_PLATFORM")
                .unwrap_or_else(|_| "ytmsearch".to_string()),

            // Reproducción
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            failure_threshold: std::env::var("FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            node_timeout_secs: std::env::var("NODE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            // Cache
            resolve_cache_size: std::env::var("RESOLVE_CACHE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            resolve_cache_ttl_secs: std::env::var("RESOLVE_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()?,

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 100
    /// - At least one Lavalink node, with unique names
    /// - Queue size, cache size and node timeout must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.nodes.is_empty() {
            anyhow::bail!("At least one Lavalink node must be configured");
        }

        let mut names: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            anyhow::bail!("Lavalink node names must be unique");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.resolve_cache_size == 0 {
            anyhow::bail!("Resolve cache size must be greater than 0");
        }

        if self.node_timeout_secs == 0 {
            anyhow::bail!("Node timeout must be greater than 0");
        }

        if self.prefix.trim().is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        Ok(())
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }

    pub fn resolve_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolve_cache_ttl_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_queue_size: self.max_queue_size,
            failure_threshold: self.failure_threshold,
            node_timeout: self.node_timeout(),
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and node passwords are left out.
    pub fn summary(&self) -> String {
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|n| format!("{}@{}:{}", n.name, n.host, n.port))
            .collect();

        format!(
            "Config Summary:\n  \
            Bot: {} (prefix '{}')\n  \
            Lavalink: {} (search: {})\n  \
            Playback: {}% vol, {} queue, {} failures max, {}s node timeout\n  \
            Cache: {} entries, {}s TTL",
            self.bot_name,
            self.prefix,
            nodes.join(", "),
            self.search_platform,
            self.default_volume,
            self.max_queue_size,
            self.failure_threshold,
            self.node_timeout_secs,
            self.resolve_cache_size,
            self.resolve_cache_ttl_secs,
        )
    }
}

/// Parses `name=host:port:password[:secure]` entries separated by commas.
pub fn parse_nodes(raw: &str) -> Result<Vec<NodeConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<NodeConfig> {
            let (name, rest) = entry
                .split_once('=')
                .with_context(|| format!("Nodo sin nombre: '{}'", entry))?;
            let parts: Vec<&str> = rest.split(':').collect();
            let (host, port, password, secure) = match parts.as_slice() {
                [host, port, password] => (*host, *port, *password, false),
                [host, port, password, secure] => (
                    *host,
                    *port,
                    *password,
                    secure
                        .parse::<bool>()
                        .with_context(|| format!("Flag 'secure' inválido en nodo '{}'", name))?,
                ),
                _ => anyhow::bail!("Formato de nodo inválido: '{}'", entry),
            };

            Ok(NodeConfig {
                name: name.trim().to_string(),
                host: host.to_string(),
                port: port
                    .parse()
                    .with_context(|| format!("Puerto inválido en nodo '{}'", name))?,
                password: password.to_string(),
                secure,
            })
        })
        .collect()
}

fn parse_color(raw: &str) -> Result<u32> {
    let hex = raw.trim().trim_start_matches('#').trim_start_matches("0x");
    u32::from_str_radix(hex, 16).with_context(|| format!("EMBED_COLOR inválido: '{}'", raw))
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin default para el token)
            discord_token: String::new(),
            prefix: "!".to_string(),
            bot_name: "Lavaqueue".to_string(),
            embed_color: 0x0061ff,

            nodes: vec![NodeConfig {
                name: "main".to_string(),
                host: "localhost".to_string(),
                port: 2333,
                password: "youshallnotpass".to_string(),
                secure: false,
            }],
            search_platform: "ytmsearch".to_string(),

            default_volume: 50,
            max_queue_size: 1000,
            failure_threshold: 3,
            node_timeout_secs: 10,

            resolve_cache_size: 100,
            resolve_cache_ttl_secs: 600,

            data_dir: "./data".into(),
        }
    }
}
