use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub volume: u8,
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonStorage {
    data_dir: PathBuf,
    default_volume: u8,
    servers_cache: HashMap<u64, GuildSettings>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, default_volume: u8) -> Result<Self> {
        let servers_dir = data_dir.join("servers");
        fs::create_dir_all(&servers_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", servers_dir.display()))?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let mut storage = Self {
            data_dir,
            default_volume,
            servers_cache: HashMap::new(),
        };
        storage.load_all_servers().await?;

        Ok(storage)
    }

    /// Settings for a guild; defaults when nothing was stored yet.
    pub fn guild_settings(&self, guild_id: u64) -> GuildSettings {
        self.servers_cache
            .get(&guild_id)
            .cloned()
            .unwrap_or(GuildSettings {
                guild_id,
                volume: self.default_volume,
            })
    }

    pub async fn set_volume(&mut self, guild_id: u64, volume: u8) -> Result<()> {
        let settings = GuildSettings {
            guild_id,
            volume: volume.min(100),
        };
        self.save_server_config(&settings).await?;
        self.servers_cache.insert(guild_id, settings);
        info!("💾 Volumen guardado para guild {}: {}%", guild_id, volume);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.servers_cache.len()
    }

    async fn load_server_config(&self, guild_id: u64) -> Result<GuildSettings> {
        let file_path = self.get_server_file_path(guild_id);
        let content = fs::read_to_string(&file_path).await?;
        let settings: GuildSettings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    async fn save_server_config(&self, settings: &GuildSettings) -> Result<()> {
        let file_path = self.get_server_file_path(settings.guild_id);
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&file_path, content)
            .await
            .with_context(|| format!("No se pudo escribir {}", file_path.display()))?;
        Ok(())
    }

    async fn load_all_servers(&mut self) -> Result<()> {
        let mut files = fs::read_dir(self.data_dir.join("servers")).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match self.load_server_config(guild_id).await {
                Ok(settings) => {
                    self.servers_cache.insert(guild_id, settings);
                    loaded_count += 1;
                }
                Err(e) => warn!("Error cargando configuración para guild {}: {}", guild_id, e),
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargadas {} configuraciones de servidor", loaded_count);
        }
        Ok(())
    }

    fn get_server_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir
            .join("servers")
            .join(format!("guild_{}.json", guild_id))
    }
}
