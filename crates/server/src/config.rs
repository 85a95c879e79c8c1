use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use shellnet::sync::SpawnSpec;
use shellnet::{ConfigError, SyncConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcConfig {
    pub id: String,
    pub blueprint: String,
    #[serde(default)]
    pub faction: i32,
    #[serde(default)]
    pub position: [f32; 3],
}

impl NpcConfig {
    pub fn spawn_spec(&self) -> SpawnSpec {
        SpawnSpec::npc(
            self.blueprint.as_str(),
            self.id.as_str(),
            self.faction,
            Vec3::from(self.position),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_sessions: usize,
    pub session_timeout_secs: u64,
    pub faction_count: i32,
    pub blueprints: PathBuf,
    /// Blueprint used when a client asks for one the server doesn't know.
    pub default_blueprint: String,
    pub spawn_point: [f32; 3],
    #[serde(rename = "npc")]
    pub npcs: Vec<NpcConfig>,
    pub sync: SyncConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: shellnet::net::DEFAULT_PORT,
            max_sessions: 32,
            session_timeout_secs: 10,
            faction_count: 2,
            blueprints: PathBuf::from("config/blueprints.toml"),
            default_blueprint: "Scout".to_string(),
            spawn_point: [0.0; 3],
            npcs: Vec::new(),
            sync: SyncConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&source)?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
