use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::vendor::VendorItem;
use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlueprintKind {
    #[default]
    Generic,
    Craft,
    Vendor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilitySpec {
    pub name: String,
    #[serde(default = "default_cooldown")]
    pub cooldown: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSpec {
    pub location: [f32; 2],
    #[serde(default)]
    pub ability: Option<AbilitySpec>,
}

/// Template describing an entity's composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub kind: BlueprintKind,
    /// Shell, core, energy.
    #[serde(default = "default_health")]
    pub health: [f32; 3],
    #[serde(default)]
    pub main_weapon: Option<AbilitySpec>,
    #[serde(default)]
    pub parts: Vec<PartSpec>,
    #[serde(default)]
    pub stock: Vec<VendorItem>,
    #[serde(default)]
    pub credits: u32,
    #[serde(default)]
    pub power: i32,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

impl Blueprint {
    pub fn new(name: impl Into<String>, kind: BlueprintKind) -> Self {
        Self {
            name: name.into(),
            kind,
            health: default_health(),
            main_weapon: None,
            parts: Vec::new(),
            stock: Vec::new(),
            credits: 0,
            power: 0,
            speed: default_speed(),
        }
    }

    pub fn with_part(mut self, location: [f32; 2], ability: Option<AbilitySpec>) -> Self {
        self.parts.push(PartSpec { location, ability });
        self
    }
}

fn default_health() -> [f32; 3] {
    [1000.0, 250.0, 500.0]
}

fn default_cooldown() -> f32 {
    1.0
}

fn default_speed() -> f32 {
    20.0
}

#[derive(Debug, Deserialize)]
struct BlueprintFile {
    #[serde(default)]
    blueprint: Vec<Blueprint>,
}

/// Name-keyed blueprint lookup shared by authority and observers.
#[derive(Debug, Clone, Default)]
pub struct BlueprintRegistry {
    blueprints: HashMap<String, Blueprint>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: BlueprintFile = toml::from_str(source)?;
        let mut registry = Self::new();
        for blueprint in file.blueprint {
            registry.insert(blueprint);
        }
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_toml_str(&source)?;
        log::info!("Loaded {} blueprints from {}", registry.len(), path.display());
        Ok(registry)
    }

    pub fn insert(&mut self, blueprint: Blueprint) -> Option<Blueprint> {
        self.blueprints.insert(blueprint.name.clone(), blueprint)
    }

    pub fn get(&self, name: &str) -> Option<&Blueprint> {
        self.blueprints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blueprints.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
