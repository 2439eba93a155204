use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::ConfigError;

/// Display metadata for a playable map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapDesc {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub background_img: String,
}

/// Read-only lookup of map display data. Unknown maps are simply not offered for voting.
pub trait MapCatalog: Send + Sync {
    fn describe(&self, map_name: &str) -> Option<MapDesc>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    maps: HashMap<String, MapDesc>,
}

// (key, display name, icon, background)
const BUILTIN_MAPS: &[(&str, &str, &str, &str)] = &[
    ("main", "Normal", "", "img/main_splash.png"),
    ("desert", "Desert", "img/gui/desert.svg", "img/main_splash_desert.png"),
    ("woods", "Woods", "img/gui/woods.svg", "img/main_splash_woods.png"),
    ("savannah", "Savannah", "img/gui/savannah.svg", "img/main_splash_savannah.png"),
    ("cobalt", "Cobalt", "img/gui/cobalt.svg", "img/main_splash_cobalt.png"),
    ("snow", "Snow", "img/gui/snow.svg", "img/main_splash_snow.png"),
    ("faction", "50v50", "img/gui/faction.svg", "img/main_splash_faction.png"),
];

impl StaticCatalog {
    pub fn new(maps: HashMap<String, MapDesc>) -> Self {
        Self { maps }
    }

    pub fn builtin() -> Self {
        let maps = BUILTIN_MAPS
            .iter()
            .map(|(key, name, icon, bg)| {
                (
                    key.to_string(),
                    MapDesc {
                        name: name.to_string(),
                        icon: icon.to_string(),
                        background_img: bg.to_string(),
                    },
                )
            })
            .collect();
        Self { maps }
    }

    /// Parses a JSON object keyed by map name.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let maps: HashMap<String, MapDesc> =
            serde_json::from_str(raw).map_err(|e| ConfigError::Catalog(e.to_string()))?;
        Ok(Self::new(maps))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Catalog(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl MapCatalog for StaticCatalog {
    fn describe(&self, map_name: &str) -> Option<MapDesc> {
        self.maps.get(map_name).map(|desc| {
            let mut desc = desc.clone();
            if desc.name.is_empty() {
                desc.name = map_name.to_string();
            }
            desc
        })
    }
}
