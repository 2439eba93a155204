use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ActiveMode, ModeConfig, TeamMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("invalid VOTE_MODES: {0}")]
    Modes(String),
    #[error("invalid map catalog: {0}")]
    Catalog(String),
}

/// Which tracks exist, what they default to, and which maps may be voted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeRegistry {
    modes: Vec<ModeConfig>,
    allowed_vote_maps: Vec<String>,
}

impl ModeRegistry {
    pub fn new(modes: Vec<ModeConfig>, allowed_vote_maps: Vec<String>) -> Self {
        Self {
            modes,
            allowed_vote_maps,
        }
    }

    /// First enabled mode, else the first configured mode, else `main` duos.
    pub fn fallback_mode(&self) -> ActiveMode {
        self.modes
            .iter()
            .find(|m| m.enabled)
            .or_else(|| self.modes.first())
            .map(|m| ActiveMode {
                map_name: m.map_name.clone(),
                team_mode: m.team_mode,
            })
            .unwrap_or_else(|| ActiveMode {
                map_name: "main".to_string(),
                team_mode: TeamMode(2),
            })
    }

    /// Enabled team modes, ascending and without duplicates. Never empty.
    pub fn enabled_team_modes(&self) -> Vec<TeamMode> {
        let mut modes: Vec<TeamMode> = self
            .modes
            .iter()
            .filter(|m| m.enabled)
            .map(|m| m.team_mode)
            .collect();
        if modes.is_empty() {
            modes.push(self.fallback_mode().team_mode);
        }
        modes.sort();
        modes.dedup();
        modes
    }

    pub fn is_enabled(&self, team_mode: TeamMode) -> bool {
        self.enabled_team_modes().contains(&team_mode)
    }

    pub fn default_map(&self, team_mode: TeamMode) -> String {
        self.modes
            .iter()
            .find(|m| m.enabled && m.team_mode == team_mode)
            .map(|m| m.map_name.clone())
            .unwrap_or_else(|| self.fallback_mode().map_name)
    }

    /// Maps open for voting in configured order, first occurrence wins.
    pub fn vote_maps(&self) -> Vec<String> {
        let source: Vec<&String> = if self.allowed_vote_maps.is_empty() {
            self.modes.iter().map(|m| &m.map_name).collect()
        } else {
            self.allowed_vote_maps.iter().collect()
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut maps = Vec::new();
        for name in source {
            if seen.insert(name) {
                maps.push(name.clone());
            }
        }
        maps
    }

    pub fn is_vote_map(&self, map_name: &str) -> bool {
        if self.allowed_vote_maps.is_empty() {
            self.modes.iter().any(|m| m.map_name == map_name)
        } else {
            self.allowed_vote_maps.iter().any(|m| m == map_name)
        }
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        let modes = [1, 2, 4]
            .into_iter()
            .map(|size| ModeConfig {
                map_name: "main".to_string(),
                team_mode: TeamMode(size),
                enabled: true,
            })
            .collect();
        Self::new(modes, Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    pub round: Duration,
    pub close_lead: Duration,
}

impl RoundTiming {
    /// Time between the start of a round and voting closing.
    pub fn open_for(&self) -> Duration {
        self.round.saturating_sub(self.close_lead)
    }

    pub fn close_lead(&self) -> Duration {
        self.close_lead.min(self.round)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub proxy_ip_header: Option<String>,
    pub registry: ModeRegistry,
    pub catalog_path: Option<PathBuf>,
    pub rate_limit: RateLimitConfig,
    /// `None` when rounds are driven externally.
    pub round_timing: Option<RoundTiming>,
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(&get, "VOTE_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?;

        let modes = match get("VOTE_MODES") {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| ConfigError::Modes(e.to_string()))?
            }
            None => ModeRegistry::default().modes,
        };
        let allowed_vote_maps = get("VOTE_ALLOWED_MAPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&get, "VOTE_RATE_LIMIT_MAX", defaults.max_requests)?,
            window: Duration::from_millis(parse_or(
                &get,
                "VOTE_RATE_LIMIT_WINDOW_MS",
                defaults.window.as_millis() as u64,
            )?),
        };

        let round_secs: u64 = parse_or(&get, "VOTE_ROUND_SECS", 0)?;
        let close_lead_secs: u64 = parse_or(&get, "VOTE_CLOSE_LEAD_SECS", 30)?;
        let round_timing = (round_secs > 0).then(|| RoundTiming {
            round: Duration::from_secs(round_secs),
            close_lead: Duration::from_secs(close_lead_secs),
        });

        Ok(Self {
            bind_addr,
            proxy_ip_header: get("VOTE_PROXY_IP_HEADER").map(|h| h.trim().to_ascii_lowercase()),
            registry: ModeRegistry::new(modes, allowed_vote_maps),
            catalog_path: get("VOTE_MAP_CATALOG").map(PathBuf::from),
            rate_limit,
            round_timing,
            admin_token: get("VOTE_ADMIN_TOKEN"),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}
