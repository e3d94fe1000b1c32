//! Configuration store.
//!
//! Settings come from environment-style `KEY=value` pairs, read once at
//! startup and again whenever [`ConfigStore::reload`] is called.
//!
//! Recognised keys:
//! - `SIMULATION_MODE` - global dry-run switch (default: on)
//! - `LOG_LEVEL` - `debug` | `info` | `warn` | `error` (default: `info`)
//! - `AGENT_<NAME>_ENABLED` - per-agent switch (default: off)
//! - `AGENT_<NAME>_<CAPABILITY>` - per-agent capability flag or numeric limit
//!
//! `<NAME>` is the agent name upper-cased with `-` replaced by `_`
//! (`health-monitor` -> `AGENT_HEALTH_MONITOR_ENABLED`). Capability keys are
//! stored lower-case (`AGENT_OUTREACH_CAN_SEND` -> `can_send`).
//!
//! Malformed values never fail loading: they are logged and the documented
//! default applies.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::ConfigError;
use crate::logging::LogLevel;

/// Numeric limit used when a limit capability is absent or malformed.
pub const DEFAULT_LIMIT: u64 = 5;

const DEFAULT_LISTEN_PORT: u16 = 3070;
const DEFAULT_LLM_MODEL: &str = "openai/gpt-4o-mini";

/// Process-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalConfig {
    pub simulation_mode: bool,
    pub log_level: LogLevel,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            simulation_mode: true,
            log_level: LogLevel::Info,
        }
    }
}

/// A capability value: a permission bit or a numeric limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Capability {
    Flag(bool),
    Number(f64),
}

impl Capability {
    /// Interpret as a permission. Numbers count as granted when non-zero.
    pub fn as_flag(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Number(n) => *n != 0.0,
        }
    }

    /// Interpret as a non-negative integer limit.
    pub fn as_limit(&self) -> Option<u64> {
        match self {
            Self::Number(n) if n.is_finite() && *n >= 0.0 => Some(n.trunc() as u64),
            _ => None,
        }
    }
}

/// Per-agent settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentSettings {
    pub enabled: bool,
    pub capabilities: HashMap<String, Capability>,
}

/// Settings the service binary needs to wire external collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub listen: SocketAddr,
    pub sqlite_path: Option<PathBuf>,
    pub supabase_url: Option<String>,
    pub supabase_readonly_key: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub llm_model: String,
    pub events_path: Option<PathBuf>,
}

/// Where settings are read from.
#[derive(Debug, Clone)]
enum VarSource {
    Process,
    Fixed(HashMap<String, String>),
}

impl VarSource {
    fn snapshot(&self) -> HashMap<String, String> {
        match self {
            Self::Process => std::env::vars().collect(),
            Self::Fixed(vars) => vars.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    global: GlobalConfig,
    agents: HashMap<String, AgentSettings>,
}

/// In-memory configuration store. Read-mostly and safe to share.
#[derive(Debug)]
pub struct ConfigStore {
    source: VarSource,
    known_agents: Vec<String>,
    snapshot: RwLock<Snapshot>,
}

/// Shared config store wrapped in Arc for concurrent access.
pub type SharedConfigStore = Arc<ConfigStore>;

impl ConfigStore {
    /// Load from the process environment.
    pub fn from_env<S: AsRef<str>>(known_agents: &[S]) -> Self {
        Self::with_source(VarSource::Process, known_agents)
    }

    /// Load from an explicit variable map.
    pub fn from_vars<I, K, V, S>(vars: I, known_agents: &[S]) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        S: AsRef<str>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::with_source(VarSource::Fixed(vars), known_agents)
    }

    fn with_source<S: AsRef<str>>(source: VarSource, known_agents: &[S]) -> Self {
        let known_agents: Vec<String> = known_agents
            .iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        let snapshot = parse_snapshot(&source.snapshot(), &known_agents);
        Self {
            source,
            known_agents,
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Re-read the source. Loading has no side effects beyond reading it.
    pub fn reload(&self) {
        let fresh = parse_snapshot(&self.source.snapshot(), &self.known_agents);
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *snapshot = fresh;
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        f(&snapshot)
    }

    pub fn global(&self) -> GlobalConfig {
        self.read(|s| s.global)
    }

    pub fn is_simulation_mode(&self) -> bool {
        self.read(|s| s.global.simulation_mode)
    }

    pub fn log_level(&self) -> LogLevel {
        self.read(|s| s.global.log_level)
    }

    /// Names the store was loaded against.
    pub fn known_agents(&self) -> &[String] {
        &self.known_agents
    }

    /// False for unknown names.
    pub fn is_agent_enabled(&self, name: &str) -> bool {
        self.read(|s| s.agents.get(name).map(|a| a.enabled).unwrap_or(false))
    }

    pub fn enabled_agent_names(&self) -> BTreeSet<String> {
        self.read(|s| {
            s.agents
                .iter()
                .filter(|(_, a)| a.enabled)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    pub fn capability(&self, agent: &str, key: &str) -> Option<Capability> {
        self.read(|s| {
            s.agents
                .get(agent)
                .and_then(|a| a.capabilities.get(key))
                .copied()
        })
    }

    /// Permission bit; absent means not granted.
    pub fn capability_flag(&self, agent: &str, key: &str) -> bool {
        self.capability(agent, key)
            .map(|c| c.as_flag())
            .unwrap_or(false)
    }

    /// Numeric limit; absent or malformed means [`DEFAULT_LIMIT`].
    pub fn capability_limit(&self, agent: &str, key: &str) -> u64 {
        self.capability(agent, key)
            .and_then(|c| c.as_limit())
            .unwrap_or(DEFAULT_LIMIT)
    }

    /// Settings for wiring the service's external collaborators.
    pub fn service_settings(&self) -> ServiceSettings {
        let vars = self.source.snapshot();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let url_setting = |key: &str| {
            get(key).filter(|v| match url::Url::parse(v) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("Ignoring {}: invalid URL {:?}: {}", key, v, e);
                    false
                }
            })
        };

        let listen = get("HTTP_LISTEN")
            .and_then(|v| match v.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!("Ignoring HTTP_LISTEN {:?}: {}", v, e);
                    None
                }
            })
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_LISTEN_PORT)));

        ServiceSettings {
            listen,
            sqlite_path: get("DATA_SQLITE_PATH").map(PathBuf::from),
            supabase_url: url_setting("SUPABASE_URL"),
            supabase_readonly_key: get("SUPABASE_READONLY_KEY"),
            notify_webhook_url: url_setting("NOTIFY_WEBHOOK_URL"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            events_path: get("EVENTS_PATH").map(PathBuf::from),
        }
    }
}

/// `health-monitor` -> `AGENT_HEALTH_MONITOR_`.
pub fn agent_env_prefix(name: &str) -> String {
    format!("AGENT_{}_", name.to_ascii_uppercase().replace('-', "_"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_capability(key: &str, value: &str) -> Result<Capability, ConfigError> {
    let trimmed = value.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => return Ok(Capability::Flag(true)),
        "false" | "no" | "off" => return Ok(Capability::Flag(false)),
        _ => {}
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Capability::Number(n)),
        _ => Err(ConfigError::InvalidCapability {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_snapshot(vars: &HashMap<String, String>, known_agents: &[String]) -> Snapshot {
    let mut global = GlobalConfig::default();

    if let Some(value) = vars.get("SIMULATION_MODE") {
        match parse_bool("SIMULATION_MODE", value) {
            Ok(b) => global.simulation_mode = b,
            Err(e) => tracing::warn!("{}; keeping simulation mode on", e),
        }
    }

    if let Some(value) = vars.get("LOG_LEVEL") {
        match value.parse::<LogLevel>() {
            Ok(level) => global.log_level = level,
            Err(()) => {
                let e = ConfigError::InvalidLogLevel {
                    key: "LOG_LEVEL".to_string(),
                    value: value.clone(),
                };
                tracing::warn!("{}; using {}", e, global.log_level);
            }
        }
    }

    let prefixes: Vec<(String, &String)> = known_agents
        .iter()
        .map(|name| (agent_env_prefix(name), name))
        .collect();

    let mut agents: HashMap<String, AgentSettings> = known_agents
        .iter()
        .map(|name| (name.clone(), AgentSettings::default()))
        .collect();

    for (key, value) in vars {
        // Longest prefix wins so `claims` never swallows `claims-watch` keys.
        let Some((prefix, name)) = prefixes
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
        else {
            continue;
        };

        let suffix = &key[prefix.len()..];
        if suffix.is_empty() {
            continue;
        }
        let Some(settings) = agents.get_mut(*name) else {
            continue;
        };

        if suffix == "ENABLED" {
            match parse_bool(key, value) {
                Ok(b) => settings.enabled = b,
                Err(e) => tracing::warn!("{}; agent {} stays disabled", e, name),
            }
            continue;
        }

        match parse_capability(key, value) {
            Ok(cap) => {
                settings
                    .capabilities
                    .insert(suffix.to_ascii_lowercase(), cap);
            }
            Err(e) => tracing::warn!("{}; ignoring", e),
        }
    }

    Snapshot { global, agents }
}
