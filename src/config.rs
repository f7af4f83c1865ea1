use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default hop limit
pub const DEFAULT_MAX_TTL: u8 = 30;
/// Default per-probe wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default overall deadline of each trace in a multi-path run
pub const DEFAULT_TRACE_DEADLINE: Duration = Duration::from_secs(10);

/// Per-trace configuration. Immutable once a trace starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Maximum TTL
    pub max_ttl: u8,
    /// IPv4 type-of-service byte
    pub tos: u8,
    /// Read deadline of the reply listener
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_ttl: DEFAULT_MAX_TTL,
            tos: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Configuration of a multi-path run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiTraceConfig {
    #[serde(flatten)]
    pub trace: TraceConfig,
    /// Deadline applied to each trace independently
    #[serde(with = "duration_serde")]
    pub deadline: Duration,
}

impl Default for MultiTraceConfig {
    fn default() -> Self {
        Self {
            trace: TraceConfig::default(),
            deadline: DEFAULT_TRACE_DEADLINE,
        }
    }
}

/// Defaults read from ~/.config/mtrace/config.toml. Every field is optional;
/// command-line flags override whatever is set here.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub max_ttl: Option<u8>,
    pub tos: Option<u8>,
    /// Seconds
    pub timeout: Option<f64>,
    /// Seconds
    pub deadline: Option<f64>,
}

impl Settings {
    /// Default settings file path: ~/.config/mtrace/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mtrace").join("config.toml"))
    }

    /// Read and parse a settings file
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load the default settings file (returns default if missing/invalid)
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::read(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring invalid settings file");
                Self::default()
            }
        }
    }

    /// Overlay these settings on top of `config`
    pub fn apply(&self, mut config: MultiTraceConfig) -> MultiTraceConfig {
        if let Some(max_ttl) = self.max_ttl.filter(|&t| t > 0) {
            config.trace.max_ttl = max_ttl;
        }
        if let Some(tos) = self.tos {
            config.trace.tos = tos;
        }
        if let Some(timeout) = self.timeout.and_then(positive_secs) {
            config.trace.timeout = timeout;
        }
        if let Some(deadline) = self.deadline.and_then(positive_secs) {
            config.deadline = deadline;
        }
        config
    }
}

/// Seconds as a non-zero `Duration`; `None` for NaN, non-positive or
/// out-of-range values
pub fn positive_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

/// Serde helper for Duration (float seconds)
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
