//! seatd.toml configuration.
//!
//! Every section and key is optional; a missing file means all defaults.
//! Durations are strings such as `"500ms"`, `"5s"`, `"2m"`, `"1h"` or a
//! bare number of seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use seatgrid_controller::{ControllerConfig, RetryPolicy};
use seatgrid_probe::{parse_duration, ProbeConfig};
use seatgrid_routes::RouteConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub routing: RouteConfig,
    pub probe: ProbeSection,
    pub output: OutputConfig,
    pub retry: RetrySection,
    pub reaper: ReaperConfig,
    pub controller: ControllerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub default_namespace: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8480,
            data_dir: PathBuf::from("/var/lib/seatgrid"),
            default_namespace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub interval: String,
    pub connect_timeout: String,
    pub timeout: String,
    pub stale_after: String,
    pub path: String,
    /// File holding the bearer token for instance status endpoints.
    pub token_file: Option<PathBuf>,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            interval: "60s".to_string(),
            connect_timeout: "5s".to_string(),
            timeout: "10s".to_string(),
            stale_after: "180s".to_string(),
            path: "/status".to_string(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the directory sink; routes stay in memory only when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub base_delay: String,
    pub max_delay: String,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: "200ms".to_string(),
            max_delay: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval: String,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: "1h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub resync_interval: String,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            resync_interval: "5m".to_string(),
        }
    }
}

/// Upper bound for `probe.connect_timeout`.
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for `probe.timeout`.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A config value that parsed but cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration { field: String, value: String },

    #[error("{0} must be greater than zero")]
    ZeroInterval(String),

    #[error("{field} is {value:?}, must be between 0 and {max:?}")]
    OutOfRange {
        field: String,
        value: Duration,
        max: Duration,
    },
}

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Timer period; must be non-zero.
fn interval(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let d = duration(field, value)?;
    if d.is_zero() {
        return Err(ConfigError::ZeroInterval(field.to_string()));
    }
    Ok(d)
}

fn timeout(field: &str, value: &str, max: Duration) -> Result<Duration, ConfigError> {
    let d = duration(field, value)?;
    if d.is_zero() || d > max {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value: d,
            max,
        });
    }
    Ok(d)
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        // Surface bad durations at startup rather than on first use.
        config.probe_config()?;
        config.controller_config()?;
        config.reaper_interval()?;
        config.resync_interval()?;
        Ok(config)
    }

    /// Probe settings, with the token read from `token_file` if set.
    pub fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        let p = &self.probe;
        let token = match &p.token_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading probe token {}", path.display()))?;
                Some(raw.trim_end().to_string())
            }
            None => None,
        };
        Ok(ProbeConfig {
            interval: interval("probe.interval", &p.interval)?,
            connect_timeout: timeout("probe.connect_timeout", &p.connect_timeout, MAX_CONNECT_TIMEOUT)?,
            timeout: timeout("probe.timeout", &p.timeout, MAX_PROBE_TIMEOUT)?,
            stale_after: duration("probe.stale_after", &p.stale_after)?,
            path: p.path.clone(),
            token,
        })
    }

    pub fn controller_config(&self) -> anyhow::Result<ControllerConfig> {
        Ok(ControllerConfig {
            routes: self.routing.clone(),
            stale_after: duration("probe.stale_after", &self.probe.stale_after)?,
            retry: RetryPolicy {
                attempts: self.retry.attempts,
                base_delay: duration("retry.base_delay", &self.retry.base_delay)?,
                max_delay: duration("retry.max_delay", &self.retry.max_delay)?,
            },
        })
    }

    pub fn reaper_interval(&self) -> Result<Duration, ConfigError> {
        interval("reaper.interval", &self.reaper.interval)
    }

    pub fn resync_interval(&self) -> Result<Duration, ConfigError> {
        interval("controller.resync_interval", &self.controller.resync_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config.server.port, 8480);
        assert_eq!(config.server.default_namespace, "default");
        assert_eq!(config.routing, RouteConfig::default());
        assert!(config.output.dir.is_none());

        let probe = config.probe_config().unwrap();
        assert_eq!(probe.interval, Duration::from_secs(60));
        assert_eq!(probe.stale_after, Duration::from_secs(180));
        assert_eq!(config.reaper_interval().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.resync_interval().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
port = 9000
data_dir = "/tmp/seats"
default_namespace = "tables"

[routing]
base_domain = "play.example.com"
dns_target = "10.0.0.5"
backend_port = 30000

[probe]
interval = "15s"
path = "/api/status"

[output]
dir = "/srv/routes"

[retry]
attempts = 6
base_delay = "500ms"
max_delay = "2m"

[reaper]
interval = "10m"
"#;
        let config = DaemonConfig::parse(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.default_namespace, "tables");
        assert_eq!(config.routing.base_domain, "play.example.com");
        assert_eq!(config.routing.backend_port, 30000);
        // Unset routing keys keep their defaults.
        assert_eq!(config.routing.standby_service, "standby-page");
        assert_eq!(config.output.dir, Some(PathBuf::from("/srv/routes")));

        let probe = config.probe_config().unwrap();
        assert_eq!(probe.interval, Duration::from_secs(15));
        assert_eq!(probe.path, "/api/status");

        let controller = config.controller_config().unwrap();
        assert_eq!(controller.retry.attempts, 6);
        assert_eq!(controller.retry.base_delay, Duration::from_millis(500));
        assert_eq!(controller.retry.max_delay, Duration::from_secs(120));
        assert_eq!(config.reaper_interval().unwrap(), Duration::from_secs(600));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = DaemonConfig::parse("[probe]\ninterval = \"soon\"\n").unwrap_err();
        assert!(err.to_string().contains("probe.interval"));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for (section, key, field) in [
            ("probe", "interval", "probe.interval"),
            ("reaper", "interval", "reaper.interval"),
            ("controller", "resync_interval", "controller.resync_interval"),
        ] {
            for zero in ["0s", "0", "0ms"] {
                let toml = format!("[{section}]\n{key} = \"{zero}\"\n");
                let err = DaemonConfig::parse(&toml).unwrap_err();
                assert_eq!(
                    err.downcast_ref::<ConfigError>(),
                    Some(&ConfigError::ZeroInterval(field.to_string())),
                    "{toml}"
                );
            }
        }
    }

    #[test]
    fn timeouts_outside_bounds_are_rejected() {
        let err = DaemonConfig::parse("[probe]\ntimeout = \"120s\"\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::OutOfRange {
                field: "probe.timeout".into(),
                value: Duration::from_secs(120),
                max: MAX_PROBE_TIMEOUT,
            })
        );

        let err = DaemonConfig::parse("[probe]\nconnect_timeout = \"6s\"\n").unwrap_err();
        assert!(err.to_string().contains("probe.connect_timeout"));
        assert!(DaemonConfig::parse("[probe]\ntimeout = \"0s\"\n").is_err());

        let config = DaemonConfig::parse("[probe]\nconnect_timeout = \"2s\"\ntimeout = \"10s\"\n").unwrap();
        let probe = config.probe_config().unwrap();
        assert_eq!(probe.connect_timeout, Duration::from_secs(2));
        assert_eq!(probe.timeout, MAX_PROBE_TIMEOUT);
    }

    #[test]
    fn token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "s3cret\n").unwrap();

        let mut config = DaemonConfig::default();
        config.probe.token_file = Some(path);
        assert_eq!(config.probe_config().unwrap().token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let config = DaemonConfig::load(Some(Path::new("/nonexistent/seatd.toml"))).unwrap();
        assert_eq!(config.server.port, 8480);
    }
}
