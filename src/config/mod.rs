use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level daemon configuration, loaded from a TOML file given on the
/// command line.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Host name included in alert mail bodies.
    #[serde(default)]
    pub servername: String,
    pub mqtt: MqttConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// All command subjects live under `<topic_prefix>/command/...`.
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the module registry API, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub send_alert_after_service_failed: bool,
    pub email: Option<String>,
    pub smtp_server: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            send_alert_after_service_failed: false,
            email: None,
            smtp_server: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Where unit definition files live. Install and removal go through sudo
    /// since this is a protected location.
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,
    /// Root directory holding one subdirectory per service type.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
    /// User the generated units run as.
    #[serde(default = "default_service_user")]
    pub service_user: String,
    /// Bound on every systemctl invocation; a timeout surfaces as a host
    /// control failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            unit_dir: default_unit_dir(),
            modules_dir: default_modules_dir(),
            service_user: default_service_user(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    1
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_modules_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("modules"),
        None => PathBuf::from("./modules"),
    }
}

fn default_service_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

impl ManagerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }
}
