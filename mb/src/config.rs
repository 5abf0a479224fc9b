//! Bridge configuration types and loading

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gate::GateConfig;

const APP_NAME: &str = "matterbridge";
const CONFIG_FILE: &str = "matterbridge.yml";

/// Main bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Flow file to deploy
    pub flow: PathBuf,

    pub storage: StorageConfig,

    pub network: NetworkConfig,

    pub startup: StartupConfig,

    pub pairing: PairingConfig,

    pub http: HttpConfig,

    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            flow: PathBuf::from("flow.yml"),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            startup: StartupConfig::default(),
            pairing: PairingConfig::default(),
            http: HttpConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    /// Fail fast on values that would only surface at runtime
    pub fn validate(&self) -> Result<()> {
        for (name, gate) in [("server", &self.startup.server), ("aggregator", &self.startup.aggregator)] {
            if gate.timeout_ms == 0 {
                return Err(eyre::eyre!("startup.{}.timeout-ms must be greater than zero", name));
            }
            if gate.channel_buffer == 0 {
                return Err(eyre::eyre!("startup.{}.channel-buffer must be greater than zero", name));
            }
        }
        if self.startup.aggregator.timeout_ms >= self.startup.server.timeout_ms {
            tracing::warn!(
                aggregator = self.startup.aggregator.timeout_ms,
                server = self.startup.server.timeout_ms,
                "Aggregator timeout is not shorter than server timeout; degraded aggregators may miss their server"
            );
        }
        if !self.pairing.qr_base_url.starts_with("http://") && !self.pairing.qr_base_url.starts_with("https://") {
            return Err(eyre::eyre!("pairing.qr-base-url must be an http(s) URL"));
        }
        if self.events.capacity == 0 {
            return Err(eyre::eyre!("events.capacity must be greater than zero"));
        }
        if self.storage.root.as_os_str().is_empty() {
            return Err(eyre::eyre!("storage.root must not be empty"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(CONFIG_FILE);
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(APP_NAME).join(CONFIG_FILE);
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Where namespaces are stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("storage"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address commissioning listeners bind to
    #[serde(rename = "bind-ip")]
    pub bind_ip: IpAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// Gate settings per coordinator kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub server: GateConfig,
    pub aggregator: GateConfig,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            server: GateConfig::default(),
            aggregator: GateConfig {
                timeout_ms: 8_000,
                ..GateConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Page that renders a pairing code as a QR code
    #[serde(rename = "qr-base-url")]
    pub qr_base_url: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            qr_base_url: "https://project-chip.github.io/connectedhomeip/qrcode.html".to_string(),
        }
    }
}

/// Admin HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8787),
        }
    }
}

/// Event log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Directory for per-node JSONL event logs
    pub dir: PathBuf,

    /// Broadcast channel capacity
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("events"),
            capacity: crate::events::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
