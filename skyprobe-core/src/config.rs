use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::model::Coordinates;

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_GEOCODER_BASE_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_IP_LOCATOR_URL: &str = "http://ip-api.com/json";
pub const DEFAULT_PACKAGE: &str = "skyprobe";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Outbound HTTP endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub weather_base_url: String,
    pub geocoder_base_url: String,
    pub user_agent: String,
    /// Unset means no timeout beyond the HTTP client's own behaviour.
    pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            weather_base_url: DEFAULT_WEATHER_BASE_URL.to_string(),
            geocoder_base_url: DEFAULT_GEOCODER_BASE_URL.to_string(),
            user_agent: format!("skyprobe/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSourceKind {
    /// Approximate fix from the public IP address.
    #[default]
    Ip,
    /// Coordinates written in this file.
    Fixed,
}

impl LocationSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSourceKind::Ip => "ip",
            LocationSourceKind::Fixed => "fixed",
        }
    }

    pub const fn all() -> &'static [LocationSourceKind] {
        &[LocationSourceKind::Ip, LocationSourceKind::Fixed]
    }
}

impl std::fmt::Display for LocationSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub source: LocationSourceKind,
    pub permission_granted: bool,
    pub ip_locator_url: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: LocationSourceKind::default(),
            permission_granted: true,
            ip_locator_url: DEFAULT_IP_LOCATOR_URL.to_string(),
            latitude: None,
            longitude: None,
        }
    }
}

impl LocationConfig {
    /// Coordinates for the `fixed` source.
    pub fn fixed_coordinates(&self) -> Result<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon)
                .context("Invalid coordinates in [location] section of config"),
            _ => Err(anyhow!(
                "Location source 'fixed' needs both latitude and longitude.\n\
                 Hint: run `skyprobe configure` and enter them."
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub poll_interval_ms: u64,
    /// Allows listing the user's recently started processes.
    pub usage_stats_granted: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            usage_stats_granted: false,
        }
    }
}

impl StatusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// package = "skyprobe"
///
/// [location]
/// source = "fixed"
/// latitude = 37.7749
/// longitude = -122.4194
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Package whose background units count as "ours" in diagnostics.
    pub package: String,
    pub api: ApiConfig,
    pub location: LocationConfig,
    pub status: StatusConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package: DEFAULT_PACKAGE.to_string(),
            api: ApiConfig::default(),
            location: LocationConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, use defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "skyprobe", "skyprobe")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Switch to a fixed location source at the given coordinates.
    pub fn set_fixed_location(&mut self, coordinates: Coordinates) {
        self.location.source = LocationSourceKind::Fixed;
        self.location.latitude = Some(coordinates.latitude);
        self.location.longitude = Some(coordinates.longitude);
    }
}
