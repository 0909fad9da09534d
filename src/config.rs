use crate::constants::{DEFAULT_SENSOR_ENCODING_TYPE, DEFAULT_SENSOR_METADATA_TEMPLATE};
use crate::error::{InjectorError, Result};
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "SENSOR_INJECTOR_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub injector: InjectorConfig,
    pub sensor: SensorConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    /// Zone in which phenomenon times are rendered
    pub time_zone: PhenomenonTimeZone,
    /// Upper bound on how long the binary waits for queued injections
    pub await_timeout_secs: u64,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            time_zone: PhenomenonTimeZone::Local,
            await_timeout_secs: 24 * 60 * 60,
        }
    }
}

impl InjectorConfig {
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub encoding_type: String,
    /// `{sensor}` is replaced by the sensor name
    pub metadata_url_template: String,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            encoding_type: DEFAULT_SENSOR_ENCODING_TYPE.to_string(),
            metadata_url_template: DEFAULT_SENSOR_METADATA_TEMPLATE.to_string(),
        }
    }
}

impl SensorConfig {
    pub fn metadata_url(&self, sensor_name: &str) -> String {
        self.metadata_url_template.replace("{sensor}", sensor_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file_name: "injector.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `$SENSOR_INJECTOR_CONFIG`,
    /// or from `config.toml` when it exists. Defaults apply otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
            if !env_path.trim().is_empty() {
                return Self::from_file(Path::new(env_path.trim()));
            }
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::from_file(default_path);
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(path).map_err(|e| {
            InjectorError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}

/// Zone used when rendering an observation's phenomenon time.
///
/// `Local` follows the host environment, `Fixed` pins an offset so output
/// is identical across machines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhenomenonTimeZone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl PhenomenonTimeZone {
    pub fn utc() -> Self {
        PhenomenonTimeZone::Fixed(Utc.fix())
    }

    pub fn convert(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            PhenomenonTimeZone::Local => instant.with_timezone(&Local).fixed_offset(),
            PhenomenonTimeZone::Fixed(offset) => instant.with_timezone(offset),
        }
    }
}

impl fmt::Display for PhenomenonTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhenomenonTimeZone::Local => write!(f, "local"),
            PhenomenonTimeZone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

impl FromStr for PhenomenonTimeZone {
    type Err = InjectorError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("local") {
            return Ok(PhenomenonTimeZone::Local);
        }
        if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
            return Ok(PhenomenonTimeZone::utc());
        }
        parse_offset(trimmed)
            .map(PhenomenonTimeZone::Fixed)
            .ok_or_else(|| {
                InjectorError::Config(format!(
                    "Invalid time zone '{}': expected 'local', 'UTC' or an offset like '+01:00'",
                    s
                ))
            })
    }
}

impl<'de> Deserialize<'de> for PhenomenonTimeZone {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
