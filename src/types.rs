use crate::error::{InjectorError, Result};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape of a raw `appuserid`: `<sensor>_<sequence>_<id>`
pub const APP_USER_ID_PATTERN: &str = r"^(?P<sensor>[^_]+)_(?P<sequence>[^_]+)_(?P<id>\d+)$";

static APP_USER_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(APP_USER_ID_PATTERN).expect("APP_USER_ID_PATTERN is a valid regex"));

/// Composite identifier carried by every motion record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppUserId {
    pub sensor: String,
    pub sequence: String,
    pub id: u32,
}

impl AppUserId {
    pub fn new(sensor: impl Into<String>, sequence: impl Into<String>, id: u32) -> Self {
        Self {
            sensor: sensor.into(),
            sequence: sequence.into(),
            id,
        }
    }

    /// Identifier of the tracked subject, e.g. `T1-2` for `Cam1_T1_2`
    pub fn subject_id(&self) -> String {
        format!("{}-{}", self.sequence, self.id)
    }
}

impl FromStr for AppUserId {
    type Err = InjectorError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || InjectorError::InvalidPattern {
            value: raw.to_string(),
            pattern: APP_USER_ID_PATTERN.to_string(),
        };
        let captures = APP_USER_ID_REGEX.captures(raw).ok_or_else(invalid)?;
        // The pattern only lets digits through; overflow is the remaining failure
        let id = captures["id"].parse::<u32>().map_err(|_| invalid())?;
        Ok(Self {
            sensor: captures["sensor"].to_string(),
            sequence: captures["sequence"].to_string(),
            id,
        })
    }
}

impl fmt::Display for AppUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.sensor, self.sequence, self.id)
    }
}

/// Kind of motion event reported by the positioning system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationType {
    Location,
    Geofence,
}

/// Record exactly as it appears in an input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMotionRecord {
    #[serde(rename = "appuserid")]
    pub app_user_id: String,
    #[serde(rename = "venueid")]
    pub venue_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    /// Epoch milliseconds, as a number or a numeric string
    #[serde(rename = "devicedate")]
    pub device_date: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: ObservationType,
}

/// One parsed motion observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMotionRecord", into = "RawMotionRecord")]
pub struct MotionRecord {
    pub app_user_id: AppUserId,
    pub venue_id: i64,
    pub building: Option<i64>,
    pub floor: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    pub device_date: DateTime<Utc>,
    pub kind: ObservationType,
}

impl TryFrom<RawMotionRecord> for MotionRecord {
    type Error = InjectorError;

    fn try_from(raw: RawMotionRecord) -> Result<Self> {
        Ok(Self {
            app_user_id: raw.app_user_id.parse()?,
            venue_id: raw.venue_id,
            building: raw.building,
            floor: raw.floor,
            lat: raw.lat,
            lon: raw.lon,
            device_date: parse_epoch_millis("devicedate", &raw.device_date)?,
            kind: raw.kind,
        })
    }
}

impl From<MotionRecord> for RawMotionRecord {
    fn from(record: MotionRecord) -> Self {
        Self {
            app_user_id: record.app_user_id.to_string(),
            venue_id: record.venue_id,
            building: record.building,
            floor: record.floor,
            lat: record.lat,
            lon: record.lon,
            device_date: serde_json::Value::from(record.device_date.timestamp_millis()),
            kind: record.kind,
        }
    }
}

/// Decode epoch milliseconds given either as a JSON integer or a numeric string.
pub fn parse_epoch_millis(field: &str, value: &serde_json::Value) -> Result<DateTime<Utc>> {
    let invalid = || InjectorError::InvalidFormat {
        field: field.to_string(),
        value: match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    let millis = match value {
        serde_json::Value::Number(n) => n.as_i64().ok_or_else(invalid)?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
}
