pub mod batch;
pub mod resolver;
pub mod runner;

use crate::config::{Config, PhenomenonTimeZone, SensorConfig};

pub use batch::{BatchBuilder, DatastreamGroup};
pub use resolver::{EntityResolver, EnvironmentDefaults};
pub use runner::{InjectionRunner, RunReport, RunState};

/// Optional parts of the SensorThings mapping a format opts into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatCapabilities {
    /// Each observation is attached to a FeatureOfInterest resolved from its venue
    pub feature_of_interest: bool,
    /// New Datastreams carry an explicit (unknown) unit of measurement
    pub unit_of_measurement: bool,
}

/// Settings shared by every injection run
#[derive(Debug, Clone, Default)]
pub struct InjectionSettings {
    pub sensor: SensorConfig,
    pub time_zone: PhenomenonTimeZone,
}

impl InjectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sensor: config.sensor.clone(),
            time_zone: config.injector.time_zone,
        }
    }
}
