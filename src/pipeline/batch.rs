use crate::config::PhenomenonTimeZone;
use crate::constants::{BUILDING_PROPERTY, FLOOR_PROPERTY};
use crate::entities::{
    DataArrayComponent, DataArrayDocument, DataArrayValue, Datastream, Entity, EntityId, PointFeature,
};
use crate::error::{InjectorError, Result};
use crate::pipeline::resolver::EntityResolver;
use crate::pipeline::FormatCapabilities;
use crate::types::MotionRecord;
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Records sharing one resolved Datastream, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct DatastreamGroup {
    pub datastream: Datastream,
    pub records: Vec<MotionRecord>,
}

fn require_id<E: Entity>(entity: &E, name: &str) -> Result<EntityId> {
    entity
        .id()
        .cloned()
        .ok_or_else(|| InjectorError::RemoteService(format!("{} '{}' has no @iot.id", E::KIND, name)))
}

#[derive(Debug, Serialize)]
struct MotionSubject {
    id: String,
}

/// `result` of a motion observation
#[derive(Debug, Serialize)]
struct MotionEvent {
    subject: MotionSubject,
    location: PointFeature,
}

impl MotionEvent {
    fn from_record(record: &MotionRecord) -> Self {
        Self {
            subject: MotionSubject {
                id: record.app_user_id.subject_id(),
            },
            location: PointFeature::new(record.lon, record.lat)
                .with_property(BUILDING_PROPERTY, record.building)
                .with_property(FLOOR_PROPERTY, record.floor),
        }
    }
}

/// Turns parsed records into a single `CreateObservations` payload.
pub struct BatchBuilder {
    capabilities: FormatCapabilities,
    time_zone: PhenomenonTimeZone,
}

impl BatchBuilder {
    pub fn new(capabilities: FormatCapabilities, time_zone: PhenomenonTimeZone) -> Self {
        Self {
            capabilities,
            time_zone,
        }
    }

    pub fn capabilities(&self) -> FormatCapabilities {
        self.capabilities
    }

    /// Partitions `records` by Datastream, resolving (and creating) the
    /// Sensor and Datastream of every record on the way.
    ///
    /// Groups come out in the order their Datastream was first seen.
    pub async fn group(&self, resolver: &EntityResolver, records: Vec<MotionRecord>) -> Result<Vec<DatastreamGroup>> {
        info!("Grouping {} records by Datastream...", records.len());
        let mut groups: Vec<DatastreamGroup> = Vec::new();
        let mut positions: HashMap<EntityId, usize> = HashMap::new();

        for record in records {
            let sensor = resolver.resolve_sensor(&record).await?;
            let datastream = resolver.resolve_datastream(&sensor).await?;
            let id = require_id(&datastream, &datastream.name)?;
            match positions.get(&id) {
                Some(&position) => groups[position].records.push(record),
                None => {
                    positions.insert(id, groups.len());
                    groups.push(DatastreamGroup {
                        datastream,
                        records: vec![record],
                    });
                }
            }
        }

        info!("Grouping records by Datastream... Done. groups={}", groups.len());
        Ok(groups)
    }

    /// One value-group per Datastream, one tuple per record
    pub async fn to_payload(&self, resolver: &EntityResolver, groups: &[DatastreamGroup]) -> Result<DataArrayDocument> {
        let mut document = DataArrayDocument::new();
        for group in groups {
            let datastream_id = require_id(&group.datastream, &group.datastream.name)?;
            let mut value = DataArrayValue::new(datastream_id, self.components());
            for record in &group.records {
                value.push(self.tuple(resolver, record).await?);
            }
            debug!("Datastream {} carries {} observations", value.datastream.id, value.count);
            document.push(value);
        }
        Ok(document)
    }

    pub fn components(&self) -> Vec<DataArrayComponent> {
        let mut components = vec![DataArrayComponent::PhenomenonTime, DataArrayComponent::Result];
        if self.capabilities.feature_of_interest {
            components.push(DataArrayComponent::FeatureOfInterest);
        }
        components
    }

    /// Device date in the configured zone, RFC 3339 with milliseconds
    pub fn phenomenon_time(&self, record: &MotionRecord) -> String {
        self.time_zone
            .convert(record.device_date)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    async fn tuple(&self, resolver: &EntityResolver, record: &MotionRecord) -> Result<Vec<Value>> {
        let mut tuple = vec![
            Value::String(self.phenomenon_time(record)),
            serde_json::to_value(MotionEvent::from_record(record))?,
        ];
        if self.capabilities.feature_of_interest {
            let feature = resolver.resolve_feature_of_interest(record).await?;
            tuple.push(serde_json::to_value(require_id(&feature, &feature.name)?)?);
        }
        Ok(tuple)
    }
}
