//! Search-or-create resolution of the SensorThings entities an observation
//! depends on.
//!
//! Every resolution is a `query` followed, when nothing matched, by a
//! `create`. The first match wins when several entities satisfy a filter.

use crate::app::ports::SensorThingsPort;
use crate::config::SensorConfig;
use crate::constants::{OM_OBSERVATION_TYPE, VENUE_ID_PROPERTY};
use crate::entities::{
    Datastream, Entity, EntityId, EntityRef, FeatureOfInterest, Location, ObservedProperty, Sensor, Thing,
    UnitOfMeasurement,
};
use crate::error::{InjectorError, Result};
use crate::pipeline::FormatCapabilities;
use crate::types::MotionRecord;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info};

/// Well-known entities every Datastream links to, resolved once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentDefaults {
    pub motion: ObservedProperty,
    pub location: Location,
    pub thing: Thing,
}

impl EnvironmentDefaults {
    /// Links to (or creates) the Motion ObservedProperty, the Unknown
    /// Location and the Unknown Thing, in that order.
    pub async fn init_environment(service: &dyn SensorThingsPort) -> Result<Self> {
        let motion = link_or_create_motion_observed_property(service).await?;
        let location = link_or_create_unknown_location(service).await?;
        let thing = link_or_create_unknown_thing(service, &location).await?;
        Ok(Self { motion, location, thing })
    }
}

pub async fn link_or_create_motion_observed_property(service: &dyn SensorThingsPort) -> Result<ObservedProperty> {
    let template = ObservedProperty::motion();
    link_or_create_default(service, &name_filter(&template.name), template).await
}

pub async fn link_or_create_unknown_location(service: &dyn SensorThingsPort) -> Result<Location> {
    let template = Location::unknown();
    link_or_create_default(service, &name_filter(&template.name), template).await
}

pub async fn link_or_create_unknown_thing(service: &dyn SensorThingsPort, location: &Location) -> Result<Thing> {
    let template = Thing::unknown(location);
    link_or_create_default(service, &name_filter(&template.name), template).await
}

async fn link_or_create_default<E: Entity>(service: &dyn SensorThingsPort, filter: &str, template: E) -> Result<E> {
    if let Some(existing) = find_first::<E>(service, filter).await? {
        let id = identity(&existing)?;
        info!("Linked to existing {} '{}' ({})", E::KIND, filter, id);
        return Ok(existing);
    }
    info!("Creating missing {} '{}'...", E::KIND, filter);
    let created = create(service, template).await?;
    let id = identity(&created)?;
    info!("Creating missing {} '{}'... Done ({})", E::KIND, filter, id);
    Ok(created)
}

/// Resolves per-record entities against one SensorThings service.
pub struct EntityResolver {
    service: Arc<dyn SensorThingsPort>,
    defaults: EnvironmentDefaults,
    sensor: SensorConfig,
    capabilities: FormatCapabilities,
}

impl EntityResolver {
    pub fn new(
        service: Arc<dyn SensorThingsPort>,
        defaults: EnvironmentDefaults,
        sensor: SensorConfig,
        capabilities: FormatCapabilities,
    ) -> Self {
        Self {
            service,
            defaults,
            sensor,
            capabilities,
        }
    }

    pub fn defaults(&self) -> &EnvironmentDefaults {
        &self.defaults
    }

    /// Sensor named after the record's `appuserid` sensor part
    pub async fn resolve_sensor(&self, record: &MotionRecord) -> Result<Sensor> {
        let name = &record.app_user_id.sensor;
        self.find_or_create(&name_filter(name), || Sensor {
            id: None,
            name: name.clone(),
            description: name.clone(),
            encoding_type: self.sensor.encoding_type.clone(),
            metadata: self.sensor.metadata_url(name),
        })
        .await
    }

    /// Datastream joining `sensor` to the Motion ObservedProperty
    pub async fn resolve_datastream(&self, sensor: &Sensor) -> Result<Datastream> {
        let sensor_id = identity(sensor)?;
        let motion_id = identity(&self.defaults.motion)?;
        let thing_id = identity(&self.defaults.thing)?;
        let filter = format!(
            "Sensor/id eq {} and ObservedProperty/id eq {}",
            quote(&sensor_id.to_string()),
            quote(&motion_id.to_string())
        );
        let unit_of_measurement = self.capabilities.unit_of_measurement.then(UnitOfMeasurement::unknown);
        self.find_or_create(&filter, || Datastream {
            id: None,
            name: sensor.name.clone(),
            description: format!("Human motions caught by Sensor '{}' ('{}')", sensor.name, sensor_id),
            observation_type: OM_OBSERVATION_TYPE.to_string(),
            unit_of_measurement,
            sensor: Some(EntityRef::from(sensor_id.clone())),
            observed_property: Some(EntityRef::from(motion_id)),
            thing: Some(EntityRef::from(thing_id)),
        })
        .await
    }

    /// Placeholder feature standing for the record's venue
    pub async fn resolve_feature_of_interest(&self, record: &MotionRecord) -> Result<FeatureOfInterest> {
        let filter = format!("feature/properties/{} eq {}", VENUE_ID_PROPERTY, record.venue_id);
        self.find_or_create(&filter, || FeatureOfInterest::for_venue(record.venue_id))
            .await
    }

    async fn find_or_create<E, F>(&self, filter: &str, build: F) -> Result<E>
    where
        E: Entity,
        F: FnOnce() -> E,
    {
        if let Some(existing) = find_first::<E>(self.service.as_ref(), filter).await? {
            debug!("Found {} matching '{}'", E::KIND, filter);
            return Ok(existing);
        }
        debug!("No {} matching '{}', creating it", E::KIND, filter);
        create(self.service.as_ref(), build()).await
    }
}

async fn find_first<E: Entity>(service: &dyn SensorThingsPort, filter: &str) -> Result<Option<E>> {
    let Some(candidate) = service.query(E::KIND, filter).await?.into_iter().next() else {
        return Ok(None);
    };
    let entity: E = serde_json::from_value(candidate)
        .map_err(|e| InjectorError::RemoteService(format!("Unexpected {} representation: {}", E::KIND, e)))?;
    identity(&entity)?;
    Ok(Some(entity))
}

async fn create<E: Entity>(service: &dyn SensorThingsPort, mut entity: E) -> Result<E> {
    let body = serde_json::to_value(&entity)?;
    let id = service.create(E::KIND, &body).await?;
    entity.set_id(id);
    counter!("injector_entities_created_total", "kind" => E::KIND.collection()).increment(1);
    Ok(entity)
}

fn identity<E: Entity>(entity: &E) -> Result<EntityId> {
    entity
        .id()
        .cloned()
        .ok_or_else(|| InjectorError::RemoteService(format!("{} has no @iot.id: {:?}", E::KIND, entity)))
}

/// OData string literal, `'` doubled
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn name_filter(name: &str) -> String {
    format!("name eq {}", quote(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;
    use crate::infra::in_memory::{InMemorySensorThings, StoreCall};
    use crate::types::{AppUserId, ObservationType};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const FULL: FormatCapabilities = FormatCapabilities {
        feature_of_interest: true,
        unit_of_measurement: true,
    };

    fn record(app_user_id: &str, venue_id: i64) -> MotionRecord {
        MotionRecord {
            app_user_id: app_user_id.parse::<AppUserId>().unwrap(),
            venue_id,
            building: Some(1),
            floor: Some(0),
            lat: 50.633,
            lon: 3.024,
            device_date: Utc.timestamp_millis_opt(1512041732159).unwrap(),
            kind: ObservationType::Location,
        }
    }

    async fn resolver(store: &Arc<InMemorySensorThings>, capabilities: FormatCapabilities) -> EntityResolver {
        let defaults = EnvironmentDefaults::init_environment(&**store).await.unwrap();
        EntityResolver::new(store.clone(), defaults, SensorConfig::default(), capabilities)
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("Cam1"), "'Cam1'");
        assert_eq!(name_filter("Bob's"), "name eq 'Bob''s'");
    }

    #[tokio::test]
    async fn test_init_environment_creates_defaults_in_order() {
        let store = InMemorySensorThings::new();
        let defaults = EnvironmentDefaults::init_environment(&store).await.unwrap();

        let created: Vec<EntityKind> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Create { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            created,
            vec![EntityKind::ObservedProperties, EntityKind::Locations, EntityKind::Things]
        );
        assert_eq!(defaults.motion.name, "Motion");
        assert_eq!(defaults.thing.locations, vec![EntityRef::from(defaults.location.id.clone().unwrap())]);
    }

    #[tokio::test]
    async fn test_init_environment_links_existing_defaults() {
        let store = InMemorySensorThings::new();
        let location_id = store.insert(EntityKind::Locations, serde_json::to_value(Location::unknown()).unwrap());
        store.insert(EntityKind::ObservedProperties, json!({"name": "Motion", "description": "", "definition": ""}));

        let defaults = EnvironmentDefaults::init_environment(&store).await.unwrap();
        assert_eq!(defaults.location.id, Some(location_id));
        assert_eq!(store.create_count(), 1);
        assert_eq!(store.entities(EntityKind::Things).len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_sensor_creates_then_links() {
        let store = Arc::new(InMemorySensorThings::new());
        let resolver = resolver(&store, FULL).await;
        let before = store.create_count();

        let first = resolver.resolve_sensor(&record("Cam1_T1_2", 95)).await.unwrap();
        assert_eq!(first.name, "Cam1");
        assert_eq!(first.description, "Cam1");
        assert_eq!(first.encoding_type, "application/pdf");
        assert_eq!(first.metadata, "http://example.org/sensors/Cam1/jsonschema");
        assert_eq!(store.create_count(), before + 1);

        let second = resolver.resolve_sensor(&record("Cam1_T9_4", 95)).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(store.create_count(), before + 1);
    }

    #[tokio::test]
    async fn test_resolve_datastream_links_defaults() {
        let store = Arc::new(InMemorySensorThings::new());
        let resolver = resolver(&store, FULL).await;
        let sensor = resolver.resolve_sensor(&record("Cam1_T1_2", 95)).await.unwrap();

        let datastream = resolver.resolve_datastream(&sensor).await.unwrap();
        let sensor_id = sensor.id.clone().unwrap();
        assert_eq!(datastream.name, "Cam1");
        assert_eq!(
            datastream.description,
            format!("Human motions caught by Sensor 'Cam1' ('{}')", sensor_id)
        );
        assert_eq!(datastream.unit_of_measurement, Some(UnitOfMeasurement::unknown()));
        assert_eq!(datastream.sensor, Some(EntityRef::from(sensor_id)));
        assert_eq!(
            datastream.observed_property,
            Some(EntityRef::from(resolver.defaults().motion.id.clone().unwrap()))
        );
        assert_eq!(datastream.thing, Some(EntityRef::from(resolver.defaults().thing.id.clone().unwrap())));

        let stored = store.entities(EntityKind::Datastreams);
        assert_eq!(stored[0]["unitOfMeasurement"], json!({"name": null, "symbol": null, "definition": null}));

        let again = resolver.resolve_datastream(&sensor).await.unwrap();
        assert_eq!(again.id, datastream.id);
        assert_eq!(store.entities(EntityKind::Datastreams).len(), 1);
    }

    #[tokio::test]
    async fn test_datastream_without_unit_of_measurement() {
        let store = Arc::new(InMemorySensorThings::new());
        let resolver = resolver(
            &store,
            FormatCapabilities {
                feature_of_interest: false,
                unit_of_measurement: false,
            },
        )
        .await;
        let sensor = resolver.resolve_sensor(&record("Cam1_T1_2", 95)).await.unwrap();
        resolver.resolve_datastream(&sensor).await.unwrap();

        let stored = store.entities(EntityKind::Datastreams);
        assert!(stored[0].get("unitOfMeasurement").is_none());
    }

    #[tokio::test]
    async fn test_resolve_feature_of_interest_per_venue() {
        let store = Arc::new(InMemorySensorThings::new());
        let resolver = resolver(&store, FULL).await;

        let venue_95 = resolver.resolve_feature_of_interest(&record("Cam1_T1_2", 95)).await.unwrap();
        let venue_96 = resolver.resolve_feature_of_interest(&record("Cam1_T1_2", 96)).await.unwrap();
        let venue_95_again = resolver.resolve_feature_of_interest(&record("Cam2_T1_2", 95)).await.unwrap();

        assert_eq!(venue_95.name, "95");
        assert_eq!(venue_95.description, "Dummy place for venueId 95");
        assert_ne!(venue_95.id, venue_96.id);
        assert_eq!(venue_95.id, venue_95_again.id);
        assert_eq!(store.entities(EntityKind::FeaturesOfInterest).len(), 2);
        assert!(store.calls().contains(&StoreCall::Query {
            kind: EntityKind::FeaturesOfInterest,
            filter: "feature/properties/venueId eq 96".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_existing_entity_without_identity_is_rejected() {
        struct Anonymous;

        #[async_trait::async_trait]
        impl SensorThingsPort for Anonymous {
            fn endpoint(&self) -> &str {
                "memory://anonymous"
            }

            async fn query(&self, _: EntityKind, _: &str) -> Result<Vec<serde_json::Value>> {
                Ok(vec![json!({"name": "Motion"})])
            }

            async fn create(&self, kind: EntityKind, _: &serde_json::Value) -> Result<EntityId> {
                panic!("unexpected create of {}", kind)
            }

            async fn create_observations(&self, _: &crate::entities::DataArrayDocument) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
        }

        let err = EnvironmentDefaults::init_environment(&Anonymous).await.unwrap_err();
        assert!(err.is_remote());
    }
}
