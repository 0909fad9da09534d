//! SensorThings API entities written and read by the injector.
//!
//! Only the fields the injector sets or needs back are modelled. Unknown
//! attributes returned by the server (`@iot.selfLink`, navigation links...)
//! are ignored on deserialization.

use crate::constants::{
    GEOJSON_ENCODING_TYPE, MOTION_OBSERVED_PROPERTY_DEFINITION, MOTION_OBSERVED_PROPERTY_DESCRIPTION,
    MOTION_OBSERVED_PROPERTY_NAME, OM_OBSERVATION_TYPE, UNKNOWN_LOCATION_DESCRIPTION,
    UNKNOWN_LOCATION_NAME, UNKNOWN_THING_DESCRIPTION, UNKNOWN_THING_NAME, VENUE_ID_PROPERTY,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned identity. SensorThings servers use either integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Number(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

/// Entity collections of the SensorThings data model used here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Sensors,
    Datastreams,
    FeaturesOfInterest,
    Locations,
    Things,
    ObservedProperties,
}

impl EntityKind {
    /// Path segment of the collection under the service root
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Sensors => "Sensors",
            EntityKind::Datastreams => "Datastreams",
            EntityKind::FeaturesOfInterest => "FeaturesOfInterest",
            EntityKind::Locations => "Locations",
            EntityKind::Things => "Things",
            EntityKind::ObservedProperties => "ObservedProperties",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync {
    const KIND: EntityKind;

    fn id(&self) -> Option<&EntityId>;

    fn set_id(&mut self, id: EntityId);
}

macro_rules! impl_entity {
    ($ty:ty, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> Option<&EntityId> {
                self.id.as_ref()
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = Some(id);
            }
        }
    };
}

/// Reference to an already existing entity, `{"@iot.id": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "@iot.id")]
    pub id: EntityId,
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        Self { id }
    }
}

/// GeoJSON point geometry, coordinates as `[longitude, latitude]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: vec![lon, lat],
        }
    }
}

/// GeoJSON feature holding a point and free-form properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Point,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl PointFeature {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry: Point::new(lon, lat),
            properties: Map::new(),
        }
    }

    /// Sets a property; `None` leaves the feature untouched
    pub fn with_property(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(value) = value {
            self.properties.insert(key.to_string(), value.into());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    #[serde(rename = "@iot.id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub encoding_type: String,
    #[serde(default)]
    pub metadata: String,
}

impl_entity!(Sensor, EntityKind::Sensors);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedProperty {
    #[serde(rename = "@iot.id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub definition: String,
}

impl_entity!(ObservedProperty, EntityKind::ObservedProperties);

impl ObservedProperty {
    pub fn motion() -> Self {
        Self {
            id: None,
            name: MOTION_OBSERVED_PROPERTY_NAME.to_string(),
            description: MOTION_OBSERVED_PROPERTY_DESCRIPTION.to_string(),
            definition: MOTION_OBSERVED_PROPERTY_DEFINITION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(rename = "@iot.id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub encoding_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PointFeature>,
}

impl_entity!(Location, EntityKind::Locations);

impl Location {
    pub fn unknown() -> Self {
        Self {
            id: None,
            name: UNKNOWN_LOCATION_NAME.to_string(),
            description: UNKNOWN_LOCATION_DESCRIPTION.to_string(),
            encoding_type: GEOJSON_ENCODING_TYPE.to_string(),
            location: Some(PointFeature::new(0.0, 0.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    #[serde(rename = "@iot.id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "Locations", default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<EntityRef>,
}

impl_entity!(Thing, EntityKind::Things);

impl Thing {
    /// The placeholder Thing, attached to `location` when it has an identity
    pub fn unknown(location: &Location) -> Self {
        Self {
            id: None,
            name: UNKNOWN_THING_NAME.to_string(),
            description: UNKNOWN_THING_DESCRIPTION.to_string(),
            locations: location.id.clone().map(EntityRef::from).into_iter().collect(),
        }
    }
}

/// Unit of measurement; all fields are serialized, `null` included
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitOfMeasurement {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub definition: Option<String>,
}

impl UnitOfMeasurement {
    pub fn unknown() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datastream {
    #[serde(rename = "@iot.id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_observation_type")]
    pub observation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<UnitOfMeasurement>,
    #[serde(rename = "Sensor", default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<EntityRef>,
    #[serde(rename = "ObservedProperty", default, skip_serializing_if = "Option::is_none")]
    pub observed_property: Option<EntityRef>,
    #[serde(rename = "Thing", default, skip_serializing_if = "Option::is_none")]
    pub thing: Option<EntityRef>,
}

impl_entity!(Datastream, EntityKind::Datastreams);

fn default_observation_type() -> String {
    OM_OBSERVATION_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOfInterest {
    #[serde(rename = "@iot.id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub encoding_type: String,
    pub feature: PointFeature,
}

impl_entity!(FeatureOfInterest, EntityKind::FeaturesOfInterest);

impl FeatureOfInterest {
    /// Placeholder feature standing for a venue whose position is unknown
    pub fn for_venue(venue_id: i64) -> Self {
        Self {
            id: None,
            name: venue_id.to_string(),
            description: format!("Dummy place for venueId {}", venue_id),
            encoding_type: GEOJSON_ENCODING_TYPE.to_string(),
            feature: PointFeature::new(0.0, 0.0).with_property(VENUE_ID_PROPERTY, Some(venue_id)),
        }
    }
}

/// Column names of a `dataArray` tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataArrayComponent {
    #[serde(rename = "phenomenonTime")]
    PhenomenonTime,
    #[serde(rename = "result")]
    Result,
    #[serde(rename = "FeatureOfInterest/id")]
    FeatureOfInterest,
}

/// Observations of one Datastream, in dataArray form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArrayValue {
    #[serde(rename = "Datastream")]
    pub datastream: EntityRef,
    pub components: Vec<DataArrayComponent>,
    #[serde(rename = "dataArray@iot.count")]
    pub count: usize,
    #[serde(rename = "dataArray")]
    pub data_array: Vec<Vec<Value>>,
}

impl DataArrayValue {
    pub fn new(datastream: EntityId, components: Vec<DataArrayComponent>) -> Self {
        Self {
            datastream: EntityRef::from(datastream),
            components,
            count: 0,
            data_array: Vec::new(),
        }
    }

    /// Appends one tuple; its values must follow `components` order
    pub fn push(&mut self, tuple: Vec<Value>) {
        self.data_array.push(tuple);
        self.count = self.data_array.len();
    }
}

/// Body of a `CreateObservations` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataArrayDocument {
    pub values: Vec<DataArrayValue>,
}

impl DataArrayDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: DataArrayValue) {
        self.values.push(value);
    }

    /// Concatenates the value-groups of both documents, `self` first
    pub fn merge(mut self, other: DataArrayDocument) -> Self {
        self.values.extend(other.values);
        self
    }

    /// Number of Datastreams covered
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn observation_count(&self) -> usize {
        self.values.iter().map(|v| v.data_array.len()).sum()
    }
}
