/// Format names accepted on the command line
pub const FLAT_MOTION_FORMAT: &str = "flat-motion";
pub const INSITEO_FORMAT: &str = "insiteo";

// Well-known entities shared by every injection
pub const UNKNOWN_LOCATION_NAME: &str = "Unknown";
pub const UNKNOWN_LOCATION_DESCRIPTION: &str = "Represents an unknown place, when a location cannot be given";
pub const UNKNOWN_THING_NAME: &str = "Unknown";
pub const UNKNOWN_THING_DESCRIPTION: &str = "Fake Thing used when no Thing can be given for a Datastream creation";
pub const MOTION_OBSERVED_PROPERTY_NAME: &str = "Motion";
pub const MOTION_OBSERVED_PROPERTY_DESCRIPTION: &str = "Human motion inside a venue";
pub const MOTION_OBSERVED_PROPERTY_DEFINITION: &str = "http://example.org/observedProperties/motion";

pub const GEOJSON_ENCODING_TYPE: &str = "application/vnd.geo+json";
pub const OM_OBSERVATION_TYPE: &str = "http://www.opengis.net/def/observationType/OGC-OM/2.0/OM_Observation";

// Sensor defaults, overridable through the `[sensor]` config section
pub const DEFAULT_SENSOR_ENCODING_TYPE: &str = "application/pdf";
pub const DEFAULT_SENSOR_METADATA_TEMPLATE: &str = "http://example.org/sensors/{sensor}/jsonschema";

/// Feature properties written into motion results and features of interest
pub const BUILDING_PROPERTY: &str = "building";
pub const FLOOR_PROPERTY: &str = "floor";
pub const VENUE_ID_PROPERTY: &str = "venueId";
