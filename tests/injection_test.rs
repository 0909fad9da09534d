use anyhow::Result;
use async_trait::async_trait;
use sensor_injector::app::ports::SensorThingsPort;
use sensor_injector::config::PhenomenonTimeZone;
use sensor_injector::entities::{DataArrayComponent, DataArrayDocument, EntityId, EntityKind};
use sensor_injector::error::InjectorError;
use sensor_injector::infra::in_memory::{InMemorySensorThings, StoreCall};
use sensor_injector::pipeline::{InjectionSettings, RunState};
use sensor_injector::registry::FormatRegistry;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

const SINGLE_RECORD: &str = r#"[{"appuserid": "Cam1_T1_2", "venueid": 95, "building": 1, "floor": 0,
    "lat": 50.633, "lon": 3.024, "devicedate": 1512041732159, "type": "LOCATION"}]"#;

fn settings() -> InjectionSettings {
    InjectionSettings {
        time_zone: PhenomenonTimeZone::utc(),
        ..InjectionSettings::default()
    }
}

fn input_file(content: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    Ok(file)
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/resources").join(name)
}

async fn inject(format: &str, file: impl Into<PathBuf>, service: Arc<dyn SensorThingsPort>) -> Result<FormatRegistry> {
    let mut registry = FormatRegistry::new(settings())?;
    registry.handle(format, file, service)?;
    assert!(registry.await_termination(Duration::from_secs(10)).await);
    Ok(registry)
}

fn created_kinds(store: &InMemorySensorThings) -> Vec<EntityKind> {
    store
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            StoreCall::Create { kind, .. } => Some(kind),
            _ => None,
        })
        .collect()
}

/// Delays every call, to keep a run in flight
struct SlowStore {
    inner: Arc<InMemorySensorThings>,
    delay: Duration,
}

#[async_trait]
impl SensorThingsPort for SlowStore {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn query(&self, kind: EntityKind, filter: &str) -> sensor_injector::error::Result<Vec<Value>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(kind, filter).await
    }

    async fn create(&self, kind: EntityKind, entity: &Value) -> sensor_injector::error::Result<EntityId> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(kind, entity).await
    }

    async fn create_observations(&self, document: &DataArrayDocument) -> sensor_injector::error::Result<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        self.inner.create_observations(document).await
    }
}

/// Fails every Datastream creation, delegating everything else
struct FailingDatastreamStore {
    inner: Arc<InMemorySensorThings>,
}

#[async_trait]
impl SensorThingsPort for FailingDatastreamStore {
    fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }

    async fn query(&self, kind: EntityKind, filter: &str) -> sensor_injector::error::Result<Vec<Value>> {
        self.inner.query(kind, filter).await
    }

    async fn create(&self, kind: EntityKind, entity: &Value) -> sensor_injector::error::Result<EntityId> {
        if kind == EntityKind::Datastreams {
            return Err(InjectorError::RemoteService("POST /Datastreams -> 500: boom".to_string()));
        }
        self.inner.create(kind, entity).await
    }

    async fn create_observations(&self, document: &DataArrayDocument) -> sensor_injector::error::Result<Vec<String>> {
        self.inner.create_observations(document).await
    }
}

#[tokio::test]
async fn test_single_record_against_empty_store() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    let file = input_file(SINGLE_RECORD)?;
    let registry = inject("flat-motion", file.path(), store.clone()).await?;

    assert_eq!(
        created_kinds(&store),
        vec![
            EntityKind::ObservedProperties,
            EntityKind::Locations,
            EntityKind::Things,
            EntityKind::Sensors,
            EntityKind::Datastreams,
            EntityKind::FeaturesOfInterest,
        ]
    );
    assert_eq!(store.entities(EntityKind::Sensors)[0]["name"], "Cam1");
    assert_eq!(
        store.entities(EntityKind::FeaturesOfInterest)[0]["feature"]["properties"]["venueId"],
        95
    );

    let documents = store.documents();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].len(), 1);
    assert_eq!(documents[0].observation_count(), 1);
    assert_eq!(
        documents[0].values[0].data_array[0][0],
        json!("2017-11-30T11:35:32.159Z")
    );

    let reports = registry.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, RunState::Done);
    Ok(())
}

#[tokio::test]
async fn test_fixture_groups_by_sensor() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    inject("flat-motion", fixture("flat_motion.json"), store.clone()).await?;

    let document = &store.documents()[0];
    assert_eq!(document.len(), 2);
    assert_eq!(document.observation_count(), 4);
    // Cam1 first, then Cam2, each keeping input order
    let subjects: Vec<Vec<Value>> = document
        .values
        .iter()
        .map(|value| value.data_array.iter().map(|tuple| tuple[1]["subject"]["id"].clone()).collect())
        .collect();
    assert_eq!(
        subjects,
        vec![vec![json!("T1-2"), json!("T4-7")], vec![json!("T1-3"), json!("T1-3")]]
    );
    // Two venues, two features of interest
    assert_eq!(store.entities(EntityKind::FeaturesOfInterest).len(), 2);
    let third = &document.values[0].data_array[1];
    assert!(third[1]["location"].get("properties").is_none());
    Ok(())
}

#[tokio::test]
async fn test_insiteo_has_no_feature_of_interest() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    inject("insiteo", fixture("flat_motion.json"), store.clone()).await?;

    assert!(store.entities(EntityKind::FeaturesOfInterest).is_empty());
    assert!(store
        .entities(EntityKind::Datastreams)
        .iter()
        .all(|datastream| datastream.get("unitOfMeasurement").is_none()));
    let document = &store.documents()[0];
    for value in &document.values {
        assert_eq!(value.components, vec![DataArrayComponent::PhenomenonTime, DataArrayComponent::Result]);
    }
    Ok(())
}

#[tokio::test]
async fn test_second_run_creates_nothing_new() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    let mut registry = FormatRegistry::new(settings())?;
    registry.handle("flat-motion", fixture("flat_motion.json"), store.clone())?;
    registry.handle("flat-motion", fixture("flat_motion.json"), store.clone())?;
    assert!(registry.await_termination(Duration::from_secs(10)).await);

    // 3 defaults, 2 sensors, 2 datastreams, 2 features of interest
    assert_eq!(store.create_count(), 9);
    let documents = store.documents();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0], documents[1]);
    Ok(())
}

#[tokio::test]
async fn test_malformed_input_stops_after_environment_setup() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    let file = input_file(r#"[{"appuserid": "Sensor_Sequence_wrong", "venueid": 95, "lat": 1.0, "lon": 2.0,
        "devicedate": 1, "type": "LOCATION"}]"#)?;
    let registry = inject("flat-motion", file.path(), store.clone()).await?;

    assert_eq!(
        created_kinds(&store),
        vec![EntityKind::ObservedProperties, EntityKind::Locations, EntityKind::Things]
    );
    assert!(store.documents().is_empty());
    let report = &registry.reports()[0];
    assert_eq!(report.state, RunState::Failed);
    assert!(report.error.as_deref().unwrap_or_default().contains("Sensor_Sequence_wrong"));
    Ok(())
}

#[tokio::test]
async fn test_short_timeout_does_not_cancel_the_run() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    let slow = Arc::new(SlowStore {
        inner: store.clone(),
        delay: Duration::from_millis(50),
    });
    let file = input_file(SINGLE_RECORD)?;
    let mut registry = FormatRegistry::new(settings())?;
    registry.handle("flat-motion", file.path(), slow)?;

    assert!(!registry.await_termination(Duration::from_millis(10)).await);
    assert!(store.documents().is_empty());
    assert!(matches!(
        registry.handle("flat-motion", file.path(), store.clone()),
        Err(InjectorError::QueueClosed)
    ));

    assert!(registry.await_termination(Duration::from_secs(10)).await);
    assert_eq!(store.documents().len(), 1);
    assert_eq!(registry.reports()[0].state, RunState::Done);
    Ok(())
}

#[tokio::test]
async fn test_remote_failure_during_resolution_aborts_the_batch() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    let failing = Arc::new(FailingDatastreamStore { inner: store.clone() });
    let registry = inject("flat-motion", fixture("flat_motion.json"), failing).await?;

    let report = &registry.reports()[0];
    assert_eq!(report.state, RunState::Failed);
    assert!(report.error.as_deref().unwrap_or_default().contains("boom"));
    assert_eq!(report.observations, 0);
    let bulk_calls = store
        .calls()
        .into_iter()
        .filter(|call| matches!(call, StoreCall::CreateObservations { .. }))
        .count();
    assert_eq!(bulk_calls, 0);
    assert!(store.documents().is_empty());
    // Created before the failure, left in place
    assert_eq!(store.entities(EntityKind::Sensors).len(), 1);
    assert!(store.entities(EntityKind::Datastreams).is_empty());
    Ok(())
}

#[test]
fn test_run_outlives_the_caller_runtime() -> Result<()> {
    let store = Arc::new(InMemorySensorThings::new());
    let slow = Arc::new(SlowStore {
        inner: store.clone(),
        delay: Duration::from_millis(50),
    });
    let file = input_file(SINGLE_RECORD)?;
    let mut registry = FormatRegistry::new(settings())?;
    registry.handle("flat-motion", file.path(), slow)?;

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    assert!(!runtime.block_on(registry.await_termination(Duration::from_millis(10))));
    drop(runtime);

    registry.join();
    assert_eq!(store.documents().len(), 1);
    let reports = registry.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, RunState::Done);
    Ok(())
}
