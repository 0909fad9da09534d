use crate::entities::{DataArrayDocument, EntityId, EntityKind};
use crate::error::Result;
use async_trait::async_trait;

/// Narrow view of a SensorThings API server used by the injection pipeline.
///
/// Implementations are stateless from the caller's point of view and are
/// shared across runs as `Arc<dyn SensorThingsPort>`.
#[async_trait]
pub trait SensorThingsPort: Send + Sync {
    /// Service root the port talks to, for logging
    fn endpoint(&self) -> &str;

    /// Entities of `kind` matching an OData `$filter` expression
    async fn query(&self, kind: EntityKind, filter: &str) -> Result<Vec<serde_json::Value>>;

    /// Creates one entity and returns the identity assigned by the server
    async fn create(&self, kind: EntityKind, entity: &serde_json::Value) -> Result<EntityId>;

    /// Bulk-creates every observation of the document.
    /// Returns one self link (or `"error"`) per observation.
    async fn create_observations(&self, document: &DataArrayDocument) -> Result<Vec<String>>;
}
