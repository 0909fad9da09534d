use crate::app::ports::SensorThingsPort;
use crate::entities::{DataArrayDocument, EntityId, EntityKind};
use crate::error::{InjectorError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const IN_MEMORY_ENDPOINT: &str = "memory://sensorthings";

/// Calls received by the in-memory store, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Query { kind: EntityKind, filter: String },
    Create { kind: EntityKind, id: EntityId },
    CreateObservations { datastreams: usize, observations: usize },
}

#[derive(Default)]
struct State {
    entities: HashMap<EntityKind, Vec<Value>>,
    documents: Vec<DataArrayDocument>,
    calls: Vec<StoreCall>,
    next_id: i64,
    next_observation_id: i64,
}

/// In-memory SensorThings store for development/testing
#[derive(Default)]
pub struct InMemorySensorThings {
    state: Mutex<State>,
}

impl InMemorySensorThings {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an entity directly, without recording a call
    pub fn insert(&self, kind: EntityKind, mut entity: Value) -> EntityId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = EntityId::Number(state.next_id);
        if let Value::Object(map) = &mut entity {
            map.insert("@iot.id".to_string(), serde_json::json!(state.next_id));
        }
        state.entities.entry(kind).or_default().push(entity);
        id
    }

    pub fn entities(&self, kind: EntityKind) -> Vec<Value> {
        self.lock().entities.get(&kind).cloned().unwrap_or_default()
    }

    pub fn documents(&self) -> Vec<DataArrayDocument> {
        self.lock().documents.clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn create_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::Create { .. }))
            .count()
    }
}

#[async_trait]
impl SensorThingsPort for InMemorySensorThings {
    fn endpoint(&self) -> &str {
        IN_MEMORY_ENDPOINT
    }

    async fn query(&self, kind: EntityKind, filter: &str) -> Result<Vec<Value>> {
        let predicates = parse_filter(filter)?;
        let mut state = self.lock();
        state.calls.push(StoreCall::Query {
            kind,
            filter: filter.to_string(),
        });
        let matches: Vec<Value> = state
            .entities
            .get(&kind)
            .map(|entities| {
                entities
                    .iter()
                    .filter(|entity| predicates.iter().all(|p| p.matches(entity)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!("In-memory query on {} with '{}' matched {}", kind, filter, matches.len());
        Ok(matches)
    }

    async fn create(&self, kind: EntityKind, entity: &Value) -> Result<EntityId> {
        if !entity.is_object() {
            return Err(InjectorError::RemoteService(format!("Cannot create {} from a non-object body", kind)));
        }
        let id = self.insert(kind, entity.clone());
        self.lock().calls.push(StoreCall::Create { kind, id: id.clone() });
        debug!("Created {} with id {}", kind, id);
        Ok(id)
    }

    async fn create_observations(&self, document: &DataArrayDocument) -> Result<Vec<String>> {
        let mut state = self.lock();
        state.calls.push(StoreCall::CreateObservations {
            datastreams: document.len(),
            observations: document.observation_count(),
        });
        let mut links = Vec::with_capacity(document.observation_count());
        for _ in 0..document.observation_count() {
            state.next_observation_id += 1;
            links.push(format!("{}/Observations({})", IN_MEMORY_ENDPOINT, state.next_observation_id));
        }
        state.documents.push(document.clone());
        Ok(links)
    }
}

/// `<path> eq <literal>` term of a filter expression
#[derive(Debug, Clone, PartialEq)]
struct Predicate {
    path: Vec<String>,
    literal: Literal,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Text(String),
    Number(f64),
}

impl Predicate {
    fn matches(&self, entity: &Value) -> bool {
        let mut current = entity;
        for segment in &self.path {
            let key = if segment == "id" { "@iot.id" } else { segment.as_str() };
            match current.get(key) {
                Some(next) => current = next,
                None => return false,
            }
        }
        match (&self.literal, current) {
            (Literal::Text(expected), Value::String(actual)) => expected == actual,
            (Literal::Text(expected), Value::Number(actual)) => expected == &actual.to_string(),
            (Literal::Number(expected), Value::Number(actual)) => actual.as_f64() == Some(*expected),
            (Literal::Number(expected), Value::String(actual)) => actual.parse::<f64>().ok() == Some(*expected),
            _ => false,
        }
    }
}

/// Parses the conjunctions of equalities the resolver emits,
/// e.g. `Sensor/id eq '1' and ObservedProperty/id eq '2'`.
fn parse_filter(filter: &str) -> Result<Vec<Predicate>> {
    let unsupported = || InjectorError::RemoteService(format!("Unsupported filter expression: {}", filter));
    let mut predicates = Vec::new();
    let mut rest = filter.trim();
    loop {
        let (path, after_path) = rest.split_once(" eq ").ok_or_else(unsupported)?;
        let path: Vec<String> = path.trim().split('/').map(str::to_string).collect();
        if path.iter().any(|s| s.is_empty()) {
            return Err(unsupported());
        }
        let after_path = after_path.trim_start();
        let (literal, remaining) = if let Some(quoted) = after_path.strip_prefix('\'') {
            let (text, remaining) = read_quoted(quoted).ok_or_else(unsupported)?;
            (Literal::Text(text), remaining)
        } else {
            let end = after_path.find(char::is_whitespace).unwrap_or(after_path.len());
            let number = after_path[..end].parse::<f64>().map_err(|_| unsupported())?;
            (Literal::Number(number), &after_path[end..])
        };
        predicates.push(Predicate { path, literal });

        let remaining = remaining.trim_start();
        if remaining.is_empty() {
            return Ok(predicates);
        }
        rest = remaining.strip_prefix("and ").ok_or_else(unsupported)?;
    }
}

/// Reads an OData string body (after the opening quote), unescaping `''`
fn read_quoted(input: &str) -> Option<(String, &str)> {
    let mut text = String::new();
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if let Some((_, '\'')) = chars.peek() {
                chars.next();
                text.push('\'');
                continue;
            }
            return Some((text, &input[i + 1..]));
        }
        text.push(c);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_compound_filter() {
        let predicates = parse_filter("Sensor/id eq '1' and ObservedProperty/id eq '2'").unwrap();
        assert_eq!(predicates.len(), 2);
        assert_eq!(predicates[0].path, vec!["Sensor", "id"]);
        assert_eq!(predicates[1].literal, Literal::Text("2".to_string()));
    }

    #[test]
    fn test_parse_filter_with_quotes_and_keywords_in_literal() {
        let predicates = parse_filter("name eq 'Bob''s cam and more'").unwrap();
        assert_eq!(predicates.len(), 1);
        assert_eq!(predicates[0].literal, Literal::Text("Bob's cam and more".to_string()));
    }

    #[test]
    fn test_parse_filter_rejects_garbage() {
        assert!(parse_filter("name ne 'x'").is_err());
        assert!(parse_filter("name eq 'unterminated").is_err());
        assert!(parse_filter("name eq 'x' or name eq 'y'").is_err());
    }

    #[tokio::test]
    async fn test_query_matches_nested_paths() {
        let store = InMemorySensorThings::new();
        store.insert(
            EntityKind::FeaturesOfInterest,
            json!({"name": "95", "feature": {"properties": {"venueId": 95}}}),
        );
        store.insert(
            EntityKind::FeaturesOfInterest,
            json!({"name": "96", "feature": {"properties": {"venueId": 96}}}),
        );

        let found = store
            .query(EntityKind::FeaturesOfInterest, "feature/properties/venueId eq 96")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["name"], "96");
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = InMemorySensorThings::new();
        let first = store.create(EntityKind::Sensors, &json!({"name": "Cam1"})).await.unwrap();
        let second = store.create(EntityKind::Sensors, &json!({"name": "Cam2"})).await.unwrap();
        assert_eq!(first, EntityId::Number(1));
        assert_eq!(second, EntityId::Number(2));

        let found = store.query(EntityKind::Sensors, "name eq 'Cam2'").await.unwrap();
        assert_eq!(found[0]["@iot.id"], 2);
        assert_eq!(store.create_count(), 2);
        assert!(store.query(EntityKind::Things, "name eq 'Cam2'").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quoted_id_matches_numeric_reference() {
        let store = InMemorySensorThings::new();
        store.insert(
            EntityKind::Datastreams,
            json!({"name": "Cam1", "Sensor": {"@iot.id": 4}, "ObservedProperty": {"@iot.id": 1}}),
        );
        let found = store
            .query(EntityKind::Datastreams, "Sensor/id eq '4' and ObservedProperty/id eq '1'")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        let none = store
            .query(EntityKind::Datastreams, "Sensor/id eq '4' and ObservedProperty/id eq '2'")
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
