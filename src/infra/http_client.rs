use crate::app::ports::SensorThingsPort;
use crate::config::HttpConfig;
use crate::entities::{DataArrayDocument, EntityId, EntityKind};
use crate::error::{InjectorError, Result};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const CREATE_OBSERVATIONS_PATH: &str = "CreateObservations";

/// One page of a collection query
#[derive(Debug, Deserialize)]
struct EntityPage {
    #[serde(default)]
    value: Vec<serde_json::Value>,
}

/// `reqwest`-backed SensorThings API client
pub struct SensorThingsClient {
    endpoint: String,
    client: Client,
}

impl SensorThingsClient {
    pub fn new(endpoint: &str, config: &HttpConfig) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| InjectorError::Config(format!("Endpoint URI '{}' is not valid: {}", endpoint, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            endpoint: url.as_str().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.endpoint, kind.collection())
    }
}

async fn ensure_success(method: &str, url: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(InjectorError::RemoteService(format!(
        "{} {} -> {}: {}",
        method,
        url,
        status.as_u16(),
        body.trim()
    )))
}

/// Extracts the identity from a self link such as `.../Sensors(42)` or `.../Things('a''b')`
pub fn parse_self_link_id(link: &str) -> Option<EntityId> {
    let link = link.trim().trim_end_matches('/');
    let inner = link.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let raw = &inner[open + 1..];
    if let Some(quoted) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Some(EntityId::Text(quoted.replace("''", "'")));
    }
    raw.parse::<i64>().ok().map(EntityId::Number)
}

#[async_trait]
impl SensorThingsPort for SensorThingsClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, kind: EntityKind, filter: &str) -> Result<Vec<serde_json::Value>> {
        let url = self.collection_url(kind);
        debug!("GET {} $filter={}", url, filter);
        let resp = self.client.get(&url).query(&[("$filter", filter)]).send().await?;
        let resp = ensure_success("GET", &url, resp).await?;
        let page: EntityPage = resp.json().await?;
        Ok(page.value)
    }

    async fn create(&self, kind: EntityKind, entity: &serde_json::Value) -> Result<EntityId> {
        let url = self.collection_url(kind);
        debug!("POST {}", url);
        let resp = self.client.post(&url).json(entity).send().await?;
        let resp = ensure_success("POST", &url, resp).await?;

        let from_header = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_self_link_id);
        if let Some(id) = from_header {
            return Ok(id);
        }

        // Some servers answer with the created entity instead of a Location header
        let body = resp.text().await?;
        serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("@iot.id").cloned())
            .and_then(|id| serde_json::from_value::<EntityId>(id).ok())
            .ok_or_else(|| {
                InjectorError::RemoteService(format!("POST {} returned no identity for the created {}", url, kind))
            })
    }

    async fn create_observations(&self, document: &DataArrayDocument) -> Result<Vec<String>> {
        let url = format!("{}/{}", self.endpoint, CREATE_OBSERVATIONS_PATH);
        debug!("POST {} datastreams={}", url, document.len());
        let resp = self.client.post(&url).json(document).send().await?;
        let resp = ensure_success("POST", &url, resp).await?;
        let links: Vec<String> = resp.json().await?;
        let rejected = links.iter().filter(|l| l.as_str() == "error").count();
        if rejected > 0 {
            warn!("{} of {} observations were rejected by {}", rejected, links.len(), self.endpoint);
        }
        Ok(links)
    }
}
