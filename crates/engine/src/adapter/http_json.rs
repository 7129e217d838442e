use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratewatch_types::{FetchError, Instrument, SourceId};
use ratewatch_util::{scalar_text, value_at_path};
use serde_json::Value;
use tracing::debug;

use super::{Fetched, SourceAdapter, required};
use crate::config::{ConfigError, SourceConfig};
use crate::egress::{RouteClients, RouteSelector};
use crate::fetch::{RetryPolicy, fetch_with_retry};

/// Endpoint and field-path specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpJsonDescriptor {
    pub url: String,
    pub field_path: String,
    pub timeout: Duration,
}

impl HttpJsonDescriptor {
    pub fn from_config(source: &SourceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            url: required(source, &source.url, "url")?.to_string(),
            field_path: required(source, &source.field_path, "fieldPath")?.to_string(),
            timeout: source.timeout(),
        })
    }
}

/// Reads a value from a JSON endpoint.
pub struct HttpJsonAdapter {
    source_id: SourceId,
    descriptor: HttpJsonDescriptor,
    routes: Arc<dyn RouteSelector>,
    clients: Arc<RouteClients>,
    retry: RetryPolicy,
}

impl HttpJsonAdapter {
    pub fn new(
        source_id: SourceId,
        descriptor: HttpJsonDescriptor,
        routes: Arc<dyn RouteSelector>,
        clients: Arc<RouteClients>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source_id,
            descriptor,
            routes,
            clients,
            retry,
        }
    }

    async fn attempt(&self) -> Result<String, FetchError> {
        let route = self.routes.select();
        let client = self.clients.client_for(route.as_ref())?;

        debug!(source = %self.source_id, url = %self.descriptor.url, egress = ?route.as_ref().map(ToString::to_string), "Requesting JSON");
        let response = client
            .get(&self.descriptor.url)
            .timeout(self.descriptor.timeout)
            .send()
            .await
            .map_err(|error| FetchError::network(format!("GET {}: {error}", self.descriptor.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(format!("GET {}: HTTP {status}", self.descriptor.url)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|error| FetchError::network(format!("decoding {}: {error}", self.descriptor.url)))?;
        extract_field(&body, &self.descriptor.field_path)
    }
}

/// Raw text of the scalar at `field_path`.
pub(crate) fn extract_field(body: &Value, field_path: &str) -> Result<String, FetchError> {
    let field = value_at_path(body, field_path).ok_or_else(|| FetchError::element_not_found(field_path))?;
    scalar_text(field).ok_or_else(|| FetchError::parse(field.to_string()))
}

#[async_trait]
impl SourceAdapter for HttpJsonAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
        let value = fetch_with_retry(&self.retry, self.source_id.as_str(), |_| self.attempt()).await?;
        Ok(Fetched::value(value))
    }
}
