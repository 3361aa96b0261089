//! FHIR Gateway
//!
//! One async operation per REST verb/resource pair the workflows need.
//! Every operation is a single request/response: no retry, no caching.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::fhir::{Bundle, ResourceType, FHIR_JSON};
use crate::models::SiteKind;

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(reqwest::Error),

    #[error("FHIR server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unexpected response shape: {0}")]
    Malformed(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
}

// Request URLs carry search values such as RPPS numbers
impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Network(e.without_url())
    }
}

impl GatewayError {
    /// HTTP status carried by the failure, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::NotFound(_) => Some(404),
            GatewayError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// REST operations against the FHIR server
#[async_trait]
pub trait FhirGateway: Send + Sync {
    /// `GET Practitioner?_count={count}`
    async fn search_practitioners(&self, count: usize) -> GatewayResult<Bundle>;

    /// `GET {url}` for a server-issued continuation URL
    async fn fetch_page(&self, url: &str) -> GatewayResult<Bundle>;

    /// `GET Practitioner?identifier={system}|{value}`
    async fn search_practitioners_by_identifier(
        &self,
        system: &str,
        value: &str,
    ) -> GatewayResult<Bundle>;

    /// `GET Practitioner/{id}`
    async fn read_practitioner(&self, id: &str) -> GatewayResult<Value>;

    /// `GET PractitionerRole?practitioner=Practitioner/{id}`
    async fn search_roles_by_practitioner(&self, practitioner_id: &str) -> GatewayResult<Bundle>;

    /// `GET Location` or `GET Organization`
    async fn list_sites(&self, kind: SiteKind) -> GatewayResult<Bundle>;

    /// `GET ValueSet/{id}`
    async fn read_value_set(&self, id: &str) -> GatewayResult<Value>;

    /// `GET Appointment?actor=Practitioner/{id}`
    async fn search_appointments_by_practitioner(
        &self,
        practitioner_id: &str,
    ) -> GatewayResult<Bundle>;

    /// `GET Schedule?actor=Practitioner/{id}`
    async fn search_schedules_by_practitioner(&self, practitioner_id: &str)
        -> GatewayResult<Bundle>;

    /// `GET Patient/{id}`
    async fn read_patient(&self, id: &str) -> GatewayResult<Value>;

    /// `POST {type}`; returns the stored resource
    async fn create(&self, resource_type: ResourceType, body: &Value) -> GatewayResult<Value>;

    /// `PUT {type}/{id}`; full replace
    async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        body: &Value,
    ) -> GatewayResult<Value>;

    /// `DELETE {type}/{id}`
    async fn delete(&self, resource_type: ResourceType, id: &str) -> GatewayResult<()>;

    /// Whether the server answers its capability statement
    async fn check_connectivity(&self) -> bool;
}

/// Gateway backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFhirGateway {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpFhirGateway {
    /// Create a gateway for the server configured in `config`
    pub fn new(config: &Config) -> GatewayResult<Self> {
        let cleaned_url = config.fhir_base_url.trim_end_matches('/');
        info!("Creating HttpFhirGateway with base_url: {}", cleaned_url);

        let parsed = url::Url::parse(cleaned_url)
            .map_err(|e| GatewayError::UrlError(format!("Invalid URL '{}': {}", cleaned_url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(GatewayError::UrlError(format!(
                "URL must use http or https scheme, got: {}",
                parsed.scheme()
            )));
        }

        // Bodies go through `.body()`, never `.json()`, which would set application/json
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
        headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.request_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: cleaned_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn type_url(&self, resource_type: ResourceType) -> String {
        format!("{}/{}", self.base_url, resource_type)
    }

    fn instance_url(&self, resource_type: ResourceType, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, resource_type, id)
    }

    async fn get_bundle(&self, url: &str, query: &[(&str, String)]) -> GatewayResult<Bundle> {
        debug!("GET {} {:?}", url, query_names(query));
        let response = self.http_client.get(url).query(query).send().await?;
        let body: Value = handle_response(response, url).await?;
        serde_json::from_value(body).map_err(|e| GatewayError::Malformed(format!("bundle: {}", e)))
    }

    async fn get_resource(&self, url: &str) -> GatewayResult<Value> {
        debug!("GET {}", url);
        let response = self.http_client.get(url).send().await?;
        handle_response(response, url).await
    }
}

/// Parameter names of a search; values stay out of the logs
fn query_names<'a>(query: &[(&'a str, String)]) -> Vec<&'a str> {
    query.iter().map(|(name, _)| *name).collect()
}

/// Convert an HTTP response into the resource body or a typed failure
async fn handle_response(response: reqwest::Response, url: &str) -> GatewayResult<Value> {
    match response.status() {
        status if status.is_success() => {
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_slice(&bytes)?)
        }
        reqwest::StatusCode::NOT_FOUND => Err(GatewayError::NotFound(url.to_string())),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl FhirGateway for HttpFhirGateway {
    async fn search_practitioners(&self, count: usize) -> GatewayResult<Bundle> {
        self.get_bundle(
            &self.type_url(ResourceType::Practitioner),
            &[("_count", count.to_string())],
        )
        .await
    }

    async fn fetch_page(&self, url: &str) -> GatewayResult<Bundle> {
        self.get_bundle(url, &[]).await
    }

    async fn search_practitioners_by_identifier(
        &self,
        system: &str,
        value: &str,
    ) -> GatewayResult<Bundle> {
        self.get_bundle(
            &self.type_url(ResourceType::Practitioner),
            &[("identifier", format!("{}|{}", system, value))],
        )
        .await
    }

    async fn read_practitioner(&self, id: &str) -> GatewayResult<Value> {
        self.get_resource(&self.instance_url(ResourceType::Practitioner, id)).await
    }

    async fn search_roles_by_practitioner(&self, practitioner_id: &str) -> GatewayResult<Bundle> {
        self.get_bundle(
            &self.type_url(ResourceType::PractitionerRole),
            &[("practitioner", ResourceType::Practitioner.reference(practitioner_id))],
        )
        .await
    }

    async fn list_sites(&self, kind: SiteKind) -> GatewayResult<Bundle> {
        let resource_type = match kind {
            SiteKind::Location => ResourceType::Location,
            SiteKind::Organization => ResourceType::Organization,
        };
        self.get_bundle(&self.type_url(resource_type), &[]).await
    }

    async fn read_value_set(&self, id: &str) -> GatewayResult<Value> {
        self.get_resource(&self.instance_url(ResourceType::ValueSet, id)).await
    }

    async fn search_appointments_by_practitioner(
        &self,
        practitioner_id: &str,
    ) -> GatewayResult<Bundle> {
        self.get_bundle(
            &self.type_url(ResourceType::Appointment),
            &[("actor", ResourceType::Practitioner.reference(practitioner_id))],
        )
        .await
    }

    async fn search_schedules_by_practitioner(
        &self,
        practitioner_id: &str,
    ) -> GatewayResult<Bundle> {
        self.get_bundle(
            &self.type_url(ResourceType::Schedule),
            &[("actor", ResourceType::Practitioner.reference(practitioner_id))],
        )
        .await
    }

    async fn read_patient(&self, id: &str) -> GatewayResult<Value> {
        self.get_resource(&self.instance_url(ResourceType::Patient, id)).await
    }

    async fn create(&self, resource_type: ResourceType, body: &Value) -> GatewayResult<Value> {
        let url = self.type_url(resource_type);
        debug!("POST {}", url);
        let response = self.http_client.post(&url).body(serde_json::to_vec(body)?).send().await?;
        handle_response(response, &url).await
    }

    async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        body: &Value,
    ) -> GatewayResult<Value> {
        let url = self.instance_url(resource_type, id);
        debug!("PUT {}", url);
        let response = self.http_client.put(&url).body(serde_json::to_vec(body)?).send().await?;
        handle_response(response, &url).await
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> GatewayResult<()> {
        let url = self.instance_url(resource_type, id);
        debug!("DELETE {}", url);
        let response = self.http_client.delete(&url).send().await?;
        handle_response(response, &url).await.map(|_| ())
    }

    async fn check_connectivity(&self) -> bool {
        let url = format!("{}/metadata", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
