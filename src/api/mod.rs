//! Authenticated access to the Data Collective REST API.
//!
//! [`ApiClient`] owns the configuration and a [`Transport`]. Every call is a
//! single blocking request; nothing here retries. Status codes the platform
//! uses for known conditions are turned into specific error kinds.

mod transport;

pub use transport::{Body, HttpRequest, HttpResponse, Method, Transport, UreqTransport};

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::DataCollectiveError;

/// Client for the Data Collective API.
pub struct ApiClient {
    config: ClientConfig,
    transport: Box<dyn Transport>,
}

impl ApiClient {
    /// Create a client that talks HTTP through `ureq`.
    pub fn new(config: ClientConfig) -> Result<Self, DataCollectiveError> {
        if config.api_key.trim().is_empty() {
            return Err(DataCollectiveError::Config(
                "API key must be a non-empty string".to_string(),
            ));
        }
        let transport = UreqTransport::new(&config);
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client on top of a custom transport.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config,
            transport: Box::new(transport),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Absolute URL for the API path made of `segments`.
    pub fn endpoint(&self, segments: &[&str]) -> Result<String, DataCollectiveError> {
        self.config.endpoint(segments)
    }

    /// Send a request with the bearer token and map error statuses.
    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse, DataCollectiveError> {
        let request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        self.dispatch(request, Endpoint::Api)
    }

    /// Send a request to a presigned storage URL.
    ///
    /// No bearer token is attached: the URL carries its own credentials and
    /// storage providers reject extra authorization.
    pub fn send_presigned(&self, request: HttpRequest) -> Result<HttpResponse, DataCollectiveError> {
        self.dispatch(request, Endpoint::Storage)
    }

    /// POST a JSON payload and decode the JSON response.
    pub fn post_json<T>(
        &self,
        segments: &[&str],
        payload: serde_json::Value,
    ) -> Result<T, DataCollectiveError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        self.send(HttpRequest::post(url).json(payload))?
            .json(&segments.join("/"))
    }

    fn dispatch(
        &self,
        request: HttpRequest,
        endpoint: Endpoint,
    ) -> Result<HttpResponse, DataCollectiveError> {
        let method = request.method;
        let url = request.url.clone();
        tracing::debug!(method = method.as_str(), url = %url, "sending request");

        let response = self.transport.execute(request)?;
        tracing::debug!(status = response.status, url = %url, "received response");

        check_status(response.status, &url, endpoint)?;
        Ok(response)
    }
}

/// Which side answered a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// The Data Collective API.
    Api,
    /// A presigned object-storage URL.
    Storage,
}

/// Map a response status to the error kind callers handle.
///
/// Messages name the URL without its query string, which for presigned
/// URLs carries the signature.
pub fn check_status(status: u16, url: &str, endpoint: Endpoint) -> Result<(), DataCollectiveError> {
    let location = url.split('?').next().unwrap_or(url);
    match (status, endpoint) {
        (200..=299, _) => Ok(()),
        (404, Endpoint::Api) => Err(DataCollectiveError::NotFound(format!(
            "{location} (check the dataset or submission id)"
        ))),
        (404, Endpoint::Storage) => Err(DataCollectiveError::NotFound(format!(
            "storage object {location}"
        ))),
        (403, Endpoint::Api) => Err(DataCollectiveError::PermissionDenied(format!(
            "Access denied to {location}. Private dataset requires organization membership"
        ))),
        (403, Endpoint::Storage) => Err(DataCollectiveError::PermissionDenied(format!(
            "Storage rejected {location}; the presigned URL may have expired"
        ))),
        (429, _) => Err(DataCollectiveError::RateLimited),
        _ => Err(DataCollectiveError::Upstream {
            status,
            url: location.to_string(),
        }),
    }
}

/// Reject ids that are empty after trimming.
pub(crate) fn require_non_empty(value: &str, field: &str) -> Result<(), DataCollectiveError> {
    if value.trim().is_empty() {
        return Err(DataCollectiveError::InvalidArgument(format!(
            "`{field}` must be a non-empty string"
        )));
    }
    Ok(())
}

/// Organization that owns a dataset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Dataset metadata as returned by `GET /datasets/{id}`.
///
/// Fields the client relies on are typed; everything else is kept in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDetails {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub organization: Option<Organization>,
    #[serde(default)]
    pub dataset_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Fetch metadata for one dataset.
pub fn get_dataset_details(
    client: &ApiClient,
    dataset_id: &str,
) -> Result<DatasetDetails, DataCollectiveError> {
    if dataset_id.trim().is_empty() {
        return Err(DataCollectiveError::InvalidArgument(
            "dataset_id is required".to_string(),
        ));
    }
    let dataset_id = dataset_id.trim();
    let url = client.endpoint(&["datasets", dataset_id])?;
    client
        .send(HttpRequest::get(url))?
        .json(&format!("datasets/{dataset_id}"))
}
