use std::io::Read;

use serde::de::DeserializeOwned;
use ureq::http::{Response, StatusCode};

use crate::config::ClientConfig;
use crate::error::DataCollectiveError;

/// HTTP method used by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// Request payload.
#[derive(Clone, Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// A single outgoing request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = Body::Bytes(bytes);
        self
    }

    /// Value of the first header with this name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    body: Box<dyn Read>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Box<dyn Read>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of the first header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Streaming access to the body.
    pub fn into_reader(self) -> Box<dyn Read> {
        self.body
    }

    /// Read the whole body as JSON.
    pub fn json<T: DeserializeOwned>(self, endpoint: &str) -> Result<T, DataCollectiveError> {
        serde_json::from_reader(self.body).map_err(|source| {
            DataCollectiveError::protocol(endpoint, format!("invalid JSON body: {source}"))
        })
    }
}

/// Blocking, single-shot HTTP execution.
///
/// Implementations return every status code as a response; mapping statuses
/// to errors is the caller's job.
pub trait Transport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, DataCollectiveError>;
}

/// [`Transport`] backed by a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout))
            .timeout_recv_response(Some(config.read_timeout))
            .http_status_as_error(false)
            .build();
        let agent: ureq::Agent = agent_config.into();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, DataCollectiveError> {
        let url = request.url.clone();
        let transport_error = |source: ureq::Error| DataCollectiveError::Transport {
            url: url.clone(),
            message: source.to_string(),
        };

        let response = match request.method {
            Method::Get => {
                let mut builder = self.agent.get(request.url.as_str());
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                for (name, value) in &request.query {
                    builder = builder.query(name.as_str(), value.as_str());
                }
                builder.call().map_err(transport_error)?
            }
            Method::Post | Method::Put => {
                let mut builder = if request.method == Method::Post {
                    self.agent.post(request.url.as_str())
                } else {
                    self.agent.put(request.url.as_str())
                };
                for (name, value) in &request.headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                for (name, value) in &request.query {
                    builder = builder.query(name.as_str(), value.as_str());
                }
                match &request.body {
                    Body::Empty => builder.send_empty(),
                    Body::Json(value) => builder.send_json(value),
                    Body::Bytes(bytes) => builder.send(bytes.as_slice()),
                }
                .map_err(transport_error)?
            }
        };

        Ok(into_http_response(response))
    }
}

fn into_http_response(response: Response<ureq::Body>) -> HttpResponse {
    let status: StatusCode = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let body = response.into_body().into_reader();
    HttpResponse::new(status.as_u16(), headers, Box::new(body))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(
            200,
            vec![("etag".to_string(), "\"abc\"".to_string())],
            Box::new(Cursor::new(Vec::new())),
        );
        assert_eq!(response.header("ETag"), Some("\"abc\""));
        assert_eq!(response.header("Range"), None);

        let request = HttpRequest::get("https://x.test").header("Range", "bytes=5-");
        assert_eq!(request.header_value("range"), Some("bytes=5-"));
    }

    #[test]
    fn json_body_errors_are_protocol_mismatches() {
        let response = HttpResponse::new(200, Vec::new(), Box::new(Cursor::new(b"not json".to_vec())));
        let err = response
            .json::<serde_json::Value>("datasets/x")
            .expect_err("should fail");
        assert!(matches!(err, DataCollectiveError::ProtocolMismatch { .. }));
    }
}
