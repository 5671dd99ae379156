//! Outbound calls to the remote FHIR API.
//!
//! One request per call, carrying the bearer token. Any HTTP status counts as
//! a reply; only transport failures are errors.

use crate::resource::ResourceKind;
use anyhow::{Context, Result};
use axum::body::Bytes;
use reqwest::{header, Method};
use std::time::Duration;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FHIR_JSON: &str = "application/fhir+json";
pub const CONTENT_TYPE_JSON_PATCH: &str = "application/json-patch+json";

/// A single request to the upstream API.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub kind: ResourceKind,
    /// `None` targets the type endpoint (create).
    pub id: Option<String>,
    pub content_type: Option<&'static str>,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    pub fn create(kind: ResourceKind, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            kind,
            id: None,
            content_type: Some(CONTENT_TYPE_JSON),
            body: Some(body),
        }
    }

    pub fn update(kind: ResourceKind, id: &str, body: Bytes) -> Self {
        Self {
            method: Method::PUT,
            kind,
            id: Some(id.to_string()),
            content_type: Some(CONTENT_TYPE_FHIR_JSON),
            body: Some(body),
        }
    }

    pub fn patch(kind: ResourceKind, id: &str, body: Bytes) -> Self {
        Self {
            method: Method::PATCH,
            kind,
            id: Some(id.to_string()),
            content_type: Some(CONTENT_TYPE_JSON_PATCH),
            body: Some(body),
        }
    }

    pub fn read(kind: ResourceKind, id: &str) -> Self {
        Self {
            method: Method::GET,
            kind,
            id: Some(id.to_string()),
            content_type: None,
            body: None,
        }
    }
}

/// Status, content type and raw body as returned by the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, kind: ResourceKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, kind.fhir_type(), id),
            None => format!("{}/{}", self.base_url, kind.fhir_type()),
        }
    }

    /// Sends the request. Errors only when no HTTP response was obtained.
    pub async fn send(&self, request: UpstreamRequest, bearer: &str) -> Result<UpstreamReply> {
        let url = self.url_for(request.kind, request.id.as_deref());

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .bearer_auth(bearer);
        if let Some(content_type) = request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::debug!(method = %request.method, url = %url, "Forwarding request upstream");

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", request.method, url))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .context("Failed to read upstream response body")?;

        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(base: &str) -> UpstreamClient {
        UpstreamClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_for() {
        let c = client("https://fhir.example/fhir-r4/v1/");
        assert_eq!(
            c.url_for(ResourceKind::Location, None),
            "https://fhir.example/fhir-r4/v1/Location"
        );
        assert_eq!(
            c.url_for(ResourceKind::Patient, Some("P001")),
            "https://fhir.example/fhir-r4/v1/Patient/P001"
        );
    }

    #[tokio::test]
    async fn test_update_sends_fhir_json_with_bearer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/Location/loc-1")
            .match_header("authorization", "Bearer tok")
            .match_header("content-type", CONTENT_TYPE_FHIR_JSON)
            .match_body(Matcher::Json(serde_json::json!({"id": "loc-1"})))
            .with_status(200)
            .with_header("content-type", CONTENT_TYPE_FHIR_JSON)
            .with_body(r#"{"id":"loc-1"}"#)
            .create_async()
            .await;

        let reply = client(&server.url())
            .send(
                UpstreamRequest::update(
                    ResourceKind::Location,
                    "loc-1",
                    Bytes::from_static(br#"{"id":"loc-1"}"#),
                ),
                "tok",
            )
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type.as_deref(), Some(CONTENT_TYPE_FHIR_JSON));
        assert_eq!(&reply.body[..], br#"{"id":"loc-1"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_a_reply() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/Patient/missing")
            .with_status(404)
            .with_body(r#"{"resourceType":"OperationOutcome"}"#)
            .create_async()
            .await;

        let reply = client(&server.url())
            .send(UpstreamRequest::read(ResourceKind::Patient, "missing"), "tok")
            .await
            .unwrap();

        assert_eq!(reply.status, 404);
    }

    #[tokio::test]
    async fn test_transport_failure_is_error() {
        let result = client("http://127.0.0.1:9")
            .send(UpstreamRequest::read(ResourceKind::Patient, "p"), "tok")
            .await;

        assert!(result.is_err());
    }
}
