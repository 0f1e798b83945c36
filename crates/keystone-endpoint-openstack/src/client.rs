//! Keystone v3 endpoint registry client
//!
//! ## API Reference
//!
//! - Identity API v3: https://docs.openstack.org/api-ref/identity/v3/
//! - List endpoints: GET `/v3/endpoints?service_id=...&interface=...`
//! - Create endpoint: POST `/v3/endpoints`
//! - Update endpoint: PATCH `/v3/endpoints/:endpoint_id`
//! - Delete endpoint: DELETE `/v3/endpoints/:endpoint_id`

use async_trait::async_trait;
use keystone_endpoint_core::availability::Availability;
use keystone_endpoint_core::traits::{EndpointAdmin, EndpointRequest, RemoteEndpoint};
use keystone_endpoint_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

pub(crate) const BACKEND: &str = "keystone";

/// Header carrying the token on every request
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Admin-scoped client for one Keystone deployment
///
/// # Trust Level: Untrusted
///
/// One HTTP request per call (deletes: one list, then one request per
/// match). Retries, backoff and scheduling belong to the controller.
///
/// # Security
///
/// The Debug implementation does NOT expose the token.
pub struct KeystoneAdminClient {
    /// Identity API root, without the `/v3` suffix
    base_url: String,

    /// Project-scoped token
    /// ⚠️ NEVER log this value
    token: String,

    /// Region new endpoints are registered in; empty for none
    region: String,

    client: reqwest::Client,
}

impl std::fmt::Debug for KeystoneAdminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeystoneAdminClient")
            .field("base_url", &self.base_url)
            .field("token", &"<REDACTED>")
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EndpointList {
    endpoints: Vec<WireEndpoint>,
}

#[derive(Debug, Deserialize)]
struct EndpointEnvelope {
    endpoint: WireEndpoint,
}

#[derive(Debug, Deserialize)]
struct WireEndpoint {
    id: String,
    #[serde(default)]
    name: Option<String>,
    service_id: String,
    interface: String,
    url: String,
}

impl WireEndpoint {
    fn into_remote(self) -> Result<RemoteEndpoint> {
        Ok(RemoteEndpoint {
            availability: self.interface.parse().map_err(|_| {
                Error::provider(
                    BACKEND,
                    format!("endpoint {} has unknown interface {}", self.id, self.interface),
                )
            })?,
            id: self.id,
            name: self.name.unwrap_or_default(),
            service_id: self.service_id,
            url: self.url,
        })
    }
}

impl KeystoneAdminClient {
    pub(crate) fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            region: region.into(),
            client,
        }
    }

    fn endpoints_url(&self) -> String {
        format!("{}/v3/endpoints", self.base_url)
    }

    fn endpoint_url(&self, id: &str) -> String {
        format!("{}/v3/endpoints/{}", self.base_url, id)
    }

    /// Body of a create request
    fn create_body(&self, endpoint: &EndpointRequest) -> Value {
        let mut body = json!({
            "endpoint": {
                "name": endpoint.name,
                "interface": endpoint.availability.as_str(),
                "service_id": endpoint.service_id,
                "url": endpoint.url,
                "enabled": true,
            }
        });
        if !self.region.is_empty() {
            body["endpoint"]["region_id"] = json!(self.region);
        }
        body
    }

    /// Body of an update request
    fn update_body(endpoint: &EndpointRequest) -> Value {
        json!({
            "endpoint": {
                "interface": endpoint.availability.as_str(),
                "service_id": endpoint.service_id,
                "url": endpoint.url,
            }
        })
    }

    /// Send a request with the token attached, mapping non-2xx responses
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<reqwest::Response> {
        let response = request
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| Error::provider(BACKEND, format!("HTTP request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        Err(status_error(operation, status, &error_text))
    }

    async fn endpoint_from(response: reqwest::Response) -> Result<String> {
        let envelope: EndpointEnvelope = response
            .json()
            .await
            .map_err(|e| Error::provider(BACKEND, format!("Failed to parse response: {}", e)))?;
        Ok(envelope.endpoint.id)
    }
}

/// Endpoints of `service_id` with the given interface, converted
///
/// Older deployments ignore unknown list filters, so results are filtered
/// again here.
fn matching(
    endpoints: Vec<WireEndpoint>,
    service_id: &str,
    availability: Availability,
) -> Result<Vec<RemoteEndpoint>> {
    endpoints
        .into_iter()
        .filter(|e| e.service_id == service_id && e.interface == availability.as_str())
        .map(WireEndpoint::into_remote)
        .collect()
}

/// Outcome of one delete request: `true` if deleted, `false` if already gone
fn deleted(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Map a non-success status to an error
pub(crate) fn status_error(operation: &str, status: StatusCode, body: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "{}: invalid token or insufficient permissions. Status: {}",
            operation, status
        )),
        404 => Error::not_found(format!("{}: {}", operation, body)),
        409 => Error::conflict(format!("{}: {} - {}", operation, status, body)),
        429 => Error::rate_limited(format!(
            "{}: rate limit exceeded. Status: {}",
            operation, status
        )),
        500..=599 => Error::provider(
            BACKEND,
            format!("{}: server error (transient): {} - {}", operation, status, body),
        ),
        _ => Error::provider(BACKEND, format!("{}: {} - {}", operation, status, body)),
    }
}

#[async_trait]
impl EndpointAdmin for KeystoneAdminClient {
    /// ```http
    /// GET /v3/endpoints?service_id=:service_id&interface=public
    /// X-Auth-Token: <token>
    /// ```
    async fn list_endpoints(
        &self,
        service_id: &str,
        availability: Availability,
    ) -> Result<Vec<RemoteEndpoint>> {
        tracing::debug!(service_id, interface = %availability, "Listing endpoints");

        let request = self.client.get(self.endpoints_url()).query(&[
            ("service_id", service_id),
            ("interface", availability.as_str()),
        ]);
        let list: EndpointList = self
            .send(request, "list endpoints")
            .await?
            .json()
            .await
            .map_err(|e| Error::provider(BACKEND, format!("Failed to parse response: {}", e)))?;

        matching(list.endpoints, service_id, availability)
    }

    /// ```http
    /// POST /v3/endpoints
    /// {"endpoint": {"interface": "public", "service_id": "...", "url": "...", "region_id": "..."}}
    /// ```
    async fn create_endpoint(&self, endpoint: &EndpointRequest) -> Result<String> {
        let request = self
            .client
            .post(self.endpoints_url())
            .json(&self.create_body(endpoint));
        let id = Self::endpoint_from(self.send(request, "create endpoint").await?).await?;

        tracing::info!(
            interface = %endpoint.availability,
            url = %endpoint.url,
            id = %id,
            "Keystone endpoint created"
        );
        Ok(id)
    }

    /// ```http
    /// PATCH /v3/endpoints/:endpoint_id
    /// {"endpoint": {"interface": "public", "service_id": "...", "url": "..."}}
    /// ```
    async fn update_endpoint(&self, endpoint: &EndpointRequest, id: &str) -> Result<String> {
        let request = self
            .client
            .patch(self.endpoint_url(id))
            .json(&Self::update_body(endpoint));
        let id = Self::endpoint_from(self.send(request, "update endpoint").await?).await?;

        tracing::info!(
            interface = %endpoint.availability,
            url = %endpoint.url,
            id = %id,
            "Keystone endpoint updated"
        );
        Ok(id)
    }

    /// Deletes every endpoint registered for the service and interface.
    /// Endpoints already gone count as deleted.
    async fn delete_endpoint(&self, endpoint: &EndpointRequest) -> Result<()> {
        let registered = self
            .list_endpoints(&endpoint.service_id, endpoint.availability)
            .await?;

        for existing in registered {
            let request = self.client.delete(self.endpoint_url(&existing.id));
            let result = self.send(request, "delete endpoint").await.map(|_| ());
            if deleted(result)? {
                tracing::info!(
                    interface = %endpoint.availability,
                    id = %existing.id,
                    "Keystone endpoint deleted"
                );
            } else {
                tracing::debug!(id = %existing.id, "Keystone endpoint already deleted");
            }
        }

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
