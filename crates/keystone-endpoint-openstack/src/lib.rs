// # Keystone Identity Connector
//
// This crate connects the keystone endpoint reconciler to a Keystone
// identity API (v3).
//
// ## Implementation Status
//
// - ✅ Password authentication, project-scoped token per connect
// - ✅ Auth URL taken from the `KeystoneApi` status (internal, then public)
// - ✅ Admin password read from a mounted secret file
// - ✅ Missing password or URL reported as "not yet available", not as failure
// - ✅ HTTP timeout configured (30 seconds by default)
// - ✅ Specific error handling for HTTP status codes (401/403, 404, 409, 429, 5xx)
// - ❌ NO retry logic (intentionally omitted - owned by the controller)
// - ❌ NO token caching (a token lives for one reconcile pass)
// - ❌ NO background tasks (intentionally omitted - violates shutdown determinism)
//
// ## Security Requirements
//
// - Password and token NEVER appear in logs or Debug output
// - The password is read from a file only, never from configuration values
//
// ## API Reference
//
// - Authenticate: POST `/v3/auth/tokens` (token in `X-Subject-Token`)
// - Endpoint registry: see [`client`]

pub mod client;

use async_trait::async_trait;
use keystone_endpoint_core::config::IdentityConfig;
use keystone_endpoint_core::registry::BackendRegistry;
use keystone_endpoint_core::resource::KeystoneApi;
use keystone_endpoint_core::traits::{Connection, IdentityConnector, IdentityConnectorFactory};
use keystone_endpoint_core::{Error, Result};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use client::KeystoneAdminClient;

/// Header carrying a newly issued token
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Interfaces tried, in order, when looking for the identity API URL
const AUTH_INTERFACES: [&str; 2] = ["internal", "public"];

/// Connector issuing admin clients for Keystone deployments
///
/// # Security
///
/// The connector only holds the path of the password file. The password is
/// read on every connect and dropped once the token is issued.
#[derive(Debug)]
pub struct KeystoneConnector {
    password_file: PathBuf,
    credentials_retry: Duration,
    client: reqwest::Client,
}

impl KeystoneConnector {
    /// Create a new Keystone connector
    ///
    /// # Parameters
    ///
    /// - `password_file`: File holding the admin password
    /// - `request_timeout`: Timeout of every HTTP request
    /// - `credentials_retry`: Suggested delay while the password or URL is missing
    pub fn new(
        password_file: impl Into<PathBuf>,
        request_timeout: Duration,
        credentials_retry: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            password_file: password_file.into(),
            credentials_retry,
            client,
        })
    }

    fn not_yet(&self, reason: impl Into<String>) -> Connection {
        Connection::NotYetAvailable {
            retry_after: self.credentials_retry,
            reason: reason.into(),
        }
    }

    /// The admin password, or `None` while the secret is not mounted
    async fn read_password(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.password_file).await {
            Ok(content) => {
                let password = content.trim_end_matches(['\r', '\n']);
                Ok((!password.is_empty()).then(|| password.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Issue a project-scoped token
    ///
    /// ```http
    /// POST /v3/auth/tokens
    /// {"auth": {"identity": {"methods": ["password"], ...}, "scope": {"project": ...}}}
    /// ```
    async fn authenticate(&self, base_url: &str, api: &KeystoneApi, password: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v3/auth/tokens", base_url))
            .json(&auth_body(api, password))
            .send()
            .await
            .map_err(|e| Error::provider(client::BACKEND, format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(client::status_error("authenticate", status, &error_text));
        }

        response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::provider(client::BACKEND, "Token response carries no X-Subject-Token header")
            })
    }
}

/// Identity API root for a published URL: no trailing slash, no `/v3`
fn base_url(published: &str) -> &str {
    let trimmed = published.trim_end_matches('/');
    trimmed.strip_suffix("/v3").unwrap_or(trimmed)
}

/// Password authentication request, scoped to the admin project
fn auth_body(api: &KeystoneApi, password: &str) -> Value {
    let spec = &api.spec;
    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": spec.admin_user,
                        "domain": { "name": spec.admin_domain },
                        "password": password,
                    }
                }
            },
            "scope": {
                "project": {
                    "name": spec.admin_project,
                    "domain": { "name": spec.admin_domain },
                }
            }
        }
    })
}

#[async_trait]
impl IdentityConnector for KeystoneConnector {
    async fn connect(&self, api: &KeystoneApi) -> Result<Connection> {
        let Some(published) = AUTH_INTERFACES
            .iter()
            .find_map(|interface| api.endpoint(interface))
        else {
            return Ok(self.not_yet("KeystoneAPI has not published an API URL"));
        };

        let Some(password) = self.read_password().await? else {
            return Ok(self.not_yet(format!(
                "admin password not available at {}",
                self.password_file.display()
            )));
        };

        let base_url = base_url(published);
        tracing::debug!(url = %base_url, user = %api.spec.admin_user, "Authenticating against Keystone");
        let token = self.authenticate(base_url, api, &password).await?;

        Ok(Connection::Ready(Arc::new(KeystoneAdminClient::new(
            self.client.clone(),
            base_url,
            token,
            api.spec.region.clone(),
        ))))
    }

    fn connector_name(&self) -> &'static str {
        client::BACKEND
    }
}

/// Factory for creating Keystone connectors
pub struct KeystoneConnectorFactory;

impl IdentityConnectorFactory for KeystoneConnectorFactory {
    fn create(&self, config: &IdentityConfig) -> Result<Arc<dyn IdentityConnector>> {
        match config {
            IdentityConfig::Keystone {
                password_file,
                request_timeout_secs,
                credentials_retry_secs,
            } => {
                config.validate()?;
                Ok(Arc::new(KeystoneConnector::new(
                    password_file,
                    Duration::from_secs(*request_timeout_secs),
                    Duration::from_secs(*credentials_retry_secs),
                )?))
            }
            _ => Err(Error::config("Invalid config for Keystone connector")),
        }
    }
}

/// Register the Keystone connector with a registry
///
/// # Example
///
/// ```rust
/// use keystone_endpoint_core::BackendRegistry;
///
/// let registry = BackendRegistry::with_builtin_stores();
/// keystone_endpoint_openstack::register(&registry);
/// assert!(registry.has_connector("keystone"));
/// ```
pub fn register(registry: &BackendRegistry) {
    registry.register_connector("keystone", Box::new(KeystoneConnectorFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn connector(password_file: impl Into<PathBuf>) -> KeystoneConnector {
        KeystoneConnector::new(password_file, Duration::from_secs(30), Duration::from_secs(10))
            .unwrap()
    }

    fn api_with_url(url: &str) -> KeystoneApi {
        let mut api = KeystoneApi::new("openstack", "keystone");
        api.status
            .api_endpoints
            .insert("internal".to_string(), url.to_string());
        api
    }

    #[test]
    fn test_factory_creation() {
        let factory = KeystoneConnectorFactory;
        let connector = factory.create(&IdentityConfig::keystone("/run/secrets/admin-password"));
        assert!(connector.is_ok());
        assert_eq!(connector.unwrap().connector_name(), "keystone");
    }

    #[test]
    fn test_factory_rejects_empty_password_file() {
        let factory = KeystoneConnectorFactory;
        assert!(factory.create(&IdentityConfig::keystone("")).is_err());
    }

    #[test]
    fn test_factory_rejects_custom_config() {
        let factory = KeystoneConnectorFactory;
        let config = IdentityConfig::Custom {
            factory: "keystone".to_string(),
            config: json!({}),
        };
        assert!(factory.create(&config).is_err());
    }

    #[test]
    fn test_register() {
        let registry = BackendRegistry::new();
        register(&registry);
        assert!(registry.has_connector("keystone"));
    }

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(base_url("http://keystone:5000"), "http://keystone:5000");
        assert_eq!(base_url("http://keystone:5000/"), "http://keystone:5000");
        assert_eq!(base_url("http://keystone:5000/v3"), "http://keystone:5000");
        assert_eq!(base_url("http://keystone:5000/v3/"), "http://keystone:5000");
        assert_eq!(base_url("https://cloud/identity"), "https://cloud/identity");
    }

    #[test]
    fn test_auth_body_shape() {
        let api = KeystoneApi::new("openstack", "keystone");
        let body = auth_body(&api, "s3cret");

        assert_eq!(body["auth"]["identity"]["methods"], json!(["password"]));
        let user = &body["auth"]["identity"]["password"]["user"];
        assert_eq!(user["name"], "admin");
        assert_eq!(user["domain"]["name"], "Default");
        assert_eq!(user["password"], "s3cret");
        assert_eq!(body["auth"]["scope"]["project"]["name"], "admin");
    }

    #[tokio::test]
    async fn test_missing_url_is_not_yet_available() {
        let dir = tempfile::tempdir().unwrap();
        let connector = connector(dir.path().join("password"));

        let connection = connector
            .connect(&KeystoneApi::new("openstack", "keystone"))
            .await
            .unwrap();

        assert!(matches!(connection, Connection::NotYetAvailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_password_file_is_not_yet_available() {
        let dir = tempfile::tempdir().unwrap();
        let connector = connector(dir.path().join("password"));

        let connection = connector
            .connect(&api_with_url("http://keystone:5000"))
            .await
            .unwrap();

        match connection {
            Connection::NotYetAvailable { retry_after, reason } => {
                assert_eq!(retry_after, Duration::from_secs(10));
                assert!(reason.contains("admin password"));
            }
            other => panic!("expected NotYetAvailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_password_is_read_without_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cret").unwrap();

        let password = connector(file.path()).read_password().await.unwrap();
        assert_eq!(password.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_empty_password_file_is_not_yet_available() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let password = connector(file.path()).read_password().await.unwrap();
        assert!(password.is_none());
    }

    #[test]
    fn test_password_not_exposed_in_debug() {
        let debug_str = format!("{:?}", connector("/run/secrets/admin-password"));
        assert!(debug_str.contains("KeystoneConnector"));
        assert!(debug_str.contains("admin-password"));
    }
}
