//! Keystone resource kinds
//!
//! - [`KeystoneEndpoint`]: the declared endpoint set of one service; reconciled here
//! - [`KeystoneApi`]: the identity API deployment; read for readiness and the auth URL
//! - [`KeystoneService`]: the service registration; read for readiness and its service ID

use super::{ObjectMeta, Resource, ResourceKind};
use crate::condition::{self, Conditions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity API deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoneApi {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: KeystoneApiSpec,
    #[serde(default)]
    pub status: KeystoneApiStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneApiSpec {
    #[serde(default = "default_admin")]
    pub admin_user: String,
    #[serde(default = "default_admin")]
    pub admin_project: String,
    #[serde(default = "default_domain")]
    pub admin_domain: String,
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for KeystoneApiSpec {
    fn default() -> Self {
        Self {
            admin_user: default_admin(),
            admin_project: default_admin(),
            admin_domain: default_domain(),
            region: default_region(),
        }
    }
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_domain() -> String {
    "Default".to_string()
}

fn default_region() -> String {
    "regionOne".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneApiStatus {
    #[serde(default)]
    pub conditions: Conditions,
    /// Interface name → URL of the identity API itself
    #[serde(default, rename = "apiEndpoints")]
    pub api_endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub observed_generation: i64,
}

impl KeystoneApi {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: KeystoneApiSpec::default(),
            status: KeystoneApiStatus::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.conditions.is_true(condition::READY)
    }

    /// URL of the identity API for the given interface
    pub fn endpoint(&self, interface: &str) -> Option<&str> {
        self.status
            .api_endpoints
            .get(interface)
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }
}

impl Resource for KeystoneApi {
    const KIND: ResourceKind = ResourceKind::KeystoneApi;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Service registration in the identity service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoneService {
    pub metadata: ObjectMeta,
    pub spec: KeystoneServiceSpec,
    #[serde(default)]
    pub status: KeystoneServiceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneServiceSpec {
    pub service_name: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub service_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneServiceStatus {
    #[serde(default, rename = "serviceID")]
    pub service_id: String,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub observed_generation: i64,
}

impl KeystoneService {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: KeystoneServiceSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: KeystoneServiceStatus::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.conditions.is_true(condition::READY)
    }
}

impl Resource for KeystoneService {
    const KIND: ResourceKind = ResourceKind::KeystoneService;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Declared endpoint set of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoneEndpoint {
    pub metadata: ObjectMeta,
    pub spec: KeystoneEndpointSpec,
    #[serde(default)]
    pub status: KeystoneEndpointStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneEndpointSpec {
    /// Name of the service registration the endpoints belong to
    pub service_name: String,
    /// Endpoint-type label → desired URL
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl KeystoneEndpointSpec {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoints: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint_type: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.insert(endpoint_type.into(), url.into());
        self
    }
}

/// One registered endpoint, mirrored into status for visibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub interface: String,
    pub url: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeystoneEndpointStatus {
    #[serde(default, rename = "serviceID")]
    pub service_id: String,
    /// Endpoint type → remote endpoint ID of what this reconciler registered
    #[serde(default, rename = "endpointIDs")]
    pub endpoint_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Conditions,
}

impl KeystoneEndpointStatus {
    /// Record a registered endpoint, updating the entry for the interface in place
    pub fn record_endpoint(&mut self, interface: &str, url: &str, id: &str) {
        self.endpoint_ids.insert(interface.to_string(), id.to_string());

        match self.endpoints.iter_mut().find(|e| e.interface == interface) {
            Some(entry) => {
                entry.url = url.to_string();
                entry.id = id.to_string();
            }
            None => self.endpoints.push(Endpoint {
                interface: interface.to_string(),
                url: url.to_string(),
                id: id.to_string(),
            }),
        }
    }

    /// Drop every trace of a retired interface
    pub fn forget_endpoint(&mut self, interface: &str) {
        self.endpoint_ids.remove(interface);
        self.endpoints.retain(|e| e.interface != interface);
    }
}

impl KeystoneEndpoint {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: KeystoneEndpointSpec,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: KeystoneEndpointStatus::default(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.conditions.is_true(condition::READY)
    }
}

impl Resource for KeystoneEndpoint {
    const KIND: ResourceKind = ResourceKind::KeystoneEndpoint;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_endpoint_updates_in_place() {
        let mut status = KeystoneEndpointStatus::default();
        status.record_endpoint("public", "http://a", "id1");
        status.record_endpoint("public", "http://b", "id2");

        assert_eq!(status.endpoints.len(), 1);
        assert_eq!(status.endpoints[0].url, "http://b");
        assert_eq!(status.endpoint_ids["public"], "id2");
    }

    #[test]
    fn test_forget_endpoint_clears_both_records() {
        let mut status = KeystoneEndpointStatus::default();
        status.record_endpoint("public", "http://a", "id1");
        status.record_endpoint("internal", "http://i", "id2");

        status.forget_endpoint("public");

        assert!(!status.endpoint_ids.contains_key("public"));
        assert_eq!(status.endpoints.len(), 1);
        assert_eq!(status.endpoints[0].interface, "internal");
    }

    #[test]
    fn test_persisted_status_shape() {
        let mut status = KeystoneEndpointStatus {
            service_id: "svc".to_string(),
            observed_generation: 2,
            ..Default::default()
        };
        status.record_endpoint("public", "http://a", "id1");

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["serviceID"], "svc");
        assert_eq!(json["endpointIDs"]["public"], "id1");
        assert_eq!(
            json["endpoints"][0],
            serde_json::json!({"interface": "public", "url": "http://a", "id": "id1"})
        );
        assert_eq!(json["observedGeneration"], 2);
        assert!(json["conditions"].is_array());
    }

    #[test]
    fn test_api_endpoint_skips_empty_url() {
        let mut api = KeystoneApi::new("openstack", "keystone");
        api.status
            .api_endpoints
            .insert("internal".to_string(), String::new());
        api.status
            .api_endpoints
            .insert("public".to_string(), "https://keystone".to_string());

        assert_eq!(api.endpoint("internal"), None);
        assert_eq!(api.endpoint("public"), Some("https://keystone"));
    }
}
