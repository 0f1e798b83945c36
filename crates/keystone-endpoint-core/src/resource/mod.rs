//! Resource model
//!
//! Objects kept in the resource store: the `KeystoneEndpoint` this crate
//! reconciles and the two dependency kinds it reads (`KeystoneApi`,
//! `KeystoneService`). Every object is `{metadata, spec, status}`.

pub mod finalizer;
pub mod keystone;

pub use finalizer::{Finalizer, FinalizerSet};
pub use keystone::{
    Endpoint, KeystoneApi, KeystoneApiSpec, KeystoneApiStatus, KeystoneEndpoint,
    KeystoneEndpointSpec, KeystoneEndpointStatus, KeystoneService, KeystoneServiceSpec,
    KeystoneServiceStatus,
};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Kinds of objects the resource store holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    KeystoneApi,
    KeystoneService,
    KeystoneEndpoint,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::KeystoneApi => "keystoneapi",
            ResourceKind::KeystoneService => "keystoneservice",
            ResourceKind::KeystoneEndpoint => "keystoneendpoint",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keystoneapi" => Ok(ResourceKind::KeystoneApi),
            "keystoneservice" => Ok(ResourceKind::KeystoneService),
            "keystoneendpoint" => Ok(ResourceKind::KeystoneEndpoint),
            other => Err(crate::Error::invalid_input(format!(
                "unknown resource kind: {other}"
            ))),
        }
    }
}

/// Identity of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(namespace), Some(name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind.parse()?, namespace, name))
            }
            _ => Err(crate::Error::invalid_input(format!("malformed object key: {s}"))),
        }
    }
}

/// Lifecycle of a stored object
///
/// An object becomes `Terminating` when deletion is requested while it still
/// carries finalizers; the store removes it once the last finalizer is gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Lifecycle {
    #[default]
    Active,
    Terminating {
        since: DateTime<Utc>,
    },
}

impl Lifecycle {
    pub fn is_terminating(&self) -> bool {
        matches!(self, Lifecycle::Terminating { .. })
    }
}

/// Object metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Incremented by the store whenever the spec changes
    #[serde(default)]
    pub generation: i64,
    /// Incremented by the store on every write; used for optimistic concurrency
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub finalizers: FinalizerSet,
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.lifecycle.is_terminating()
    }
}

/// Untyped stored form of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl RawObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, &self.metadata.namespace, &self.metadata.name)
    }
}

/// A typed object kind held in the resource store
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey::new(Self::KIND, &meta.namespace, &meta.name)
    }

    /// Convert into the untyped stored form
    fn to_raw(&self) -> crate::Result<RawObject> {
        let mut value = serde_json::to_value(self)?;
        Ok(RawObject {
            kind: Self::KIND,
            metadata: self.meta().clone(),
            spec: value.get_mut("spec").map(Value::take).unwrap_or(Value::Null),
            status: value.get_mut("status").map(Value::take).unwrap_or(Value::Null),
        })
    }

    /// Convert from the untyped stored form
    fn from_raw(raw: RawObject) -> crate::Result<Self> {
        if raw.kind != Self::KIND {
            return Err(crate::Error::invalid_input(format!(
                "expected {} object, got {}",
                Self::KIND,
                raw.kind
            )));
        }

        let or_empty = |v: Value| if v.is_null() { Value::Object(Default::default()) } else { v };
        let value = serde_json::json!({
            "metadata": raw.metadata,
            "spec": or_empty(raw.spec),
            "status": or_empty(raw.status),
        });
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_round_trip_through_display() {
        let key = ObjectKey::new(ResourceKind::KeystoneEndpoint, "openstack", "nova");
        assert_eq!(key.to_string(), "keystoneendpoint/openstack/nova");
        assert_eq!(key.to_string().parse::<ObjectKey>().unwrap(), key);
    }

    #[test]
    fn test_object_key_rejects_short_form() {
        assert!("keystoneendpoint/nova".parse::<ObjectKey>().is_err());
        assert!("widget/openstack/nova".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_raw_conversion_preserves_spec_and_status() {
        let mut endpoint = KeystoneEndpoint::new(
            "openstack",
            "nova",
            KeystoneEndpointSpec::new("nova").with_endpoint("public", "http://nova"),
        );
        endpoint.status.service_id = "svc-1".to_string();

        let raw = endpoint.to_raw().unwrap();
        assert_eq!(raw.kind, ResourceKind::KeystoneEndpoint);
        assert_eq!(raw.spec["endpoints"]["public"], "http://nova");
        assert_eq!(raw.status["serviceID"], "svc-1");

        let back = KeystoneEndpoint::from_raw(raw).unwrap();
        assert_eq!(back, endpoint);
    }

    #[test]
    fn test_from_raw_tolerates_missing_status() {
        let raw = RawObject {
            kind: ResourceKind::KeystoneService,
            metadata: ObjectMeta::new("openstack", "nova"),
            spec: serde_json::json!({"serviceName": "nova", "serviceType": "compute"}),
            status: Value::Null,
        };

        let service = KeystoneService::from_raw(raw).unwrap();
        assert!(service.status.service_id.is_empty());
        assert!(service.status.conditions.is_empty());
    }

    #[test]
    fn test_from_raw_rejects_wrong_kind() {
        let raw = KeystoneApi::new("openstack", "keystone").to_raw().unwrap();
        assert!(KeystoneEndpoint::from_raw(raw).is_err());
    }
}
