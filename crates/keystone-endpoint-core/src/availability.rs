//! Endpoint availability classification
//!
//! Keystone registers every endpoint of a service under one interface:
//! `public`, `internal` or `admin`. Endpoint-type labels declared on a
//! `KeystoneEndpoint` must resolve to one of these; anything else is a
//! configuration error, not a transient failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The interface under which an endpoint is registered in the identity service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Public,
    Internal,
    Admin,
}

impl Availability {
    /// All availabilities, in registration order
    pub const ALL: [Availability; 3] = [
        Availability::Public,
        Availability::Internal,
        Availability::Admin,
    ];

    /// Resolve an endpoint-type label
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for labels outside the closed set.
    pub fn resolve(label: &str) -> crate::Result<Self> {
        label.parse()
    }

    /// The interface name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Public => "public",
            Availability::Internal => "internal",
            Availability::Admin => "admin",
        }
    }
}

impl FromStr for Availability {
    type Err = crate::Error;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label {
            "public" => Ok(Availability::Public),
            "internal" => Ok(Availability::Internal),
            "admin" => Ok(Availability::Admin),
            other => Err(crate::Error::config(format!(
                "endpoint type {other} not known"
            ))),
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
