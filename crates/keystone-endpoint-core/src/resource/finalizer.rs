//! Typed ownership markers
//!
//! A finalizer holds back removal of the object carrying it until the owner
//! named in the marker has finished its cleanup. The reconciler places two
//! shapes of marker:
//!
//! - its own controller marker on the `KeystoneEndpoint` it reconciles
//!   (`openstack.org/keystoneendpoint`), and
//! - a per-instance marker on each dependency it needs for cleanup
//!   (`openstack.org/keystoneendpoint-<instance name>`).

use super::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Domain prefix of every marker this reconciler places
pub const FINALIZER_DOMAIN: &str = "openstack.org";

/// Ownership marker on an object
///
/// Markers placed by this reconciler are composite `{owner kind, owner
/// name}` keys. Markers placed by anyone else are kept verbatim, so a set
/// read from the store and written back never loses or rewrites them.
///
/// Serialized in its string form so stored objects stay readable by other
/// controllers that only know plain finalizer strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Finalizer {
    /// `<domain>/<owner kind>` or `<domain>/<owner kind>-<owner name>`
    Owner {
        domain: String,
        owner_kind: String,
        owner_name: Option<String>,
    },

    /// Any marker without a domain prefix, e.g. `kubernetes`
    Opaque(String),
}

impl Finalizer {
    /// The marker a controller places on the objects it reconciles
    pub fn controller(kind: ResourceKind) -> Self {
        Self::Owner {
            domain: FINALIZER_DOMAIN.to_string(),
            owner_kind: kind.as_str().to_string(),
            owner_name: None,
        }
    }

    /// The marker an owner instance places on a dependency
    pub fn owned_by(kind: ResourceKind, owner_name: impl Into<String>) -> Self {
        Self::Owner {
            domain: FINALIZER_DOMAIN.to_string(),
            owner_kind: kind.as_str().to_string(),
            owner_name: Some(owner_name.into()),
        }
    }

    pub fn owner_kind(&self) -> Option<&str> {
        match self {
            Self::Owner { owner_kind, .. } => Some(owner_kind),
            Self::Opaque(_) => None,
        }
    }

    pub fn owner_name(&self) -> Option<&str> {
        match self {
            Self::Owner { owner_name, .. } => owner_name.as_deref(),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for Finalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner {
                domain,
                owner_kind,
                owner_name: Some(name),
            } => write!(f, "{}/{}-{}", domain, owner_kind, name),
            Self::Owner {
                domain,
                owner_kind,
                owner_name: None,
            } => write!(f, "{}/{}", domain, owner_kind),
            Self::Opaque(marker) => f.write_str(marker),
        }
    }
}

impl From<Finalizer> for String {
    fn from(finalizer: Finalizer) -> Self {
        finalizer.to_string()
    }
}

impl From<String> for Finalizer {
    fn from(value: String) -> Self {
        let Some((domain, rest)) = value
            .split_once('/')
            .filter(|(domain, rest)| !domain.is_empty() && !rest.is_empty())
        else {
            return Self::Opaque(value);
        };

        let (owner_kind, owner_name) = match rest.split_once('-') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                (kind.to_string(), Some(name.to_string()))
            }
            _ => (rest.to_string(), None),
        };

        Self::Owner {
            domain: domain.to_string(),
            owner_kind,
            owner_name,
        }
    }
}

/// Set of finalizers on one object
///
/// Adding a present marker and removing an absent one are no-ops; both
/// report whether the set changed so callers only write when needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalizerSet(BTreeSet<Finalizer>);

impl FinalizerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the marker was not present before
    pub fn add(&mut self, finalizer: Finalizer) -> bool {
        self.0.insert(finalizer)
    }

    /// Returns `true` if the marker was present before
    pub fn remove(&mut self, finalizer: &Finalizer) -> bool {
        self.0.remove(finalizer)
    }

    pub fn contains(&self, finalizer: &Finalizer) -> bool {
        self.0.contains(finalizer)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finalizer> {
        self.0.iter()
    }
}

impl FromIterator<Finalizer> for FinalizerSet {
    fn from_iter<I: IntoIterator<Item = Finalizer>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
