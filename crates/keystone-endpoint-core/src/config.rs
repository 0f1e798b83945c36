//! Configuration types for the keystone endpoint reconciler
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main operator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Resource store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Identity service connection configuration
    pub identity: IdentityConfig,

    /// Only reconcile objects in this namespace (all namespaces when unset)
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Optional reconcile settings
    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

impl OperatorConfig {
    /// Create a new configuration with defaults
    pub fn new(identity: IdentityConfig) -> Self {
        Self {
            store: StoreConfig::default(),
            identity,
            watch_namespace: None,
            reconcile: ReconcileSettings::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.store.validate()?;
        self.identity.validate()?;
        self.reconcile.validate()?;

        if let Some(namespace) = &self.watch_namespace {
            if namespace.is_empty() {
                return Err(crate::Error::config("Watch namespace cannot be empty"));
            }
        }

        Ok(())
    }
}

/// Resource store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-based store
    File {
        /// Path to the store file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("Store file path cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Custom { factory, .. } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                Ok(())
            }
            StoreConfig::Memory => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Identity service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityConfig {
    /// Keystone v3 REST API
    Keystone {
        /// File holding the admin password (usually a mounted secret)
        password_file: String,

        /// Request timeout (in seconds)
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,

        /// Delay suggested while credentials or the API URL are not published (in seconds)
        #[serde(default = "default_credentials_retry_secs")]
        credentials_retry_secs: u64,
    },

    /// Custom identity connector
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl IdentityConfig {
    /// Keystone configuration with default timeouts
    pub fn keystone(password_file: impl Into<String>) -> Self {
        IdentityConfig::Keystone {
            password_file: password_file.into(),
            request_timeout_secs: default_request_timeout_secs(),
            credentials_retry_secs: default_credentials_retry_secs(),
        }
    }

    /// Validate the identity configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            IdentityConfig::Keystone {
                password_file,
                request_timeout_secs,
                credentials_retry_secs,
            } => {
                if password_file.is_empty() {
                    return Err(crate::Error::config(
                        "Keystone admin password file cannot be empty",
                    ));
                }
                if *request_timeout_secs == 0 {
                    return Err(crate::Error::config("Keystone request timeout must be > 0"));
                }
                if *credentials_retry_secs == 0 {
                    return Err(crate::Error::config(
                        "Keystone credentials retry interval must be > 0",
                    ));
                }
                Ok(())
            }
            IdentityConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom identity connector factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom identity connector config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the connector type name
    pub fn type_name(&self) -> &str {
        match self {
            IdentityConfig::Keystone { .. } => "keystone",
            IdentityConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Reconcile and controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Requeue delay while the identity API is missing or not ready (in seconds)
    #[serde(default = "default_dependency_requeue_secs")]
    pub dependency_requeue_secs: u64,

    /// Requeue delay while the service registration is not ready (in seconds)
    #[serde(default = "default_service_requeue_secs")]
    pub service_requeue_secs: u64,

    /// Attempts for a dependency finalizer write that hits a version conflict
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,

    /// Deadline for a single reconcile pass (in seconds)
    #[serde(default = "default_pass_timeout_secs")]
    pub pass_timeout_secs: u64,

    /// First retry delay after a transient failure (in seconds)
    ///
    /// Doubles with each consecutive failure of the same object, up to
    /// `backoff_max_secs`, and resets after a successful pass.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound of the transient failure retry delay (in seconds)
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Retry delay after a failure that needs an operator to fix something (in seconds)
    #[serde(default = "default_manual_intervention_secs")]
    pub manual_intervention_secs: u64,

    /// Maximum number of objects reconciled at the same time
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,

    /// Capacity of the controller event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ReconcileSettings {
    /// Validate the reconcile settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.pass_timeout_secs == 0 {
            return Err(crate::Error::config("Reconcile pass timeout must be > 0"));
        }
        if self.backoff_base_secs == 0 {
            return Err(crate::Error::config("Backoff base delay must be > 0"));
        }
        if self.backoff_max_secs < self.backoff_base_secs {
            return Err(crate::Error::config(
                "Backoff maximum delay must not be below the base delay",
            ));
        }
        if self.conflict_retries == 0 {
            return Err(crate::Error::config("Conflict retries must be > 0"));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(crate::Error::config("Max concurrent reconciles must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn dependency_requeue(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_secs)
    }

    pub fn service_requeue(&self) -> Duration {
        Duration::from_secs(self.service_requeue_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub fn manual_intervention(&self) -> Duration {
        Duration::from_secs(self.manual_intervention_secs)
    }

    /// Retry delay after `failures` consecutive transient failures (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let delay = self
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_secs);
        Duration::from_secs(delay)
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            dependency_requeue_secs: default_dependency_requeue_secs(),
            service_requeue_secs: default_service_requeue_secs(),
            conflict_retries: default_conflict_retries(),
            pass_timeout_secs: default_pass_timeout_secs(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            manual_intervention_secs: default_manual_intervention_secs(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_credentials_retry_secs() -> u64 {
    10
}

fn default_dependency_requeue_secs() -> u64 {
    5
}

fn default_service_requeue_secs() -> u64 {
    10
}

fn default_conflict_retries() -> usize {
    3
}

fn default_pass_timeout_secs() -> u64 {
    60
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    300
}

fn default_manual_intervention_secs() -> u64 {
    300
}

fn default_max_concurrent_reconciles() -> usize {
    8
}

fn default_event_channel_capacity() -> usize {
    1000
}
