//! Reconcile orchestrator for `KeystoneEndpoint` objects
//!
//! One call to [`Reconciler::reconcile`] is one pass over one object:
//!
//! ```text
//! Initializing ─► AwaitingDependency ─► AwaitingCredentials ─► Syncing ─► Ready
//!        │                │                      │                 │
//!        └────────────────┴──────── Deleting ◄───┴─────────────────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Load the object; a missing object is `Absent` and nothing is written
//! 2. First observation: initialize conditions and stop
//! 3. Place the controller finalizer and stop
//! 4. Gate on the namespace's `KeystoneApi` (present, not terminating, ready)
//! 5. Obtain an admin client
//! 6. Delete path, or normal path (service gate, dependency finalizers, sync)
//!
//! Every exit after step 1 funnels through [`Reconciler::persist`], which
//! recomputes `Ready` and writes metadata and status. A panic inside a pass
//! unwinds past the funnel, so nothing mutated after the fault is written.

mod delete;
mod finalizers;
mod sync;

use crate::condition::{
    ADMIN_SERVICE_CLIENT_READY, ENDPOINTS_READY, KEYSTONE_API_READY,
    KEYSTONE_SERVICE_READY, Reason, Severity,
};
use crate::config::ReconcileSettings;
use crate::resource::{
    Finalizer, KeystoneApi, KeystoneEndpoint, KeystoneService, ResourceKind,
};
use crate::store::Api;
use crate::traits::{Connection, EndpointAdmin, IdentityConnector, ResourceStore};
use crate::{Error, Result};
use finalizers::FinalizerCoordinator;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Condition messages
mod messages {
    pub const API_INIT: &str = "KeystoneAPI not started";
    pub const API_READY: &str = "KeystoneAPI ready";
    pub const API_NOT_FOUND: &str = "KeystoneAPI not found";
    pub const API_WAITING: &str = "KeystoneAPI not yet ready";
    pub const API_ERROR: &str = "KeystoneAPI error occurred";

    pub const CLIENT_INIT: &str = "Admin client not started";
    pub const CLIENT_READY: &str = "Admin client ready";
    pub const CLIENT_WAITING: &str = "Admin client not yet ready";
    pub const CLIENT_ERROR: &str = "Admin client error occurred";

    pub const ENDPOINTS_INIT: &str = "Keystone endpoints not started";
    pub const ENDPOINTS_READY: &str = "Keystone endpoints ready";
    pub const ENDPOINTS_ERROR: &str = "Keystone endpoints error occurred";

    pub const SERVICE_NOT_FOUND: &str = "KeystoneService not found";
}

/// Where a pass stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The object does not exist
    Absent,
    /// Conditions or the controller finalizer were just set up
    Initializing,
    /// Waiting for the `KeystoneApi` or `KeystoneService`
    AwaitingDependency,
    /// Waiting for admin credentials or the identity API URL
    AwaitingCredentials,
    /// Reconciling remote endpoints
    Syncing,
    /// Every declared endpoint is registered
    Ready,
    /// Running a delete path
    Deleting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Absent => "absent",
            Phase::Initializing => "initializing",
            Phase::AwaitingDependency => "awaiting_dependency",
            Phase::AwaitingCredentials => "awaiting_credentials",
            Phase::Syncing => "syncing",
            Phase::Ready => "ready",
            Phase::Deleting => "deleting",
        }
    }

    /// Record the phase on the current span
    fn enter(self) -> Self {
        tracing::Span::current().record("phase", self.as_str());
        debug!(phase = self.as_str(), "Entering phase");
        self
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the controller should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Wait for the next change to the object
    Done,
    /// Run again after the delay, even without a change
    RequeueAfter(Duration),
}

/// Result of a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub phase: Phase,
    pub action: Action,
}

impl Outcome {
    pub fn new(phase: Phase, action: Action) -> Self {
        Self { phase, action }
    }

    fn done(phase: Phase) -> Self {
        Self::new(phase, Action::Done)
    }
}

/// Reconciles `KeystoneEndpoint` objects against the identity service
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    connector: Arc<dyn IdentityConnector>,
    settings: ReconcileSettings,
    finalizers: FinalizerCoordinator,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        connector: Arc<dyn IdentityConnector>,
        settings: ReconcileSettings,
    ) -> Self {
        let finalizers = FinalizerCoordinator::new(settings.conflict_retries);
        Self {
            store,
            connector,
            settings,
            finalizers,
        }
    }

    /// Run one pass over the `KeystoneEndpoint` `namespace/name`
    ///
    /// # Returns
    ///
    /// - `Ok(outcome)`: the pass finished; `outcome.action` says when to run again
    /// - `Err(Error)`: the pass failed; status was still persisted. When
    ///   persisting also failed, the pass error wins and the other is logged
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let endpoints = Api::<KeystoneEndpoint>::namespaced(self.store.clone(), namespace);

        let Some(mut instance) = endpoints.get(name).await? else {
            debug!("KeystoneEndpoint not found, nothing to reconcile");
            return Ok(Outcome::done(Phase::Absent.enter()));
        };
        let original = instance.clone();

        let result = self.reconcile_instance(&mut instance).await;
        let persisted = self.persist(&endpoints, &original, instance).await;

        match (result, persisted) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(persist_err)) => Err(persist_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(persist_err)) => {
                warn!(error = %persist_err, "Failed to persist status after failed pass");
                Err(err)
            }
        }
    }

    async fn reconcile_instance(&self, instance: &mut KeystoneEndpoint) -> Result<Outcome> {
        let conditions = &mut instance.status.conditions;
        if conditions.is_empty() {
            conditions.init(&[
                (KEYSTONE_API_READY, messages::API_INIT),
                (ADMIN_SERVICE_CLIENT_READY, messages::CLIENT_INIT),
                (ENDPOINTS_READY, messages::ENDPOINTS_INIT),
                (KEYSTONE_SERVICE_READY, ""),
            ]);
            return Ok(Outcome::done(Phase::Initializing.enter()));
        }

        instance.status.observed_generation = instance.metadata.generation;

        let deleting = instance.metadata.is_terminating();
        if !deleting && instance.metadata.finalizers.add(own_finalizer()) {
            return Ok(Outcome::done(Phase::Initializing.enter()));
        }

        Phase::AwaitingDependency.enter();
        let namespace = instance.metadata.namespace.clone();
        let apis = Api::<KeystoneApi>::namespaced(self.store.clone(), &namespace);

        let keystone_api = match keystone_api(&apis).await {
            Ok(Some(api)) => api,
            Ok(None) => {
                if deleting && instance.status.endpoint_ids.is_empty() {
                    return self.reconcile_delete(instance, None, None).await;
                }

                instance.status.conditions.mark_false(
                    KEYSTONE_API_READY,
                    Reason::Error,
                    Severity::Warning,
                    messages::API_NOT_FOUND,
                );
                info!("KeystoneAPI not found");
                return Ok(Outcome::new(
                    Phase::AwaitingDependency,
                    Action::RequeueAfter(self.settings.dependency_requeue()),
                ));
            }
            Err(e) => {
                instance.status.conditions.mark_false(
                    KEYSTONE_API_READY,
                    Reason::Error,
                    Severity::Warning,
                    format!("{} {}", messages::API_ERROR, e),
                );
                return Err(e);
            }
        };

        if deleting && keystone_api.metadata.is_terminating() {
            return self
                .reconcile_delete_finalizers_only(instance, &keystone_api)
                .await;
        }

        if deleting && instance.status.endpoint_ids.is_empty() {
            return self
                .reconcile_delete(instance, None, Some(&keystone_api))
                .await;
        }

        if !keystone_api.is_ready() {
            instance.status.conditions.mark_false(
                KEYSTONE_API_READY,
                Reason::Requested,
                Severity::Info,
                messages::API_WAITING,
            );
            info!("KeystoneAPI not yet ready");
            return Ok(Outcome::new(
                Phase::AwaitingDependency,
                Action::RequeueAfter(self.settings.dependency_requeue()),
            ));
        }
        instance
            .status
            .conditions
            .mark_true(KEYSTONE_API_READY, messages::API_READY);

        Phase::AwaitingCredentials.enter();
        let admin = match self.connector.connect(&keystone_api).await {
            Ok(Connection::Ready(admin)) => admin,
            Ok(Connection::NotYetAvailable {
                retry_after,
                reason,
            }) => {
                instance.status.conditions.mark_false(
                    ADMIN_SERVICE_CLIENT_READY,
                    Reason::Requested,
                    Severity::Info,
                    format!("{}: {}", messages::CLIENT_WAITING, reason),
                );
                info!(retry_after = ?retry_after, "Admin client not yet available: {}", reason);
                return Ok(Outcome::new(
                    Phase::AwaitingCredentials,
                    Action::RequeueAfter(retry_after),
                ));
            }
            Err(e) => {
                instance.status.conditions.mark_false(
                    ADMIN_SERVICE_CLIENT_READY,
                    Reason::Error,
                    Severity::Warning,
                    format!("{} {}", messages::CLIENT_ERROR, e),
                );
                return Err(e);
            }
        };
        instance
            .status
            .conditions
            .mark_true(ADMIN_SERVICE_CLIENT_READY, messages::CLIENT_READY);

        if deleting {
            return self
                .reconcile_delete(instance, Some(admin.as_ref()), Some(&keystone_api))
                .await;
        }

        self.reconcile_normal(instance, admin.as_ref(), &keystone_api)
            .await
    }

    async fn reconcile_normal(
        &self,
        instance: &mut KeystoneEndpoint,
        admin: &dyn EndpointAdmin,
        keystone_api: &KeystoneApi,
    ) -> Result<Outcome> {
        info!(backend = admin.backend_name(), "Reconciling endpoint normal");

        Phase::AwaitingDependency.enter();
        let services =
            Api::<KeystoneService>::namespaced(self.store.clone(), &instance.metadata.namespace);
        let Some(service) = keystone_service(&services, &instance.spec.service_name).await? else {
            instance.status.conditions.mark_false(
                KEYSTONE_SERVICE_READY,
                Reason::Requested,
                Severity::Info,
                messages::SERVICE_NOT_FOUND,
            );
            info!(service = %instance.spec.service_name, "KeystoneService not found");
            return Ok(Outcome::new(
                Phase::AwaitingDependency,
                Action::RequeueAfter(self.settings.dependency_requeue()),
            ));
        };

        if let Some(mirrored) = service.status.conditions.mirror(KEYSTONE_SERVICE_READY) {
            instance.status.conditions.set(mirrored);
        }

        if !service.is_ready() {
            info!(
                service = %instance.spec.service_name,
                "KeystoneService not ready, waiting to create endpoints"
            );
            return Ok(Outcome::new(
                Phase::AwaitingDependency,
                Action::RequeueAfter(self.settings.service_requeue()),
            ));
        }

        instance.status.service_id = service.status.service_id.clone();

        let marker = dependency_finalizer(instance);
        let apis = Api::<KeystoneApi>::namespaced(self.store.clone(), &instance.metadata.namespace);
        self.finalizers
            .ensure(&apis, &keystone_api.metadata.name, &marker)
            .await?;
        self.finalizers
            .ensure(&services, &service.metadata.name, &marker)
            .await?;

        Phase::Syncing.enter();
        if let Err(e) = sync::sync_endpoints(admin, &instance.spec, &mut instance.status).await {
            instance.status.conditions.mark_false(
                ENDPOINTS_READY,
                Reason::Error,
                Severity::Warning,
                format!("{} {}", messages::ENDPOINTS_ERROR, e),
            );
            return Err(e);
        }

        let synced: Vec<String> = instance
            .spec
            .endpoints
            .iter()
            .map(|(endpoint_type, url)| format!("{endpoint_type}={url}"))
            .collect();
        instance.status.conditions.mark_true(
            ENDPOINTS_READY,
            format!("{}: {}", messages::ENDPOINTS_READY, synced.join(", ")),
        );

        info!("Reconciled endpoint normal successfully");
        Ok(Outcome::done(Phase::Ready.enter()))
    }

    /// Write the result of a pass
    ///
    /// Finalizer changes go through an optimistic update, status through the
    /// status subresource. Unchanged parts are not written, so a converged
    /// pass produces no watch events. A missing object is fine: releasing
    /// the last finalizer removes it.
    async fn persist(
        &self,
        endpoints: &Api<KeystoneEndpoint>,
        original: &KeystoneEndpoint,
        mut instance: KeystoneEndpoint,
    ) -> Result<()> {
        instance.status.conditions.aggregate_ready();

        let mut outcome = Ok(());

        if instance.metadata.finalizers != original.metadata.finalizers {
            match endpoints.update(&instance).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!("Last finalizer released, object removed");
                    return Ok(());
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => outcome = Err(e),
            }
        }

        if instance.status != original.status {
            match endpoints.patch_status(&instance).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }

        outcome
    }
}

/// The finalizer this controller places on the objects it reconciles
pub fn own_finalizer() -> Finalizer {
    Finalizer::controller(ResourceKind::KeystoneEndpoint)
}

/// The finalizer an endpoint instance places on its dependencies
pub fn dependency_finalizer(instance: &KeystoneEndpoint) -> Finalizer {
    Finalizer::owned_by(ResourceKind::KeystoneEndpoint, &instance.metadata.name)
}

/// The identity API deployment of a namespace
///
/// A namespace holds at most one; more than one is a configuration error.
async fn keystone_api(apis: &Api<KeystoneApi>) -> Result<Option<KeystoneApi>> {
    let mut found = apis.list().await?;
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        n => Err(Error::config(format!(
            "{} KeystoneAPI objects found in namespace {}, expected one",
            n,
            apis.namespace()
        ))),
    }
}

/// The service registration with the given service name
async fn keystone_service(
    services: &Api<KeystoneService>,
    service_name: &str,
) -> Result<Option<KeystoneService>> {
    services
        .find(|service| service.spec.service_name == service_name)
        .await
}

