//! Test doubles and common utilities for reconciler contract tests
//!
//! The doubles keep an in-memory endpoint registry and count every remote
//! call, so tests can assert both the converged state and how much work a
//! pass did to get there.

#![allow(dead_code)]

use keystone_endpoint_core::availability::Availability;
use keystone_endpoint_core::condition::READY;
use keystone_endpoint_core::error::{Error, Result};
use keystone_endpoint_core::resource::{
    KeystoneApi, KeystoneEndpoint, KeystoneEndpointSpec, KeystoneService, KeystoneServiceSpec,
    ObjectKey, RawObject, ResourceKind,
};
use keystone_endpoint_core::store::{Api, MemoryResourceStore};
use keystone_endpoint_core::traits::{
    Connection, EndpointAdmin, EndpointRequest, IdentityConnector, RemoteEndpoint, ResourceStore,
    WatchStream,
};
use keystone_endpoint_core::{Outcome, ReconcileSettings, Reconciler};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "openstack";
/// Service ID [`Fixture::seed_service`] assigns to the `nova` service
pub const SERVICE_ID: &str = "svc-nova";

/// An endpoint registry that lives in memory and counts calls
#[derive(Default)]
pub struct MockEndpointAdmin {
    registry: Mutex<Vec<RemoteEndpoint>>,
    next_id: AtomicUsize,
    list_call_count: AtomicUsize,
    create_call_count: AtomicUsize,
    update_call_count: AtomicUsize,
    delete_call_count: AtomicUsize,
    /// Fail every create with a transient backend error
    fail_creates: AtomicBool,
}

impl MockEndpointAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant an endpoint registered by someone else; returns its ID
    pub fn seed(&self, service_id: &str, availability: Availability, url: &str) -> String {
        let id = self.allocate_id();
        self.registry.lock().unwrap().push(RemoteEndpoint {
            id: id.clone(),
            name: "seeded".to_string(),
            service_id: service_id.to_string(),
            availability,
            url: url.to_string(),
        });
        id
    }

    /// Snapshot of the registry for `(service_id, availability)`
    pub fn registered(&self, service_id: &str, availability: Availability) -> Vec<RemoteEndpoint> {
        self.registry
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.service_id == service_id && e.availability == availability)
            .cloned()
            .collect()
    }

    pub fn total_registered(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }

    pub fn create_call_count(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    pub fn update_call_count(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.delete_call_count.load(Ordering::SeqCst)
    }

    /// Creates, updates and deletes combined
    pub fn mutation_count(&self) -> usize {
        self.create_call_count() + self.update_call_count() + self.delete_call_count()
    }

    fn allocate_id(&self) -> String {
        format!("ep-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait::async_trait]
impl EndpointAdmin for MockEndpointAdmin {
    async fn list_endpoints(
        &self,
        service_id: &str,
        availability: Availability,
    ) -> Result<Vec<RemoteEndpoint>> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.registered(service_id, availability))
    }

    async fn create_endpoint(&self, endpoint: &EndpointRequest) -> Result<String> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::provider("mock", "service unavailable"));
        }

        let id = self.allocate_id();
        self.registry.lock().unwrap().push(RemoteEndpoint {
            id: id.clone(),
            name: endpoint.name.clone(),
            service_id: endpoint.service_id.clone(),
            availability: endpoint.availability,
            url: endpoint.url.clone(),
        });
        Ok(id)
    }

    async fn update_endpoint(&self, endpoint: &EndpointRequest, id: &str) -> Result<String> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        let mut registry = self.registry.lock().unwrap();
        let existing = registry
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::not_found(format!("endpoint {id}")))?;
        existing.url = endpoint.url.clone();
        Ok(id.to_string())
    }

    async fn delete_endpoint(&self, endpoint: &EndpointRequest) -> Result<()> {
        self.delete_call_count.fetch_add(1, Ordering::SeqCst);
        self.registry.lock().unwrap().retain(|e| {
            !(e.service_id == endpoint.service_id && e.availability == endpoint.availability)
        });
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

/// A connector handing out one shared [`MockEndpointAdmin`]
pub struct MockConnector {
    admin: Arc<MockEndpointAdmin>,
    credentials_available: AtomicBool,
    connect_call_count: AtomicUsize,
}

impl MockConnector {
    pub fn new(admin: Arc<MockEndpointAdmin>) -> Self {
        Self {
            admin,
            credentials_available: AtomicBool::new(true),
            connect_call_count: AtomicUsize::new(0),
        }
    }

    pub fn set_credentials_available(&self, available: bool) {
        self.credentials_available.store(available, Ordering::SeqCst);
    }

    pub fn connect_call_count(&self) -> usize {
        self.connect_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdentityConnector for MockConnector {
    async fn connect(&self, _api: &KeystoneApi) -> Result<Connection> {
        self.connect_call_count.fetch_add(1, Ordering::SeqCst);
        if !self.credentials_available.load(Ordering::SeqCst) {
            return Ok(Connection::NotYetAvailable {
                retry_after: Duration::from_secs(10),
                reason: "admin password secret not found".to_string(),
            });
        }
        Ok(Connection::Ready(self.admin.clone()))
    }

    fn connector_name(&self) -> &'static str {
        "mock"
    }
}

/// A memory store that counts writes and flushes and can inject conflicts
pub struct InstrumentedStore {
    inner: MemoryResourceStore,
    update_call_count: AtomicUsize,
    status_call_count: AtomicUsize,
    flush_call_count: AtomicUsize,
    /// Updates of this kind fail with a conflict while the budget lasts
    conflict_kind: ResourceKind,
    conflicts_to_inject: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryResourceStore::new(),
            update_call_count: AtomicUsize::new(0),
            status_call_count: AtomicUsize::new(0),
            flush_call_count: AtomicUsize::new(0),
            conflict_kind: ResourceKind::KeystoneApi,
            conflicts_to_inject: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` updates of `kind` objects with a conflict
    pub fn inject_conflicts(mut self, kind: ResourceKind, count: usize) -> Self {
        self.conflict_kind = kind;
        self.conflicts_to_inject = AtomicUsize::new(count);
        self
    }

    /// Metadata updates and status patches combined
    pub fn write_count(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst) + self.status_call_count.load(Ordering::SeqCst)
    }

    pub fn flush_call_count(&self) -> usize {
        self.flush_call_count.load(Ordering::SeqCst)
    }

    pub fn remaining_conflicts(&self) -> usize {
        self.conflicts_to_inject.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResourceStore for InstrumentedStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>> {
        self.inner.get(key).await
    }

    async fn create(&self, object: RawObject) -> Result<RawObject> {
        self.inner.create(object).await
    }

    async fn update(&self, object: RawObject) -> Result<Option<RawObject>> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        if object.kind == self.conflict_kind
            && self
                .conflicts_to_inject
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Error::conflict(format!("{} was modified", object.key())));
        }
        self.inner.update(object).await
    }

    async fn patch_status(&self, object: RawObject) -> Result<RawObject> {
        self.status_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.patch_status(object).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>> {
        self.inner.list(kind).await
    }

    fn watch(&self) -> WatchStream {
        self.inner.watch()
    }

    async fn flush(&self) -> Result<()> {
        self.flush_call_count.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// A store, a mock identity service and a reconciler wired together
pub struct Fixture {
    pub store: Arc<dyn ResourceStore>,
    pub admin: Arc<MockEndpointAdmin>,
    pub connector: Arc<MockConnector>,
    pub reconciler: Reconciler,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(ReconcileSettings::default())
    }

    pub fn with_settings(settings: ReconcileSettings) -> Self {
        Self::with_store(Arc::new(MemoryResourceStore::new()), settings)
    }

    pub fn with_store(store: Arc<dyn ResourceStore>, settings: ReconcileSettings) -> Self {
        let admin = Arc::new(MockEndpointAdmin::new());
        let connector = Arc::new(MockConnector::new(admin.clone()));
        let reconciler = Reconciler::new(store.clone(), connector.clone(), settings);

        Self {
            store,
            admin,
            connector,
            reconciler,
        }
    }

    pub fn apis(&self) -> Api<KeystoneApi> {
        Api::namespaced(self.store.clone(), NAMESPACE)
    }

    pub fn services(&self) -> Api<KeystoneService> {
        Api::namespaced(self.store.clone(), NAMESPACE)
    }

    pub fn endpoints(&self) -> Api<KeystoneEndpoint> {
        Api::namespaced(self.store.clone(), NAMESPACE)
    }

    /// Store a ready `KeystoneApi` named `keystone`
    pub async fn seed_ready_api(&self) -> KeystoneApi {
        let mut api = KeystoneApi::new(NAMESPACE, "keystone");
        api.status.conditions.mark_true(READY, "Setup complete");
        api.status.api_endpoints.insert(
            "internal".to_string(),
            "http://keystone-internal.openstack.svc:5000".to_string(),
        );
        self.apis().create(&api).await.unwrap()
    }

    /// Store a `KeystoneService` for `service_name`, ready or not
    pub async fn seed_service(&self, service_name: &str, ready: bool) -> KeystoneService {
        let mut service = KeystoneService::new(
            NAMESPACE,
            service_name,
            KeystoneServiceSpec {
                service_name: service_name.to_string(),
                service_type: "compute".to_string(),
                service_description: String::new(),
            },
        );
        if ready {
            service.status.service_id = format!("svc-{service_name}");
            service.status.conditions.mark_true(READY, "Setup complete");
        }
        self.services().create(&service).await.unwrap()
    }

    /// Store a `KeystoneEndpoint` with the given declared endpoints
    pub async fn seed_endpoint(&self, name: &str, endpoints: &[(&str, &str)]) -> KeystoneEndpoint {
        let spec = endpoints
            .iter()
            .fold(KeystoneEndpointSpec::new(name), |spec, (endpoint_type, url)| {
                spec.with_endpoint(*endpoint_type, *url)
            });
        self.endpoints()
            .create(&KeystoneEndpoint::new(NAMESPACE, name, spec))
            .await
            .unwrap()
    }

    pub async fn endpoint(&self, name: &str) -> Option<KeystoneEndpoint> {
        self.endpoints().get(name).await.unwrap()
    }

    pub async fn reconcile(&self, name: &str) -> Result<Outcome> {
        self.reconciler.reconcile(NAMESPACE, name).await
    }

    /// Run passes until one stops outside `Initializing`
    pub async fn reconcile_past_init(&self, name: &str) -> Result<Outcome> {
        for _ in 0..5 {
            let outcome = self.reconcile(name).await?;
            if outcome.phase != keystone_endpoint_core::Phase::Initializing {
                return Ok(outcome);
            }
        }
        panic!("{name} never left the initializing phase");
    }

    /// Replace the declared endpoints of `name`
    pub async fn redeclare(&self, name: &str, endpoints: &[(&str, &str)]) {
        let mut instance = self.endpoint(name).await.unwrap();
        instance.spec.endpoints = endpoints
            .iter()
            .map(|(t, u)| (t.to_string(), u.to_string()))
            .collect();
        self.endpoints().update(&instance).await.unwrap();
    }
}
