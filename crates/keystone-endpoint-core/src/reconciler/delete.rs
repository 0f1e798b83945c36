//! Delete paths

use super::{Outcome, Phase, Reconciler, dependency_finalizer, keystone_service, own_finalizer};
use crate::Result;
use crate::availability::Availability;
use crate::resource::{KeystoneApi, KeystoneEndpoint, KeystoneService};
use crate::store::Api;
use crate::traits::{EndpointAdmin, EndpointRequest};
use tracing::{debug, info};

impl Reconciler {
    /// Remove remote endpoints (when a client is given), then release every
    /// finalizer this instance holds.
    ///
    /// Every declared type is deleted remotely, recorded or not; deletes of
    /// absent endpoints succeed.
    pub(super) async fn reconcile_delete(
        &self,
        instance: &mut KeystoneEndpoint,
        admin: Option<&dyn EndpointAdmin>,
        keystone_api: Option<&KeystoneApi>,
    ) -> Result<Outcome> {
        Phase::Deleting.enter();
        info!("Reconciling endpoint delete");

        match admin {
            // An empty service ID filter matches endpoints of every service
            Some(_) if instance.status.service_id.is_empty() => {
                debug!("No service ID recorded, skipping remote endpoint deletion");
            }
            Some(admin) => {
                for endpoint_type in instance.spec.endpoints.keys() {
                    let availability = Availability::resolve(endpoint_type)?;
                    admin
                        .delete_endpoint(&EndpointRequest {
                            name: instance.spec.service_name.clone(),
                            service_id: instance.status.service_id.clone(),
                            availability,
                            url: String::new(),
                        })
                        .await?;
                }
            }
            None => {}
        }

        instance.status.endpoint_ids.clear();
        instance.status.endpoints.clear();

        self.release_dependencies(instance, keystone_api).await?;

        instance.metadata.finalizers.remove(&own_finalizer());
        info!("Reconciled endpoint delete successfully");

        Ok(Outcome::done(Phase::Deleting))
    }

    /// Release finalizers without touching the identity service
    ///
    /// Used when the identity API itself is being deleted: its backing
    /// database goes away with it and the API may no longer answer.
    pub(super) async fn reconcile_delete_finalizers_only(
        &self,
        instance: &mut KeystoneEndpoint,
        keystone_api: &KeystoneApi,
    ) -> Result<Outcome> {
        Phase::Deleting.enter();
        info!("Reconciling endpoint delete while KeystoneAPI is being deleted");

        self.release_dependencies(instance, Some(keystone_api)).await?;

        instance.metadata.finalizers.remove(&own_finalizer());
        info!("Reconciled endpoint delete successfully");

        Ok(Outcome::done(Phase::Deleting))
    }

    async fn release_dependencies(
        &self,
        instance: &KeystoneEndpoint,
        keystone_api: Option<&KeystoneApi>,
    ) -> Result<()> {
        let marker = dependency_finalizer(instance);
        let namespace = &instance.metadata.namespace;

        let services = Api::<KeystoneService>::namespaced(self.store.clone(), namespace);
        if let Some(service) = keystone_service(&services, &instance.spec.service_name).await? {
            self.finalizers
                .release(&services, &service.metadata.name, &marker)
                .await?;
        }

        if let Some(keystone_api) = keystone_api {
            let apis = Api::<KeystoneApi>::namespaced(self.store.clone(), namespace);
            self.finalizers
                .release(&apis, &keystone_api.metadata.name, &marker)
                .await?;
        }

        Ok(())
    }
}
