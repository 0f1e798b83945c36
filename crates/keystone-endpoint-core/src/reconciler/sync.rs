//! Endpoint sync: retire endpoint types dropped from the spec, then
//! converge every declared type onto exactly one remote endpoint.

use crate::availability::Availability;
use crate::resource::{KeystoneEndpointSpec, KeystoneEndpointStatus};
use crate::traits::{EndpointAdmin, EndpointRequest};
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Run both passes against `admin`, recording results in `status`.
///
/// An ambiguous endpoint type leaves its status entry untouched and does not
/// stop the remaining types; the pass then fails naming the first one.
/// Unknown endpoint types and remote failures abort immediately.
pub(crate) async fn sync_endpoints(
    admin: &dyn EndpointAdmin,
    spec: &KeystoneEndpointSpec,
    status: &mut KeystoneEndpointStatus,
) -> Result<()> {
    retire(admin, spec, status).await?;
    converge(admin, spec, status).await
}

async fn retire(
    admin: &dyn EndpointAdmin,
    spec: &KeystoneEndpointSpec,
    status: &mut KeystoneEndpointStatus,
) -> Result<()> {
    let retired: Vec<String> = status
        .endpoint_ids
        .keys()
        .filter(|endpoint_type| !spec.endpoints.contains_key(*endpoint_type))
        .cloned()
        .collect();

    for endpoint_type in retired {
        let availability = Availability::resolve(&endpoint_type)?;
        info!(
            service = %spec.service_name,
            endpoint_type = %endpoint_type,
            "Deleting endpoint no longer declared"
        );

        admin
            .delete_endpoint(&EndpointRequest {
                name: spec.service_name.clone(),
                service_id: status.service_id.clone(),
                availability,
                url: String::new(),
            })
            .await?;

        status.forget_endpoint(&endpoint_type);
    }

    Ok(())
}

async fn converge(
    admin: &dyn EndpointAdmin,
    spec: &KeystoneEndpointSpec,
    status: &mut KeystoneEndpointStatus,
) -> Result<()> {
    let mut first_ambiguous: Option<Error> = None;

    for (endpoint_type, url) in &spec.endpoints {
        let availability = Availability::resolve(endpoint_type)?;
        let registered = admin
            .list_endpoints(&status.service_id, availability)
            .await?;

        let request = EndpointRequest {
            name: spec.service_name.clone(),
            service_id: status.service_id.clone(),
            availability,
            url: url.clone(),
        };

        let id = match registered.as_slice() {
            [] => {
                info!(endpoint_type = %endpoint_type, url = %url, "Creating endpoint");
                admin.create_endpoint(&request).await?
            }
            [current] if current.url != *url => {
                info!(
                    endpoint_type = %endpoint_type,
                    from = %current.url,
                    to = %url,
                    "Updating endpoint URL"
                );
                admin.update_endpoint(&request, &current.id).await?
            }
            [current] => {
                debug!(endpoint_type = %endpoint_type, id = %current.id, "Endpoint up to date");
                current.id.clone()
            }
            matches => {
                warn!(
                    service = %spec.service_name,
                    endpoint_type = %endpoint_type,
                    count = matches.len(),
                    "Multiple endpoints registered, leaving them for manual cleanup"
                );
                first_ambiguous.get_or_insert(Error::AmbiguousEndpoints {
                    service: spec.service_name.clone(),
                    endpoint_type: endpoint_type.clone(),
                    count: matches.len(),
                });
                continue;
            }
        };

        status.record_endpoint(endpoint_type, url, &id);
    }

    match first_ambiguous {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
