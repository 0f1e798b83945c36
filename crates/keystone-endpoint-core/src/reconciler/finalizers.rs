//! Finalizer placement on dependency objects
//!
//! Dependencies are shared between many endpoint instances, so every change
//! is a read-modify-write against the latest stored version, retried when
//! another writer got there first.

use crate::resource::{Finalizer, FinalizerSet, Resource};
use crate::store::Api;
use crate::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub(crate) struct FinalizerCoordinator {
    attempts: usize,
}

impl FinalizerCoordinator {
    pub(crate) fn new(attempts: usize) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    /// Place `marker` on the dependency `name`.
    ///
    /// Returns whether the stored object changed. A vanished dependency is
    /// an error: the marker could not be placed.
    pub(crate) async fn ensure<K: Resource>(
        &self,
        api: &Api<K>,
        name: &str,
        marker: &Finalizer,
    ) -> Result<bool> {
        self.modify(api, name, false, |set| set.add(marker.clone()))
            .await
    }

    /// Take `marker` off the dependency `name`.
    ///
    /// Returns whether the stored object changed. A vanished dependency
    /// holds no marker, so it is not an error.
    pub(crate) async fn release<K: Resource>(
        &self,
        api: &Api<K>,
        name: &str,
        marker: &Finalizer,
    ) -> Result<bool> {
        self.modify(api, name, true, |set| set.remove(marker))
            .await
    }

    async fn modify<K: Resource>(
        &self,
        api: &Api<K>,
        name: &str,
        missing_ok: bool,
        change: impl Fn(&mut FinalizerSet) -> bool,
    ) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let Some(mut object) = api.get(name).await? else {
                return if missing_ok {
                    Ok(false)
                } else {
                    Err(Error::not_found(format!(
                        "{}/{}/{}",
                        K::KIND,
                        api.namespace(),
                        name
                    )))
                };
            };

            if !change(&mut object.meta_mut().finalizers) {
                return Ok(false);
            }

            match api.update(&object).await {
                Ok(_) => return Ok(true),
                Err(e) if e.is_not_found() && missing_ok => return Ok(false),
                Err(e) if e.is_conflict() && attempt < self.attempts => {
                    debug!(
                        kind = K::KIND.as_str(),
                        name,
                        attempt,
                        "Finalizer update conflicted, retrying with latest version"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
