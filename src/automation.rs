//! Finds newer images for workloads which opted into automated releases.

use crate::job::{Queue, PRIORITY_AUTOMATED};
use crate::manifests::{Manifests, WorkloadDefinition};
use crate::registry::{Cache, Registry};
use crate::store::Store;
use crate::update::{ImageRepos, Scope, Workload, WorkloadUpdate};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tagsync_api::{Automated, CanonicalName, ImageRef, Policy};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Triggers a scan for the workloads using a repository.
#[derive(Clone, Debug)]
pub struct Notifier(mpsc::UnboundedSender<CanonicalName>);

impl Notifier {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<CanonicalName>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    pub fn notify(&self, image: &ImageRef) {
        let name = image.canonical_name();
        debug!(repository = %name, "Image notification");
        // the scanner only stops with the process
        let _ = self.0.send(name);
    }
}

pub struct Automation<R> {
    queue: Queue,
    store: Store,
    manifests: Manifests,
    registry: Cache<R>,
    scope: Vec<Scope>,
}

impl<R: Registry> Automation<R> {
    pub fn new(
        queue: Queue,
        store: Store,
        manifests: Manifests,
        registry: Cache<R>,
        scope: Vec<Scope>,
    ) -> Self {
        Self {
            queue,
            store,
            manifests,
            registry,
            scope,
        }
    }

    /// Scan periodically, and whenever notified.
    pub fn run(self, period: Duration) -> (Notifier, impl Future<Output = anyhow::Result<()>>) {
        let (notifier, mut rx) = Notifier::channel();

        let runner = async move {
            let mut interval = tokio::time::interval(period);
            loop {
                let only = tokio::select! {
                    _ = interval.tick() => None,
                    Some(name) = rx.recv() => {
                        self.registry.invalidate(&name);
                        Some(name)
                    }
                };

                if let Err(err) = self.scan(only.as_ref()).await {
                    warn!("Automation scan failed: {err:#}");
                }
            }
        };

        (notifier, runner)
    }

    async fn scan(&self, only: Option<&CanonicalName>) -> anyhow::Result<()> {
        let manifests = self.manifests.clone();
        let definitions = tokio::task::spawn_blocking(move || manifests.load()).await??;

        let candidates = candidates(definitions, self.store.all(), &self.scope, only);
        if candidates.is_empty() {
            return Ok(());
        }

        let repos = ImageRepos::fetch_updatable(&self.registry, &candidates).await?;
        let changes = calculate_changes(&candidates, &repos);
        if changes.is_empty() {
            debug!(workloads = candidates.len(), "All automated workloads are up to date");
            return Ok(());
        }

        info!(changes = changes.changes.len(), "Submitting automated release");
        self.queue.submit(changes, PRIORITY_AUTOMATED);

        Ok(())
    }
}

/// Running workloads which are automated, and neither locked nor ignored.
///
/// Optionally only those using a repository.
pub fn candidates(
    definitions: Vec<WorkloadDefinition>,
    running: Vec<Workload>,
    scope: &[Scope],
    only: Option<&CanonicalName>,
) -> Vec<WorkloadUpdate> {
    let mut running: HashMap<_, _> = running.into_iter().map(|w| (w.id.clone(), w)).collect();

    definitions
        .into_iter()
        .filter(|d| scope.is_empty() || scope.iter().any(|s| s.matches(d.id())))
        .filter_map(|definition| {
            let workload = running.remove(definition.id())?;

            let has = |policy| definition.policies().has(&policy) || workload.policies.has(&policy);
            if !has(Policy::Automated) || has(Policy::Locked) || has(Policy::Ignore) {
                return None;
            }

            if let Some(name) = only {
                if !workload
                    .containers
                    .iter()
                    .any(|c| &c.image.canonical_name() == name)
                {
                    return None;
                }
            }

            let mut update = WorkloadUpdate::new(definition);
            update.workload = Some(workload);
            Some(update)
        })
        .collect()
}

/// A change for every container not running the latest image allowed by its tag filter.
pub fn calculate_changes(candidates: &[WorkloadUpdate], repos: &ImageRepos) -> Automated {
    let mut changes = Automated::default();

    for candidate in candidates {
        for container in candidate.containers() {
            let Some(pattern) = candidate.tag_pattern(&container.name) else {
                continue;
            };
            let Some(latest) = repos.latest(&container.image.canonical_name(), &pattern) else {
                continue;
            };
            if latest.id.same_canonical_ref(&container.image) {
                continue;
            }
            let Some(tag) = latest.id.tag() else {
                continue;
            };

            debug!(workload = %candidate.id, container = %container.name, %tag, "Newer image");
            changes.add(
                candidate.id.clone(),
                &container.name,
                container.image.with_tag(tag),
            );
        }
    }

    changes
}
