use crate::manifests::{self, Manifests, WorkloadDefinition};
use crate::registry::Registry;
use crate::store::Store;
use crate::update::{Error, ReleaseContext, Scope, Workload, WorkloadUpdate};
use std::collections::BTreeSet;
use tagsync_api::{Policy, ResourceId};

/// The manifest checkout, as loaded for one job, and the live cluster.
pub struct LiveContext<'a, R> {
    store: &'a Store,
    definitions: Vec<WorkloadDefinition>,
    registry: &'a R,
    scope: &'a [Scope],
}

impl<'a, R: Registry> LiveContext<'a, R> {
    pub fn new(
        store: &'a Store,
        definitions: Vec<WorkloadDefinition>,
        registry: &'a R,
        scope: &'a [Scope],
    ) -> Self {
        Self {
            store,
            definitions,
            registry,
            scope,
        }
    }

    pub fn load(
        store: &'a Store,
        manifests: &Manifests,
        registry: &'a R,
        scope: &'a [Scope],
    ) -> Result<Self, manifests::Error> {
        Ok(Self::new(store, manifests.load()?, registry, scope))
    }
}

impl<R: Registry> ReleaseContext for LiveContext<'_, R> {
    type Registry = R;

    async fn defined_workloads(&self) -> Result<Vec<WorkloadUpdate>, Error> {
        Ok(self
            .definitions
            .iter()
            .cloned()
            .map(WorkloadUpdate::new)
            .collect())
    }

    async fn running_workloads(&self, ids: &[ResourceId]) -> Result<Vec<Workload>, Error> {
        Ok(self.store.get(ids))
    }

    /// Policies count when either the manifest or the live object declares them.
    async fn workloads_with_policy(&self, policy: &Policy) -> Result<BTreeSet<ResourceId>, Error> {
        let mut ids: BTreeSet<_> = self
            .definitions
            .iter()
            .filter(|d| d.policies().has(policy))
            .map(|d| d.id().clone())
            .collect();

        ids.extend(
            self.store
                .all()
                .into_iter()
                .filter(|w| w.policies.has(policy))
                .map(|w| w.id),
        );

        Ok(ids)
    }

    fn registry(&self) -> &R {
        self.registry
    }

    fn scope(&self) -> &[Scope] {
        self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Event;
    use crate::update::fixture::{definition, manifest, workload, MemoryRegistry};
    use tagsync_api::PolicySet;

    async fn store(workloads: Vec<Workload>) -> Store {
        let (store, runner) = Store::new(futures::stream::iter(
            workloads.into_iter().map(|w| Ok(Event::Applied(w))),
        ));
        runner.await.unwrap();
        store
    }

    #[tokio::test]
    async fn policies_from_both_sides() {
        let mut live = workload("default:deployment/db", &[("db", "postgres:15")]);
        live.policies = PolicySet::default().set(Policy::Locked, "true");
        let store = store(vec![
            workload("default:deployment/web", &[("web", "nginx:1")]),
            live,
        ])
        .await;

        let registry = MemoryRegistry::default();
        let ctx = LiveContext::new(
            &store,
            vec![
                manifest(
                    "default:deployment/web",
                    &[("web", "nginx:1")],
                    &[("tagsync.io/locked", "true")],
                ),
                definition("default:deployment/db", &[("db", "postgres:15")]),
                definition("default:deployment/api", &[("api", "org/api:1")]),
            ],
            &registry,
            &[],
        );

        let locked: Vec<_> = ctx
            .workloads_with_policy(&Policy::Locked)
            .await
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(locked, vec!["default:deployment/db", "default:deployment/web"]);

        assert_eq!(ctx.defined_workloads().await.unwrap().len(), 3);
        let running = ctx
            .running_workloads(&[
                "default:deployment/api".parse().unwrap(),
                "default:deployment/web".parse().unwrap(),
            ])
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("web.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    spec:\n      containers:\n      - name: web\n        image: nginx:1\n",
        )
        .unwrap();

        let store = Store::default();
        let registry = MemoryRegistry::default();
        let ctx = LiveContext::load(&store, &Manifests::new(dir.path()), &registry, &[]).unwrap();
        let defined = ctx.defined_workloads().await.unwrap();
        assert_eq!(defined.len(), 1);
        assert_eq!(defined[0].id.to_string(), "default:deployment/web");
    }
}
