//! In-memory cluster, manifests and registry.

use super::{Container, Error, ReleaseContext, Scope, Workload, WorkloadUpdate};
use crate::manifests::WorkloadDefinition;
use crate::registry::{self, Registry};
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;
use std::fmt::Write;
use tagsync_api::{CanonicalName, ImageInfo, Policy, PolicySet, ResourceId};

fn containers(containers: &[(&str, &str)]) -> Vec<Container> {
    containers
        .iter()
        .map(|(name, image)| Container {
            name: name.to_string(),
            image: image.parse().unwrap(),
        })
        .collect()
}

/// A manifest for a workload, carrying some annotations.
pub fn manifest(
    id: &str,
    containers: &[(&str, &str)],
    annotations: &[(&str, &str)],
) -> WorkloadDefinition {
    let id: ResourceId = id.parse().unwrap();
    let kind = match id.kind() {
        "deployment" => "Deployment",
        "daemonset" => "DaemonSet",
        "statefulset" => "StatefulSet",
        kind => panic!("unsupported kind: {kind}"),
    };

    let mut yaml = format!(
        "apiVersion: apps/v1\nkind: {kind}\nmetadata:\n  name: {}\n  namespace: {}\n",
        id.name(),
        id.namespace()
    );
    if !annotations.is_empty() {
        yaml.push_str("  annotations:\n");
        for (key, value) in annotations {
            writeln!(yaml, "    {key}: \"{value}\"").unwrap();
        }
    }
    yaml.push_str("spec:\n  template:\n    spec:\n");
    if containers.is_empty() {
        yaml.push_str("      containers: []\n");
    } else {
        yaml.push_str("      containers:\n");
        for (name, image) in containers {
            writeln!(yaml, "      - name: {name}\n        image: {image}").unwrap();
        }
    }

    WorkloadDefinition::parse_file(format!("{}.yaml", id.name()), yaml.into_bytes())
        .unwrap()
        .remove(0)
}

pub fn definition(id: &str, containers: &[(&str, &str)]) -> WorkloadDefinition {
    manifest(id, containers, &[])
}

/// A running workload, without any policies.
pub fn workload(id: &str, running: &[(&str, &str)]) -> Workload {
    Workload {
        id: id.parse().unwrap(),
        containers: containers(running),
        policies: PolicySet::default(),
        antecedent: None,
        excuse: None,
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRegistry {
    images: Vec<ImageInfo>,
    failing: bool,
}

impl MemoryRegistry {
    /// Add an image, created at the given number of seconds since the epoch.
    pub fn with(mut self, image: &str, created: i64) -> Self {
        self.images.push(
            ImageInfo::new(image.parse().unwrap())
                .created_at(Utc.timestamp_opt(created, 0).unwrap()),
        );
        self
    }

    /// Fail all requests.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

impl Registry for MemoryRegistry {
    async fn tags(&self, name: &CanonicalName) -> Result<Vec<String>, registry::Error> {
        if self.failing {
            return Err(registry::Error::Authentication("access denied".into()));
        }

        let tags: Vec<_> = self
            .images
            .iter()
            .filter(|i| &i.id.canonical_name() == name)
            .filter_map(|i| i.id.tag().map(ToString::to_string))
            .collect();

        match tags.is_empty() {
            true => Err(registry::Error::NotFound(name.clone())),
            false => Ok(tags),
        }
    }

    async fn image_info(
        &self,
        name: &CanonicalName,
        tag: &str,
    ) -> Result<ImageInfo, registry::Error> {
        self.images
            .iter()
            .find(|i| &i.id.canonical_name() == name && i.id.tag() == Some(tag))
            .cloned()
            .ok_or_else(|| registry::Error::NotFound(name.clone()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryContext {
    definitions: Vec<WorkloadDefinition>,
    running: Vec<Workload>,
    registry: MemoryRegistry,
    scope: Vec<Scope>,
}

impl MemoryContext {
    pub fn new(registry: MemoryRegistry) -> Self {
        Self {
            registry,
            ..Default::default()
        }
    }

    pub fn define(mut self, definition: WorkloadDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn run(mut self, workload: Workload) -> Self {
        self.running.push(workload);
        self
    }

    pub fn with_registry(mut self, registry: MemoryRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_scope(mut self, scope: Vec<Scope>) -> Self {
        self.scope = scope;
        self
    }
}

impl ReleaseContext for MemoryContext {
    type Registry = MemoryRegistry;

    async fn defined_workloads(&self) -> Result<Vec<WorkloadUpdate>, Error> {
        Ok(self
            .definitions
            .iter()
            .cloned()
            .map(WorkloadUpdate::new)
            .collect())
    }

    async fn running_workloads(&self, ids: &[ResourceId]) -> Result<Vec<Workload>, Error> {
        Ok(self
            .running
            .iter()
            .filter(|w| ids.contains(&w.id))
            .cloned()
            .collect())
    }

    async fn workloads_with_policy(&self, policy: &Policy) -> Result<BTreeSet<ResourceId>, Error> {
        let defined = self
            .definitions
            .iter()
            .filter(|d| d.policies().has(policy))
            .map(|d| d.id().clone());
        let running = self
            .running
            .iter()
            .filter(|w| w.policies.has(policy))
            .map(|w| w.id.clone());

        Ok(defined.chain(running).collect())
    }

    fn registry(&self) -> &MemoryRegistry {
        &self.registry
    }

    fn scope(&self) -> &[Scope] {
        &self.scope
    }
}
