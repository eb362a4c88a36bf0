//! Release computation.
//!
//! Given a release spec and a [`ReleaseContext`], figure out which containers of which workloads
//! need to move to which image, and why the others don't.

mod automated;
mod filter;
mod images;
mod pattern;
mod release_image;
mod select;

#[cfg(test)]
pub(crate) mod fixture;

pub use filter::{Scope, WorkloadFilter};
pub use images::ImageRepos;
pub use pattern::Pattern;
pub use select::select_workloads;

use crate::manifests::{self, WorkloadDefinition};
use crate::registry::{self, Registry};
use std::collections::BTreeSet;
use tagsync_api::{
    ContainerUpdate, ImageRef, Policy, PolicySet, ReleaseKind, ReleaseResult, ReleaseSpec,
    ResourceId, WorkloadResult,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("registry: {0}")]
    Registry(#[from] registry::Error),
    #[error("manifests: {0}")]
    Manifest(#[from] manifests::Error),
    #[error("image {0} does not exist")]
    ImageNotFound(ImageRef),
    #[error("workload {0} is running, but is not defined")]
    Undefined(ResourceId),
}

/// A container, with the image it runs.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Container {
    pub name: String,
    pub image: ImageRef,
}

/// Live cluster state of one workload.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: ResourceId,
    pub containers: Vec<Container>,
    pub policies: PolicySet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antecedent: Option<ResourceId>,
    /// Why the containers could not be reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excuse: Option<String>,
}

/// Working record for one workload during a release computation.
#[derive(Clone, Debug)]
pub struct WorkloadUpdate {
    pub id: ResourceId,
    /// Live state, attached once the cluster reported the workload as running.
    pub workload: Option<Workload>,
    pub definition: WorkloadDefinition,
    pub updates: Vec<ContainerUpdate>,
}

impl WorkloadUpdate {
    pub fn new(definition: WorkloadDefinition) -> Self {
        Self {
            id: definition.id().clone(),
            workload: None,
            definition,
            updates: vec![],
        }
    }

    /// Evaluate filters in order, returning the first rejection.
    pub fn filter(&self, filters: &[WorkloadFilter]) -> Option<WorkloadResult> {
        filters.iter().find_map(|f| f.filter(self))
    }

    /// Live containers, empty if the workload is not running.
    pub fn containers(&self) -> &[Container] {
        self.workload
            .as_ref()
            .map(|w| w.containers.as_slice())
            .unwrap_or_default()
    }

    /// Policies, as declared by the manifest.
    pub fn policies(&self) -> &PolicySet {
        self.definition.policies()
    }

    /// The tag filter pattern for one container.
    ///
    /// Returns `None` if the policy holds a pattern which cannot be parsed.
    pub fn tag_pattern(&self, container: &str) -> Option<Pattern> {
        match self.policies().tag_pattern(container) {
            None => Some(Pattern::All),
            Some(pattern) => match pattern.parse() {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::warn!(workload = %self.id, container, "Ignoring tag filter: {err}");
                    None
                }
            },
        }
    }
}

/// Everything a release computation needs to know about the world.
pub trait ReleaseContext {
    type Registry: Registry;

    /// All workloads defined in the manifests, without live state.
    async fn defined_workloads(&self) -> Result<Vec<WorkloadUpdate>, Error>;

    /// Live state of those of the requested workloads which are running.
    async fn running_workloads(&self, ids: &[ResourceId]) -> Result<Vec<Workload>, Error>;

    /// Workloads carrying a boolean policy.
    async fn workloads_with_policy(&self, policy: &Policy) -> Result<BTreeSet<ResourceId>, Error>;

    fn registry(&self) -> &Self::Registry;

    /// Namespaces (and kinds) in scope, empty for everything.
    fn scope(&self) -> &[Scope] {
        &[]
    }
}

/// A strategy for deciding target images.
pub trait Release {
    async fn calculate_release<C: ReleaseContext>(
        &self,
        ctx: &C,
    ) -> Result<(Vec<WorkloadUpdate>, ReleaseResult), Error>;

    fn release_kind(&self) -> ReleaseKind;

    fn commit_message(&self, result: &ReleaseResult) -> String;
}

impl Release for ReleaseSpec {
    async fn calculate_release<C: ReleaseContext>(
        &self,
        ctx: &C,
    ) -> Result<(Vec<WorkloadUpdate>, ReleaseResult), Error> {
        match self {
            Self::Image(spec) => spec.calculate_release(ctx).await,
            Self::Automated(spec) => spec.calculate_release(ctx).await,
        }
    }

    fn release_kind(&self) -> ReleaseKind {
        match self {
            Self::Image(spec) => spec.release_kind(),
            Self::Automated(spec) => spec.release_kind(),
        }
    }

    fn commit_message(&self, result: &ReleaseResult) -> String {
        match self {
            Self::Image(spec) => spec.commit_message(result),
            Self::Automated(spec) => spec.commit_message(result),
        }
    }
}
