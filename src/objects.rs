//! Reading workloads out of Kubernetes objects.

use crate::update::{Container, Workload};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tagsync_api::policy::ANNOTATION_PREFIX;
use tagsync_api::{image, ImageRef, PolicySet, ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container {0} has no image")]
    MissingImage(String),
    #[error("container {0}: {1}")]
    Image(String, #[source] image::ParseError),
}

/// A Kubernetes object which runs containers from a pod template.
pub trait WorkloadObject: Resource<DynamicType = ()> + Clone {
    fn pod_template(&self) -> Option<&PodTemplateSpec>;
}

impl WorkloadObject for Deployment {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl WorkloadObject for DaemonSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl WorkloadObject for StatefulSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl WorkloadObject for CronJob {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .map(|s| &s.template)
    }
}

/// Lower case kind of a workload type, as used in resource IDs.
pub fn kind<K: WorkloadObject>() -> String {
    K::kind(&()).to_lowercase()
}

/// The ID of an object, `None` if it has no name.
pub fn resource_id<K: WorkloadObject>(object: &K) -> Option<ResourceId> {
    let name = object.meta().name.clone()?;
    Some(ResourceId::new(
        object.namespace().unwrap_or_default(),
        K::kind(&()),
        name,
    ))
}

/// Convert an object into a workload, `None` if it cannot be identified.
pub fn to_workload<K: WorkloadObject>(object: &K) -> Option<Workload> {
    let id = resource_id(object)?;

    let (containers, excuse) = match object.pod_template().map(containers) {
        None => (vec![], Some("no pod template".to_string())),
        Some(Err(err)) => (vec![], Some(err.to_string())),
        Some(Ok(containers)) if containers.is_empty() => {
            (vec![], Some("no containers declared".to_string()))
        }
        Some(Ok(containers)) => (containers, None),
    };

    Some(Workload {
        id,
        containers,
        policies: PolicySet::from_annotations(object.annotations()),
        antecedent: antecedent(object.annotations()),
        excuse,
    })
}

/// Containers and init containers of a pod template, in declaration order.
pub fn containers(template: &PodTemplateSpec) -> Result<Vec<Container>, Error> {
    let Some(spec) = &template.spec else {
        return Ok(vec![]);
    };

    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .map(|c| {
            let image = c
                .image
                .as_deref()
                .ok_or_else(|| Error::MissingImage(c.name.clone()))?;
            Ok(Container {
                name: c.name.clone(),
                image: ImageRef::parse(image).map_err(|err| Error::Image(c.name.clone(), err))?,
            })
        })
        .collect()
}

/// The workload this one was created by, if any.
pub fn antecedent(annotations: &BTreeMap<String, String>) -> Option<ResourceId> {
    annotations
        .get(&format!("{ANNOTATION_PREFIX}antecedent"))
        .and_then(|id| id.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::{Container as PodContainer, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use tagsync_api::Policy;

    fn deployment(containers: &[(&str, Option<&str>)]) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("web".into()),
                namespace: Some("default".into()),
                annotations: Some(
                    [
                        ("tagsync.io/automated", "true"),
                        ("tagsync.io/antecedent", "default:helmrelease/web"),
                    ]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                ),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: containers
                            .iter()
                            .map(|(name, image)| PodContainer {
                                name: name.to_string(),
                                image: image.map(ToString::to_string),
                                ..Default::default()
                            })
                            .collect(),
                        init_containers: Some(vec![PodContainer {
                            name: "init".into(),
                            image: Some("busybox:1".into()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn deployment_to_workload() {
        let workload = to_workload(&deployment(&[("web", Some("nginx:1.25"))])).unwrap();

        assert_eq!(workload.id.to_string(), "default:deployment/web");
        let names: Vec<_> = workload.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["web", "init"]);
        assert!(workload.policies.has(&Policy::Automated));
        assert_eq!(
            workload.antecedent.map(|id| id.to_string()).as_deref(),
            Some("default:helmrelease/web")
        );
        assert_eq!(workload.excuse, None);
    }

    #[test]
    fn excuses() {
        let workload = to_workload(&deployment(&[("web", None)])).unwrap();
        assert_eq!(workload.excuse.as_deref(), Some("container web has no image"));
        assert!(workload.containers.is_empty());

        let mut d = deployment(&[]);
        d.spec = None;
        let workload = to_workload(&d).unwrap();
        assert_eq!(workload.excuse.as_deref(), Some("no pod template"));
    }

    #[test]
    fn kinds() {
        assert_eq!(kind::<Deployment>(), "deployment");
        assert_eq!(kind::<CronJob>(), "cronjob");
        assert!(to_workload(&Deployment::default()).is_none());
    }
}
