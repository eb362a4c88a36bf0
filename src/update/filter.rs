use super::WorkloadUpdate;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tagsync_api::result::reason;
use tagsync_api::{ImageRef, ResourceId, WorkloadResult};

/// An entry of the namespace allow-list, optionally narrowed to one kind.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Scope {
    pub namespace: String,
    pub kind: Option<String>,
}

impl Scope {
    pub fn matches(&self, id: &ResourceId) -> bool {
        self.namespace == id.namespace()
            && self
                .kind
                .as_deref()
                .map(|kind| kind == id.kind())
                .unwrap_or(true)
    }
}

impl FromStr for Scope {
    type Err = std::convert::Infallible;

    /// Parse `namespace` or `namespace:kind`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once(':') {
            Some((namespace, kind)) => Scope {
                namespace: namespace.to_string(),
                kind: Some(kind.to_lowercase()),
            },
            None => Scope {
                namespace: s.to_string(),
                kind: None,
            },
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{}:{kind}", self.namespace),
            None => f.write_str(&self.namespace),
        }
    }
}

/// A predicate over a workload, carrying the reason for a rejection.
#[derive(Clone, Debug)]
pub enum WorkloadFilter {
    /// Passes only the listed workloads. An empty list rejects everything.
    Include(BTreeSet<ResourceId>),
    Exclude(BTreeSet<ResourceId>),
    Locked(BTreeSet<ResourceId>),
    Ignore(BTreeSet<ResourceId>),
    /// Passes everything if empty.
    Namespaces(Vec<Scope>),
    /// Passes workloads running an image from the same repository.
    SpecificImage(ImageRef),
}

impl WorkloadFilter {
    /// Returns the rejection, or `None` if the filter has no objection.
    pub fn filter(&self, u: &WorkloadUpdate) -> Option<WorkloadResult> {
        match self {
            Self::Include(ids) => {
                (!ids.contains(&u.id)).then(|| WorkloadResult::ignored(reason::NOT_INCLUDED))
            }
            Self::Exclude(ids) => {
                ids.contains(&u.id).then(|| WorkloadResult::ignored(reason::EXCLUDED))
            }
            Self::Locked(ids) => {
                ids.contains(&u.id).then(|| WorkloadResult::skipped(reason::LOCKED))
            }
            Self::Ignore(ids) => {
                ids.contains(&u.id).then(|| WorkloadResult::ignored(reason::IGNORE))
            }
            Self::Namespaces(scopes) => (!scopes.is_empty()
                && !scopes.iter().any(|s| s.matches(&u.id)))
            .then(|| WorkloadResult::ignored(reason::NOT_INCLUDED)),
            Self::SpecificImage(image) => {
                let containers = u.containers();
                if containers.is_empty() {
                    return Some(WorkloadResult::ignored(reason::NOT_IN_CLUSTER));
                }
                let name = image.canonical_name();
                (!containers.iter().any(|c| c.image.canonical_name() == name))
                    .then(|| WorkloadResult::ignored(reason::DIFFERENT_IMAGE))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::fixture::{definition, workload};
    use crate::update::WorkloadUpdate;
    use tagsync_api::WorkloadStatus;

    fn id(s: &str) -> ResourceId {
        s.parse().unwrap()
    }

    fn ids(ids: &[&str]) -> BTreeSet<ResourceId> {
        ids.iter().map(|s| id(s)).collect()
    }

    fn update(s: &str, containers: &[(&str, &str)]) -> WorkloadUpdate {
        let mut u = WorkloadUpdate::new(definition(s, containers));
        u.workload = Some(workload(s, containers));
        u
    }

    #[test]
    fn include_exclude() {
        let u = update("default:deployment/web", &[("web", "nginx:1")]);

        assert_eq!(WorkloadFilter::Include(ids(&["default:deployment/web"])).filter(&u), None);
        assert_eq!(
            WorkloadFilter::Include(ids(&[])).filter(&u),
            Some(WorkloadResult::ignored(reason::NOT_INCLUDED))
        );
        assert_eq!(WorkloadFilter::Exclude(ids(&[])).filter(&u), None);
        assert_eq!(
            WorkloadFilter::Exclude(ids(&["default:deployment/web"])).filter(&u),
            Some(WorkloadResult::ignored(reason::EXCLUDED))
        );
    }

    #[test]
    fn locked_and_ignore() {
        let u = update("default:deployment/web", &[("web", "nginx:1")]);
        let locked = WorkloadFilter::Locked(ids(&["default:deployment/web"]))
            .filter(&u)
            .unwrap();
        assert_eq!(locked.status, WorkloadStatus::Skipped);
        assert_eq!(locked.error.as_deref(), Some("locked"));

        let ignored = WorkloadFilter::Ignore(ids(&["default:deployment/web"]))
            .filter(&u)
            .unwrap();
        assert_eq!(ignored.status, WorkloadStatus::Ignored);
    }

    #[test]
    fn namespaces() {
        let u = update("team:deployment/web", &[("web", "nginx:1")]);

        assert_eq!(WorkloadFilter::Namespaces(vec![]).filter(&u), None);
        assert_eq!(
            WorkloadFilter::Namespaces(vec!["team".parse().unwrap()]).filter(&u),
            None
        );
        assert_eq!(
            WorkloadFilter::Namespaces(vec!["team:Deployment".parse().unwrap()]).filter(&u),
            None
        );
        assert_eq!(
            WorkloadFilter::Namespaces(vec!["team:daemonset".parse().unwrap()]).filter(&u),
            Some(WorkloadResult::ignored(reason::NOT_INCLUDED))
        );
        assert_eq!(
            WorkloadFilter::Namespaces(vec!["other".parse().unwrap()]).filter(&u),
            Some(WorkloadResult::ignored(reason::NOT_INCLUDED))
        );
    }

    #[test]
    fn specific_image() {
        let filter = WorkloadFilter::SpecificImage("index.docker.io/library/nginx:2".parse().unwrap());

        let u = update(
            "default:deployment/web",
            &[("sidecar", "envoy:1"), ("web", "nginx:1")],
        );
        assert_eq!(filter.filter(&u), None);

        let u = update("default:deployment/web", &[("web", "quay.io/nginx:1")]);
        assert_eq!(
            filter.filter(&u),
            Some(WorkloadResult::ignored(reason::DIFFERENT_IMAGE))
        );

        let u = update("default:deployment/web", &[]);
        assert_eq!(
            filter.filter(&u),
            Some(WorkloadResult::ignored(reason::NOT_IN_CLUSTER))
        );
    }

    #[test]
    fn short_circuit() {
        let u = update("default:deployment/web", &[("web", "nginx:1")]);
        let filters = [
            WorkloadFilter::Exclude(ids(&[])),
            WorkloadFilter::Locked(ids(&["default:deployment/web"])),
            WorkloadFilter::Exclude(ids(&["default:deployment/web"])),
        ];

        assert_eq!(
            u.filter(&filters),
            Some(WorkloadResult::skipped(reason::LOCKED))
        );
        assert_eq!(u.filter(&filters[..1]), None);
        assert_eq!(u.filter(&[]), None);
    }
}
