use crate::image::ImageRef;
use crate::resource::ResourceId;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

/// Reasons reported to operators, verbatim.
pub mod reason {
    pub const LOCKED: &str = "locked";
    pub const IGNORE: &str = "ignore";
    pub const NOT_INCLUDED: &str = "not included";
    pub const EXCLUDED: &str = "excluded";
    pub const DIFFERENT_IMAGE: &str = "a different image";
    pub const NOT_IN_CLUSTER: &str = "not running in cluster";
    pub const NOT_ACCESSIBLE_IN_CLUSTER: &str = "not accessible in cluster";
    pub const NOT_IN_REPO: &str = "not found in repository";
    pub const IMAGE_NOT_FOUND: &str = "cannot find one or more images";
    pub const IMAGE_UP_TO_DATE: &str = "image(s) up to date";
    pub const DOES_NOT_USE_IMAGE: &str = "does not use image(s)";
    pub const NO_UPDATES_REQUESTED: &str = "no updates requested";
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    /// At least one container was changed.
    Success,
    /// The workload's containers could not be read.
    Failed,
    /// Eligible, but locked, up to date, or named and not found.
    Skipped,
    /// Filtered out.
    Ignored,
    /// An explicitly requested image could not be found.
    Unknown,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Ignored => "ignored",
            Self::Unknown => "unknown",
        })
    }
}

/// One container's image change.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerUpdate {
    pub container: String,
    pub current: ImageRef,
    pub target: ImageRef,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadResult {
    pub status: WorkloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_container: Vec<ContainerUpdate>,
}

impl WorkloadResult {
    pub fn success(per_container: Vec<ContainerUpdate>) -> Self {
        Self {
            status: WorkloadStatus::Success,
            error: None,
            per_container,
        }
    }

    pub fn rejected(status: WorkloadStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            per_container: vec![],
        }
    }

    pub fn skipped(error: impl Into<String>) -> Self {
        Self::rejected(WorkloadStatus::Skipped, error)
    }

    pub fn ignored(error: impl Into<String>) -> Self {
        Self::rejected(WorkloadStatus::Ignored, error)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::rejected(WorkloadStatus::Failed, error)
    }

    pub fn unknown(error: impl Into<String>) -> Self {
        Self::rejected(WorkloadStatus::Unknown, error)
    }
}

/// Outcome of a release computation, by workload.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ReleaseResult(BTreeMap<ResourceId, WorkloadResult>);

impl ReleaseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&WorkloadResult> {
        self.0.get(id)
    }

    pub fn is_decided(&self, id: &ResourceId) -> bool {
        self.0.contains_key(id)
    }

    /// Record the outcome for a workload which has not been decided yet.
    ///
    /// Returns `false`, leaving the existing outcome in place, if there already is one.
    pub fn decide(&mut self, id: ResourceId, result: WorkloadResult) -> bool {
        match self.0.entry(id) {
            Entry::Vacant(entry) => {
                entry.insert(result);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Workload IDs, ordered.
    pub fn workload_ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &WorkloadResult)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count(&self, status: WorkloadStatus) -> usize {
        self.0.values().filter(|r| r.status == status).count()
    }

    /// Summary of failed workloads, `None` if nothing failed.
    pub fn error(&self) -> Option<String> {
        let failed: Vec<_> = self
            .0
            .iter()
            .filter(|(_, r)| r.status == WorkloadStatus::Failed)
            .collect();

        match failed.as_slice() {
            [] => None,
            [(id, r)] => Some(format!(
                "{id} failed: {}",
                r.error.as_deref().unwrap_or_default()
            )),
            _ => Some(format!(
                "Multiple workloads failed: {}",
                failed
                    .iter()
                    .map(|(id, _)| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    /// Render as an operator table.
    ///
    /// Verbosity 0 hides skipped and ignored workloads, 1 hides ignored ones, 2 shows everything.
    pub fn table(&self, verbosity: u8) -> ResultTable<'_> {
        ResultTable {
            result: self,
            verbosity,
        }
    }
}

impl FromIterator<(ResourceId, WorkloadResult)> for ReleaseResult {
    fn from_iter<T: IntoIterator<Item = (ResourceId, WorkloadResult)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub struct ResultTable<'a> {
    result: &'a ReleaseResult,
    verbosity: u8,
}

impl ResultTable<'_> {
    fn rows(&self) -> Vec<[String; 3]> {
        let mut rows = vec![["WORKLOAD".into(), "STATUS".into(), "UPDATES".into()]];

        for (id, result) in self.result.iter() {
            match result.status {
                WorkloadStatus::Ignored if self.verbosity < 2 => continue,
                WorkloadStatus::Skipped if self.verbosity < 1 => continue,
                _ => {}
            }

            let mut details = result
                .error
                .iter()
                .cloned()
                .chain(result.per_container.iter().map(|u| {
                    format!(
                        "{}: {} -> {}",
                        u.container,
                        u.current,
                        u.target.tag().unwrap_or_default()
                    )
                }));

            rows.push([
                id.to_string(),
                result.status.to_string(),
                details.next().unwrap_or_default(),
            ]);
            for detail in details {
                rows.push([String::new(), String::new(), detail]);
            }
        }

        rows
    }
}

impl fmt::Display for ResultTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.rows();
        let width = |col: usize| rows.iter().map(|r| r[col].len()).max().unwrap_or_default() + 2;
        let (first, second) = (width(0), width(1));

        for [id, status, detail] in &rows {
            let line = format!("{id:first$}{status:second$}{detail}");
            writeln!(f, "{}", line.trim_end())?;
        }

        Ok(())
    }
}
