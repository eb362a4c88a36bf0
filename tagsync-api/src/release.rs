use crate::image::{self, ImageRef};
use crate::resource::{self, ResourceId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const ALL_LATEST: &str = "<all latest>";
const NO_UPDATES: &str = "<no updates>";
const ALL_WORKLOADS: &str = "<all>";

/// Plan only computes and reports, execute also commits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseKind {
    #[default]
    Plan,
    Execute,
}

impl fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plan => "plan",
            Self::Execute => "execute",
        })
    }
}

/// Which image(s) a release should move to.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageSpec {
    /// The latest image allowed by each container's tag filter.
    Latest,
    /// Select workloads, but do not change any image.
    NoUpdates,
    /// Exactly this image.
    Ref(ImageRef),
}

impl ImageSpec {
    /// Parse a sentinel or an image reference, which must name a tag.
    pub fn parse(s: &str) -> Result<Self, image::ParseError> {
        Ok(match s {
            ALL_LATEST => Self::Latest,
            NO_UPDATES => Self::NoUpdates,
            s => {
                let image: ImageRef = s.parse()?;
                if image.tag().is_none() {
                    return Err(image::ParseError::MissingTag(s.to_string()));
                }
                Self::Ref(image)
            }
        })
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(ALL_LATEST),
            Self::NoUpdates => f.write_str(NO_UPDATES),
            Self::Ref(image) => image.fmt(f),
        }
    }
}

impl TryFrom<String> for ImageSpec {
    type Error = image::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageSpec> for String {
    fn from(value: ImageSpec) -> Self {
        value.to_string()
    }
}

/// Which workloads a release targets.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceSpec {
    All,
    Id(ResourceId),
}

impl ResourceSpec {
    pub fn parse(s: &str) -> Result<Self, resource::ParseError> {
        Ok(match s {
            ALL_WORKLOADS => Self::All,
            s => Self::Id(s.parse()?),
        })
    }

    pub fn id(&self) -> Option<&ResourceId> {
        match self {
            Self::All => None,
            Self::Id(id) => Some(id),
        }
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(ALL_WORKLOADS),
            Self::Id(id) => id.fmt(f),
        }
    }
}

impl TryFrom<String> for ResourceSpec {
    type Error = resource::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceSpec> for String {
    fn from(value: ResourceSpec) -> Self {
        value.to_string()
    }
}

/// An explicit, or "latest image", release.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseImageSpec {
    pub workload_specs: Vec<ResourceSpec>,
    pub image_spec: ImageSpec,
    #[serde(default)]
    pub kind: ReleaseKind,
    #[serde(default)]
    pub excludes: Vec<ResourceId>,
    #[serde(default)]
    pub force: bool,
}

impl ReleaseImageSpec {
    /// Whether the release targets every workload.
    pub fn targets_all(&self) -> bool {
        self.workload_specs.contains(&ResourceSpec::All)
    }

    /// The concrete workload IDs named by this release.
    pub fn named_ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.workload_specs.iter().filter_map(ResourceSpec::id)
    }
}

/// A desired image change for one container of one workload.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub workload: ResourceId,
    pub container: String,
    pub image: ImageRef,
}

/// A release driven by a pre-computed list of changes.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automated {
    pub changes: Vec<Change>,
}

impl Automated {
    pub fn add(&mut self, workload: ResourceId, container: impl Into<String>, image: ImageRef) {
        self.changes.push(Change {
            workload,
            container: container.into(),
            image,
        });
    }

    /// Distinct workloads named by the changes.
    pub fn workload_ids(&self) -> BTreeSet<ResourceId> {
        self.changes.iter().map(|c| c.workload.clone()).collect()
    }

    /// Changes, grouped by workload.
    pub fn workload_map(&self) -> BTreeMap<&ResourceId, Vec<&Change>> {
        let mut map = BTreeMap::<_, Vec<_>>::new();
        for change in &self.changes {
            map.entry(&change.workload).or_default().push(change);
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReleaseSpec {
    Image(ReleaseImageSpec),
    Automated(Automated),
}

impl From<ReleaseImageSpec> for ReleaseSpec {
    fn from(value: ReleaseImageSpec) -> Self {
        Self::Image(value)
    }
}

impl From<Automated> for ReleaseSpec {
    fn from(value: Automated) -> Self {
        Self::Automated(value)
    }
}

/// A release, as requested over HTTP.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    /// An image reference, `<all latest>` or `<no updates>`.
    pub image: String,
    /// Workload IDs, or `<all>`.
    pub workloads: Vec<String>,
    #[serde(default)]
    pub kind: ReleaseKind,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid image: {0}")]
    Image(#[from] image::ParseError),
    #[error(transparent)]
    Workload(#[from] resource::ParseError),
    #[error("no workloads given")]
    NoWorkloads,
}

impl TryFrom<ReleaseRequest> for ReleaseImageSpec {
    type Error = RequestError;

    fn try_from(value: ReleaseRequest) -> Result<Self, Self::Error> {
        if value.workloads.is_empty() {
            return Err(RequestError::NoWorkloads);
        }

        Ok(Self {
            workload_specs: value
                .workloads
                .iter()
                .map(|w| ResourceSpec::parse(w))
                .collect::<Result<_, resource::ParseError>>()?,
            image_spec: ImageSpec::parse(&value.image)?,
            kind: value.kind,
            excludes: value
                .excludes
                .iter()
                .map(|e| ResourceId::parse(e))
                .collect::<Result<_, resource::ParseError>>()?,
            force: value.force,
        })
    }
}
