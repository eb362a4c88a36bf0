//! Workload definitions, as found in the manifest checkout.

mod edit;

use crate::objects;
use crate::update::{Container, WorkloadUpdate};
use glob::MatchOptions;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tagsync_api::{ImageRef, PolicySet, ResourceId};
use tracing::{debug, info};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid path pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to walk manifests: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("{path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: {reason}")]
    InvalidDocument { path: PathBuf, reason: String },
    #[error("{0}: not valid UTF-8")]
    Encoding(PathBuf),
    #[error("workload {0} is defined more than once")]
    Duplicate(ResourceId),
    #[error("workload {id} has no container named {container}")]
    UnknownContainer { id: ResourceId, container: String },
}

/// The manifest file tree.
#[derive(Clone, Debug)]
pub struct Manifests {
    root: PathBuf,
}

impl Manifests {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load all workload definitions, from all `.yaml` and `.yml` files which are not hidden.
    pub fn load(&self) -> Result<Vec<WorkloadDefinition>, Error> {
        let options = MatchOptions {
            require_literal_leading_dot: true,
            ..Default::default()
        };
        let root = glob::Pattern::escape(&self.root.to_string_lossy());

        let mut files = BTreeSet::new();
        for ext in ["yaml", "yml"] {
            for path in glob::glob_with(&format!("{root}/**/*.{ext}"), options)? {
                files.insert(path?);
            }
        }

        let mut seen = BTreeSet::new();
        let mut definitions = vec![];
        for file in files {
            let path = file.strip_prefix(&self.root).unwrap_or(&file).to_path_buf();
            for definition in WorkloadDefinition::parse_file(path, std::fs::read(&file)?)? {
                if !seen.insert(definition.id.clone()) {
                    return Err(Error::Duplicate(definition.id));
                }
                definitions.push(definition);
            }
        }

        debug!(root = %self.root.display(), definitions = definitions.len(), "Loaded manifests");

        Ok(definitions)
    }

    /// Apply the container updates to the files on disk, returning the files changed.
    ///
    /// Updates to workloads sharing a file are applied to that file together.
    pub fn write(&self, updates: &[WorkloadUpdate]) -> Result<Vec<PathBuf>, Error> {
        let mut by_file = BTreeMap::<&Path, Vec<&WorkloadUpdate>>::new();
        for update in updates {
            by_file
                .entry(update.definition.path())
                .or_default()
                .push(update);
        }

        let mut written = vec![];
        for (path, updates) in by_file {
            let file = self.root.join(path);
            let mut text = String::from_utf8(std::fs::read(&file)?)
                .map_err(|_| Error::Encoding(path.to_path_buf()))?;

            for update in updates {
                for change in &update.updates {
                    text = edit::set_image(
                        &text,
                        update.definition.document,
                        &change.container,
                        &change.target.to_string(),
                    )
                    .ok_or_else(|| Error::UnknownContainer {
                        id: update.id.clone(),
                        container: change.container.clone(),
                    })?;
                }
            }

            std::fs::write(&file, text)?;
            info!(path = %path.display(), "Updated manifest");
            written.push(path.to_path_buf());
        }

        Ok(written)
    }
}

/// One workload's document in a manifest file.
#[derive(Clone, Debug)]
pub struct WorkloadDefinition {
    id: ResourceId,
    /// File, relative to the manifest root.
    path: PathBuf,
    /// Content of the whole file.
    bytes: Vec<u8>,
    /// Index of the document within the file.
    document: usize,
    containers: Vec<Container>,
    policies: PolicySet,
}

impl WorkloadDefinition {
    /// Find all workload definitions in the content of a file.
    ///
    /// Documents which are empty or not a supported workload kind are skipped.
    pub fn parse_file(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Vec<Self>, Error> {
        let path = path.into();
        let text = std::str::from_utf8(&bytes).map_err(|_| Error::Encoding(path.clone()))?;

        let mut definitions = vec![];
        for (document, range) in edit::documents(text).into_iter().enumerate() {
            let doc = &text[range];
            if doc.lines().all(|l| {
                let l = l.trim();
                l.is_empty() || l.starts_with('#')
            }) {
                continue;
            }

            let value: serde_yaml::Value =
                serde_yaml::from_str(doc).map_err(|source| Error::Yaml {
                    path: path.clone(),
                    source,
                })?;

            if let Some((id, containers, policies)) = parse_document(&path, value)? {
                definitions.push(Self {
                    id,
                    path: path.clone(),
                    bytes: bytes.clone(),
                    document,
                    containers,
                    policies,
                });
            }
        }

        Ok(definitions)
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Change the image of one container, in memory, returning the updated file content.
    pub fn update_container_image(
        &mut self,
        container: &str,
        image: &ImageRef,
    ) -> Result<&[u8], Error> {
        let unknown = || Error::UnknownContainer {
            id: self.id.clone(),
            container: container.to_string(),
        };

        if !self.containers.iter().any(|c| c.name == container) {
            return Err(unknown());
        }

        let text =
            std::str::from_utf8(&self.bytes).map_err(|_| Error::Encoding(self.path.clone()))?;
        let text = edit::set_image(text, self.document, container, &image.to_string())
            .ok_or_else(unknown)?;
        self.bytes = text.into_bytes();

        for c in self.containers.iter_mut().filter(|c| c.name == container) {
            c.image = image.clone();
        }

        Ok(&self.bytes)
    }
}

type Parsed = (ResourceId, Vec<Container>, PolicySet);

fn parse_document(path: &Path, value: serde_yaml::Value) -> Result<Option<Parsed>, Error> {
    let invalid = |reason: String| Error::InvalidDocument {
        path: path.to_path_buf(),
        reason,
    };

    let Some(kind) = value.get("kind").and_then(|k| k.as_str()) else {
        return Ok(None);
    };
    let template = match kind {
        "Deployment" | "DaemonSet" | "StatefulSet" => value.get("spec").and_then(|s| s.get("template")),
        "CronJob" => value
            .get("spec")
            .and_then(|s| s.get("jobTemplate"))
            .and_then(|s| s.get("spec"))
            .and_then(|s| s.get("template")),
        _ => return Ok(None),
    };

    let metadata: ObjectMeta = value
        .get("metadata")
        .cloned()
        .map(serde_yaml::from_value)
        .transpose()
        .map_err(|err| invalid(format!("invalid metadata: {err}")))?
        .unwrap_or_default();
    let name = metadata
        .name
        .clone()
        .ok_or_else(|| invalid(format!("{kind} without a name")))?;
    let namespace = metadata
        .namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    let id = ResourceId::new(namespace, kind, name);

    let template: PodTemplateSpec = template
        .cloned()
        .map(serde_yaml::from_value)
        .transpose()
        .map_err(|err| invalid(format!("{id}: invalid pod template: {err}")))?
        .ok_or_else(|| invalid(format!("{id}: no pod template")))?;
    let containers =
        objects::containers(&template).map_err(|err| invalid(format!("{id}: {err}")))?;

    let policies = metadata
        .annotations
        .as_ref()
        .map(PolicySet::from_annotations)
        .unwrap_or_default();

    Ok(Some((id, containers, policies)))
}
