use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Registry used for references without a domain.
pub const DOCKER_HUB: &str = "index.docker.io";

const DOCKER_HUB_ALIAS: &str = "docker.io";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("blank image reference")]
    Blank,
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),
    #[error("image reference {0:?} has no tag")]
    MissingTag(String),
}

/// A parsed Docker style image reference.
///
/// The reference keeps the form it was written in. Use [`ImageRef::canonical_name`] or
/// [`ImageRef::same_canonical_ref`] to compare references written in different forms.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    domain: Option<String>,
    image: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        lazy_static! {
            static ref REPOSITORY: Regex = Regex::new(
                r"^[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*)*$"
            )
            .unwrap();
            static ref TAG: Regex = Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,127}$").unwrap();
            static ref DIGEST: Regex =
                Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").unwrap();
        }

        let invalid = || ParseError::InvalidReferenceFormat(s.to_string());

        if s.is_empty() {
            return Err(ParseError::Blank);
        }
        if s.starts_with('/') || s.ends_with('/') {
            return Err(invalid());
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) if DIGEST.is_match(digest) => (name, Some(digest.to_string())),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };

        let elements: Vec<&str> = name.split('/').collect();
        let (domain, path) = match elements.as_slice() {
            [_] => (None, name),
            [first, ..] if is_domain(first) => {
                (Some(first.to_string()), &name[first.len() + 1..])
            }
            _ => (None, name),
        };

        let (image, tag) = match path.split(':').collect::<Vec<_>>().as_slice() {
            [image] => (image.to_string(), None),
            [image, tag] if TAG.is_match(tag) => (image.to_string(), Some(tag.to_string())),
            _ => return Err(invalid()),
        };

        if !REPOSITORY.is_match(&image) {
            return Err(invalid());
        }

        Ok(Self {
            domain,
            image,
            tag,
            digest,
        })
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The repository path, as written.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The repository name with registry domain and full path, without tag.
    pub fn canonical_name(&self) -> CanonicalName {
        let domain = match self.domain.as_deref() {
            None | Some(DOCKER_HUB_ALIAS) => DOCKER_HUB,
            Some(domain) => domain,
        };

        let path = if domain == DOCKER_HUB && !self.image.contains('/') {
            format!("library/{}", self.image)
        } else {
            self.image.clone()
        };

        CanonicalName {
            domain: domain.to_string(),
            path,
        }
    }

    /// Same reference in its original form, pointing to a different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> ImageRef {
        ImageRef {
            domain: self.domain.clone(),
            image: self.image.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Compare two references by canonical name and tag.
    pub fn same_canonical_ref(&self, other: &ImageRef) -> bool {
        self.canonical_name() == other.canonical_name() && self.tag == other.tag
    }
}

fn is_domain(element: &str) -> bool {
    element == "localhost" || element.contains('.') || element.contains(':')
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(domain) = &self.domain {
            write!(f, "{domain}/")?;
        }
        write!(f, "{}", self.image)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}

/// A repository name normalized to include registry host and full path.
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalName {
    domain: String,
    path: String,
}

impl CanonicalName {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn with_tag(&self, tag: impl Into<String>) -> ImageRef {
        ImageRef {
            domain: Some(self.domain.clone()),
            image: self.path.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)
    }
}

impl TryFrom<String> for CanonicalName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let image = ImageRef::parse(&value)?;
        if image.tag.is_some() || image.digest.is_some() {
            return Err(ParseError::InvalidReferenceFormat(value));
        }
        Ok(image.canonical_name())
    }
}

impl From<CanonicalName> for String {
    fn from(value: CanonicalName) -> Self {
        value.to_string()
    }
}

/// Metadata of a single image, as known to the registry.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub id: ImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// `None` when the creation time is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ImageInfo {
    pub fn new(id: ImageRef) -> Self {
        Self {
            id,
            digest: None,
            created_at: None,
        }
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}
