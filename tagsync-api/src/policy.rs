use std::collections::BTreeMap;
use std::fmt;

/// Prefix of the annotations carrying workload policies.
pub const ANNOTATION_PREFIX: &str = "tagsync.io/";

const TAG_PREFIX: &str = "tag.";

/// A per-workload policy.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Policy {
    /// Blocks any release of the workload.
    Locked,
    /// Excludes the workload from automated consideration.
    Ignore,
    /// Opts the workload into automated releases.
    Automated,
    LockedMsg,
    LockedUser,
    /// Tag filter pattern for the named container.
    TagPattern(String),
}

impl Policy {
    pub fn key(&self) -> String {
        match self {
            Self::Locked => "locked".into(),
            Self::Ignore => "ignore".into(),
            Self::Automated => "automated".into(),
            Self::LockedMsg => "locked_msg".into(),
            Self::LockedUser => "locked_user".into(),
            Self::TagPattern(container) => format!("{TAG_PREFIX}{container}"),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "locked" => Self::Locked,
            "ignore" => Self::Ignore,
            "automated" => Self::Automated,
            "locked_msg" => Self::LockedMsg,
            "locked_user" => Self::LockedUser,
            _ => match key.strip_prefix(TAG_PREFIX) {
                Some(container) if !container.is_empty() => Self::TagPattern(container.into()),
                _ => return None,
            },
        })
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// The policies attached to one workload, with their values.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct PolicySet(BTreeMap<String, String>);

impl PolicySet {
    /// Collect all policies found in a set of annotations. Unknown keys are ignored.
    pub fn from_annotations<'a, I>(annotations: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        Self(
            annotations
                .into_iter()
                .filter_map(|(k, v)| {
                    let key = k.strip_prefix(ANNOTATION_PREFIX)?;
                    Policy::from_key(key).map(|p| (p.key(), v.clone()))
                })
                .collect(),
        )
    }

    pub fn set(mut self, policy: Policy, value: impl Into<String>) -> Self {
        self.0.insert(policy.key(), value.into());
        self
    }

    pub fn get(&self, policy: &Policy) -> Option<&str> {
        self.0.get(&policy.key()).map(String::as_str)
    }

    /// Whether a boolean policy is switched on.
    pub fn has(&self, policy: &Policy) -> bool {
        self.get(policy).map(|v| v == "true").unwrap_or_default()
    }

    pub fn tag_pattern(&self, container: &str) -> Option<&str> {
        self.get(&Policy::TagPattern(container.into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
