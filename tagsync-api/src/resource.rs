use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Namespace used for resources which are not namespaced.
pub const CLUSTER_SCOPE: &str = "<cluster>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource ID: {0:?}")]
pub struct ParseError(pub String);

/// Stable identifier of a workload, `namespace:kind/name`.
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    namespace: String,
    kind: String,
    name: String,
}

impl ResourceId {
    pub fn new(
        namespace: impl Into<String>,
        kind: impl AsRef<str>,
        name: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                CLUSTER_SCOPE.to_string()
            } else {
                namespace
            },
            kind: kind.as_ref().to_lowercase(),
            name: name.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(r"^(<cluster>|[a-zA-Z0-9_-]+):([a-zA-Z0-9_-]+)/([a-zA-Z0-9_.:@-]+)$")
                    .unwrap();
        }

        match RE.captures(s) {
            Some(captures) => Ok(Self::new(&captures[1], &captures[2], &captures[3])),
            None => Err(ParseError(s.to_string())),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace == CLUSTER_SCOPE
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        let id = ResourceId::parse("default:Deployment/helloworld").unwrap();
        assert_eq!(id.namespace(), "default");
        assert_eq!(id.kind(), "deployment");
        assert_eq!(id.name(), "helloworld");
        assert_eq!(id.to_string(), "default:deployment/helloworld");
    }

    #[test]
    fn cluster_scoped() {
        let id = ResourceId::new("", "Namespace", "foo");
        assert!(id.is_cluster_scoped());
        assert_eq!(id, "<cluster>:namespace/foo".parse().unwrap());
    }

    #[test]
    fn reject_malformed() {
        for s in ["", "default/helloworld", "default:deployment", ":deployment/x"] {
            assert!(ResourceId::parse(s).is_err(), "{s} must not parse");
        }
    }

    #[test]
    fn serde_as_string() {
        let id = ResourceId::new("ns", "deployment", "web");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""ns:deployment/web""#);
        assert_eq!(serde_json::from_str::<ResourceId>(&json).unwrap(), id);
    }
}
