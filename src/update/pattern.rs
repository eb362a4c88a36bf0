use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tagsync_api::ImageInfo;

const GLOB_PREFIX: &str = "glob:";
const SEMVER_PREFIX: &str = "semver:";
const REGEXP_PREFIXES: [&str; 2] = ["regexp:", "regex:"];

const LATEST: &str = "latest";

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("invalid semantic version range: {0}")]
    Semver(#[from] semver::Error),
    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

/// A tag filter.
#[derive(Clone, Debug)]
pub enum Pattern {
    All,
    Glob(glob::Pattern),
    Semver(semver::VersionReq),
    Regex(regex::Regex),
}

impl Pattern {
    pub fn parse(s: &str) -> Result<Self, PatternError> {
        if let Some(range) = s.strip_prefix(SEMVER_PREFIX) {
            return Ok(Self::Semver(semver::VersionReq::parse(range)?));
        }
        if let Some(expr) = REGEXP_PREFIXES.iter().find_map(|p| s.strip_prefix(*p)) {
            return Ok(Self::Regex(regex::Regex::new(expr)?));
        }

        let glob = s.strip_prefix(GLOB_PREFIX).unwrap_or(s);
        Ok(match glob {
            "*" => Self::All,
            glob => Self::Glob(glob::Pattern::new(glob)?),
        })
    }

    /// Whether this is exactly the pattern `latest`.
    pub fn is_latest(&self) -> bool {
        matches!(self, Self::Glob(glob) if glob.as_str() == LATEST)
    }

    pub fn matches(&self, tag: &str) -> bool {
        match self {
            Self::All => true,
            Self::Glob(glob) => glob.matches(tag),
            Self::Semver(range) => parse_version(tag)
                .map(|v| range.matches(&v))
                .unwrap_or_default(),
            Self::Regex(regex) => regex.is_match(tag),
        }
    }

    /// Order two images, the preferred one first.
    pub fn compare(&self, lhs: &ImageInfo, rhs: &ImageInfo) -> Ordering {
        match self {
            Self::Semver(_) => by_version(lhs, rhs),
            _ => by_created(lhs, rhs),
        }
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Glob(glob) => write!(f, "{GLOB_PREFIX}{}", glob.as_str()),
            Self::Semver(range) => write!(f, "{SEMVER_PREFIX}{range}"),
            Self::Regex(regex) => write!(f, "{}{}", REGEXP_PREFIXES[0], regex.as_str()),
        }
    }
}

/// Newest first. Unknown creation times go last, ties by reference.
fn by_created(lhs: &ImageInfo, rhs: &ImageInfo) -> Ordering {
    match (lhs.created_at, rhs.created_at) {
        (Some(l), Some(r)) if l != r => r.cmp(&l),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => by_reference(lhs, rhs),
    }
}

/// Highest version first. Tags which are not versions go last.
fn by_version(lhs: &ImageInfo, rhs: &ImageInfo) -> Ordering {
    let version = |i: &ImageInfo| i.id.tag().and_then(parse_version);
    match (version(lhs), version(rhs)) {
        (Some(l), Some(r)) if l != r => r.cmp(&l),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => by_reference(lhs, rhs),
    }
}

fn by_reference(lhs: &ImageInfo, rhs: &ImageInfo) -> Ordering {
    lhs.id.to_string().cmp(&rhs.id.to_string())
}

/// Parse a tag as a version, accepting a `v` prefix and missing minor or patch numbers.
fn parse_version(tag: &str) -> Option<semver::Version> {
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    if let Ok(version) = semver::Version::parse(tag) {
        return Some(version);
    }

    let split = tag.find(['-', '+']).unwrap_or(tag.len());
    let (core, rest) = tag.split_at(split);
    let padding = match core.matches('.').count() {
        0 => ".0.0",
        1 => ".0",
        _ => return None,
    };
    semver::Version::parse(&format!("{core}{padding}{rest}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn image(s: &str) -> ImageInfo {
        ImageInfo::new(s.parse().unwrap())
    }

    #[test]
    fn parse() {
        assert!(matches!(Pattern::parse("*").unwrap(), Pattern::All));
        assert!(matches!(Pattern::parse("glob:*").unwrap(), Pattern::All));
        assert!(matches!(Pattern::parse("1.*").unwrap(), Pattern::Glob(_)));
        assert!(matches!(Pattern::parse("semver:~1.2").unwrap(), Pattern::Semver(_)));
        assert!(matches!(Pattern::parse("regexp:^v[0-9]+$").unwrap(), Pattern::Regex(_)));
        assert!(matches!(Pattern::parse("regex:^v").unwrap(), Pattern::Regex(_)));
        assert!(Pattern::parse("semver:not a range").is_err());
        assert!(Pattern::parse("glob:[").is_err());
        assert!(Pattern::parse("latest").unwrap().is_latest());
        assert!(!Pattern::All.is_latest());
    }

    #[test]
    fn glob_matches() {
        let p = Pattern::parse("glob:master-*").unwrap();
        assert!(p.matches("master-abc123"));
        assert!(!p.matches("dev-abc123"));
    }

    #[test]
    fn semver_matches() {
        let p = Pattern::parse("semver:~1.2").unwrap();
        assert!(p.matches("1.2.0"));
        assert!(p.matches("v1.2.7"));
        assert!(p.matches("1.2"));
        assert!(!p.matches("1.3.0"));
        assert!(!p.matches("latest"));
        assert!(!p.matches("master-abc"));
    }

    #[test]
    fn regex_matches() {
        let p = Pattern::parse("regexp:^v[0-9]+$").unwrap();
        assert!(p.matches("v12"));
        assert!(!p.matches("v1.2"));
    }

    #[test]
    fn versions() {
        assert_eq!(parse_version("1"), Some(semver::Version::new(1, 0, 0)));
        assert_eq!(parse_version("v2.1"), Some(semver::Version::new(2, 1, 0)));
        assert_eq!(
            parse_version("1.2-rc.1"),
            Some(semver::Version::parse("1.2.0-rc.1").unwrap())
        );
        assert_eq!(parse_version("latest"), None);
        assert_eq!(parse_version("1.2.3.4"), None);
    }

    #[test]
    fn order_by_created() {
        let old = image("app:a").created_at(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let new = image("app:b").created_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let unknown_y = image("app:y");
        let unknown_x = image("app:x");

        let mut images = vec![&unknown_y, &old, &unknown_x, &new];
        images.sort_by(|l, r| Pattern::All.compare(l, r));
        let tags: Vec<_> = images.iter().map(|i| i.id.tag().unwrap()).collect();
        assert_eq!(tags, vec!["b", "a", "x", "y"]);
    }

    #[test]
    fn order_by_version() {
        let p = Pattern::parse("semver:*").unwrap();
        let images = ["app:1.0.0", "app:1.2.3", "app:0.9.0", "app:1.10.0"].map(image);

        let mut sorted: Vec<_> = images.iter().collect();
        sorted.sort_by(|l, r| p.compare(l, r));
        let tags: Vec<_> = sorted.iter().map(|i| i.id.tag().unwrap()).collect();
        assert_eq!(tags, vec!["1.10.0", "1.2.3", "1.0.0", "0.9.0"]);
    }
}
