use crate::git::Author;
use crate::update::Scope;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}: invalid number of seconds: {1}")]
    Seconds(&'static str, String),
}

/// Process configuration, from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub repo_path: PathBuf,
    /// Manifest directory, relative to the repository.
    pub manifest_path: PathBuf,
    pub git_remote: Option<String>,
    pub git_branch: String,
    pub git_author: Author,
    /// Namespaces to operate on, empty for all.
    pub namespaces: Vec<Scope>,
    pub registry_cache_ttl: Duration,
    pub automation_interval: Duration,
    pub job_timeout: Duration,
    pub job_heartbeat_interval: Duration,
    pub job_stale_after: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let var = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let seconds = |name: &'static str, default: u64| match lookup(name) {
            None => Ok(Duration::from_secs(default)),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                _ => Err(Error::Seconds(name, value)),
            },
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR", "[::]:8080"),
            repo_path: var("REPO_PATH", ".").into(),
            manifest_path: var("MANIFEST_PATH", ".").into(),
            git_remote: lookup("GIT_REMOTE").filter(|r| !r.is_empty()),
            git_branch: var("GIT_BRANCH", "main"),
            git_author: Author::parse(&var("GIT_AUTHOR", "tagsync <tagsync@localhost>")),
            namespaces: lookup("NAMESPACES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .filter_map(|ns| ns.parse().ok())
                .collect(),
            registry_cache_ttl: seconds("REGISTRY_CACHE_TTL", 300)?,
            automation_interval: seconds("AUTOMATION_INTERVAL", 300)?,
            job_timeout: seconds("JOB_TIMEOUT", 600)?,
            job_heartbeat_interval: seconds("JOB_HEARTBEAT_INTERVAL", 10)?,
            job_stale_after: seconds("JOB_STALE_AFTER", 60)?,
        })
    }

    pub fn manifest_root(&self) -> PathBuf {
        self.repo_path.join(&self.manifest_path)
    }
}
