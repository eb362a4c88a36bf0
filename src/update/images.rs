use super::{Error, Pattern, WorkloadUpdate};
use crate::registry::{self, Registry};
use std::collections::{BTreeSet, HashMap};
use tagsync_api::{CanonicalName, ImageInfo, ImageRef};
use tracing::debug;

/// Known image metadata, by repository.
#[derive(Clone, Debug, Default)]
pub struct ImageRepos {
    repos: HashMap<CanonicalName, Vec<ImageInfo>>,
}

impl ImageRepos {
    /// Collect metadata for every repository used by any of the workloads' containers.
    ///
    /// Repositories unknown to the registry are recorded as having no images.
    pub async fn fetch_updatable<R: Registry>(
        registry: &R,
        workloads: &[WorkloadUpdate],
    ) -> Result<Self, Error> {
        let names: BTreeSet<_> = workloads
            .iter()
            .flat_map(|u| u.containers())
            .map(|c| c.image.canonical_name())
            .collect();

        let mut repos = Self::default();
        for name in names {
            let images = match registry.get_repository(&name).await {
                Ok(images) => images,
                Err(registry::Error::NotFound(_)) => {
                    debug!(repository = %name, "Repository not found");
                    vec![]
                }
                Err(err) => return Err(err.into()),
            };
            repos.insert(name, images);
        }

        Ok(repos)
    }

    /// Metadata for exactly one image, which must exist.
    pub async fn exact<R: Registry>(registry: &R, image: &ImageRef) -> Result<Self, Error> {
        let name = image.canonical_name();
        let images = match registry.get_repository(&name).await {
            Ok(images) => images,
            Err(registry::Error::NotFound(_)) => vec![],
            Err(err) => return Err(err.into()),
        };

        let found: Vec<_> = images
            .into_iter()
            .filter(|i| i.id.tag().is_some() && i.id.tag() == image.tag())
            .collect();
        if found.is_empty() {
            return Err(Error::ImageNotFound(image.clone()));
        }

        let mut repos = Self::default();
        repos.insert(name, found);
        Ok(repos)
    }

    /// Add images of a repository, skipping references which are already known.
    pub fn insert(&mut self, name: CanonicalName, images: impl IntoIterator<Item = ImageInfo>) {
        let entry = self.repos.entry(name).or_default();
        for image in images {
            if !entry.iter().any(|i| i.id == image.id) {
                entry.push(image);
            }
        }
    }

    pub fn get(&self, name: &CanonicalName) -> &[ImageInfo] {
        self.repos.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// The images of a repository allowed by the pattern, preferred image first.
    pub fn filter_and_sort(&self, name: &CanonicalName, pattern: &Pattern) -> Vec<&ImageInfo> {
        let mut images: Vec<_> = self
            .get(name)
            .iter()
            .filter(|i| match i.id.tag() {
                // `latest` is never a version, only take it if asked for
                Some(tag) if tag.eq_ignore_ascii_case("latest") => pattern.is_latest(),
                Some(tag) => pattern.matches(tag),
                None => false,
            })
            .collect();
        images.sort_by(|l, r| pattern.compare(l, r));
        images
    }

    /// The preferred image of a repository, if any matches.
    pub fn latest(&self, name: &CanonicalName, pattern: &Pattern) -> Option<&ImageInfo> {
        self.filter_and_sort(name, pattern).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::fixture::{definition, workload, MemoryRegistry};
    use chrono::{TimeZone, Utc};

    fn name(s: &str) -> CanonicalName {
        s.parse::<ImageRef>().unwrap().canonical_name()
    }

    fn repos(images: &[(&str, Option<i64>)]) -> ImageRepos {
        let mut repos = ImageRepos::default();
        for (image, created) in images {
            let mut info = ImageInfo::new(image.parse().unwrap());
            info.created_at = created.map(|s| Utc.timestamp_opt(s, 0).unwrap());
            repos.insert(info.id.canonical_name(), [info]);
        }
        repos
    }

    fn latest(repos: &ImageRepos, pattern: &str) -> Option<String> {
        repos
            .latest(&name("app"), &pattern.parse().unwrap())
            .map(|i| i.id.tag().unwrap().to_string())
    }

    #[test]
    fn pattern_selection() {
        // newest by creation time is 1.0.0
        let repos = repos(&[
            ("app:0.9.0", Some(300)),
            ("app:1.0.0", Some(400)),
            ("app:1.2.3", Some(200)),
        ]);

        assert_eq!(latest(&repos, "semver:*").as_deref(), Some("1.2.3"));
        assert_eq!(latest(&repos, "*").as_deref(), Some("1.0.0"));
        assert_eq!(latest(&repos, "1.2.*").as_deref(), Some("1.2.3"));
        assert_eq!(latest(&repos, "2.*"), None);
        assert_eq!(latest(&repos, "semver:>=2"), None);
    }

    #[test]
    fn glob_by_recency() {
        let repos = repos(&[
            ("app:0.9.0", Some(100)),
            ("app:1.0.0", Some(200)),
            ("app:1.2.3", Some(300)),
        ]);
        assert_eq!(latest(&repos, "1.*").as_deref(), Some("1.2.3"));
    }

    #[test]
    fn latest_tag_only_when_asked() {
        let repos = repos(&[("app:latest", Some(500)), ("app:1.0.0", Some(100))]);
        assert_eq!(latest(&repos, "*").as_deref(), Some("1.0.0"));
        assert_eq!(latest(&repos, "latest").as_deref(), Some("latest"));
        assert_eq!(latest(&repos, "semver:*").as_deref(), Some("1.0.0"));
    }

    #[test]
    fn unknown_creation_time_last() {
        let repos = repos(&[("app:b", None), ("app:a", None), ("app:c", Some(1))]);
        let tags: Vec<_> = repos
            .filter_and_sort(&name("app"), &Pattern::All)
            .iter()
            .map(|i| i.id.tag().unwrap())
            .collect();
        assert_eq!(tags, vec!["c", "a", "b"]);
    }

    #[test]
    fn deduplicates() {
        let mut repos = ImageRepos::default();
        let image = ImageInfo::new("app:1".parse().unwrap());
        repos.insert(name("app"), [image.clone(), image.clone()]);
        repos.insert(name("app"), [image]);
        assert_eq!(repos.get(&name("app")).len(), 1);
        assert!(repos.get(&name("other")).is_empty());
    }

    #[tokio::test]
    async fn fetch_for_workloads() {
        let registry = MemoryRegistry::default()
            .with("nginx:1.24", 100)
            .with("nginx:1.25", 200)
            .with("quay.io/other/app:1", 100);

        let mut u = crate::update::WorkloadUpdate::new(definition(
            "default:deployment/web",
            &[("web", "nginx:1.24"), ("missing", "ghcr.io/nobody/nothing:1")],
        ));
        u.workload = Some(workload(
            "default:deployment/web",
            &[("web", "nginx:1.24"), ("missing", "ghcr.io/nobody/nothing:1")],
        ));

        let repos = ImageRepos::fetch_updatable(&registry, &[u]).await.unwrap();
        assert_eq!(repos.get(&name("nginx")).len(), 2);
        assert!(repos.get(&name("ghcr.io/nobody/nothing")).is_empty());
        assert!(repos.get(&name("quay.io/other/app")).is_empty());
    }

    #[tokio::test]
    async fn exact_image_must_exist() {
        let registry = MemoryRegistry::default().with("nginx:1.25", 200);

        let repos = ImageRepos::exact(&registry, &"nginx:1.25".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(repos.get(&name("nginx")).len(), 1);

        let err = ImageRepos::exact(&registry, &"nginx:9".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn registry_errors_are_fatal() {
        let registry = MemoryRegistry::default().failing();
        let mut u = crate::update::WorkloadUpdate::new(definition(
            "default:deployment/web",
            &[("web", "nginx:1.24")],
        ));
        u.workload = Some(workload("default:deployment/web", &[("web", "nginx:1.24")]));

        assert!(matches!(
            ImageRepos::fetch_updatable(&registry, &[u]).await,
            Err(Error::Registry(_))
        ));
    }
}
