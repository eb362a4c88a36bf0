use super::{Error, Registry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagsync_api::{CanonicalName, ImageInfo, ImageRef};
use tracing::debug;

/// Keeps repository metadata of another registry.
///
/// Tag lists expire after the TTL. Metadata of a tag is kept until the repository is invalidated.
#[derive(Clone, Debug)]
pub struct Cache<R> {
    registry: R,
    ttl: Duration,
    tags: Arc<RwLock<HashMap<CanonicalName, Tags>>>,
    images: Arc<RwLock<HashMap<ImageRef, ImageInfo>>>,
}

#[derive(Debug)]
struct Tags {
    fetched: Instant,
    tags: Vec<String>,
}

impl<R: Registry> Cache<R> {
    pub fn new(registry: R, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            tags: Default::default(),
            images: Default::default(),
        }
    }

    /// Forget a repository, so that the next request fetches it again.
    pub fn invalidate(&self, name: &CanonicalName) {
        self.tags.write().remove(name);
        self.images
            .write()
            .retain(|id, _| &id.canonical_name() != name);
    }

    fn cached_tags(&self, name: &CanonicalName) -> Option<Vec<String>> {
        self.tags
            .read()
            .get(name)
            .filter(|e| e.fetched.elapsed() < self.ttl)
            .map(|e| e.tags.clone())
    }
}

impl<R: Registry> Registry for Cache<R> {
    async fn tags(&self, name: &CanonicalName) -> Result<Vec<String>, Error> {
        if let Some(tags) = self.cached_tags(name) {
            return Ok(tags);
        }

        debug!(repository = %name, "Refreshing tags");
        let tags = self.registry.tags(name).await?;

        self.tags.write().insert(
            name.clone(),
            Tags {
                fetched: Instant::now(),
                tags: tags.clone(),
            },
        );

        Ok(tags)
    }

    async fn image_info(&self, name: &CanonicalName, tag: &str) -> Result<ImageInfo, Error> {
        let id = name.with_tag(tag);
        if let Some(info) = self.images.read().get(&id) {
            return Ok(info.clone());
        }

        let info = self.registry.image_info(name, tag).await?;
        self.images.write().insert(id, info.clone());

        Ok(info)
    }
}
