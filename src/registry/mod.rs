//! Image metadata from container registries.

mod cache;
mod client;

pub use cache::Cache;
pub use client::Client;

use futures::{stream, StreamExt};
use std::collections::HashSet;
use tagsync_api::{CanonicalName, ImageInfo};
use tracing::{debug, warn};

/// Number of manifests fetched at the same time, per repository.
const CONCURRENCY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository {0} not found")]
    NotFound(CanonicalName),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to build URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported authentication challenge: {0}")]
    Authentication(String),
    #[error("unsupported manifest: {0}")]
    UnsupportedManifest(String),
}

/// A source of image metadata.
pub trait Registry {
    /// Tags of a repository.
    async fn tags(&self, name: &CanonicalName) -> Result<Vec<String>, Error>;

    /// Metadata of one tagged image.
    async fn image_info(&self, name: &CanonicalName, tag: &str) -> Result<ImageInfo, Error>;

    /// All images of a repository, in no particular order.
    ///
    /// A tag whose metadata cannot be fetched is still reported, with an unknown creation time.
    async fn get_repository(&self, name: &CanonicalName) -> Result<Vec<ImageInfo>, Error> {
        let tags = self.tags(name).await?;
        debug!(repository = %name, tags = tags.len(), "Fetching image metadata");

        let images = stream::iter(tags)
            .map(|tag| async move {
                match self.image_info(name, &tag).await {
                    Ok(info) => info,
                    Err(err) => {
                        warn!(repository = %name, %tag, "Unable to get image metadata: {err}");
                        ImageInfo::new(name.with_tag(tag))
                    }
                }
            })
            .buffer_unordered(CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        Ok(dedup(images))
    }
}

/// Drop images with a reference seen before.
fn dedup(images: Vec<ImageInfo>) -> Vec<ImageInfo> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|i| seen.insert(i.id.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_reference() {
        let images = ["nginx:1", "nginx:2", "nginx:1"]
            .map(|i| ImageInfo::new(i.parse().unwrap()))
            .to_vec();
        let tags: Vec<_> = dedup(images)
            .into_iter()
            .map(|i| i.id.tag().unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["1", "2"]);
    }
}
