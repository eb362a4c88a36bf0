use super::{Error, Registry};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use reqwest::{header, StatusCode, Url};
use std::collections::HashMap;
use std::sync::Arc;
use tagsync_api::image::DOCKER_HUB;
use tagsync_api::{CanonicalName, ImageInfo};
use tracing::debug;

const DOCKER_HUB_API: &str = "registry-1.docker.io";

mod media_types {
    pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

    pub const ACCEPT: [&str; 4] = [MANIFEST_V2, MANIFEST_LIST, OCI_MANIFEST, OCI_INDEX];
}

/// Docker registry HTTP API v2 client, with anonymous token authentication.
#[derive(Clone, Debug, Default)]
pub struct Client {
    client: reqwest::Client,
    /// Bearer tokens, by repository.
    tokens: Arc<RwLock<HashMap<CanonicalName, String>>>,
}

#[derive(serde::Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    media_type: Option<String>,
    config: Option<Descriptor>,
    manifests: Option<Vec<Descriptor>>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    digest: String,
    platform: Option<Platform>,
}

#[derive(Debug, serde::Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(serde::Deserialize)]
struct ImageConfig {
    created: Option<DateTime<Utc>>,
}

#[derive(serde::Deserialize)]
struct Token {
    token: Option<String>,
    access_token: Option<String>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a GET request, answering a bearer challenge once.
    async fn get(
        &self,
        name: &CanonicalName,
        url: Url,
        accept: &str,
    ) -> Result<reqwest::Response, Error> {
        let request = |token: Option<String>| {
            let request = self.client.get(url.clone()).header(header::ACCEPT, accept);
            match token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        };

        let token = self.tokens.read().get(name).cloned();
        let mut response = request(token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|h| h.to_str().ok())
                .map(ToString::to_string)
            {
                let token = self.authenticate(&challenge).await?;
                self.tokens.write().insert(name.clone(), token.clone());
                response = request(Some(token)).send().await?;
            }
        }

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(name.clone())),
            _ => Ok(response.error_for_status()?),
        }
    }

    /// Reference: <https://docs.docker.com/registry/spec/auth/token/>
    async fn authenticate(&self, challenge: &str) -> Result<String, Error> {
        let challenge = BearerChallenge::parse(challenge)?;
        debug!(realm = %challenge.realm, "Requesting registry token");

        let mut query = vec![];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }

        let token: Token = self
            .client
            .get(challenge.realm)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        token
            .token
            .or(token.access_token)
            .ok_or_else(|| Error::Authentication("token response without a token".into()))
    }
}

impl Registry for Client {
    async fn tags(&self, name: &CanonicalName) -> Result<Vec<String>, Error> {
        let url = base_url(name)?.join("tags/list")?;
        let list: TagList = self.get(name, url, "application/json").await?.json().await?;
        Ok(list.tags.unwrap_or_default())
    }

    async fn image_info(&self, name: &CanonicalName, tag: &str) -> Result<ImageInfo, Error> {
        let base = base_url(name)?;
        let accept = media_types::ACCEPT.join(", ");

        let response = self
            .get(name, base.join(&format!("manifests/{tag}"))?, &accept)
            .await?;
        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|d| d.to_str().ok())
            .map(ToString::to_string);
        let mut manifest: Manifest = response.json().await?;

        if let Some(manifests) = manifest.manifests.take() {
            let Some(image) = pick_platform(manifests) else {
                return Err(Error::UnsupportedManifest(format!("{name}:{tag}: empty index")));
            };
            manifest = self
                .get(
                    name,
                    base.join(&format!("manifests/{}", image.digest))?,
                    &accept,
                )
                .await?
                .json()
                .await?;
        }

        let Some(config) = manifest.config else {
            return Err(Error::UnsupportedManifest(format!(
                "{name}:{tag}: {}",
                manifest.media_type.as_deref().unwrap_or("unknown media type")
            )));
        };

        let config: ImageConfig = self
            .get(
                name,
                base.join(&format!("blobs/{}", config.digest))?,
                "application/json",
            )
            .await?
            .json()
            .await?;

        Ok(ImageInfo {
            id: name.with_tag(tag),
            digest,
            created_at: config.created,
        })
    }
}

/// Base URL of the repository's API, ending with a slash.
fn base_url(name: &CanonicalName) -> Result<Url, Error> {
    let host = match name.domain() {
        DOCKER_HUB => DOCKER_HUB_API,
        domain => domain,
    };
    // plain HTTP only for local registries
    let scheme = if host.starts_with("localhost") || !host.contains('.') {
        "http"
    } else {
        "https"
    };

    Ok(Url::parse(&format!("{scheme}://{host}/v2/{}/", name.path()))?)
}

/// Prefer `linux/amd64` from an index, fall back to the first entry.
fn pick_platform(manifests: Vec<Descriptor>) -> Option<Descriptor> {
    let preferred = manifests.iter().position(|m| {
        m.platform
            .as_ref()
            .map(|p| p.os == "linux" && p.architecture == "amd64")
            .unwrap_or_default()
    });
    manifests.into_iter().nth(preferred.unwrap_or_default())
}

#[derive(Debug)]
struct BearerChallenge {
    realm: Url,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Result<Self, Error> {
        lazy_static! {
            static ref SCHEME: Regex = Regex::new(r"^\s*(?i:bearer)\s+").unwrap();
            static ref PARAM: Regex = Regex::new(r#"(\w+)="([\x20-\x21\x23-\x5B\x5D-\x7E]*)""#).unwrap();
        }

        let unsupported = || Error::Authentication(header.to_string());

        let Some(scheme) = SCHEME.find(header) else {
            return Err(unsupported());
        };

        let params: HashMap<_, _> = PARAM
            .captures_iter(&header[scheme.end()..])
            .map(|c| (c[1].to_lowercase(), c[2].to_string()))
            .collect();

        let realm = params
            .get("realm")
            .and_then(|r| r.parse::<Url>().ok())
            .ok_or_else(unsupported)?;

        Ok(Self {
            realm,
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
        })
    }
}
