//! Package image retrieval.
//!
//! # Scope
//! Parses package references into image identities and materializes the
//! referenced image's layers into a local layer archive. The production
//! client speaks the OCI distribution protocol over HTTP; authentication is
//! out of scope (anonymous pulls only), and everything behind the
//! [`ImageFetcher`] seam is mockable.
//!
//! # Materialized form
//! The fetcher writes a plain tar whose entries are the image's layer blobs,
//! named `blobs/sha256/<hex>`, in the manifest's declared order. The
//! extractor re-opens that archive and never talks to the network.

use crate::archive::TarWriter;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::str::FromStr;
use std::time::Duration;

const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const MEDIA_TYPE_DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

const DEFAULT_REGISTRY: &str = "index.docker.io";
const DEFAULT_TAG: &str = "latest";

/// Why a fetch failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The package reference string cannot name an image.
    #[error("malformed package reference {reference:?}: {reason}")]
    Reference { reference: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("registry returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("malformed image manifest: {0}")]
    Manifest(String),

    /// A layer blob did not hash to its declared digest.
    #[error("layer digest mismatch: declared {declared}, got {actual}")]
    DigestMismatch { declared: String, actual: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

// ============================================================================
// Image references
// ============================================================================

/// How the image is pinned within its repository.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pin {
    Tag(String),
    Digest(String),
}

/// A parsed image identity: registry, repository, and tag or digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub pin: Pin,
}

impl FromStr for ImageRef {
    type Err = FetchError;

    /// Docker-style parsing: the first path component is a registry only if
    /// it looks like a host (contains `.` or `:`, or is `localhost`);
    /// otherwise the default registry and, for bare names, the `library/`
    /// namespace apply. Missing tag defaults to `latest`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| FetchError::Reference {
            reference: s.to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(malformed("empty or contains whitespace"));
        }

        let (name, pin) = if let Some((name, digest)) = s.split_once('@') {
            let hex = digest
                .strip_prefix("sha256:")
                .ok_or_else(|| malformed("digest must use sha256"))?;
            if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(malformed("digest is not 64 hex characters"));
            }
            (name, Pin::Digest(digest.to_string()))
        } else {
            // A colon after the last slash separates the tag; earlier colons
            // belong to a registry port.
            let slash = s.rfind('/').map(|i| i + 1).unwrap_or(0);
            match s[slash..].split_once(':') {
                Some((repo_tail, tag)) => {
                    if tag.is_empty() {
                        return Err(malformed("empty tag"));
                    }
                    let name_end = slash + repo_tail.len();
                    (&s[..name_end], Pin::Tag(tag.to_string()))
                }
                None => (s, Pin::Tag(DEFAULT_TAG.to_string())),
            }
        };

        if name.is_empty() {
            return Err(malformed("empty repository"));
        }

        let (registry, mut repository) = match name.split_once('/') {
            Some((head, rest)) if head.contains('.') || head.contains(':') || head == "localhost" => {
                (head.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };
        if repository.is_empty() {
            return Err(malformed("empty repository"));
        }
        if repository.contains(':') {
            return Err(malformed("repository must not contain a colon"));
        }
        if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            repository = format!("library/{repository}");
        }

        Ok(ImageRef {
            registry,
            repository,
            pin,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pin {
            Pin::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            Pin::Digest(digest) => write!(f, "{}/{}@{}", self.registry, self.repository, digest),
        }
    }
}

// ============================================================================
// Fetch capability
// ============================================================================

/// One layer of a fetched image, in declared order.
#[derive(Clone, Debug)]
pub struct LayerInfo {
    pub digest: String,
    pub size: u64,
}

/// What was materialized: the declared layer list.
#[derive(Clone, Debug, Default)]
pub struct ImageDescriptor {
    pub layers: Vec<LayerInfo>,
}

/// Resolves an image identity and materializes its layers into `dest`.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, image: &ImageRef, dest: &mut File) -> Result<ImageDescriptor, FetchError>;
}

// ============================================================================
// Registry client
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDescriptor {
    digest: String,
    #[serde(default)]
    size: u64,
}

/// Either an image manifest (has `layers`) or an index (has `manifests`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireManifest {
    #[serde(default)]
    layers: Option<Vec<WireDescriptor>>,
    #[serde(default)]
    manifests: Option<Vec<WireDescriptor>>,
}

/// Anonymous OCI distribution client.
pub struct RegistryClient {
    http: reqwest::blocking::Client,
}

impl RegistryClient {
    pub fn new() -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("default reqwest client construction cannot fail");
        Self { http }
    }

    fn base_url(registry: &str) -> String {
        // Plain HTTP only for local development registries.
        if registry.starts_with("localhost") || registry.starts_with("127.0.0.1") {
            format!("http://{registry}/v2")
        } else {
            format!("https://{registry}/v2")
        }
    }

    fn get_manifest(&self, image: &ImageRef, reference: &str) -> Result<WireManifest, FetchError> {
        let url = format!(
            "{}/{}/manifests/{}",
            Self::base_url(&image.registry),
            image.repository,
            reference
        );
        let resp = self
            .http
            .get(&url)
            .header(
                "Accept",
                format!(
                    "{MEDIA_TYPE_OCI_MANIFEST}, {MEDIA_TYPE_OCI_INDEX}, \
                     {MEDIA_TYPE_DOCKER_MANIFEST}, {MEDIA_TYPE_DOCKER_LIST}"
                ),
            )
            .send()?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        let body = resp.text()?;
        serde_json::from_str(&body).map_err(|e| FetchError::Manifest(e.to_string()))
    }

    /// Resolve tag/digest to a concrete image manifest, following one
    /// index indirection (first entry; platform negotiation is out of scope).
    fn resolve_layers(&self, image: &ImageRef) -> Result<Vec<WireDescriptor>, FetchError> {
        let reference = match &image.pin {
            Pin::Tag(tag) => tag.clone(),
            Pin::Digest(digest) => digest.clone(),
        };
        let mut manifest = self.get_manifest(image, &reference)?;

        if manifest.layers.is_none() {
            let child = manifest
                .manifests
                .as_ref()
                .and_then(|m| m.first())
                .ok_or_else(|| FetchError::Manifest("index with no manifests".to_string()))?
                .digest
                .clone();
            manifest = self.get_manifest(image, &child)?;
        }

        manifest
            .layers
            .ok_or_else(|| FetchError::Manifest("manifest with no layers".to_string()))
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher for RegistryClient {
    fn fetch(&self, image: &ImageRef, dest: &mut File) -> Result<ImageDescriptor, FetchError> {
        let layers = self.resolve_layers(image)?;

        let mut descriptor = ImageDescriptor::default();
        let mut tar = TarWriter::new(BufWriter::new(dest));
        for layer in &layers {
            let hex = layer.digest.strip_prefix("sha256:").ok_or_else(|| {
                FetchError::Manifest(format!("unsupported layer digest {:?}", layer.digest))
            })?;
            let url = format!(
                "{}/{}/blobs/{}",
                Self::base_url(&image.registry),
                image.repository,
                layer.digest
            );
            let resp = self.http.get(&url).send()?;
            if !resp.status().is_success() {
                return Err(FetchError::Status {
                    status: resp.status().as_u16(),
                    url,
                });
            }

            let mut body = DigestReader::new(resp);
            tar.append_reader(&format!("blobs/sha256/{hex}"), layer.size, &mut body)?;
            let actual = body.finish();
            if actual != hex {
                return Err(FetchError::DigestMismatch {
                    declared: layer.digest.clone(),
                    actual: format!("sha256:{actual}"),
                });
            }

            descriptor.layers.push(LayerInfo {
                digest: layer.digest.clone(),
                size: layer.size,
            });
        }
        tar.finish()?;
        Ok(descriptor)
    }
}

/// Read adapter that hashes everything it passes through.
struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> DigestReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        let digest = self.hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(dst)?;
        self.hasher.update(&dst[..n]);
        Ok(n)
    }
}

// ============================================================================
// Tests
// ============================================================================
