//! Release manifest
//!
//! The feed serves one JSON document describing the latest release:
//!
//! ```json
//! {
//!   "version": "2.1.0",
//!   "package_url": "https://example.com/app-2.1.0.tar.gz",
//!   "sha256": "<64 hex chars>",
//!   "signature": "<base64 Ed25519 signature over the raw SHA-256 digest>",
//!   "release_notes_url": "https://example.com/notes/2.1.0",
//!   "minimum_os_version": "12.0"
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use url::Url;

use super::error::{Result, UpdateError};
use super::verify::Sha256Digest;
use super::version::VersionId;

/// Parsed release manifest. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateManifest {
    pub latest_version: VersionId,
    pub release_notes_url: Option<Url>,
    pub package_url: Url,
    pub package_checksum: Sha256Digest,
    pub package_signature: Vec<u8>,
    pub minimum_os_version: Option<VersionId>,
}

/// Wire shape. Every field is optional here so that absence can be told apart
/// from a malformed value.
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default, alias = "latestVersion")]
    version: Option<String>,
    #[serde(default, alias = "packageURL", alias = "packageUrl")]
    package_url: Option<String>,
    #[serde(default, alias = "packageChecksum")]
    sha256: Option<String>,
    #[serde(default, alias = "packageSignature")]
    signature: Option<String>,
    #[serde(default, alias = "releaseNotesURL", alias = "releaseNotesUrl")]
    release_notes_url: Option<String>,
    #[serde(default, alias = "minimumSupportedOSVersion")]
    minimum_os_version: Option<String>,
}

impl UpdateManifest {
    /// Parse a manifest document.
    ///
    /// Malformed JSON and malformed field values are `Parse` errors; missing
    /// or mistyped fields are `Schema` errors. Relative URLs resolve against
    /// `base`.
    pub fn from_json(bytes: &[u8], base: &Url) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| UpdateError::Parse(format!("invalid JSON: {}", e)))?;

        if !value.is_object() {
            return Err(UpdateError::Schema(
                "manifest must be a JSON object".to_string(),
            ));
        }

        let raw: RawManifest =
            serde_json::from_value(value).map_err(|e| UpdateError::Schema(e.to_string()))?;

        let version = required(raw.version, "version")?;
        let package_url = required(raw.package_url, "package_url")?;
        let sha256 = required(raw.sha256, "sha256")?;
        let signature = required(raw.signature, "signature")?;

        let latest_version = VersionId::parse(&version)?;
        let package_url = resolve_url(base, &package_url, "package_url")?;
        let package_checksum = Sha256Digest::from_hex(&sha256)
            .map_err(|e| UpdateError::Parse(format!("sha256: {}", e)))?;
        let package_signature = base64::engine::general_purpose::STANDARD
            .decode(signature.trim())
            .map_err(|e| UpdateError::Parse(format!("signature: {}", e)))?;

        let release_notes_url = raw
            .release_notes_url
            .map(|u| resolve_url(base, &u, "release_notes_url"))
            .transpose()?;
        let minimum_os_version = raw
            .minimum_os_version
            .map(|v| VersionId::parse(&v))
            .transpose()?;

        Ok(Self {
            latest_version,
            release_notes_url,
            package_url,
            package_checksum,
            package_signature,
            minimum_os_version,
        })
    }

    /// File name the package is downloaded under
    pub fn package_file_name(&self, app_name: &str) -> String {
        let sanitized: String = app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-{}.update", sanitized, self.latest_version)
    }
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    field.ok_or_else(|| UpdateError::Schema(format!("missing required field `{}`", name)))
}

fn resolve_url(base: &Url, raw: &str, field: &str) -> Result<Url> {
    base.join(raw.trim())
        .map_err(|e| UpdateError::Parse(format!("{}: {}", field, e)))
}

/// Bounds applied to a single manifest fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_body_bytes: u64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Trait for manifest sources
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// Retrieve and parse the manifest at `feed_url`
    async fn fetch(&self, feed_url: &Url, limits: &FetchLimits) -> Result<UpdateManifest>;
}

/// HTTP manifest fetcher
pub struct HttpManifestFetcher {
    client: reqwest::Client,
}

impl HttpManifestFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Reuse an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, feed_url: &Url, limits: &FetchLimits) -> Result<UpdateManifest> {
        tracing::debug!("Fetching update manifest from {}", feed_url);

        let timeout_err = |e: reqwest::Error| {
            if e.is_timeout() {
                UpdateError::Timeout {
                    operation: "manifest fetch",
                    after: limits.timeout,
                }
            } else {
                UpdateError::Http(e)
            }
        };

        let mut response = self
            .client
            .get(feed_url.clone())
            .timeout(limits.timeout)
            .send()
            .await
            .map_err(timeout_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network(format!(
                "feed returned HTTP {}",
                status
            )));
        }

        if let Some(len) = response.content_length() {
            if len > limits.max_body_bytes {
                return Err(UpdateError::Network(format!(
                    "manifest is {} bytes, limit is {}",
                    len, limits.max_body_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(timeout_err)? {
            if body.len() as u64 + chunk.len() as u64 > limits.max_body_bytes {
                return Err(UpdateError::Network(format!(
                    "manifest exceeds {} bytes",
                    limits.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        UpdateManifest::from_json(&body, feed_url)
    }
}
