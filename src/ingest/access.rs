//! Signed read access to stored blobs.
//!
//! Access class and lifetime are a fixed function of the blob's category:
//!
//! | category                           | container | expiry     |
//! |------------------------------------|-----------|------------|
//! | `thumbnail`, `preview`, `profile`  | public    | never      |
//! | `course`, `video`, `material`      | private   | 24 hours   |
//! | `exam`                             | private   | 30 minutes |
//! | `certificate`                      | private   | 7 days     |
//! | anything else                      | private   | 24 hours   |
//!
//! Private URLs carry a read-only HMAC-SHA256 signature over the permission,
//! expiry and canonical resource path:
//!
//! ```text
//! {base_url}/{container}/{blob_name}?sp=r&se=2024-01-01T00:00:00Z&sig=...
//! ```

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::blob::BlobConfig;

type HmacSha256 = Hmac<Sha256>;

/// Read-only permission tag.
const READ_PERMISSION: &str = "r";

/// Timestamp format of the `se` query parameter.
const EXPIRY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Errors from signed access issuance.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("Signing credentials missing: {0}")]
    MissingCredentials(String),

    #[error("Signing key is not valid base64")]
    InvalidKey,
}

/// Blob category tag, selecting container and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Thumbnail,
    Preview,
    Profile,
    Course,
    Video,
    Material,
    Exam,
    Certificate,
    Default,
}

impl Category {
    /// Map a tag to its category. Unrecognized tags fall back to `Default`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "thumbnail" => Category::Thumbnail,
            "preview" => Category::Preview,
            "profile" => Category::Profile,
            "course" => Category::Course,
            "video" => Category::Video,
            "material" => Category::Material,
            "exam" => Category::Exam,
            "certificate" => Category::Certificate,
            _ => Category::Default,
        }
    }

    /// Category of a blob named `<category>/<uuid>.<ext>`.
    pub fn from_blob_name(blob_name: &str) -> Self {
        match blob_name.split_once('/') {
            Some((prefix, _)) => Category::from_tag(prefix),
            None => Category::Default,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Category::Thumbnail => "thumbnail",
            Category::Preview => "preview",
            Category::Profile => "profile",
            Category::Course => "course",
            Category::Video => "video",
            Category::Material => "material",
            Category::Exam => "exam",
            Category::Certificate => "certificate",
            Category::Default => "default",
        }
    }

    pub fn access_class(self) -> AccessClass {
        match self {
            Category::Thumbnail | Category::Preview | Category::Profile => AccessClass::Public,
            _ => AccessClass::Private,
        }
    }

    /// Lifetime of a signed URL, `None` for public blobs.
    pub fn ttl(self) -> Option<Duration> {
        match self {
            Category::Thumbnail | Category::Preview | Category::Profile => None,
            Category::Exam => Some(Duration::minutes(30)),
            Category::Certificate => Some(Duration::days(7)),
            Category::Course | Category::Video | Category::Material | Category::Default => {
                Some(Duration::hours(24))
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which container a blob lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessClass {
    Public,
    Private,
}

/// Container names for the two access classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Containers {
    pub public: String,
    pub private: String,
}

impl Containers {
    pub fn for_class(&self, class: AccessClass) -> &str {
        match class {
            AccessClass::Public => &self.public,
            AccessClass::Private => &self.private,
        }
    }

    pub fn for_category(&self, category: Category) -> &str {
        self.for_class(category.access_class())
    }
}

impl Default for Containers {
    fn default() -> Self {
        Self::from(&BlobConfig::default())
    }
}

impl From<&BlobConfig> for Containers {
    fn from(config: &BlobConfig) -> Self {
        Self {
            public: config.public_container.clone(),
            private: config.private_container.clone(),
        }
    }
}

/// A URL granting read access to one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAccessDescriptor {
    pub blob_name: String,
    pub container: String,
    pub url: String,
    pub category: Category,
    /// `None` for public blobs, which never expire.
    pub expires_at: Option<DateTime<Utc>>,
    pub is_public: bool,
}

/// Signing credentials.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Storage account name, used in the canonical resource path.
    pub account_name: String,
    /// Base64 shared key. Required for private blobs.
    pub account_key: Option<String>,
    /// URL prefix; defaults to `https://{account_name}.blob.core.windows.net`.
    pub base_url: Option<String>,
}

/// Issues signed access descriptors from the category policy.
#[derive(Clone)]
pub struct AccessSigner {
    account_name: String,
    key: Option<Vec<u8>>,
    base_url: String,
    containers: Containers,
}

impl fmt::Debug for AccessSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessSigner")
            .field("account_name", &self.account_name)
            .field("base_url", &self.base_url)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

impl AccessSigner {
    pub fn new(config: &AccessConfig, containers: Containers) -> Result<Self, AccessError> {
        let key = match config.account_key.as_deref().filter(|k| !k.is_empty()) {
            Some(encoded) => Some(STANDARD.decode(encoded).map_err(|_| AccessError::InvalidKey)?),
            None => None,
        };

        let base_url = match &config.base_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("https://{}.blob.core.windows.net", config.account_name),
        };

        Ok(Self {
            account_name: config.account_name.clone(),
            key,
            base_url,
            containers,
        })
    }

    pub fn containers(&self) -> &Containers {
        &self.containers
    }

    /// Issue access for `blob_name` under the policy of `category`.
    pub fn issue(
        &self,
        blob_name: &str,
        category: Category,
    ) -> Result<SignedAccessDescriptor, AccessError> {
        self.issue_at(blob_name, category, Utc::now())
    }

    /// Like [`issue`](Self::issue) with an explicit clock.
    pub fn issue_at(
        &self,
        blob_name: &str,
        category: Category,
        now: DateTime<Utc>,
    ) -> Result<SignedAccessDescriptor, AccessError> {
        if self.account_name.is_empty() {
            return Err(AccessError::MissingCredentials(
                "storage account name not configured".to_string(),
            ));
        }

        let container = self.containers.for_category(category).to_string();
        let plain_url = format!("{}/{}/{}", self.base_url, container, blob_name);

        let Some(ttl) = category.ttl() else {
            return Ok(SignedAccessDescriptor {
                blob_name: blob_name.to_string(),
                container,
                url: plain_url,
                category,
                expires_at: None,
                is_public: true,
            });
        };

        let key = self.key.as_deref().ok_or_else(|| {
            AccessError::MissingCredentials("storage account key not configured".to_string())
        })?;

        let expires_at = now + ttl;
        let expiry = expires_at.format(EXPIRY_FORMAT).to_string();
        let signature = sign(
            key,
            &string_to_sign(&self.account_name, &container, blob_name, &expiry),
        )?;

        Ok(SignedAccessDescriptor {
            blob_name: blob_name.to_string(),
            container,
            url: format!("{plain_url}?sp={READ_PERMISSION}&se={expiry}&sig={signature}"),
            category,
            expires_at: Some(expires_at),
            is_public: false,
        })
    }

    /// Check a signature produced by this signer and its expiry against `now`.
    /// Reads happen against blob storage, so only fixtures need this.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn verify(
        &self,
        container: &str,
        blob_name: &str,
        expiry: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(key) = self.key.as_deref() else {
            return false;
        };
        let Ok(expires_at) = chrono::NaiveDateTime::parse_from_str(expiry, EXPIRY_FORMAT) else {
            return false;
        };
        if expires_at.and_utc() <= now {
            return false;
        }
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
            return false;
        };
        mac.update(string_to_sign(&self.account_name, container, blob_name, expiry).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }
}

fn string_to_sign(account: &str, container: &str, blob_name: &str, expiry: &str) -> String {
    format!("{READ_PERMISSION}\n{expiry}\n/{account}/{container}/{blob_name}")
}

fn sign(key: &[u8], payload: &str) -> Result<String, AccessError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AccessError::InvalidKey)?;
    mac.update(payload.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}
