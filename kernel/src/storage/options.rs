// Storage Options
//
// Explicit, per-handle storage configuration. Presence of credentials
// selects the object store backend.

use std::fmt;

use tracing::warn;

use super::StorageError;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub allow_http: bool,
    pub virtual_hosted_style: bool,
}

impl fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("StorageOptions")
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("allow_http", &self.allow_http)
            .field("virtual_hosted_style", &self.virtual_hosted_style)
            .finish()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, StorageError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(StorageError::Config(format!(
            "`{key}` expects a boolean, got `{other}`"
        ))),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl StorageOptions {
    /// Build options from key/value pairs.
    ///
    /// Recognizes the AWS-style upper case keys and short lower case aliases.
    /// Unknown keys are ignored with a warning.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            options.set(key.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    /// Options from the process environment.
    pub fn from_env() -> Result<Self, StorageError> {
        const KEYS: &[&str] = &[
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_ENDPOINT_URL",
            "S3_ENDPOINT",
            "AWS_REGION",
            "AWS_S3_BUCKET",
            "S3_BUCKET",
            "AWS_ALLOW_HTTP",
            "AWS_VIRTUAL_HOSTED_STYLE_REQUEST",
        ];

        Self::from_pairs(
            KEYS.iter()
                .filter_map(|key| std::env::var(key).ok().map(|value| (*key, value))),
        )
    }

    /// Apply a single option.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        match key {
            "AWS_ACCESS_KEY_ID" | "access_key_id" => self.access_key_id = non_empty(value),
            "AWS_SECRET_ACCESS_KEY" | "secret_access_key" => {
                self.secret_access_key = non_empty(value)
            }
            "AWS_ENDPOINT_URL" | "S3_ENDPOINT" | "endpoint" => self.endpoint = non_empty(value),
            "AWS_REGION" | "region" => self.region = non_empty(value),
            "AWS_S3_BUCKET" | "S3_BUCKET" | "bucket" => self.bucket = non_empty(value),
            "AWS_ALLOW_HTTP" | "allow_http" => self.allow_http = parse_bool(key, value)?,
            "AWS_VIRTUAL_HOSTED_STYLE_REQUEST" | "virtual_hosted_style" => {
                self.virtual_hosted_style = parse_bool(key, value)?
            }
            unknown => warn!(key = unknown, "ignoring unrecognized storage option"),
        }
        Ok(())
    }

    /// Both halves of a credential pair are present.
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }

    pub fn region_or_default(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}
