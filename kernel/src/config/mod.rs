// Run Configuration
//
// Loaded once per run from JSON, validated before any network call, then
// passed explicitly to every component.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolve::StorageRoot;

pub const DEFAULT_DAYS: u32 = 1;
/// Longest accepted lookback window (about a century).
pub const MAX_DAYS: i64 = 36_500;
pub const DEFAULT_REFERENCE: &str = "main";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("malformed config: {0}")]
    Parse(String),

    #[error("missing required option `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{option}`: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Config file as written by operators.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    pub catalog_endpoint: Option<String>,

    #[serde(alias = "s3RootPath")]
    pub storage_root_path: Option<String>,

    pub token: Option<String>,
    pub days: Option<i64>,
    pub dryrun: Option<bool>,

    #[serde(rename = "ref")]
    pub reference: Option<String>,

    pub page_size: Option<u32>,
    pub max_retries: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub output: Option<OutputFormat>,
}

/// Validated, immutable configuration for one run.
#[derive(Clone)]
pub struct CleanupConfig {
    /// Catalog API base URL, without trailing slash.
    pub catalog_endpoint: url::Url,
    pub storage_root: StorageRoot,
    pub token: String,
    pub days: u32,
    pub dry_run: bool,
    pub reference: String,
    pub page_size: Option<u32>,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub output: OutputFormat,
}

impl fmt::Debug for CleanupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupConfig")
            .field("catalog_endpoint", &self.catalog_endpoint.as_str())
            .field("storage_root", &self.storage_root.as_str())
            .field("token", &"<redacted>")
            .field("days", &self.days)
            .field("dry_run", &self.dry_run)
            .field("reference", &self.reference)
            .field("page_size", &self.page_size)
            .field("max_retries", &self.max_retries)
            .field("request_timeout", &self.request_timeout)
            .field("output", &self.output)
            .finish()
    }
}

impl CleanupConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        raw.validate()
    }
}

impl RawConfig {
    pub fn validate(self) -> Result<CleanupConfig, ConfigError> {
        let endpoint = required("catalogEndpoint", self.catalog_endpoint)?;
        let catalog_endpoint = parse_endpoint(&endpoint)?;

        let root = required("storageRootPath", self.storage_root_path)?;
        let storage_root = StorageRoot::parse(&root).map_err(|e| ConfigError::Invalid {
            option: "storageRootPath",
            reason: e.reason,
        })?;

        let token = required("token", self.token)?;

        let days = match self.days {
            None => DEFAULT_DAYS,
            Some(days) if days > MAX_DAYS => {
                return Err(ConfigError::Invalid {
                    option: "days",
                    reason: format!("must be at most {MAX_DAYS}, got {days}"),
                })
            }
            Some(days) if days >= 1 => u32::try_from(days).map_err(|_| ConfigError::Invalid {
                option: "days",
                reason: format!("{days} is too large"),
            })?,
            Some(days) => {
                return Err(ConfigError::Invalid {
                    option: "days",
                    reason: format!("must be at least 1, got {days}"),
                })
            }
        };

        let reference = match self.reference {
            None => DEFAULT_REFERENCE.to_string(),
            Some(r) if !r.trim().is_empty() => r.trim().to_string(),
            Some(_) => {
                return Err(ConfigError::Invalid {
                    option: "ref",
                    reason: "must not be empty".into(),
                })
            }
        };

        if self.page_size == Some(0) {
            return Err(ConfigError::Invalid {
                option: "pageSize",
                reason: "must be positive".into(),
            });
        }

        let timeout_secs = self
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                option: "requestTimeoutSecs",
                reason: "must be positive".into(),
            });
        }

        Ok(CleanupConfig {
            catalog_endpoint,
            storage_root,
            token,
            days,
            dry_run: self.dryrun.unwrap_or(true),
            reference,
            page_size: self.page_size,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            request_timeout: Duration::from_secs(timeout_secs),
            output: self.output.unwrap_or_default(),
        })
    }
}

fn required(option: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::Missing(option)),
    }
}

fn parse_endpoint(endpoint: &str) -> Result<url::Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        option: "catalogEndpoint",
        reason,
    };

    let url = url::Url::parse(endpoint.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme `{other}`"))),
    }
}
