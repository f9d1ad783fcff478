//! Converter configuration: worker count and resource access policy.
//!
//! [`ConverterConfig`] is the full snapshot. [`ConfigUpdate`] is a partial
//! update built fluently: fields that are not mentioned keep their current
//! value, and `clear_*` methods reset the optional fields explicitly.
//! [`ConfigCell`] holds the live configuration of a converter. All reads and
//! writes go through one lock, so every conversion sees a complete snapshot
//! and never a half-applied update.

use crate::error::ConvertError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Snapshot of a converter's configuration.
///
/// # Example
/// ```rust
/// use chartconv::ConverterConfig;
///
/// let config = ConverterConfig::default();
/// assert_eq!(config.num_workers, 1);
/// assert!(config.allow_http_access);
/// assert!(config.filesystem_root.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Number of worker threads. Always ≥ 1. Default: 1.
    pub num_workers: usize,

    /// Whether HTTP(S) resources may be fetched at all. Default: true.
    pub allow_http_access: bool,

    /// Directory that local file reads are confined to, in canonical form.
    /// `None` disables filesystem access entirely. Default: None.
    pub filesystem_root: Option<PathBuf>,

    /// URL prefixes HTTP(S) fetches are restricted to. Each entry is stored
    /// normalized with a trailing `/`. `None` or empty allows any URL as long
    /// as `allow_http_access` is set. Default: None.
    pub allowed_base_urls: Option<Vec<String>>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            allow_http_access: true,
            filesystem_root: None,
            allowed_base_urls: None,
        }
    }
}

impl ConverterConfig {
    /// An update that restores every field of this snapshot.
    pub fn to_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            num_workers: Some(self.num_workers),
            allow_http_access: Some(self.allow_http_access),
            filesystem_root: Some(self.filesystem_root.clone()),
            allowed_base_urls: Some(self.allowed_base_urls.clone()),
        }
    }
}

/// Partial update for [`ConverterConfig`].
///
/// # Example
/// ```rust
/// use chartconv::{ConfigUpdate, ConverterConfig};
///
/// let next = ConfigUpdate::new()
///     .num_workers(4)
///     .allow_http_access(false)
///     .apply_to(&ConverterConfig::default())
///     .unwrap();
/// assert_eq!(next.num_workers, 4);
/// assert!(!next.allow_http_access);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    num_workers: Option<usize>,
    allow_http_access: Option<bool>,
    filesystem_root: Option<Option<PathBuf>>,
    allowed_base_urls: Option<Option<Vec<String>>>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }

    pub fn allow_http_access(mut self, allow: bool) -> Self {
        self.allow_http_access = Some(allow);
        self
    }

    pub fn filesystem_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.filesystem_root = Some(Some(root.into()));
        self
    }

    pub fn clear_filesystem_root(mut self) -> Self {
        self.filesystem_root = Some(None);
        self
    }

    pub fn allowed_base_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_base_urls = Some(Some(urls.into_iter().map(Into::into).collect()));
        self
    }

    pub fn clear_allowed_base_urls(mut self) -> Self {
        self.allowed_base_urls = Some(None);
        self
    }

    /// `true` when the update would not touch any field.
    pub fn is_empty(&self) -> bool {
        self.num_workers.is_none()
            && self.allow_http_access.is_none()
            && self.filesystem_root.is_none()
            && self.allowed_base_urls.is_none()
    }

    /// Merge this update onto `base`, validating and normalizing the
    /// supplied fields.
    ///
    /// Fields that are not part of the update are copied from `base` as-is,
    /// so a root directory that disappeared after it was configured does not
    /// make unrelated updates fail.
    pub fn apply_to(&self, base: &ConverterConfig) -> Result<ConverterConfig, ConvertError> {
        let mut next = base.clone();

        if let Some(n) = self.num_workers {
            if n == 0 {
                return Err(ConvertError::InvalidArgument(
                    "num_workers must be >= 1".into(),
                ));
            }
            next.num_workers = n;
        }

        if let Some(allow) = self.allow_http_access {
            next.allow_http_access = allow;
        }

        if let Some(root) = &self.filesystem_root {
            next.filesystem_root = root.as_deref().map(canonical_root).transpose()?;
        }

        if let Some(urls) = &self.allowed_base_urls {
            next.allowed_base_urls = normalize_allowed_base_urls(urls.clone())?;
        }

        if !next.allow_http_access && next.allowed_base_urls.is_some() {
            return Err(ConvertError::InvalidArgument(
                "allowed_base_urls cannot be set when HTTP access is disabled".into(),
            ));
        }

        Ok(next)
    }
}

/// The live configuration of one converter.
#[derive(Debug, Default)]
pub struct ConfigCell {
    current: Mutex<ConverterConfig>,
}

impl ConfigCell {
    pub fn new(config: ConverterConfig) -> Self {
        Self {
            current: Mutex::new(config),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> ConverterConfig {
        self.lock().clone()
    }

    /// Apply `update` atomically.
    ///
    /// `on_commit(old, new)` runs while the lock is held, before the new
    /// snapshot is stored. If it fails, the configuration is left unchanged.
    /// An empty update returns the current snapshot without calling
    /// `on_commit`.
    pub fn update<F>(
        &self,
        update: &ConfigUpdate,
        on_commit: F,
    ) -> Result<ConverterConfig, ConvertError>
    where
        F: FnOnce(&ConverterConfig, &ConverterConfig) -> Result<(), ConvertError>,
    {
        let mut current = self.lock();
        if update.is_empty() {
            return Ok(current.clone());
        }

        let next = update.apply_to(&current)?;
        if next == *current {
            return Ok(next);
        }

        on_commit(&current, &next)?;
        info!(
            "Converter configured: num_workers={}, allow_http_access={}, \
             filesystem_root={:?}, allowed_base_urls={:?}",
            next.num_workers,
            next.allow_http_access,
            next.filesystem_root,
            next.allowed_base_urls
        );
        *current = next.clone();
        Ok(next)
    }

    // The guarded value is a plain snapshot that is only ever replaced whole,
    // so a poisoned lock still holds a consistent config.
    fn lock(&self) -> MutexGuard<'_, ConverterConfig> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Normalisation helpers ────────────────────────────────────────────────

/// Canonicalize a configured sandbox root and require it to be a directory.
fn canonical_root(root: &Path) -> Result<PathBuf, ConvertError> {
    let canonical = std::fs::canonicalize(root).map_err(|e| {
        ConvertError::InvalidArgument(format!(
            "Failed to resolve filesystem_root {}: {}",
            root.display(),
            e
        ))
    })?;
    if !canonical.is_dir() {
        return Err(ConvertError::InvalidArgument(format!(
            "filesystem_root must be a directory: {}",
            canonical.display()
        )));
    }
    Ok(canonical)
}

pub(crate) fn normalize_allowed_base_urls(
    urls: Option<Vec<String>>,
) -> Result<Option<Vec<String>>, ConvertError> {
    urls.map(|urls| {
        urls.iter()
            .map(|url| normalize_allowed_base_url(url))
            .collect::<Result<Vec<_>, _>>()
    })
    .transpose()
}

/// Parse and normalize one allow-list entry to `scheme://host[:port]/path/`.
pub(crate) fn normalize_allowed_base_url(raw: &str) -> Result<String, ConvertError> {
    let invalid = |detail: &str| {
        ConvertError::InvalidArgument(format!("Invalid allowed_base_url '{raw}': {detail}"))
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("must use http or https scheme"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("cannot include userinfo credentials"));
    }
    if url.query().is_some() {
        return Err(invalid("cannot include a query component"));
    }
    if url.fragment().is_some() {
        return Err(invalid("cannot include a fragment component"));
    }

    let mut normalized = url.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}
