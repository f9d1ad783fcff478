//! The access decision shared by every fetch path.
//!
//! [`decide`] is evaluated for the initial reference and again, independently,
//! for every redirect hop. Passing the check once never grandfathers a later
//! hop.

use crate::access::resource::ResourceRef;
use crate::config::{normalize_allowed_base_urls, ConverterConfig};
use crate::error::ConvertError;
use reqwest::Url;
use std::path::{Component, Path, PathBuf};

/// Permissions applied to one conversion call.
///
/// Built from the converter configuration plus any per-call override; never
/// written back to the converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessContext {
    allow_http_access: bool,
    filesystem_root: Option<PathBuf>,
    allowed_base_urls: Option<Vec<String>>,
}

impl AccessContext {
    /// Effective context for one call.
    ///
    /// A per-call `allowed_base_urls` replaces the converter default for this
    /// call only. Supplying one while HTTP access is disabled is rejected.
    pub fn from_config(
        config: &ConverterConfig,
        allowed_base_urls_override: Option<&[String]>,
    ) -> Result<Self, ConvertError> {
        let override_urls =
            normalize_allowed_base_urls(allowed_base_urls_override.map(<[String]>::to_vec))?;
        if override_urls.is_some() && !config.allow_http_access {
            return Err(ConvertError::InvalidArgument(
                "allowed_base_urls cannot be set when HTTP access is disabled".into(),
            ));
        }

        Ok(Self {
            allow_http_access: config.allow_http_access,
            filesystem_root: config.filesystem_root.clone(),
            allowed_base_urls: override_urls.or_else(|| config.allowed_base_urls.clone()),
        })
    }

    pub fn allow_http_access(&self) -> bool {
        self.allow_http_access
    }

    pub fn filesystem_root(&self) -> Option<&Path> {
        self.filesystem_root.as_deref()
    }

    pub fn allowed_base_urls(&self) -> Option<&[String]> {
        self.allowed_base_urls.as_deref()
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `resource` may be loaded under `ctx`.
pub fn decide(resource: &ResourceRef, ctx: &AccessContext) -> Decision {
    match resource {
        ResourceRef::Data(_) => Decision::Allow,
        ResourceRef::File(path) => decide_file(path, ctx),
        ResourceRef::Http(url) => decide_http(url, ctx),
    }
}

fn decide_file(path: &Path, ctx: &AccessContext) -> Decision {
    match sandboxed_path(path, ctx) {
        Ok(_) => Decision::Allow,
        Err(reason) => Decision::Deny(reason),
    }
}

/// The canonical path `path` refers to, if it lies inside the sandbox root.
///
/// Readers must open exactly this path. It contains no symlinks, so a link
/// swapped after the check cannot redirect the read outside the root.
pub(crate) fn sandboxed_path(path: &Path, ctx: &AccessContext) -> Result<PathBuf, String> {
    let Some(root) = ctx.filesystem_root() else {
        return Err(format!(
            "Filesystem access denied by converter policy: {}",
            path.display()
        ));
    };

    let canonical_root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let resolved = resolve_for_check(&resolve_local_path(path, root));
    if resolved.starts_with(&canonical_root) {
        Ok(resolved)
    } else {
        Err(format!(
            "Filesystem access denied by converter policy (outside filesystem_root {}): {}",
            canonical_root.display(),
            resolved.display()
        ))
    }
}

fn decide_http(url: &Url, ctx: &AccessContext) -> Decision {
    if !ctx.allow_http_access() {
        return Decision::Deny(format!("HTTP access denied by converter policy: {url}"));
    }
    match ctx.allowed_base_urls() {
        Some(allowed) if !allowed.is_empty() && !is_url_allowed(url, allowed) => {
            Decision::Deny(format!("External URL not allowed: {url}"))
        }
        _ => Decision::Allow,
    }
}

/// Join a relative path onto the sandbox root; absolute paths pass through.
fn resolve_local_path(path: &Path, root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Canonical form of `path` for the containment check.
///
/// Existing paths are canonicalized (symlinks followed). A missing file is
/// resolved through its canonical parent, so `root/new.csv` still checks
/// against the real directory. When the parent is missing too, `.` and `..`
/// are collapsed lexically; nothing on that path exists, so no symlink can
/// redirect it.
fn resolve_for_check(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent) = std::fs::canonicalize(parent) {
            return parent.join(name);
        }
    }
    normalize_lexically(path)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Allow-list match with trailing-slash normalization.
///
/// Entries are `scheme://host/prefix/`. A URL matches when, ignoring a
/// trailing slash, it equals the prefix or continues it past a `/`, so
/// `http://host/allowed` permits `http://host/allowed/data.csv` but not
/// `http://host/allowed-other/` or `http://host.evil/`.
fn is_url_allowed(url: &Url, allowed: &[String]) -> bool {
    let candidate = url.as_str();
    let candidate_trimmed = candidate.trim_end_matches('/');
    allowed.iter().any(|entry| {
        let base = entry.trim_end_matches('/');
        candidate_trimmed == base
            || candidate
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}
