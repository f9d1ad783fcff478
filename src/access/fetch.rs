//! Policy-checked resource retrieval.
//!
//! ## Why follow redirects by hand?
//!
//! reqwest's built-in redirect handling would fetch the next hop before we
//! get a chance to look at it. An allow-listed URL that answers with
//! `302 Location: http://169.254.169.254/` is the textbook SSRF pivot, so the
//! shared client is built with `redirect::Policy::none()` and every hop is
//! run through [`decide`] against the same [`AccessContext`] before it is
//! requested.

use crate::access::policy::{decide, sandboxed_path, AccessContext, Decision};
use crate::access::resource::{decode_data_uri, ResourceRef};
use crate::error::FetchError;
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::LOCATION;
use reqwest::{StatusCode, Url};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of redirect hops followed for one HTTP fetch.
pub const MAX_REDIRECTS: usize = 10;

/// Per-request timeout for HTTP fetches.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

fn http_client() -> Result<&'static Client, FetchError> {
    HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FetchError::transport("http client", e))
    })
}

/// Fetches resources for one conversion under one [`AccessContext`].
///
/// Engines receive a `&ResourceFetcher` and call [`ResourceFetcher::fetch`]
/// for every external reference they meet. Denials are returned to the
/// engine *and* remembered here, so a job still fails with a permission
/// error when the engine decides to swallow the error and render a
/// placeholder instead.
#[derive(Debug)]
pub struct ResourceFetcher {
    context: AccessContext,
    denials: Mutex<Vec<String>>,
}

impl ResourceFetcher {
    pub fn new(context: AccessContext) -> Self {
        Self {
            context,
            denials: Mutex::new(Vec::new()),
        }
    }

    /// The access context this fetcher enforces.
    pub fn context(&self) -> &AccessContext {
        &self.context
    }

    /// Load the bytes behind `raw` (URL, `data:` URI or filesystem path).
    pub fn fetch(&self, raw: &str) -> Result<Vec<u8>, FetchError> {
        let result = ResourceRef::parse(raw).and_then(|resource| match resource {
            ResourceRef::Data(uri) => decode_data_uri(&uri),
            ResourceRef::File(path) => self.fetch_file(path),
            http @ ResourceRef::Http(_) => self.fetch_http(http),
        });

        if let Err(FetchError::AccessDenied(reason)) = &result {
            self.record_denial(reason);
        }
        result
    }

    /// [`fetch`](Self::fetch) and decode the payload as UTF-8.
    pub fn fetch_text(&self, raw: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(raw)?;
        String::from_utf8(bytes).map_err(|e| FetchError::transport(raw, e))
    }

    /// Drain the denials recorded so far.
    pub(crate) fn take_denials(&self) -> Vec<String> {
        std::mem::take(&mut *self.denials.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record_denial(&self, reason: &str) {
        warn!("Resource access denied: {}", reason);
        self.denials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reason.to_string());
    }

    fn check(&self, resource: &ResourceRef) -> Result<(), FetchError> {
        match decide(resource, &self.context) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(FetchError::AccessDenied(reason)),
        }
    }

    fn fetch_file(&self, path: PathBuf) -> Result<Vec<u8>, FetchError> {
        let resolved = sandboxed_path(&path, &self.context).map_err(FetchError::AccessDenied)?;
        debug!("Reading local resource: {}", resolved.display());

        let transport =
            |e: std::io::Error| FetchError::transport(resolved.display().to_string(), e);
        let mut file = File::open(&resolved).map_err(transport)?;
        verify_opened(&file, &resolved)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(transport)?;
        Ok(bytes)
    }

    fn fetch_http(&self, resource: ResourceRef) -> Result<Vec<u8>, FetchError> {
        let client = http_client()?;
        let mut current = resource;

        for hop in 0..=MAX_REDIRECTS {
            self.check(&current)?;
            let ResourceRef::Http(url) = &current else {
                return Err(FetchError::AccessDenied(format!(
                    "Redirect to non-HTTP resource denied: {current}"
                )));
            };

            debug!("GET {} (hop {})", url, hop);
            let response = client
                .get(url.clone())
                .send()
                .map_err(|e| FetchError::transport(url.as_str(), e))?;
            let status = response.status();

            if is_redirect(status) {
                let next = redirect_target(url, &response)?;
                debug!("Redirect {} -> {} ({})", url, next, status);
                current = ResourceRef::from_url(next)?;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::transport(url.as_str(), format!("HTTP {status}")));
            }

            return response
                .bytes()
                .map(|body| body.to_vec())
                .map_err(|e| FetchError::transport(url.as_str(), e));
        }

        Err(FetchError::transport(
            current.to_string(),
            format!("exceeded {MAX_REDIRECTS} redirects"),
        ))
    }
}

/// Confirm that the file opened at `resolved` is still the one the sandbox
/// approved: the path must canonicalize to itself, and on unix the opened
/// inode must be the one the path names now.
#[cfg_attr(not(unix), allow(unused_variables))]
fn verify_opened(file: &File, resolved: &Path) -> Result<(), FetchError> {
    let changed = || {
        FetchError::AccessDenied(format!(
            "Filesystem access denied by converter policy (path changed while opening): {}",
            resolved.display()
        ))
    };

    match std::fs::canonicalize(resolved) {
        Ok(now) if now.as_path() == resolved => {}
        _ => return Err(changed()),
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let opened = file
            .metadata()
            .map_err(|e| FetchError::transport(resolved.display().to_string(), e))?;
        let current = std::fs::metadata(resolved).map_err(|_| changed())?;
        if (opened.dev(), opened.ino()) != (current.dev(), current.ino()) {
            return Err(changed());
        }
    }
    Ok(())
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn redirect_target(
    current: &Url,
    response: &reqwest::blocking::Response,
) -> Result<Url, FetchError> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            FetchError::transport(current.as_str(), "redirect without a valid Location header")
        })?;
    current.join(location).map_err(|e| {
        FetchError::transport(
            current.as_str(),
            format!("bad redirect target '{location}': {e}"),
        )
    })
}
