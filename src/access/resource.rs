//! Resource references: classify a raw URL or path before any policy check.

use crate::error::FetchError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;

/// URL scheme family of a [`ResourceRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    File,
    Data,
}

/// A resource a conversion wants to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    /// `http://` or `https://` URL.
    Http(Url),
    /// `file://` URL or plain path. Relative paths resolve against the
    /// filesystem root.
    File(PathBuf),
    /// Inline `data:` URI, kept verbatim.
    Data(String),
}

impl ResourceRef {
    /// Classify a raw reference.
    ///
    /// Anything that does not parse as an absolute URL is treated as a
    /// filesystem path. URLs with other schemes (`ftp:`, `javascript:`, …)
    /// are rejected as access violations.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim();
        if has_data_scheme(trimmed) {
            return Ok(ResourceRef::Data(trimmed.to_string()));
        }

        match Url::parse(trimmed) {
            // Single-letter "schemes" are Windows drive letters (`C:\data.csv`).
            Ok(url) if url.scheme().len() > 1 => Self::from_url(url),
            _ => Ok(ResourceRef::File(PathBuf::from(trimmed))),
        }
    }

    /// Classify an already-parsed absolute URL.
    pub fn from_url(url: Url) -> Result<Self, FetchError> {
        match url.scheme() {
            "http" | "https" => Ok(ResourceRef::Http(url)),
            "file" => url.to_file_path().map(ResourceRef::File).map_err(|_| {
                FetchError::AccessDenied(format!("Invalid file URL: {url}"))
            }),
            "data" => Ok(ResourceRef::Data(url.to_string())),
            other => Err(FetchError::AccessDenied(format!(
                "Unsupported URL scheme '{other}': {url}"
            ))),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            ResourceRef::Http(_) => Scheme::Http,
            ResourceRef::File(_) => Scheme::File,
            ResourceRef::Data(_) => Scheme::Data,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Http(url) => write!(f, "{url}"),
            ResourceRef::File(path) => write!(f, "{}", path.display()),
            ResourceRef::Data(uri) => {
                // Data URIs can be megabytes long; show the header only.
                let header = uri.split(',').next().unwrap_or(uri);
                write!(f, "{header},…")
            }
        }
    }
}

fn has_data_scheme(raw: &str) -> bool {
    raw.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}

/// Decode the payload of a `data:` URI.
///
/// `data:[<mediatype>][;base64],<data>`: base64 payloads are decoded with
/// the standard alphabet, everything else is percent-decoded.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, FetchError> {
    let body = uri
        .get(5..)
        .filter(|_| has_data_scheme(uri))
        .ok_or_else(|| FetchError::transport(uri, "not a data: URI"))?;
    let (header, payload) = body
        .split_once(',')
        .ok_or_else(|| FetchError::transport(uri, "data: URI is missing ','"))?;

    let is_base64 = header
        .rsplit(';')
        .next()
        .is_some_and(|param| param.eq_ignore_ascii_case("base64"));

    if is_base64 {
        let compact: String = percent_decode(payload)
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .map(char::from)
            .collect();
        STANDARD
            .decode(compact)
            .map_err(|e| FetchError::transport("data: URI", format!("invalid base64: {e}")))
    } else {
        Ok(percent_decode(payload))
    }
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]));
            if let (Some(hi), Some(lo)) = hex {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
