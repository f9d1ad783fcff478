//! Per-call conversion options.
//!
//! [`ConvertOptions`] is what callers hand to every `*_to_*` operation. It is
//! validated before a job is submitted, so a malformed option is reported as
//! [`ConvertError::InvalidArgument`] and never reaches a worker.
//!
//! # Example
//! ```rust
//! use chartconv::ConvertOptions;
//!
//! let opts = ConvertOptions::builder()
//!     .theme("dark")
//!     .scale(2.0)
//!     .config_json(r#"{"background": "white"}"#)
//!     .allowed_base_urls(["https://cdn.example.com/data/"])
//!     .build()
//!     .unwrap();
//! assert_eq!(opts.theme.as_deref(), Some("dark"));
//! ```

use crate::engine::{RenderOptions, Renderer};
use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inline chart config, given either as JSON text or as a parsed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InlineConfig {
    Raw(String),
    Value(Value),
}

impl InlineConfig {
    fn parse(&self) -> Result<Value, ConvertError> {
        let value = match self {
            InlineConfig::Value(value) => value.clone(),
            InlineConfig::Raw(text) => serde_json::from_str(text).map_err(|e| {
                ConvertError::InvalidArgument(format!("Failed to parse config as JSON: {e}"))
            })?,
        };
        if !value.is_object() {
            return Err(ConvertError::InvalidArgument(
                "config must be a JSON object".into(),
            ));
        }
        Ok(value)
    }
}

/// Options accepted by every conversion operation.
///
/// Fields that do not apply to an operation (e.g. `quality` for SVG output)
/// are ignored by it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Vega-Lite version to compile with. `None` uses the engine default.
    pub vl_version: Option<String>,

    /// Named theme to apply.
    pub theme: Option<String>,

    /// Inline chart config merged into the spec.
    pub config: Option<InlineConfig>,

    /// URL prefixes for this call only. Overrides the converter's
    /// `allowed_base_urls`; the converter config is left untouched.
    pub allowed_base_urls: Option<Vec<String>>,

    /// Image scale factor. Default: 1.0.
    pub scale: Option<f32>,

    /// Pixels per inch for raster output. Default: 72.
    pub ppi: Option<f32>,

    /// JPEG quality, 0–100. Default: 90.
    pub quality: Option<u8>,

    /// HTML output: bundle JavaScript dependencies into the page. Default:
    /// false (load them from a CDN).
    pub bundle: Option<bool>,

    /// HTML output: `"svg"`, `"canvas"` or `"hybrid"`. Default: `"svg"`.
    pub renderer: Option<String>,
}

impl ConvertOptions {
    pub fn builder() -> ConvertOptionsBuilder {
        ConvertOptionsBuilder::default()
    }

    /// Validate and resolve defaults into the form the engine receives.
    pub fn render_options(&self) -> Result<RenderOptions, ConvertError> {
        let defaults = RenderOptions::default();

        let scale = self.scale.unwrap_or(defaults.scale);
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ConvertError::InvalidArgument(format!(
                "scale must be a positive number, got {scale}"
            )));
        }

        let ppi = self.ppi.unwrap_or(defaults.ppi);
        if !(ppi.is_finite() && ppi > 0.0) {
            return Err(ConvertError::InvalidArgument(format!(
                "ppi must be a positive number, got {ppi}"
            )));
        }

        let quality = self.quality.unwrap_or(defaults.quality);
        if quality > 100 {
            return Err(ConvertError::InvalidArgument(format!(
                "quality must be between 0 and 100, got {quality}"
            )));
        }

        let renderer = match &self.renderer {
            Some(name) => name.parse::<Renderer>()?,
            None => defaults.renderer,
        };

        Ok(RenderOptions {
            vl_version: self.vl_version.clone(),
            theme: self.theme.clone(),
            config: self.config.as_ref().map(InlineConfig::parse).transpose()?,
            scale,
            ppi,
            quality,
            bundle: self.bundle.unwrap_or(defaults.bundle),
            renderer,
        })
    }
}

/// Builder for [`ConvertOptions`].
#[derive(Debug, Default)]
pub struct ConvertOptionsBuilder {
    options: ConvertOptions,
}

impl ConvertOptionsBuilder {
    pub fn vl_version(mut self, version: impl Into<String>) -> Self {
        self.options.vl_version = Some(version.into());
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.options.theme = Some(theme.into());
        self
    }

    /// Inline config as JSON text. Parsed (and rejected if malformed) by
    /// [`build`](Self::build).
    pub fn config_json(mut self, json: impl Into<String>) -> Self {
        self.options.config = Some(InlineConfig::Raw(json.into()));
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.options.config = Some(InlineConfig::Value(config));
        self
    }

    pub fn allowed_base_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.allowed_base_urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.options.scale = Some(scale);
        self
    }

    pub fn ppi(mut self, ppi: f32) -> Self {
        self.options.ppi = Some(ppi);
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.options.quality = Some(quality);
        self
    }

    pub fn bundle(mut self, bundle: bool) -> Self {
        self.options.bundle = Some(bundle);
        self
    }

    pub fn renderer(mut self, renderer: impl Into<String>) -> Self {
        self.options.renderer = Some(renderer.into());
        self
    }

    /// Validate and return the options.
    pub fn build(self) -> Result<ConvertOptions, ConvertError> {
        self.options.render_options()?;
        Ok(self.options)
    }
}
