//! The conversion engine seam.
//!
//! ## Why a trait?
//!
//! Compiling Vega-Lite, laying out a scenegraph and rasterising it are the
//! job of an external renderer. This crate only schedules that work and
//! decides what it may load. Anything implementing [`ConversionEngine`] can
//! be plugged into a [`crate::Converter`]: a binding to a real renderer in
//! production, a small closure in tests.
//!
//! The engine runs on a pool worker thread and must route every external
//! reference it meets (data URLs, image hrefs, map tiles) through the
//! [`ResourceFetcher`] it is handed. That is where the access policy is
//! enforced.

use crate::access::ResourceFetcher;
use crate::error::{ConvertError, EngineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

// ── Requests ─────────────────────────────────────────────────────────────

/// Every conversion the facade exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    VegaliteToVega,
    VegaliteToSvg,
    VegaliteToScenegraph,
    VegaliteToPng,
    VegaliteToJpeg,
    VegaliteToPdf,
    VegaliteToHtml,
    VegaToSvg,
    VegaToScenegraph,
    VegaToPng,
    VegaToJpeg,
    VegaToPdf,
    VegaToHtml,
    SvgToPng,
    SvgToJpeg,
    SvgToPdf,
}

impl Operation {
    pub const ALL: [Operation; 16] = [
        Operation::VegaliteToVega,
        Operation::VegaliteToSvg,
        Operation::VegaliteToScenegraph,
        Operation::VegaliteToPng,
        Operation::VegaliteToJpeg,
        Operation::VegaliteToPdf,
        Operation::VegaliteToHtml,
        Operation::VegaToSvg,
        Operation::VegaToScenegraph,
        Operation::VegaToPng,
        Operation::VegaToJpeg,
        Operation::VegaToPdf,
        Operation::VegaToHtml,
        Operation::SvgToPng,
        Operation::SvgToJpeg,
        Operation::SvgToPdf,
    ];

    /// Public method name of the operation, e.g. `"vegalite_to_png"`.
    pub fn name(self) -> &'static str {
        match self {
            Operation::VegaliteToVega => "vegalite_to_vega",
            Operation::VegaliteToSvg => "vegalite_to_svg",
            Operation::VegaliteToScenegraph => "vegalite_to_scenegraph",
            Operation::VegaliteToPng => "vegalite_to_png",
            Operation::VegaliteToJpeg => "vegalite_to_jpeg",
            Operation::VegaliteToPdf => "vegalite_to_pdf",
            Operation::VegaliteToHtml => "vegalite_to_html",
            Operation::VegaToSvg => "vega_to_svg",
            Operation::VegaToScenegraph => "vega_to_scenegraph",
            Operation::VegaToPng => "vega_to_png",
            Operation::VegaToJpeg => "vega_to_jpeg",
            Operation::VegaToPdf => "vega_to_pdf",
            Operation::VegaToHtml => "vega_to_html",
            Operation::SvgToPng => "svg_to_png",
            Operation::SvgToJpeg => "svg_to_jpeg",
            Operation::SvgToPdf => "svg_to_pdf",
        }
    }

    /// `true` for operations whose input is an SVG document.
    pub fn takes_svg(self) -> bool {
        matches!(
            self,
            Operation::SvgToPng | Operation::SvgToJpeg | Operation::SvgToPdf
        )
    }
}

/// Input document of a conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// A Vega-Lite or Vega JSON spec.
    Spec(Value),
    /// An SVG document.
    Svg(String),
}

/// Vega renderer embedded in HTML output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    #[default]
    Svg,
    Canvas,
    /// Text as SVG, everything else on a canvas.
    Hybrid,
}

impl Renderer {
    pub fn name(self) -> &'static str {
        match self {
            Renderer::Svg => "svg",
            Renderer::Canvas => "canvas",
            Renderer::Hybrid => "hybrid",
        }
    }
}

impl FromStr for Renderer {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "svg" => Ok(Renderer::Svg),
            "canvas" => Ok(Renderer::Canvas),
            "hybrid" => Ok(Renderer::Hybrid),
            other => Err(ConvertError::InvalidArgument(format!(
                "Invalid renderer '{other}': expected svg, canvas or hybrid"
            ))),
        }
    }
}

/// Validated rendering options, as the engine sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub vl_version: Option<String>,
    pub theme: Option<String>,
    /// Inline config object merged into the spec by the engine.
    pub config: Option<Value>,
    pub scale: f32,
    pub ppi: f32,
    /// JPEG quality, 0–100.
    pub quality: u8,
    /// HTML output: inline the JavaScript dependencies instead of loading
    /// them from a CDN.
    pub bundle: bool,
    /// HTML output: Vega renderer used by the page.
    pub renderer: Renderer,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            vl_version: None,
            theme: None,
            config: None,
            scale: 1.0,
            ppi: 72.0,
            quality: 90,
            bundle: false,
            renderer: Renderer::Svg,
        }
    }
}

/// One unit of work for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertRequest {
    pub operation: Operation,
    pub input: Input,
    pub options: RenderOptions,
}

// ── Results ──────────────────────────────────────────────────────────────

/// What an engine produces.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Vega spec or scenegraph.
    Json(Value),
    /// SVG markup or an HTML document.
    Text(String),
    /// PNG, JPEG or PDF bytes.
    Bytes(Vec<u8>),
}

impl Artifact {
    fn kind(&self) -> &'static str {
        match self {
            Artifact::Json(_) => "json",
            Artifact::Text(_) => "text",
            Artifact::Bytes(_) => "bytes",
        }
    }

    pub fn into_json(self) -> Result<Value, ConvertError> {
        match self {
            Artifact::Json(value) => Ok(value),
            other => Err(mismatch("json", &other)),
        }
    }

    pub fn into_text(self) -> Result<String, ConvertError> {
        match self {
            Artifact::Text(text) => Ok(text),
            other => Err(mismatch("text", &other)),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, ConvertError> {
        match self {
            Artifact::Bytes(bytes) => Ok(bytes),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

fn mismatch(expected: &str, got: &Artifact) -> ConvertError {
    ConvertError::EngineFailure(format!(
        "engine returned a {} artifact where {} was expected",
        got.kind(),
        expected
    ))
}

// ── Engine ───────────────────────────────────────────────────────────────

/// A synchronous chart compiler/renderer.
///
/// Implementations are shared by every worker thread.
pub trait ConversionEngine: Send + Sync + 'static {
    /// One-time initialisation, run on each worker thread when it starts.
    fn warm_up(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Perform one conversion. External resources must be loaded through
    /// `fetcher`.
    fn convert(
        &self,
        request: &ConvertRequest,
        fetcher: &ResourceFetcher,
    ) -> Result<Artifact, EngineError>;
}

impl<F> ConversionEngine for F
where
    F: Fn(&ConvertRequest, &ResourceFetcher) -> Result<Artifact, EngineError>
        + Send
        + Sync
        + 'static,
{
    fn convert(
        &self,
        request: &ConvertRequest,
        fetcher: &ResourceFetcher,
    ) -> Result<Artifact, EngineError> {
        self(request, fetcher)
    }
}

/// Wrap a closure as a shareable engine.
///
/// ```rust
/// use chartconv::engine::{self, Artifact};
///
/// let engine = engine::from_fn(|_request, _fetcher| Ok(Artifact::Text("<svg/>".into())));
/// # let _ = engine;
/// ```
pub fn from_fn<F>(f: F) -> Arc<dyn ConversionEngine>
where
    F: Fn(&ConvertRequest, &ResourceFetcher) -> Result<Artifact, EngineError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}
