//! Suspending (`async`) conversion entry points.
//!
//! [`AsyncConverter`] is a thin adapter over [`Converter`]: it validates and
//! submits exactly like the blocking facade, then awaits the job's completion
//! channel instead of blocking on it. No worker ever runs inside the async
//! runtime.
//!
//! ## Cancellation
//!
//! Dropping a conversion future (an aborted task, a lost `select!` branch,
//! an expired `tokio::time::timeout`) only detaches the caller. The job keeps
//! its worker until it finishes, the result is discarded, and the worker
//! goes back to the pool. Later calls are unaffected.

use crate::config::{ConfigUpdate, ConverterConfig};
use crate::convert::Converter;
use crate::engine::{ConversionEngine, Input, Operation};
use crate::error::ConvertError;
use crate::options::ConvertOptions;
use crate::pool::PoolStats;
use serde_json::Value;
use std::sync::Arc;

/// Async conversion facade. Same operations, same errors as [`Converter`].
///
/// Cheap to clone. Clones, and the [`Converter`] it was built from, share
/// configuration and workers.
#[derive(Clone)]
pub struct AsyncConverter {
    inner: Converter,
}

impl From<Converter> for AsyncConverter {
    fn from(inner: Converter) -> Self {
        Self { inner }
    }
}

impl AsyncConverter {
    pub fn new(engine: Arc<dyn ConversionEngine>) -> Result<Self, ConvertError> {
        Converter::new(engine).map(Self::from)
    }

    pub fn with_config(
        engine: Arc<dyn ConversionEngine>,
        update: ConfigUpdate,
    ) -> Result<Self, ConvertError> {
        Converter::with_config(engine, update).map(Self::from)
    }

    /// The blocking facade sharing this converter's state.
    ///
    /// Its conversion methods panic when called on a runtime thread; call
    /// them from `tokio::task::spawn_blocking` or a plain thread.
    pub fn blocking(&self) -> &Converter {
        &self.inner
    }

    // ── Configuration ────────────────────────────────────────────────────
    //
    // Configuration changes only take short locks (resizing spawns threads
    // but never waits for them), so they run inline.

    pub async fn configure(&self, update: ConfigUpdate) -> Result<ConverterConfig, ConvertError> {
        self.inner.configure(update)
    }

    pub async fn get_config(&self) -> ConverterConfig {
        self.inner.get_config()
    }

    pub async fn set_num_workers(&self, n: usize) -> Result<(), ConvertError> {
        self.inner.set_num_workers(n)
    }

    pub async fn get_num_workers(&self) -> usize {
        self.inner.get_num_workers()
    }

    /// Wait for every worker to finish engine warm-up without blocking the
    /// runtime.
    pub async fn warm_up_workers(&self) -> Result<(), ConvertError> {
        let converter = self.inner.clone();
        tokio::task::spawn_blocking(move || converter.warm_up_workers())
            .await
            .map_err(|e| ConvertError::Internal(format!("warm-up task failed: {e}")))?
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.inner.pool_stats()
    }

    // ── Vega-Lite ────────────────────────────────────────────────────────

    pub async fn vegalite_to_vega(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Value, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToVega, Input::Spec(spec), opts)?
            .await?
            .into_json()
    }

    pub async fn vegalite_to_svg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<String, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToSvg, Input::Spec(spec), opts)?
            .await?
            .into_text()
    }

    pub async fn vegalite_to_scenegraph(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Value, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToScenegraph, Input::Spec(spec), opts)?
            .await?
            .into_json()
    }

    pub async fn vegalite_to_png(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToPng, Input::Spec(spec), opts)?
            .await?
            .into_bytes()
    }

    pub async fn vegalite_to_jpeg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToJpeg, Input::Spec(spec), opts)?
            .await?
            .into_bytes()
    }

    pub async fn vegalite_to_pdf(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToPdf, Input::Spec(spec), opts)?
            .await?
            .into_bytes()
    }

    /// Self-contained HTML page embedding the chart. `bundle` and `renderer`
    /// in `opts` control how the page loads and draws it.
    pub async fn vegalite_to_html(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<String, ConvertError> {
        self.inner
            .submit(Operation::VegaliteToHtml, Input::Spec(spec), opts)?
            .await?
            .into_text()
    }

    // ── Vega ─────────────────────────────────────────────────────────────

    pub async fn vega_to_svg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<String, ConvertError> {
        self.inner
            .submit(Operation::VegaToSvg, Input::Spec(spec), opts)?
            .await?
            .into_text()
    }

    pub async fn vega_to_scenegraph(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Value, ConvertError> {
        self.inner
            .submit(Operation::VegaToScenegraph, Input::Spec(spec), opts)?
            .await?
            .into_json()
    }

    pub async fn vega_to_png(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::VegaToPng, Input::Spec(spec), opts)?
            .await?
            .into_bytes()
    }

    pub async fn vega_to_jpeg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::VegaToJpeg, Input::Spec(spec), opts)?
            .await?
            .into_bytes()
    }

    pub async fn vega_to_pdf(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::VegaToPdf, Input::Spec(spec), opts)?
            .await?
            .into_bytes()
    }

    /// Self-contained HTML page embedding the chart.
    pub async fn vega_to_html(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<String, ConvertError> {
        self.inner
            .submit(Operation::VegaToHtml, Input::Spec(spec), opts)?
            .await?
            .into_text()
    }

    // ── SVG ──────────────────────────────────────────────────────────────

    pub async fn svg_to_png(
        &self,
        svg: impl Into<String>,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::SvgToPng, Input::Svg(svg.into()), opts)?
            .await?
            .into_bytes()
    }

    pub async fn svg_to_jpeg(
        &self,
        svg: impl Into<String>,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::SvgToJpeg, Input::Svg(svg.into()), opts)?
            .await?
            .into_bytes()
    }

    pub async fn svg_to_pdf(
        &self,
        svg: impl Into<String>,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.inner
            .submit(Operation::SvgToPdf, Input::Svg(svg.into()), opts)?
            .await?
            .into_bytes()
    }
}
