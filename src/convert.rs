//! Blocking conversion entry points.
//!
//! ## Why a handle instead of free functions?
//!
//! A [`Converter`] owns one configuration cell and one worker pool. Keeping
//! them together on a cloneable handle means an application can run two
//! differently-sandboxed converters side by side, and tests never share
//! state through a process global. Embedders that want a single
//! process-wide converter keep one in a `static` themselves.
//!
//! Every operation follows the same path:
//!
//! ```text
//! options ─validate─▶ RenderOptions ┐
//! config snapshot + per-call URLs ──┴─▶ AccessContext ─▶ pool.submit ─▶ wait
//! ```
//!
//! [`crate::AsyncConverter`] exposes the same operations as `async fn`s over
//! the same pool.

use crate::access::AccessContext;
use crate::config::{ConfigCell, ConfigUpdate, ConverterConfig};
use crate::engine::{Artifact, ConversionEngine, ConvertRequest, Input, Operation};
use crate::error::ConvertError;
use crate::options::ConvertOptions;
use crate::pool::{JobHandle, PoolStats, WorkerPool};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

struct Inner {
    config: ConfigCell,
    pool: WorkerPool,
}

/// Blocking conversion facade.
///
/// Cheap to clone; clones share configuration and workers.
///
/// # Panics
/// The conversion methods block the calling thread until a worker replies
/// and panic when called from a thread that is driving an async runtime
/// (inside `async fn`s, `block_on`, tokio tasks). Use [`crate::AsyncConverter`]
/// there, or move the call onto `tokio::task::spawn_blocking`.
///
/// # Example
/// ```rust,no_run
/// use chartconv::{engine, ConfigUpdate, ConvertOptions, Converter};
/// use chartconv::engine::{Artifact, Input};
/// use serde_json::json;
///
/// # fn main() -> Result<(), chartconv::ConvertError> {
/// let renderer = engine::from_fn(|request, _fetcher| match &request.input {
///     Input::Spec(spec) => Ok(Artifact::Json(spec.clone())),
///     Input::Svg(svg) => Ok(Artifact::Text(svg.clone())),
/// });
/// let converter = Converter::with_config(
///     renderer,
///     ConfigUpdate::new().num_workers(2).allow_http_access(false),
/// )?;
/// let vega = converter.vegalite_to_vega(json!({"mark": "bar"}), &ConvertOptions::default())?;
/// # let _ = vega;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Converter {
    inner: Arc<Inner>,
}

impl Converter {
    /// Converter with the default configuration (one worker, HTTP allowed,
    /// no filesystem access).
    pub fn new(engine: Arc<dyn ConversionEngine>) -> Result<Self, ConvertError> {
        Self::with_config(engine, ConfigUpdate::new())
    }

    /// Converter whose initial configuration is the default with `update`
    /// applied.
    pub fn with_config(
        engine: Arc<dyn ConversionEngine>,
        update: ConfigUpdate,
    ) -> Result<Self, ConvertError> {
        let config = update.apply_to(&ConverterConfig::default())?;
        let pool = WorkerPool::new(engine, config.num_workers)?;
        info!(
            "Converter ready: {} workers, allow_http_access={}, filesystem_root={:?}",
            config.num_workers, config.allow_http_access, config.filesystem_root
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config: ConfigCell::new(config),
                pool,
            }),
        })
    }

    // ── Configuration ────────────────────────────────────────────────────

    /// Apply a partial configuration update and return the new snapshot.
    ///
    /// Only the fields set on `update` change. An empty update is a no-op.
    /// A `num_workers` change resizes the pool before the new snapshot is
    /// published; on any error the configuration is left as it was.
    pub fn configure(&self, update: ConfigUpdate) -> Result<ConverterConfig, ConvertError> {
        self.inner.config.update(&update, |old, new| {
            if old.num_workers != new.num_workers {
                self.inner.pool.resize(new.num_workers)?;
            }
            Ok(())
        })
    }

    /// Snapshot of the current configuration.
    pub fn get_config(&self) -> ConverterConfig {
        self.inner.config.get()
    }

    pub fn set_num_workers(&self, n: usize) -> Result<(), ConvertError> {
        self.configure(ConfigUpdate::new().num_workers(n)).map(|_| ())
    }

    pub fn get_num_workers(&self) -> usize {
        self.inner.config.get().num_workers
    }

    /// Block until every worker has finished engine warm-up.
    pub fn warm_up_workers(&self) -> Result<(), ConvertError> {
        self.inner.pool.warm_up();
        Ok(())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    // ── Vega-Lite ────────────────────────────────────────────────────────

    pub fn vegalite_to_vega(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Value, ConvertError> {
        self.run(Operation::VegaliteToVega, Input::Spec(spec), opts)?
            .into_json()
    }

    pub fn vegalite_to_svg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<String, ConvertError> {
        self.run(Operation::VegaliteToSvg, Input::Spec(spec), opts)?
            .into_text()
    }

    pub fn vegalite_to_scenegraph(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Value, ConvertError> {
        self.run(Operation::VegaliteToScenegraph, Input::Spec(spec), opts)?
            .into_json()
    }

    pub fn vegalite_to_png(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::VegaliteToPng, Input::Spec(spec), opts)?
            .into_bytes()
    }

    pub fn vegalite_to_jpeg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::VegaliteToJpeg, Input::Spec(spec), opts)?
            .into_bytes()
    }

    pub fn vegalite_to_pdf(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::VegaliteToPdf, Input::Spec(spec), opts)?
            .into_bytes()
    }

    /// Self-contained HTML page embedding the chart. `bundle` and `renderer`
    /// in `opts` control how the page loads and draws it.
    pub fn vegalite_to_html(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<String, ConvertError> {
        self.run(Operation::VegaliteToHtml, Input::Spec(spec), opts)?
            .into_text()
    }

    // ── Vega ─────────────────────────────────────────────────────────────

    pub fn vega_to_svg(&self, spec: Value, opts: &ConvertOptions) -> Result<String, ConvertError> {
        self.run(Operation::VegaToSvg, Input::Spec(spec), opts)?
            .into_text()
    }

    pub fn vega_to_scenegraph(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Value, ConvertError> {
        self.run(Operation::VegaToScenegraph, Input::Spec(spec), opts)?
            .into_json()
    }

    pub fn vega_to_png(&self, spec: Value, opts: &ConvertOptions) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::VegaToPng, Input::Spec(spec), opts)?
            .into_bytes()
    }

    pub fn vega_to_jpeg(
        &self,
        spec: Value,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::VegaToJpeg, Input::Spec(spec), opts)?
            .into_bytes()
    }

    pub fn vega_to_pdf(&self, spec: Value, opts: &ConvertOptions) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::VegaToPdf, Input::Spec(spec), opts)?
            .into_bytes()
    }

    /// Self-contained HTML page embedding the chart.
    pub fn vega_to_html(&self, spec: Value, opts: &ConvertOptions) -> Result<String, ConvertError> {
        self.run(Operation::VegaToHtml, Input::Spec(spec), opts)?
            .into_text()
    }

    // ── SVG ──────────────────────────────────────────────────────────────

    pub fn svg_to_png(
        &self,
        svg: impl Into<String>,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::SvgToPng, Input::Svg(svg.into()), opts)?
            .into_bytes()
    }

    pub fn svg_to_jpeg(
        &self,
        svg: impl Into<String>,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::SvgToJpeg, Input::Svg(svg.into()), opts)?
            .into_bytes()
    }

    pub fn svg_to_pdf(
        &self,
        svg: impl Into<String>,
        opts: &ConvertOptions,
    ) -> Result<Vec<u8>, ConvertError> {
        self.run(Operation::SvgToPdf, Input::Svg(svg.into()), opts)?
            .into_bytes()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Validate, build the per-call access context and queue the job.
    ///
    /// Everything that can fail with `InvalidArgument` fails here, before a
    /// worker sees the job.
    pub(crate) fn submit(
        &self,
        operation: Operation,
        input: Input,
        opts: &ConvertOptions,
    ) -> Result<JobHandle, ConvertError> {
        let options = opts.render_options()?;
        let config = self.inner.config.get();
        let context = AccessContext::from_config(&config, opts.allowed_base_urls.as_deref())?;
        let handle = self.inner.pool.submit(
            ConvertRequest {
                operation,
                input,
                options,
            },
            context,
        );
        debug!("Starting conversion: {} (job {})", operation.name(), handle.id());
        Ok(handle)
    }

    fn run(
        &self,
        operation: Operation,
        input: Input,
        opts: &ConvertOptions,
    ) -> Result<Artifact, ConvertError> {
        self.submit(operation, input, opts)?.wait()
    }
}
