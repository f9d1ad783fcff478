//! # chartconv
//!
//! Embeddable chart conversion service: Vega-Lite / Vega / SVG in, Vega,
//! SVG, scenegraph, PNG, JPEG, PDF or HTML out, behind a sandboxed resource access
//! policy and an elastic worker pool.
//!
//! ## Why this crate?
//!
//! Rendering a chart is the easy part; a renderer binding does it. The hard
//! part of embedding one in a server is everything around it:
//!
//! * Specs reference data files, images and map tiles by URL. Rendering an
//!   untrusted spec means fetching arbitrary URLs from inside your network,
//!   following redirects wherever they point, and reading local files.
//! * Renderers are synchronous and expensive to start, yet callers want both
//!   blocking and `async` APIs and a worker count they can change without
//!   a restart.
//!
//! This crate owns those two concerns. The renderer plugs in behind the
//! [`ConversionEngine`] trait and loads everything through a
//! [`ResourceFetcher`] that enforces the access policy.
//!
//! ## Request flow
//!
//! ```text
//! caller
//!  │
//!  ├─ 1. Facade    Converter / AsyncConverter: validate options,
//!  │               snapshot config, merge per-call allow-list
//!  ├─ 2. Pool      FIFO queue → first idle worker thread
//!  ├─ 3. Engine    ConversionEngine::convert(request, fetcher)
//!  ├─ 4. Fetch     every data/image/tile reference → ResourceFetcher
//!  │               ├─ decide(): data: ✓ │ file: sandbox root │ http: allow-list
//!  │               └─ again for every redirect hop
//!  └─ 5. Result    artifact, or PermissionDenied / InvalidArgument /
//!                  TransportFailure / EngineFailure
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chartconv::{engine, AsyncConverter, ConfigUpdate, ConvertOptions};
//! use chartconv::engine::{Artifact, Input};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Stand-in for a real renderer binding.
//!     let renderer = engine::from_fn(|request, fetcher| {
//!         if let Input::Spec(spec) = &request.input {
//!             if let Some(url) = spec["data"]["url"].as_str() {
//!                 let _csv = fetcher.fetch_text(url)?;
//!             }
//!         }
//!         Ok(Artifact::Text("<svg/>".into()))
//!     });
//!
//!     let converter = AsyncConverter::with_config(
//!         renderer,
//!         ConfigUpdate::new()
//!             .num_workers(4)
//!             .filesystem_root("/srv/chart-data")
//!             .allowed_base_urls(["https://cdn.example.com/datasets/"]),
//!     )?;
//!     converter.warm_up_workers().await?;
//!
//!     let spec = json!({"data": {"url": "cars.csv"}, "mark": "point"});
//!     let svg = converter.vegalite_to_svg(spec, &ConvertOptions::default()).await?;
//!     println!("{svg}");
//!     Ok(())
//! }
//! ```
//!
//! ## Access policy at a glance
//!
//! | Reference | Allowed when |
//! |-----------|--------------|
//! | `data:…` | always |
//! | path / `file://` | `filesystem_root` is set and the canonical path is inside it |
//! | `http(s)://` | `allow_http_access` and (no allow-list, or URL under an entry) |
//!
//! The library logs through `tracing` and never installs a subscriber.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod access;
pub mod asyncio;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod options;
pub mod pool;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use access::{AccessContext, Decision, ResourceFetcher, ResourceRef};
pub use asyncio::AsyncConverter;
pub use config::{ConfigUpdate, ConverterConfig};
pub use convert::Converter;
pub use engine::{
    Artifact, ConversionEngine, ConvertRequest, Input, Operation, RenderOptions, Renderer,
};
pub use error::{ConvertError, EngineError, FetchError};
pub use options::{ConvertOptions, ConvertOptionsBuilder, InlineConfig};
pub use pool::{JobHandle, PoolStats, SlotState, WorkerPool};
