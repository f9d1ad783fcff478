//! Shared helpers for integration tests: a resource-loading test engine and
//! a tiny local HTTP server.

#![allow(dead_code)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use chartconv::engine::{self, Artifact, ConvertRequest, Input, Operation};
use chartconv::{ConversionEngine, EngineError, ResourceFetcher};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A small Vega-Lite spec with inline data.
pub fn simple_spec() -> Value {
    json!({
        "data": {"values": [{"a": "A", "b": 1}, {"a": "B", "b": 2}]},
        "mark": "bar",
        "encoding": {
            "x": {"field": "a", "type": "nominal"},
            "y": {"field": "b", "type": "quantitative"}
        }
    })
}

/// A spec that loads its data from `url`.
pub fn spec_with_data_url(url: &str) -> Value {
    json!({
        "data": {"url": url},
        "mark": "point"
    })
}

/// An SVG document referencing an external image.
pub fn svg_with_image(href: &str) -> String {
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10">"#,
            r#"<image href="{href}" width="10" height="10"/></svg>"#
        ),
        href = href
    )
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Test engine ──────────────────────────────────────────────────────────

/// Engine that behaves like a renderer as far as resource loading goes.
///
/// Every `"url"` string in a spec and every `href` in an SVG is fetched
/// through the [`ResourceFetcher`]. Fetch errors propagate. A top-level
/// `"sleep_ms"` delays the job and a top-level `"fail"` makes the engine
/// reject the spec.
///
/// Output: JSON operations return `{"spec": .., "loaded": [..]}`, SVG
/// operations an `<svg>` string, HTML operations a `<!DOCTYPE html>` page,
/// everything else the loaded bytes prefixed with the operation name.
pub fn loading_engine() -> Arc<dyn ConversionEngine> {
    engine::from_fn(|request, fetcher| render(request, fetcher, false))
}

/// Like [`loading_engine`], but fetch errors are swallowed the way a
/// renderer draws a broken-image placeholder.
pub fn lenient_engine() -> Arc<dyn ConversionEngine> {
    engine::from_fn(|request, fetcher| render(request, fetcher, true))
}

fn render(
    request: &ConvertRequest,
    fetcher: &ResourceFetcher,
    lenient: bool,
) -> Result<Artifact, EngineError> {
    if request.operation.takes_svg() != matches!(request.input, Input::Svg(_)) {
        return Err(EngineError::failed("input kind does not match the operation"));
    }

    let refs = match &request.input {
        Input::Spec(spec) => {
            if let Some(ms) = spec["sleep_ms"].as_u64() {
                std::thread::sleep(Duration::from_millis(ms));
            }
            if let Some(message) = spec["fail"].as_str() {
                return Err(EngineError::failed(message));
            }
            let mut urls = Vec::new();
            collect_urls(spec, &mut urls);
            urls
        }
        Input::Svg(svg) => svg_hrefs(svg),
    };

    let mut loaded = Vec::new();
    for url in &refs {
        match fetcher.fetch(url) {
            Ok(bytes) => loaded.push(bytes),
            Err(_) if lenient => {}
            Err(e) => return Err(e.into()),
        }
    }

    let texts: Vec<String> = loaded
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .collect();

    Ok(match request.operation {
        Operation::VegaliteToVega
        | Operation::VegaliteToScenegraph
        | Operation::VegaToScenegraph => {
            let spec = match &request.input {
                Input::Spec(spec) => spec.clone(),
                Input::Svg(_) => Value::Null,
            };
            Artifact::Json(json!({"spec": spec, "loaded": texts}))
        }
        Operation::VegaliteToSvg | Operation::VegaToSvg => {
            Artifact::Text(format!("<svg><!-- {} --></svg>", texts.join("|")))
        }
        Operation::VegaliteToHtml | Operation::VegaToHtml => Artifact::Text(format!(
            "<!DOCTYPE html><html><!-- {} --></html>",
            texts.join("|")
        )),
        op => {
            let mut bytes = op.name().as_bytes().to_vec();
            for chunk in loaded {
                bytes.extend_from_slice(&chunk);
            }
            Artifact::Bytes(bytes)
        }
    })
}

fn collect_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("url", Value::String(url)) => out.push(url.clone()),
                    _ => collect_urls(child, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_urls(item, out)),
        _ => {}
    }
}

fn svg_hrefs(svg: &str) -> Vec<String> {
    svg.split("href=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .map(str::to_string)
        .collect()
}

// ── HTTP server ──────────────────────────────────────────────────────────

/// Canned response for one path.
#[derive(Debug, Clone)]
pub enum Route {
    Text(&'static str),
    /// `307 Temporary Redirect` to an absolute or relative location.
    Redirect(String),
    Status(u16),
}

impl Route {
    fn respond(&self) -> Response {
        match self {
            Route::Text(body) => (*body).into_response(),
            Route::Redirect(location) => Redirect::temporary(location).into_response(),
            Route::Status(code) => StatusCode::from_u16(*code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
        }
    }
}

/// Local HTTP server on `127.0.0.1:<random port>`, running on its own
/// runtime thread so blocking tests can use it too.
pub struct TestServer {
    addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub fn start<P>(routes: impl IntoIterator<Item = (P, Route)>) -> Self
    where
        P: AsRef<str>,
    {
        let mut router = Router::new();
        for (path, route) in routes {
            router = router.route(
                path.as_ref(),
                get(move || {
                    let route = route.clone();
                    async move { route.respond() }
                }),
            );
        }

        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("test server runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind test server");
                addr_tx
                    .send(listener.local_addr().expect("local addr"))
                    .expect("report address");
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .expect("serve");
            });
        });

        let addr = addr_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("test server did not start");
        Self {
            addr,
            shutdown: Some(shutdown_tx),
        }
    }

    /// Base URL with a trailing slash, e.g. `http://127.0.0.1:4242/`.
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Absolute URL for `path` (which starts with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
