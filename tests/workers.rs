//! Worker pool behaviour through the blocking facade.

mod common;

use chartconv::{ConfigUpdate, ConvertOptions, Converter, ConverterConfig, PoolStats};
use common::{loading_engine, simple_spec};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

fn converter() -> Converter {
    common::init_tracing();
    Converter::new(loading_engine()).unwrap()
}

fn slow_spec(ms: u64) -> Value {
    let mut spec = simple_spec();
    spec["sleep_ms"] = json!(ms);
    spec
}

fn wait_for_stats(c: &Converter, what: &str, cond: impl Fn(&PoolStats) -> bool) -> PoolStats {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let stats = c.pool_stats();
        if cond(&stats) {
            return stats;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}: {stats:?}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Run `jobs` conversions from 8 caller threads and return the SVGs.
fn convert_in_parallel(c: &Converter, jobs: usize, spec: Value) -> Vec<String> {
    let opts = ConvertOptions::default();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = c.clone();
                let spec = spec.clone();
                let opts = &opts;
                scope.spawn(move || {
                    (t..jobs)
                        .step_by(8)
                        .map(|_| c.vegalite_to_svg(spec.clone(), opts).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    })
}

#[test]
fn get_num_workers_default_one() {
    let c = converter();
    assert_eq!(c.get_num_workers(), 1);
    assert_eq!(c.get_config(), ConverterConfig::default());
}

#[test]
fn set_num_workers_rejects_zero() {
    let c = converter();
    let err = c.set_num_workers(0).unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(c.get_num_workers(), 1);
    assert_eq!(c.pool_stats().target_size, 1);
}

#[test]
fn parallel_conversions_with_configured_workers() {
    let c = converter();
    c.set_num_workers(4).unwrap();

    let svgs = convert_in_parallel(&c, 16, simple_spec());
    assert_eq!(svgs.len(), 16);
    assert!(svgs.iter().all(|svg| svg.starts_with("<svg")));
}

#[test]
fn warm_up_workers_then_parallel_conversions() {
    let c = converter();
    c.set_num_workers(4).unwrap();
    c.warm_up_workers().unwrap();
    let stats = c.pool_stats();
    assert_eq!(stats.starting, 0);
    assert_eq!(stats.active, 4);

    let svgs = convert_in_parallel(&c, 16, simple_spec());
    assert_eq!(svgs.len(), 16);
    assert!(svgs.iter().all(|svg| svg.starts_with("<svg")));
}

#[test]
fn reconfigure_workers_while_requests_are_running() {
    let c = converter();
    c.set_num_workers(4).unwrap();

    let svgs = std::thread::scope(|scope| {
        let callers = scope.spawn(|| convert_in_parallel(&c, 24, slow_spec(20)));
        std::thread::sleep(Duration::from_millis(30));
        c.set_num_workers(2).unwrap();
        c.set_num_workers(3).unwrap();
        callers.join().unwrap()
    });

    assert_eq!(svgs.len(), 24);
    assert!(svgs.iter().all(|svg| svg.starts_with("<svg")));
    let stats = wait_for_stats(&c, "pool to settle", |s| s.draining == 0 && s.active == 3);
    assert_eq!(stats.completed, 24);
    assert_eq!(stats.target_size, 3);
}

#[test]
fn shrink_below_in_flight_count_loses_nothing() {
    let c = converter();
    c.set_num_workers(4).unwrap();
    c.warm_up_workers().unwrap();

    let opts = ConvertOptions::default();
    let svgs = std::thread::scope(|scope| {
        let callers: Vec<_> = (0..10)
            .map(|_| {
                let c = c.clone();
                let opts = &opts;
                scope.spawn(move || c.vegalite_to_svg(slow_spec(30), opts))
            })
            .collect();
        wait_for_stats(&c, "workers to pick up jobs", |s| s.busy >= 2);
        c.set_num_workers(1).unwrap();
        callers
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(svgs.len(), 10);
    let stats = wait_for_stats(&c, "drained workers to exit", |s| s.active == 1 && s.draining == 0);
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.queued, 0);
}

#[test]
fn configure_converter_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let c = converter();
    let config = c
        .configure(
            ConfigUpdate::new()
                .num_workers(2)
                .allow_http_access(false)
                .filesystem_root(dir.path()),
        )
        .unwrap();
    assert_eq!(config.num_workers, 2);
    assert!(!config.allow_http_access);
    assert_eq!(
        config.filesystem_root,
        Some(std::fs::canonicalize(dir.path()).unwrap())
    );

    let snapshot = c.get_config();
    c.configure(ConfigUpdate::new().num_workers(1).allow_http_access(true).clear_filesystem_root())
        .unwrap();
    c.configure(snapshot.to_update()).unwrap();
    assert_eq!(c.get_config(), snapshot);
    assert_eq!(c.pool_stats().target_size, 2);
}

#[test]
fn set_num_workers_preserves_access_policy() {
    let dir = tempfile::tempdir().unwrap();
    let c = converter();
    c.configure(
        ConfigUpdate::new()
            .filesystem_root(dir.path())
            .allowed_base_urls(["https://example.com/data"]),
    )
    .unwrap();
    let before = c.get_config();

    c.set_num_workers(3).unwrap();
    let after = c.get_config();
    assert_eq!(after.num_workers, 3);
    assert_eq!(after.allow_http_access, before.allow_http_access);
    assert_eq!(after.filesystem_root, before.filesystem_root);
    assert_eq!(after.allowed_base_urls, before.allowed_base_urls);
}

#[test]
fn configure_converter_noop_when_called_without_args() {
    let c = converter();
    c.set_num_workers(2).unwrap();
    let before = c.get_config();
    let returned = c.configure(ConfigUpdate::new()).unwrap();
    assert_eq!(returned, before);
    assert_eq!(c.get_config(), before);
}

#[test]
fn engine_failure_carries_message() {
    let c = converter();
    let mut spec = simple_spec();
    spec["fail"] = json!("unknown mark type 'blob'");
    match c.vegalite_to_vega(spec, &ConvertOptions::default()) {
        Err(chartconv::ConvertError::EngineFailure(message)) => assert!(message.contains("blob")),
        other => panic!("expected EngineFailure, got {other:?}"),
    }
}

#[test]
fn readers_never_observe_a_partial_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let c = converter();
    let a = ConfigUpdate::new()
        .num_workers(2)
        .allow_http_access(true)
        .filesystem_root(dir.path())
        .allowed_base_urls(["https://a.example/"]);
    let b = ConfigUpdate::new()
        .num_workers(3)
        .allow_http_access(false)
        .clear_filesystem_root()
        .clear_allowed_base_urls();
    let config_a = a.apply_to(&ConverterConfig::default()).unwrap();
    let config_b = b.apply_to(&ConverterConfig::default()).unwrap();
    c.configure(a.clone()).unwrap();

    std::thread::scope(|scope| {
        for writer in 0..2 {
            let c = c.clone();
            let (a, b) = (a.clone(), b.clone());
            scope.spawn(move || {
                for i in 0..50 {
                    let update = if (i + writer) % 2 == 0 { &a } else { &b };
                    c.configure(update.clone()).unwrap();
                }
            });
        }
        for _ in 0..4 {
            let c = c.clone();
            let (config_a, config_b) = (&config_a, &config_b);
            scope.spawn(move || {
                for _ in 0..200 {
                    let seen = c.get_config();
                    assert!(seen == *config_a || seen == *config_b, "torn config: {seen:?}");
                }
            });
        }
    });

    let final_config = c.get_config();
    assert_eq!(c.pool_stats().target_size, final_config.num_workers);
}
