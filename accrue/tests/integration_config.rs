//! Integration tests for configuration-driven startup.
//!
//! These tests write configuration files to a temporary directory, load
//! them and start a monitoring context against the built-in producers.

use std::sync::Arc;
use std::time::Duration;

use accrue::builtin::{MethodCallProducer, OsProducer};
use accrue::config::MonitoringConfig;
use accrue::context::MonitoringContext;
use accrue::error::{AccrueError, ConfigError, FailureCause, TieError};
use accrue::registry::ProducerRegistry;
use accrue::tie::Tieable;
use accrue::Reading;
use tempfile::tempdir;

const CONFIG: &str = r#"{
    "accumulators": [
        {"name": "open-files", "producer_name": "OS", "stat_name": "OS", "value_name": "OpenFiles"},
        {"name": "cpu-seconds", "producer_name": "OS", "stat_name": "OS", "value_name": "CPUTime",
         "interval_name": "1m", "time_unit": "SECONDS"},
        {"name": "fetch-calls", "producer_name": "Calls", "stat_name": "fetch", "value_name": "req"}
    ],
    "max_accumulated_values": 20,
    "tick_interval_ms": 50,
    "auto_tie_sweep_interval_ms": 50
}"#;

fn builtin_registry() -> (Arc<ProducerRegistry>, Arc<OsProducer>, Arc<MethodCallProducer>) {
    let registry = Arc::new(ProducerRegistry::new());
    let os = Arc::new(OsProducer::new());
    let calls = Arc::new(MethodCallProducer::new("Calls", "service"));
    registry.register(os.clone());
    registry.register(calls.clone());
    (registry, os, calls)
}

#[test]
fn test_start_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("monitoring.json");
    std::fs::write(&path, CONFIG).unwrap();

    let config = MonitoringConfig::load(&path).unwrap();
    assert_eq!(config.accumulators.len(), 3);

    let (registry, os, calls) = builtin_registry();
    os.refresh();

    let context = MonitoringContext::start(config, registry).unwrap();
    let repository = context.repository();
    assert_eq!(repository.len(), 3);
    assert_eq!(repository.pending_count(), 1);

    let open_files = repository.accumulator("open-files").unwrap();
    assert!(!open_files.value().is_no_data());

    calls.record_call("fetch", Duration::from_millis(1), false);
    let fetch = repository.accumulator("fetch-calls").unwrap();
    assert_eq!(fetch.value(), Reading::Value(1.0));

    let cpu = repository.accumulator("cpu-seconds").unwrap();
    assert_eq!(cpu.definition().interval.name(), "1m");

    context.stop();
}

#[test]
fn test_start_rejects_a_partially_bad_batch() {
    let config = MonitoringConfig::from_json_str(
        r#"{"accumulators": [
            {"name": "open-files", "producer_name": "OS", "stat_name": "OS", "value_name": "OpenFiles"},
            {"name": "ghost", "producer_name": "Z", "stat_name": "OS", "value_name": "OpenFiles"},
            {"name": "weekly", "producer_name": "OS", "stat_name": "OS", "value_name": "CPUTime", "time_unit": "WEEKS"}
        ]}"#,
    )
    .unwrap();

    let (registry, _os, _calls) = builtin_registry();
    let (context, report) = MonitoringContext::bind(config.clone(), Arc::clone(&registry)).unwrap();
    assert_eq!(report.tied, vec!["open-files".to_string()]);
    assert_eq!(context.repository().len(), 1);
    assert!(matches!(
        report.tie_error("ghost"),
        Some(TieError::ProducerNotFound { producer_id, .. }) if producer_id == "Z"
    ));
    assert!(report.failures.iter().any(|f| matches!(
        &f.source,
        FailureCause::Config(ConfigError::InvalidTimeUnit { value, .. }) if value == "WEEKS"
    )));

    let err = MonitoringContext::start(config, registry).unwrap_err();
    assert!(matches!(err, AccrueError::Startup(ref e) if e.failures.len() == 2));
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"{"accumulators": [{"name": "missing-fields"}]}"#).unwrap();

    let err = MonitoringConfig::load(&path).unwrap_err();
    assert!(matches!(err, AccrueError::Config(ConfigError::Parse { .. })));
}
