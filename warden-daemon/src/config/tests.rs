use super::*;
use std::time::Duration;

fn parse_str(yaml: &str) -> Result<DaemonConfig> {
    DaemonConfig::parse(yaml, Path::new("warden.yaml"))
}

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
    assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
}

#[test]
fn test_parse_duration_errors() {
    assert!(parse_duration("").is_err());
    assert!(parse_duration("ten seconds").is_err());
    assert!(parse_duration("10y").is_err());
    assert!(parse_duration("18446744073709551615h").is_err());
}

#[test]
fn test_format_duration_picks_largest_unit() {
    assert_eq!(format_duration(&Duration::ZERO), "0s");
    assert_eq!(format_duration(&Duration::from_micros(10)), "10us");
    assert_eq!(format_duration(&Duration::from_millis(1500)), "1500ms");
    assert_eq!(format_duration(&Duration::from_secs(120)), "2m");
    assert_eq!(format_duration(&Duration::from_secs(7200)), "2h");
}

#[test]
fn test_defaults() {
    let config = DaemonConfig::default();
    assert_eq!(config.monitor_address, Path::new("/tmp/process_monitor"));
    assert_eq!(config.server.address, Path::new("/tmp/server"));
    assert_eq!(config.proxy.address, Path::new("/tmp/proxy"));
    assert_eq!(config.poll_interval, Duration::from_secs(2));
    assert_eq!(config.settle_delay, Duration::from_secs(3));
    assert_eq!(config.max_lag, 2);
    assert!(config.server.command.is_empty());
    assert!(config.validate(Path::new("defaults")).is_ok());
}

#[test]
fn test_empty_document_is_default() {
    assert_eq!(parse_str("").unwrap(), DaemonConfig::default());
    assert_eq!(parse_str("  \n").unwrap(), DaemonConfig::default());
}

#[test]
fn test_partial_config_keeps_other_defaults() {
    let config = parse_str(
        r#"
poll_interval: 500ms
receive_timeout: 10us
proxy:
  address: /run/warden/proxy
  command: ["/usr/bin/proxy", "--verbose"]
"#,
    )
    .unwrap();

    assert_eq!(config.poll_interval, Duration::from_millis(500));
    assert_eq!(config.receive_timeout, Duration::from_micros(10));
    assert_eq!(config.proxy.address, Path::new("/run/warden/proxy"));
    assert_eq!(config.proxy.command, vec!["/usr/bin/proxy", "--verbose"]);
    assert_eq!(config.server, WorkerConfig::new(DEFAULT_SERVER_ADDRESS));
    assert_eq!(config.max_lag, DEFAULT_MAX_LAG);
}

#[test]
fn test_worker_section_requires_address() {
    let err = parse_str("server:\n  command: [\"./server\"]\n").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("server"), "unexpected message: {}", msg);
    assert!(msg.contains("address"), "unexpected message: {}", msg);
}

#[test]
fn test_unknown_field_reports_path() {
    let err = parse_str("server:\n  address: /tmp/s\n  adress: /tmp/t\n").unwrap_err();
    assert!(matches!(err, DaemonError::ConfigParse { .. }));
    assert!(err.to_string().contains("server"));
}

#[test]
fn test_bad_duration_is_a_parse_error() {
    let err = parse_str("poll_interval: soon\n").unwrap_err();
    assert!(matches!(err, DaemonError::ConfigParse { .. }));
    assert!(err.to_string().contains("poll_interval"));
}

#[test]
fn test_validate_rejects_zero_lag_and_intervals() {
    let config = DaemonConfig {
        max_lag: 0,
        poll_interval: Duration::ZERO,
        receive_timeout: Duration::ZERO,
        ..DaemonConfig::default()
    };
    let msg = config.validate(Path::new("warden.yaml")).unwrap_err().to_string();
    assert!(msg.contains("max_lag"));
    assert!(msg.contains("poll_interval"));
    assert!(msg.contains("receive_timeout"));
}

#[test]
fn test_validate_rejects_shared_addresses() {
    let mut config = DaemonConfig::default();
    config.proxy.address = config.server.address.clone();
    let msg = config.validate(Path::new("warden.yaml")).unwrap_err().to_string();
    assert!(msg.contains("'server.address' and 'proxy.address' must differ"));
}

#[test]
fn test_validate_rejects_unusable_addresses() {
    let mut config = DaemonConfig::default();
    config.monitor_address = PathBuf::new();
    config.server.address = PathBuf::from(format!("/tmp/{}", "s".repeat(150)));
    let msg = config.validate(Path::new("warden.yaml")).unwrap_err().to_string();
    assert!(msg.contains("monitor_address"));
    assert!(msg.contains("server.address"));
}

#[test]
fn test_load_from_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("warden.yaml");
    std::fs::write(&path, "max_lag: 4\nsettle_delay: 0s\n").unwrap();

    let config = DaemonConfig::load(&path).unwrap();
    assert_eq!(config.max_lag, 4);
    assert_eq!(config.settle_delay, Duration::ZERO);
}

#[test]
fn test_load_validates() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("warden.yaml");
    std::fs::write(&path, "max_lag: 0\n").unwrap();

    assert!(matches!(DaemonConfig::load(&path), Err(DaemonError::Config(_))));
}

#[test]
fn test_load_missing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("absent.yaml");
    assert!(matches!(
        DaemonConfig::load(&path),
        Err(DaemonError::ConfigNotFound(p)) if p == path
    ));
    assert_eq!(DaemonConfig::load_or_default(None).unwrap(), DaemonConfig::default());
}

#[test]
fn test_serialized_config_parses_back() {
    let mut config = DaemonConfig::default();
    config.receive_timeout = Duration::from_micros(250);
    config.server.command = vec!["./server".into()];

    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(yaml.contains("receive_timeout: 250us"));
    assert_eq!(parse_str(&yaml).unwrap(), config);
}

#[test]
fn test_worker_by_role() {
    let config = DaemonConfig::default();
    assert_eq!(config.worker(WorkerRole::Server).address, Path::new("/tmp/server"));
    assert_eq!(config.worker(WorkerRole::Proxy).address, Path::new("/tmp/proxy"));
}
