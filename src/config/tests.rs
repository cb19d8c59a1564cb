use super::*;

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.capacity_bytes.get(), 500 * 1024 * 1024);
    assert_eq!(settings.cache.max_age, Duration::from_secs(24 * 3600));
    assert_eq!(settings.cache.busy_timeout, Duration::from_secs(10));
    assert_eq!(settings.cache.error_ttl, Duration::from_millis(200));
    assert_eq!(settings.cache.cold_min_ttl, Duration::from_secs(3600));
    assert!(settings.cold.directory.is_none());
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.capacity_bytes = Some(4096);
    raw.logging.level = Some("info".to_string());

    let overrides = FetchOverrides {
        cache_capacity_bytes: Some(1_000_000),
        log_level: Some("debug".to_string()),
        cold_dir: Some(PathBuf::from("/var/cache/herdcache")),
        ..Default::default()
    };

    raw.apply_fetch_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.capacity_bytes.get(), 1_000_000);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        settings.cold.directory.as_deref(),
        Some(std::path::Path::new("/var/cache/herdcache"))
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = FetchOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_fetch_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.capacity_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.capacity_bytes",
            ..
        }
    ));
}

#[test]
fn zero_busy_timeout_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.busy_timeout_ms = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero busy timeout");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.busy_timeout_ms",
            ..
        }
    ));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn empty_cold_directory_disables_cold_tier() {
    let mut raw = RawSettings::default();
    raw.cold.directory = Some(PathBuf::new());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.cold.directory.is_none());
}

#[test]
fn parse_fetch_arguments() {
    let args = CliArgs::parse_from([
        "herdcache",
        "fetch",
        "--repeat",
        "3",
        "--concurrency",
        "8",
        "--cold-dir",
        "/tmp/cold",
        "--dump",
        "https://example.com/a",
        "https://example.com/b",
    ]);

    match args.command {
        Command::Fetch(fetch) => {
            assert_eq!(fetch.repeat, 3);
            assert_eq!(fetch.concurrency, 8);
            assert!(fetch.dump);
            assert_eq!(fetch.urls.len(), 2);
            assert_eq!(
                fetch.overrides.cold_dir.as_deref(),
                Some(std::path::Path::new("/tmp/cold"))
            );
        }
    }
}

#[test]
fn fetch_requires_a_url() {
    assert!(CliArgs::try_parse_from(["herdcache", "fetch"]).is_err());
}

#[test]
fn zero_repeat_is_rejected() {
    assert!(CliArgs::try_parse_from(["herdcache", "fetch", "--repeat", "0", "https://a"]).is_err());
}
