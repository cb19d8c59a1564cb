use std::io::Write;
use std::time::Duration;

use clap::Parser;
use herdcache::config::{CliArgs, load};
use serial_test::serial;

const BUSY_ENV: &str = "HERDCACHE__CACHE__BUSY_TIMEOUT_MS";
const ERROR_TTL_ENV: &str = "HERDCACHE__CACHE__ERROR_TTL_MS";

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn clear_env() {
    // SAFETY: tests touching the environment are serialized.
    unsafe {
        std::env::remove_var(BUSY_ENV);
        std::env::remove_var(ERROR_TTL_ENV);
    }
}

#[test]
#[serial]
fn file_then_environment_then_cli() {
    clear_env();
    let file = config_file(
        r#"
[cache]
capacity_bytes = 2048
busy_timeout_ms = 100
error_ttl_ms = 300
"#,
    );
    // SAFETY: serialized with the other environment tests.
    unsafe {
        std::env::set_var(BUSY_ENV, "250");
    }

    let path = file.path().to_string_lossy().into_owned();
    let args = CliArgs::parse_from([
        "herdcache",
        "--config-file",
        path.as_str(),
        "fetch",
        "--cache-capacity-bytes",
        "4096",
        "https://example.com/",
    ]);
    let settings = load(&args).expect("settings load");
    clear_env();

    assert_eq!(settings.cache.capacity_bytes.get(), 4096);
    assert_eq!(settings.cache.busy_timeout, Duration::from_millis(250));
    assert_eq!(settings.cache.error_ttl, Duration::from_millis(300));
}

#[test]
#[serial]
fn environment_values_are_validated() {
    clear_env();
    // SAFETY: serialized with the other environment tests.
    unsafe {
        std::env::set_var(BUSY_ENV, "0");
    }

    let args = CliArgs::parse_from(["herdcache", "fetch", "https://example.com/"]);
    let result = load(&args);
    clear_env();

    assert!(result.is_err());
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    clear_env();
    let args = CliArgs::parse_from([
        "herdcache",
        "--config-file",
        "/nonexistent/herdcache.toml",
        "fetch",
        "https://example.com/",
    ]);

    assert!(load(&args).is_err());
}
