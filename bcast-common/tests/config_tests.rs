//! Tests for TOML configuration loading and resolution
//!
//! Note: tests that touch BCAST_CONFIG are marked #[serial] so environment
//! changes never race.

use bcast_common::config::{resolve_config, Deinterlace, TomlConfig, CONFIG_ENV_VAR};
use bcast_common::Error;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_empty_file_uses_defaults() {
    let config = TomlConfig::from_toml_str("").unwrap();
    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.producer.decoder_input_capacity, 2);
    assert_eq!(config.producer.decoder_output_capacity, 8);
    assert_eq!(config.producer.auto_deinterlace, Deinterlace::Interlaced);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_partial_producer_section() {
    let config = TomlConfig::from_toml_str(
        r#"
        [producer]
        threads = 4
        auto_deinterlace = "all"
        "#,
    )
    .unwrap();

    assert_eq!(config.producer.threads, 4);
    assert_eq!(config.producer.auto_deinterlace, Deinterlace::All);
    // Unspecified fields keep their defaults
    assert_eq!(config.producer.decoder_output_capacity, 8);
}

#[test]
fn test_invalid_deinterlace_mode_rejected() {
    let result = TomlConfig::from_toml_str(
        r#"
        [producer]
        auto_deinterlace = "sometimes"
        "#,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_zero_capacity_rejected() {
    let result = TomlConfig::from_toml_str(
        r#"
        [producer]
        decoder_input_capacity = 0
        "#,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_deinterlace_from_str() {
    assert_eq!(" None ".parse::<Deinterlace>().unwrap(), Deinterlace::None);
    assert_eq!("ALL".parse::<Deinterlace>().unwrap(), Deinterlace::All);
    assert!("both".parse::<Deinterlace>().is_err());
}

#[test]
#[serial]
fn test_cli_argument_has_priority_over_env() {
    let cli = write_config("[logging]\nlevel = \"trace\"\n");
    let envfile = write_config("[logging]\nlevel = \"warn\"\n");
    env::set_var(CONFIG_ENV_VAR, envfile.path());

    let config = resolve_config(Some(cli.path())).unwrap();
    assert_eq!(config.logging.level, "trace");

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_is_used_without_cli_argument() {
    let envfile = write_config("[producer]\nthreads = 2\n");
    env::set_var(CONFIG_ENV_VAR, envfile.path());

    let config = resolve_config(None).unwrap();
    assert_eq!(config.producer.threads, 2);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    assert!(matches!(resolve_config(Some(&missing)), Err(Error::Io(_))));
}
