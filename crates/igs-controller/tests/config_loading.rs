//! Loading session configuration from files and the environment.
//!
//! Every test here reads the process environment, so they run serially.

use igs_controller::{AppConfig, ConfigError, LogFormat};
use igs_core::ToolSpec;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const SESSION_TOML: &str = r#"
[application]
name = "navigator"
log_level = "debug"
log_format = "compact"

[device]
driver = "sim_tracker"
frequency_hz = 20
update_timeout = "250ms"
max_consecutive_update_failures = 5
world_transform = { translation = [0.0, 0.0, 100.0] }

[device.settings]
port = "sim://polaris"
ports = 3

[device.reference]
name = "dynamic-ref"
kind = "port"
port = 1

[[device.tools]]
name = "pointer"
kind = "port"
port = 2
calibration = { translation = [0.0, 0.0, -120.0] }

[[device.tools]]
kind = "port"
port = 3
channel = 1
"#;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn test_load_session_file() {
    let file = write_config(SESSION_TOML);
    let config = AppConfig::load_from(file.path()).unwrap();

    assert_eq!(config.application.name, "navigator");
    assert_eq!(config.application.log_format, LogFormat::Compact);

    let device = &config.device;
    assert_eq!(device.driver, "sim_tracker");
    assert_eq!(device.frequency_hz, 20.0);
    assert_eq!(device.update_timeout, Duration::from_millis(250));
    assert_eq!(device.max_consecutive_update_failures, 5);
    assert!(device.threaded);
    assert!(device.cadence);
    assert_eq!(device.settings["ports"].as_integer(), Some(3));

    let reference = device.reference.as_ref().unwrap();
    assert_eq!(reference.name.as_deref(), Some("dynamic-ref"));
    assert_eq!(
        device.tools[1].spec,
        ToolSpec::Port {
            port: 3,
            channel: Some(1)
        }
    );

    let ids: Vec<String> = device
        .all_tools()
        .map(|tool| tool.descriptor(&device.driver).unwrap().derive_identifier())
        .collect();
    assert_eq!(ids, vec!["dynamic-ref", "pointer", "port-3-1"]);

    let pointer = device.tools[0].descriptor(&device.driver).unwrap();
    assert_eq!(pointer.calibration.translation(), [0.0, 0.0, -120.0]);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(SESSION_TOML);
    std::env::set_var("IGS_DEVICE__FREQUENCY_HZ", "45");
    let result = AppConfig::load_from(file.path());
    std::env::remove_var("IGS_DEVICE__FREQUENCY_HZ");

    let config = result.unwrap();
    assert_eq!(config.device.frequency_hz, 45.0);
    assert_eq!(config.device.settings["port"].as_str(), Some("sim://polaris"));
}

#[test]
#[serial]
fn test_missing_device_section_is_an_error() {
    let file = write_config("[application]\nname = \"empty\"\n");
    let err = AppConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
#[serial]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(AppConfig::load_from(dir.path().join("absent.toml")).is_err());
}

#[test]
#[serial]
fn test_duplicate_tool_names_rejected_at_load() {
    let file = write_config(
        r#"
        [device]
        driver = "sim_tracker"

        [[device.tools]]
        name = "probe"
        kind = "port"
        port = 1

        [[device.tools]]
        name = "probe"
        kind = "port"
        port = 2
        "#,
    );
    let err = AppConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("Duplicate tool identifier: probe"));
}

#[test]
#[serial]
fn test_invalid_log_level_rejected() {
    let err = AppConfig::from_toml_str(
        r#"
        [application]
        log_level = "loud"
        [device]
        driver = "sim_tracker"
        "#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("loud"));
}

#[test]
#[serial]
fn test_bundled_session_file_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../igs-bin/config/session.toml");
    let config = AppConfig::load_from(path).unwrap();
    assert_eq!(config.device.all_tools().count(), 3);

    let registry = igs_controller::StrategyRegistry::with_simulated_devices();
    registry
        .validate(&config.device.driver, &config.device.settings)
        .unwrap();
}
