//! `Config::from_env` reads process environment, so these run serially.

use nestcam::{CamError, Config};
use serial_test::serial;

const VARS: [&str; 5] = ["NEST_ID", "REFRESH_TOKEN", "API_KEY", "CLIENT_ID", "NEST_HOST"];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn set_required() {
    std::env::set_var("NEST_ID", "cam-env");
    std::env::set_var("REFRESH_TOKEN", "refresh-env");
    std::env::set_var("API_KEY", "key-env");
    std::env::set_var("CLIENT_ID", "client-env");
}

#[test]
#[serial]
fn test_from_env_reads_required_fields() {
    clear_env();
    set_required();

    let config = Config::from_env().unwrap();
    assert_eq!(config.nest_id, "cam-env");
    assert_eq!(config.client_id, "client-env");
    assert_eq!(config.endpoints.host(), "https://nexusapi-us1.dropcam.com");

    clear_env();
}

#[test]
#[serial]
fn test_from_env_honours_host_override() {
    clear_env();
    set_required();
    std::env::set_var("NEST_HOST", "http://localhost:9000/");

    let config = Config::from_env().unwrap();
    assert_eq!(config.endpoints.host(), "http://localhost:9000");

    clear_env();
}

#[test]
#[serial]
fn test_from_env_blank_value_counts_as_missing() {
    clear_env();
    set_required();
    std::env::set_var("API_KEY", "  ");

    let err = Config::from_env().unwrap_err();
    assert_eq!(
        err,
        CamError::ConfigValidation("The property: apiKey is not defined.".to_string())
    );

    clear_env();
}

#[test]
#[serial]
fn test_from_env_with_nothing_set() {
    clear_env();

    let err = Config::from_env().unwrap_err();
    assert_eq!(
        err,
        CamError::ConfigValidation(
            "You must have at least the following four properties: nestId, refreshToken, apiKey, clientId"
                .to_string()
        )
    );
}
