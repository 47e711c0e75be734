//! Configuration file location and library root resolution
//!
//! Tests that set TAGBOX_CONFIG or TAGBOX_LIBRARY are marked #[serial] so
//! they never race each other on the process environment.

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tagbox_common::config::{
    locate_config_file, resolve_library_root, CONFIG_ENV_VAR, LIBRARY_ENV_VAR,
};

#[test]
#[serial]
fn test_config_env_var_used_without_cli_arg() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let located = locate_config_file(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(located, Some(PathBuf::from("/tmp/from-env.toml")));
}

#[test]
#[serial]
fn test_cli_config_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let cli = PathBuf::from("/tmp/from-cli.toml");
    let located = locate_config_file(Some(&cli));
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(located, Some(cli));
}

#[test]
#[serial]
fn test_empty_config_env_var_is_ignored() {
    env::set_var(CONFIG_ENV_VAR, "");
    let located = locate_config_file(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_ne!(located, Some(PathBuf::new()));
}

#[test]
#[serial]
fn test_library_env_var_beats_config_value() {
    env::set_var(LIBRARY_ENV_VAR, "/media/env-card");
    let config_value = PathBuf::from("/srv/music");
    let root = resolve_library_root(None, Some(&config_value));
    env::remove_var(LIBRARY_ENV_VAR);

    assert_eq!(root, PathBuf::from("/media/env-card"));
}

#[test]
#[serial]
fn test_library_config_value_used_without_env() {
    env::remove_var(LIBRARY_ENV_VAR);
    let config_value = PathBuf::from("/srv/music");
    assert_eq!(resolve_library_root(None, Some(&config_value)), config_value);
}

#[test]
#[serial]
fn test_library_falls_back_to_default() {
    env::remove_var(LIBRARY_ENV_VAR);
    let root = resolve_library_root(None, None);
    assert_eq!(root, tagbox_common::config::default_library_root());
    assert!(root.to_string_lossy().contains("tagbox"));
}
