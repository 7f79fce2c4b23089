// Config file loading and saving against a temporary directory.
#![allow(clippy::unwrap_used)]

use tidewire_config::{Config, Profile, load_config_from, save_config_to};

const SAMPLE: &str = r#"
default_profile = "work"

[defaults]
output = "json"
stream_ttl = 120

[profiles.work]
server = "wss://im.example.com/ws"
api_url = "https://api.example.com"
identity = "staff-1"
token_env = "WORK_TOKEN"
reconnect_delay = 5
"#;

#[test]
fn test_load_profiles_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let cfg = load_config_from(&path).unwrap();

    assert_eq!(cfg.default_profile.as_deref(), Some("work"));
    assert_eq!(cfg.defaults.output, "json");
    assert_eq!(cfg.defaults.stream_ttl, 120);
    assert_eq!(cfg.defaults.timeout, 30);

    let work = cfg.profile("work").unwrap();
    assert_eq!(work.identity, "staff-1");
    assert_eq!(work.token_env.as_deref(), Some("WORK_TOKEN"));
    assert_eq!(work.reconnect_delay, Some(5));
    assert!(work.token.is_none());
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(cfg.default_profile.as_deref(), Some("default"));
    assert!(cfg.profiles.is_empty());
}

#[test]
fn test_save_then_load_preserves_profile() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut cfg = Config::default();
    cfg.profiles.insert(
        "lab".into(),
        Profile {
            server: "ws://127.0.0.1:5200".into(),
            identity: "tester".into(),
            token: Some("secret".into()),
            ..Profile::default()
        },
    );
    save_config_to(&cfg, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    let lab = loaded.profile("lab").unwrap();
    assert_eq!(lab.server, "ws://127.0.0.1:5200");
    assert_eq!(lab.token.as_deref(), Some("secret"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[profiles.work\nserver = ").unwrap();

    assert!(load_config_from(&path).is_err());
}
