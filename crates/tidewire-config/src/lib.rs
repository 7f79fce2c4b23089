//! Shared configuration for tidewire tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `tidewire_core::ConnectionConfig` plus the REST
//! settings the client needs. The core never reads files itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use tidewire_core::{ClientOptions, ConnectionConfig, HttpConfig, TlsMode};

/// Keyring service name under which tokens are stored.
pub const KEYRING_SERVICE: &str = "tidewire";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String, available: Vec<String> },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, reporting the available names when missing.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.profile_names(),
            })
    }

    /// Profile names in sorted order.
    pub fn profile_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// REST request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds an unfinished stream may stay idle before it is dropped.
    #[serde(default = "default_stream_ttl")]
    pub stream_ttl: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            stream_ttl: default_stream_ttl(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_stream_ttl() -> u64 {
    300
}

/// A named backend profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Realtime endpoint (e.g., "wss://im.example.com/ws").
    pub server: String,

    /// REST API base URL. Snapshot, cancel and metadata calls need it.
    pub api_url: Option<String>,

    /// User id presented in the connect handshake.
    pub identity: String,

    /// Token (plaintext -- prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate for the REST API.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override REST timeout (seconds).
    pub timeout: Option<u64>,

    /// Socket open + handshake timeout (seconds).
    pub connect_timeout: Option<u64>,

    /// Send acknowledgement timeout (seconds).
    pub send_timeout: Option<u64>,

    /// Delay before the automatic reconnect (seconds).
    pub reconnect_delay: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "tidewire", "tidewire").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tidewire");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path, overlaid with `TIDEWIRE_*` variables.
///
/// Nested keys use a double underscore, e.g.
/// `TIDEWIRE_PROFILES__WORK__SERVER`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("TIDEWIRE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account under which a profile's token is stored.
pub fn keyring_account(profile_name: &str) -> String {
    format!("{profile_name}/token")
}

/// Resolve the connect token: `token_env` variable, then system keyring,
/// then plaintext in the profile.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_token_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        |account| {
            keyring::Entry::new(KEYRING_SERVICE, account)
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_token_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(val) = profile.token_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if let Some(secret) = keyring(&keyring_account(profile_name)) {
        return Ok(SecretString::from(secret));
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation to core types ───────────────────────────────────────

/// Everything a client needs from one profile.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub connection: ConnectionConfig,
    pub api_url: Option<Url>,
    pub http: HttpConfig,
    pub options: ClientOptions,
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    value.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {value}"),
    })
}

/// Build a `ConnectionConfig` from a profile, resolving its token.
pub fn profile_to_connection_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<ConnectionConfig, ConfigError> {
    let token = resolve_token(profile, profile_name)?;
    connection_config_with_token(profile, token)
}

fn connection_config_with_token(
    profile: &Profile,
    token: SecretString,
) -> Result<ConnectionConfig, ConfigError> {
    let server = parse_url("server", &profile.server)?;
    if !matches!(server.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "server".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{}'", profile.server),
        });
    }
    if profile.identity.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "identity".into(),
            reason: "must not be empty".into(),
        });
    }

    let mut config = ConnectionConfig::new(server, profile.identity.clone(), token);
    if let Some(secs) = profile.connect_timeout {
        config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.send_timeout {
        config.send_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.reconnect_delay {
        config.reconnect_delay = Duration::from_secs(secs);
    }
    Ok(config)
}

/// REST client settings for a profile.
pub fn profile_to_http_config(profile: &Profile, defaults: &Defaults) -> HttpConfig {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    HttpConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    }
}

/// Resolve a named profile into client-ready settings.
pub fn resolve_profile(cfg: &Config, profile_name: &str) -> Result<ResolvedProfile, ConfigError> {
    let profile = cfg.profile(profile_name)?;
    let token = resolve_token(profile, profile_name)?;
    resolve_with_token(cfg, profile, profile_name, token)
}

/// Like [`resolve_profile`] for a caller that already holds the token
/// (e.g. from a command-line flag) or an ad-hoc profile.
pub fn resolve_with_token(
    cfg: &Config,
    profile: &Profile,
    profile_name: &str,
    token: SecretString,
) -> Result<ResolvedProfile, ConfigError> {
    let connection = connection_config_with_token(profile, token)?;
    let api_url = profile
        .api_url
        .as_deref()
        .map(|u| parse_url("api_url", u))
        .transpose()?;

    Ok(ResolvedProfile {
        name: profile_name.into(),
        connection,
        api_url,
        http: profile_to_http_config(profile, &cfg.defaults),
        options: ClientOptions {
            stream_ttl: Duration::from_secs(cfg.defaults.stream_ttl),
            ..ClientOptions::default()
        },
    })
}
