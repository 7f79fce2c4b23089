//! Profile + flag resolution and client construction.
//!
//! This is the single boundary where CLI inputs cross into core types.

use std::sync::Arc;

use secrecy::SecretString;

use tidewire_config::{self as config, Config, Profile, ResolvedProfile};
use tidewire_core::{ApiClient, ChatClient, CoreError, WebSocketTransport};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve the active profile with flag overrides applied.
///
/// Without a stored profile, `--server` and `--identity` (or their env
/// vars) must describe the backend on their own.
pub fn resolve(global: &GlobalOpts) -> Result<ResolvedProfile, CliError> {
    let cfg = config::load_config_or_default();
    let name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profile(&name) {
        Ok(profile) => profile.clone(),
        Err(_) if global.server.is_some() => Profile::default(),
        Err(e) => return Err(e.into()),
    };
    apply_overrides(&mut profile, global);

    let token = match &global.token {
        Some(token) => SecretString::from(token.clone()),
        None => config::resolve_token(&profile, &name)?,
    };
    Ok(config::resolve_with_token(&cfg, &profile, &name, token)?)
}

fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(server) = &global.server {
        profile.server.clone_from(server);
    }
    if let Some(api_url) = &global.api_url {
        profile.api_url = Some(api_url.clone());
    }
    if let Some(identity) = &global.identity {
        profile.identity.clone_from(identity);
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    profile.timeout.get_or_insert(global.timeout);
}

/// Build a client for the resolved profile. REST-backed operations are
/// only available when the profile names an API URL.
pub fn build_client(resolved: &ResolvedProfile) -> Result<ChatClient, CliError> {
    let transport = Arc::new(WebSocketTransport);
    let options = resolved.options.clone();

    let Some(api_url) = &resolved.api_url else {
        return Ok(ChatClient::new(transport, options));
    };
    let api = ApiClient::new(api_url.clone(), &resolved.connection.credential, &resolved.http)
        .map_err(CoreError::from)?;
    Ok(ChatClient::with_api(transport, api, options))
}

/// Fail early for commands that need the REST API.
pub fn require_api(resolved: &ResolvedProfile) -> Result<(), CliError> {
    if resolved.api_url.is_none() {
        return Err(CliError::NoApiUrl);
    }
    Ok(())
}
