//! `connect`: open a session, report it, close it.

use serde::Serialize;

use tidewire_config::ResolvedProfile;
use tidewire_core::ChatClient;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct SessionInfo {
    profile: String,
    server: String,
    identity: String,
    state: String,
    rest_api: Option<String>,
}

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    client.connect(resolved.connection.clone()).await?;
    let color = output::should_color(&global.color);

    let info = SessionInfo {
        profile: resolved.name.clone(),
        server: resolved.connection.server_url.to_string(),
        identity: resolved.connection.identity.clone(),
        state: client.state().to_string(),
        rest_api: resolved.api_url.as_ref().map(ToString::to_string),
    };
    let out = output::render_single(
        &global.output,
        &info,
        |i| {
            format!(
                "Profile:   {}\nServer:    {}\nIdentity:  {}\nState:     {}\nREST API:  {}",
                i.profile,
                i.server,
                i.identity,
                output::paint_state(client.state(), color),
                i.rest_api.as_deref().unwrap_or("(not configured)"),
            )
        },
        |i| i.state.clone(),
    );
    output::print_output(&out, global.quiet);

    client.disconnect().await;
    Ok(())
}
