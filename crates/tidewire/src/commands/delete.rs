//! `delete`: remove a conversation from the agent's lists.

use tidewire_config::ResolvedProfile;
use tidewire_core::ChatClient;

use crate::cli::{DeleteArgs, GlobalOpts};
use crate::error::CliError;
use crate::session;

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    args: DeleteArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session::require_api(resolved)?;
    client.delete_conversation(&args.channel).await?;
    if !global.quiet {
        eprintln!("Deleted conversation {}", args.channel);
    }
    Ok(())
}
