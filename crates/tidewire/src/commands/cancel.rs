//! `cancel`: stop an in-progress assistant reply.

use tidewire_config::ResolvedProfile;
use tidewire_core::ChatClient;

use crate::cli::{CancelArgs, GlobalOpts};
use crate::error::CliError;
use crate::session;

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    args: CancelArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session::require_api(resolved)?;
    client
        .cancel_reply(&args.client_msg_no, args.reason.as_deref())
        .await?;
    if !global.quiet {
        eprintln!("Cancellation requested for {}", args.client_msg_no);
    }
    Ok(())
}
