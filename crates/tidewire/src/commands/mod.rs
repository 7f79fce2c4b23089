//! Command dispatch: bridges CLI args -> ChatClient calls -> output formatting.

pub mod cancel;
pub mod config_cmd;
pub mod connect;
pub mod conversations;
pub mod delete;
pub mod history;
pub mod send;
pub mod tail;

use tidewire_config::ResolvedProfile;
use tidewire_core::ChatClient;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    client: &ChatClient,
    resolved: &ResolvedProfile,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Connect => connect::handle(client, resolved, global).await,
        Command::Tail(args) => tail::handle(client, resolved, args, global).await,
        Command::Send(args) => send::handle(client, resolved, args, global).await,
        Command::Conversations(args) => {
            conversations::handle(client, resolved, args, global).await
        }
        Command::History(args) => history::handle(client, resolved, args, global).await,
        Command::Delete(args) => delete::handle(client, resolved, args, global).await,
        Command::Cancel(args) => cancel::handle(client, resolved, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
