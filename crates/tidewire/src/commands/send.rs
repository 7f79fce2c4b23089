//! `send`: deliver one text message and print the acknowledgement.

use serde::Serialize;

use tidewire_config::ResolvedProfile;
use tidewire_core::ChatClient;

use crate::cli::{GlobalOpts, SendArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Sent {
    channel: String,
    client_msg_no: String,
    message_id: Option<String>,
    message_seq: u64,
}

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    args: SendArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if args.text.trim().is_empty() {
        return Err(CliError::Validation {
            field: "text".into(),
            reason: "message must not be empty".into(),
        });
    }

    client.connect(resolved.connection.clone()).await?;
    let receipt = client.send_text(&args.channel, &args.text).await;
    client.disconnect().await;
    let receipt = receipt?;

    let sent = Sent {
        channel: args.channel.encode(),
        client_msg_no: receipt.client_msg_no,
        message_id: receipt.message_id,
        message_seq: receipt.message_seq,
    };
    let out = output::render_single(
        &global.output,
        &sent,
        |s| {
            format!(
                "Sent to {} (seq {}, client_msg_no {})",
                s.channel, s.message_seq, s.client_msg_no
            )
        },
        |s| s.client_msg_no.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
