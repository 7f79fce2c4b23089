//! `history`: print a window of one channel's messages.

use chrono::DateTime;
use tabled::Tabled;

use tidewire_config::ResolvedProfile;
use tidewire_core::{ChatClient, HistoryQuery, Message, PullMode};

use super::conversations::truncate;
use crate::cli::{GlobalOpts, HistoryArgs};
use crate::error::CliError;
use crate::output;
use crate::session;

const TEXT_WIDTH: usize = 64;

#[derive(Tabled)]
struct MessageRow {
    #[tabled(rename = "Seq")]
    seq: u64,
    #[tabled(rename = "Sent")]
    sent: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "Message")]
    text: String,
}

impl From<&Message> for MessageRow {
    fn from(m: &Message) -> Self {
        Self {
            seq: m.message_seq,
            sent: DateTime::from_timestamp(m.timestamp, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            from: m.from_uid.clone().unwrap_or_default(),
            text: truncate(&m.summary(), TEXT_WIDTH),
        }
    }
}

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    args: HistoryArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session::require_api(resolved)?;

    let query = HistoryQuery {
        start_seq: args.from_seq,
        end_seq: args.to_seq,
        limit: args.limit,
        pull_mode: if args.newer { PullMode::Up } else { PullMode::Down },
    };
    let history = client.channel_history(&args.channel, query).await?;

    let out = output::render_list(
        &global.output,
        &history.messages,
        |m| MessageRow::from(m),
        |m| m.message_seq.to_string(),
    );
    output::print_output(&out, global.quiet);
    if history.more && !global.quiet {
        eprintln!("More messages available; page with --from-seq");
    }
    Ok(())
}
