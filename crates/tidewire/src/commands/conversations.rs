//! `conversations`: list a tab merged with realtime activity.

use std::time::Duration;

use chrono::DateTime;
use tabled::Tabled;

use tidewire_config::ResolvedProfile;
use tidewire_core::{ChatClient, Conversation, PageRequest, TagFilter};

use crate::cli::{ConversationsArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;
use crate::session;

const SUMMARY_WIDTH: usize = 48;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ConversationRow {
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Last message")]
    summary: String,
    #[tabled(rename = "Last activity")]
    last_activity: String,
    #[tabled(rename = "Unread")]
    unread: String,
    #[tabled(rename = "Tags")]
    tags: String,
}

impl From<&Conversation> for ConversationRow {
    fn from(c: &Conversation) -> Self {
        Self {
            channel: c.channel_key.encode(),
            summary: truncate(&c.last_message_summary, SUMMARY_WIDTH),
            last_activity: DateTime::from_timestamp(c.last_timestamp_secs, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            unread: if c.unread_count == 0 {
                String::new()
            } else {
                c.unread_count.to_string()
            },
            tags: c.tags.as_deref().map(|t| t.join(", ")).unwrap_or_default(),
        }
    }
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= width {
        return line.to_owned();
    }
    let cut: String = line.chars().take(width.saturating_sub(1)).collect();
    format!("{cut}…")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    args: ConversationsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    session::require_api(resolved)?;

    if args.live > 0 {
        client.connect(resolved.connection.clone()).await?;
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(args.live)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    let filter = (!args.tags.is_empty()).then(|| TagFilter::new(args.tags.iter().cloned()));
    let page = PageRequest {
        limit: args.limit,
        offset: args.offset,
        msg_count: args.msg_count,
    };
    let merged = client
        .refresh_tab(args.tab.into(), page, filter.as_ref())
        .await?;

    let out = output::render_list(
        &global.output,
        &merged,
        |c| ConversationRow::from(c),
        |c| c.channel_key.encode(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
