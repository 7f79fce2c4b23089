//! `tail`: stream live events until interrupted.
//!
//! Dispatcher handlers run on the session's event pump, so they only
//! forward into a channel; printing happens here. Finished replies come
//! from the stream reassembler's update feed.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use tidewire_config::ResolvedProfile;
use tidewire_core::{ChannelKey, ChatClient, EndReason, StreamUpdate, Subscription};

use crate::cli::{GlobalOpts, OutputFormat, TailArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TailEvent {
    Message {
        channel: String,
        from: Option<String>,
        seq: u64,
        summary: String,
    },
    Delta {
        client_msg_no: String,
        chunk: String,
    },
    Reply {
        client_msg_no: String,
        channel: Option<String>,
        reason: EndReason,
        content: String,
        error: Option<String>,
    },
    Presence {
        channel: Option<String>,
        visitor: Option<String>,
        online: bool,
    },
    Profile {
        channel: Option<String>,
    },
    Status {
        state: String,
        reason: Option<String>,
    },
    Fault {
        kind: String,
        message: String,
    },
}

fn wanted(filter: Option<&ChannelKey>, channel: Option<&ChannelKey>) -> bool {
    match (filter, channel) {
        (None, _) => true,
        (Some(f), Some(c)) => f == c,
        (Some(_), None) => false,
    }
}

fn subscribe(
    client: &ChatClient,
    filter: Option<&ChannelKey>,
    deltas: bool,
    tx: &mpsc::UnboundedSender<TailEvent>,
) -> Vec<Subscription> {
    let dispatcher = client.dispatcher();
    let mut subs = Vec::new();

    {
        let (tx, filter) = (tx.clone(), filter.cloned());
        subs.push(dispatcher.on_message(move |m| {
            if wanted(filter.as_ref(), Some(&m.channel)) && !m.is_streaming() {
                let _ = tx.send(TailEvent::Message {
                    channel: m.channel.encode(),
                    from: m.from_uid.clone(),
                    seq: m.message_seq,
                    summary: m.summary(),
                });
            }
        }));
    }
    if deltas {
        let (tx, filter) = (tx.clone(), filter.cloned());
        subs.push(dispatcher.on_stream_delta(move |d| {
            if wanted(filter.as_ref(), d.channel.as_ref()) && !d.chunk.is_empty() {
                let _ = tx.send(TailEvent::Delta {
                    client_msg_no: d.client_msg_no.clone(),
                    chunk: d.chunk.clone(),
                });
            }
        }));
    }
    {
        let (tx, filter) = (tx.clone(), filter.cloned());
        subs.push(dispatcher.on_presence(move |p| {
            if wanted(filter.as_ref(), p.channel.as_ref()) {
                let _ = tx.send(TailEvent::Presence {
                    channel: p.channel.as_ref().map(ChannelKey::encode),
                    visitor: p.visitor_id.clone(),
                    online: p.online,
                });
            }
        }));
    }
    {
        let (tx, filter) = (tx.clone(), filter.cloned());
        subs.push(dispatcher.on_profile_updated(move |u| {
            if wanted(filter.as_ref(), u.channel.as_ref()) {
                let _ = tx.send(TailEvent::Profile {
                    channel: u.channel.as_ref().map(ChannelKey::encode),
                });
            }
        }));
    }
    {
        let tx = tx.clone();
        subs.push(dispatcher.on_connection_status(move |s| {
            let _ = tx.send(TailEvent::Status {
                state: s.state.to_string(),
                reason: s.reason.clone(),
            });
        }));
    }
    {
        let tx = tx.clone();
        subs.push(dispatcher.on_error(move |f| {
            let _ = tx.send(TailEvent::Fault {
                kind: f.kind.to_string(),
                message: f.message.clone(),
            });
        }));
    }

    subs
}

fn finished_reply(
    client: &ChatClient,
    filter: Option<&ChannelKey>,
    client_msg_no: String,
    reason: EndReason,
) -> Option<TailEvent> {
    let state = client.streams().take(&client_msg_no)?;
    if !wanted(filter, state.channel.as_ref()) {
        return None;
    }
    Some(TailEvent::Reply {
        client_msg_no,
        channel: state.channel.as_ref().map(ChannelKey::encode),
        reason,
        content: state.content,
        error: state.error_message,
    })
}

fn render(event: &TailEvent, format: &OutputFormat, color: bool) -> String {
    if matches!(format, OutputFormat::Json | OutputFormat::JsonCompact) {
        return output::render_json(event, true);
    }
    match event {
        TailEvent::Message {
            channel,
            from,
            seq,
            summary,
        } => format!(
            "{} {} {summary}",
            output::dim(&format!("[{channel} #{seq}]"), color),
            from.as_deref().unwrap_or("?"),
        ),
        TailEvent::Delta {
            client_msg_no,
            chunk,
        } => format!("{} {chunk}", output::dim(&format!("~{client_msg_no}"), color)),
        TailEvent::Reply {
            client_msg_no,
            channel,
            reason,
            content,
            error,
        } => {
            let head = output::dim(
                &format!(
                    "[{} reply {client_msg_no}]",
                    channel.as_deref().unwrap_or("?")
                ),
                color,
            );
            let mut line = format!("{head} {content}");
            if *reason != EndReason::None {
                line.push_str(&format!(" ({})", output::paint_end(*reason, color)));
            }
            if let Some(error) = error {
                line.push_str(&format!(": {error}"));
            }
            line
        }
        TailEvent::Presence {
            channel,
            visitor,
            online,
        } => format!(
            "{} {} is {}",
            output::dim(&format!("[{}]", channel.as_deref().unwrap_or("?")), color),
            visitor.as_deref().unwrap_or("visitor"),
            if *online { "online" } else { "offline" },
        ),
        TailEvent::Profile { channel } => format!(
            "{} profile updated",
            output::dim(&format!("[{}]", channel.as_deref().unwrap_or("?")), color),
        ),
        TailEvent::Status { state, reason } => match reason {
            Some(reason) => format!("-- {state}: {reason}"),
            None => format!("-- {state}"),
        },
        TailEvent::Fault { kind, message } => format!("!! {kind}: {message}"),
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    client: &ChatClient,
    resolved: &ResolvedProfile,
    args: TailArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let filter = args.channel.as_ref();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subs = subscribe(client, filter, args.deltas, &tx);
    let mut replies = client.streams().subscribe();

    client.connect(resolved.connection.clone()).await?;
    if !global.quiet {
        eprintln!(
            "Tailing as {} on {} (Ctrl-C to stop)",
            resolved.connection.identity, resolved.connection.server_url
        );
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = rx.recv() => Some(event),
            update = replies.recv() => match update {
                Ok(StreamUpdate::Ended { client_msg_no, reason }) => {
                    finished_reply(client, filter, client_msg_no, reason)
                }
                Ok(StreamUpdate::Delta { .. }) => None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "tail fell behind stream updates");
                    None
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        if let Some(event) = event {
            output::print_output(&render(&event, &global.output, color), global.quiet);
        }
    }

    for sub in subs {
        let _ = sub.unsubscribe();
    }
    client.disconnect().await;
    Ok(())
}
