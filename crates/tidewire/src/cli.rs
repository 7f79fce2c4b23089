//! Clap derive structures for the `tidewire` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

use tidewire_core::{ChannelKey, ConversationTab};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tidewire -- realtime customer conversations from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "tidewire",
    version,
    about = "Realtime customer conversations from the command line",
    long_about = "Connects to a realtime chat backend as a staff member.\n\n\
        Tails live messages and streamed assistant replies, sends messages,\n\
        and lists conversation tabs merged with realtime activity.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "TIDEWIRE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Realtime endpoint (overrides profile)
    #[arg(long, env = "TIDEWIRE_SERVER", global = true)]
    pub server: Option<String>,

    /// REST API base URL (overrides profile)
    #[arg(long, env = "TIDEWIRE_API_URL", global = true)]
    pub api_url: Option<String>,

    /// User id to connect as (overrides profile)
    #[arg(long, env = "TIDEWIRE_IDENTITY", global = true)]
    pub identity: Option<String>,

    /// Connect token
    #[arg(long, env = "TIDEWIRE_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TIDEWIRE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates on the REST API
    #[arg(long, short = 'k', env = "TIDEWIRE_INSECURE", global = true)]
    pub insecure: bool,

    /// REST request timeout in seconds
    #[arg(long, env = "TIDEWIRE_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TabArg {
    /// Conversations you participate in
    My,
    /// Every conversation you have served
    All,
    /// Visitors waiting in the queue
    Waiting,
}

impl From<TabArg> for ConversationTab {
    fn from(tab: TabArg) -> Self {
        match tab {
            TabArg::My => Self::My,
            TabArg::All => Self::All,
            TabArg::Waiting => Self::Waiting,
        }
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open a realtime session and report its state
    Connect,

    /// Stream live messages, replies and presence until interrupted
    #[command(alias = "t")]
    Tail(TailArgs),

    /// Send a text message to a channel
    Send(SendArgs),

    /// List a conversation tab merged with realtime activity
    #[command(alias = "conv", alias = "c")]
    Conversations(ConversationsArgs),

    /// Show message history for one channel
    #[command(alias = "h")]
    History(HistoryArgs),

    /// Remove a conversation from the agent's lists
    Delete(DeleteArgs),

    /// Stop an in-progress assistant reply
    Cancel(CancelArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TailArgs {
    /// Only show events for this channel (`<channel_id>:<channel_type>`)
    #[arg(long)]
    pub channel: Option<ChannelKey>,

    /// Print each stream chunk as it arrives instead of the finished reply
    #[arg(long)]
    pub deltas: bool,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Target channel (`<channel_id>:<channel_type>`)
    pub channel: ChannelKey,

    /// Message text
    pub text: String,
}

#[derive(Debug, Args)]
pub struct ConversationsArgs {
    /// Which tab to list
    #[arg(value_enum, default_value = "my")]
    pub tab: TabArg,

    /// Only include realtime-only conversations carrying one of these tags
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Max results per page
    #[arg(long, short = 'l', default_value = "20")]
    pub limit: u32,

    /// Pagination offset
    #[arg(long, default_value = "0")]
    pub offset: u32,

    /// Recent messages to fetch per conversation
    #[arg(long, default_value = "1")]
    pub msg_count: u32,

    /// Collect realtime activity for this many seconds before merging
    #[arg(long, default_value = "0")]
    pub live: u64,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Channel to read (`<channel_id>:<channel_type>`)
    pub channel: ChannelKey,

    /// Sequence to start from (0 = newest)
    #[arg(long, default_value = "0")]
    pub from_seq: u64,

    /// Sequence to stop at (0 = no bound)
    #[arg(long, default_value = "0")]
    pub to_seq: u64,

    /// Max messages to return
    #[arg(long, short = 'l', default_value = "100")]
    pub limit: u32,

    /// Walk forward to newer messages instead of back to older ones
    #[arg(long)]
    pub newer: bool,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Conversation to delete (`<channel_id>:<channel_type>`)
    pub channel: ChannelKey,
}

#[derive(Debug, Args)]
pub struct CancelArgs {
    /// Correlation id of the reply to stop
    pub client_msg_no: String,

    /// Reason recorded with the cancellation
    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current configuration
    Show,

    /// Set a value on the active profile
    Set {
        /// Profile key (server, api_url, identity, token_env, ...)
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a token read from stdin in the system keyring
    SetToken {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
