//! Clap derive structures for the `firesync` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Args, Parser, Subcommand, ValueEnum};
use strum::VariantNames;

use firesync_core::{Protocol, RuleAction};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// firesync -- browse and edit firewall rules through a synchronized cache
#[derive(Debug, Parser)]
#[command(
    name = "firesync",
    version,
    about = "Browse and edit firewall rules from the command line",
    long_about = "Lists, inspects and edits firewall rules served by a rules backend.\n\n\
        Reads go through a keyed query cache; edits are applied optimistically\n\
        and rolled back if the backend rejects them.",
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
    /// Backend base URL (overrides config file)
    #[arg(long, short = 'u', env = "FIRESYNC_URL", global = true)]
    pub url: Option<String>,

    /// Path to the config file
    #[arg(long, env = "FIRESYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FIRESYNC_OUTPUT",
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

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "FIRESYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides config file)
    #[arg(long, env = "FIRESYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
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
    /// Plain text, one rule ID per line (scripting)
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

// ── Rule field parsers ───────────────────────────────────────────────

/// Parse `--action` straight into the domain enum, listing its wire
/// spellings as the possible values.
fn action_parser() -> impl TypedValueParser<Value = RuleAction> {
    PossibleValuesParser::new(RuleAction::VARIANTS.iter().copied())
        .try_map(|s| s.parse::<RuleAction>())
}

fn protocol_parser() -> impl TypedValueParser<Value = Protocol> {
    PossibleValuesParser::new(Protocol::VARIANTS.iter().copied())
        .try_map(|s| s.parse::<Protocol>())
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List, inspect and edit firewall rules
    #[command(alias = "r")]
    Rules(RulesArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Rules ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

/// Filters shared by `list` and `watch`.
#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// Case-insensitive substring matched against rule names
    #[arg(long, short = 's')]
    pub search: Option<String>,

    /// Only show enabled rules
    #[arg(long, short = 'e')]
    pub enabled_only: bool,

    /// Only show rules with this action
    #[arg(long, short = 'a', ignore_case = true, value_parser = action_parser())]
    pub action: Option<RuleAction>,

    /// Ask the backend to fail the request (exercises error handling)
    #[arg(long, hide = true)]
    pub simulate_failure: bool,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List firewall rules
    #[command(alias = "ls")]
    List(FilterArgs),

    /// Show a single firewall rule
    Get {
        /// Rule ID
        id: String,
    },

    /// Enable a firewall rule
    Enable {
        /// Rule ID
        id: String,
    },

    /// Disable a firewall rule
    Disable {
        /// Rule ID
        id: String,
    },

    /// Update fields of a firewall rule
    Update {
        /// Rule ID
        id: String,

        /// New rule name
        #[arg(long)]
        name: Option<String>,

        /// Source address or CIDR
        #[arg(long)]
        source: Option<String>,

        /// Destination address or CIDR
        #[arg(long)]
        destination: Option<String>,

        /// Port or port range
        #[arg(long)]
        port: Option<String>,

        /// Protocol
        #[arg(long, ignore_case = true, value_parser = protocol_parser())]
        protocol: Option<Protocol>,

        /// Action
        #[arg(long, ignore_case = true, value_parser = action_parser())]
        action: Option<RuleAction>,
    },

    /// Print the rule list and keep it in sync with the backend
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// Seconds between reloads
        #[arg(long, short = 'i', default_value = "10")]
        interval: u64,

        /// Exit after this many successful renders
        #[arg(long, short = 'n')]
        count: Option<usize>,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
