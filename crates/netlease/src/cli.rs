//! Clap derive structures for the `netlease` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// netlease -- inspect and rehearse network arbitration policy
#[derive(Debug, Parser)]
#[command(
    name = "netlease",
    version,
    about = "Inspect, check and simulate network arbitration policy",
    long_about = "Evaluates which network interfaces a transfer may use, validates policy\n\
        files, and replays scripted connectivity scenarios against an in-memory\n\
        platform to show lease grants, sharing, timeouts and loss.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "NETLEASE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "NETLEASE_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output [default: from config, else auto]
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show which interface kinds a request may use right now
    #[command(alias = "eval", alias = "e")]
    Evaluate(EvaluateArgs),

    /// Inspect and validate the policy table
    #[command(alias = "p")]
    Policy(PolicyArgs),

    /// Replay a scripted scenario against an in-memory platform
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Evaluate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
#[command(after_help = "\
NETWORK SPEC:
  <kind>[:<key>[=<value>],...]

  kind     wifi | cellular | bluetooth | unknown
  keys     id, status (available|losing|lost|unknown), ssid, signal (dBm),
           carrier, roaming, device, metered, bandwidth (kbit/s), addr

EXAMPLES:
  netlease evaluate media-download -n wifi:id=wlan0,signal=-60 -n cellular:roaming
  netlease evaluate sync -n bluetooth -n cellular:metered --allow-metered")]
pub struct EvaluateArgs {
    /// Request type (media-download, media-playback, media-live, sync,
    /// image, api, logs-upload)
    pub request: String,

    /// Interface to report as present (repeatable)
    #[arg(long = "network", short = 'n', value_name = "SPEC")]
    pub networks: Vec<String>,

    /// Opt in to metered interfaces
    #[arg(long)]
    pub allow_metered: bool,
}

// ── Policy ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PolicyArgs {
    #[command(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Debug, Subcommand)]
pub enum PolicyCommand {
    /// Show the effective policy table
    #[command(alias = "ls")]
    Show,

    /// Validate a config file and its policy sections
    Check {
        /// File to check (defaults to the active config file)
        file: Option<PathBuf>,
    },
}

// ── Simulate ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Scenario script (TOML)
    pub script: PathBuf,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the effective configuration
    Show,

    /// Write a starter config with the built-in policy
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
