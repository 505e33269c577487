use std::path::PathBuf;

use clap::Parser;
use weave_config::PermissionMode;

/// Headless entry point for the core agent runtime.
///
/// Terminal rendering, slash commands, and interactive editing live outside
/// this crate (§1 out-of-scope); this binary only drives one
/// `process_user_input` call per invocation and prints the result.
#[derive(Parser, Debug)]
#[command(name = "weave", version, about)]
pub struct Cli {
    /// The message to send. Reads from stdin if omitted.
    pub prompt: Option<String>,

    /// Path to a config file, merged over the discovered config layers.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Path to the NDJSON session journal to append this turn to.
    #[arg(long)]
    pub session: Option<PathBuf>,

    /// Permission mode for this run, overriding the config default.
    #[arg(long, value_enum)]
    pub mode: Option<PermissionMode>,

    /// Print the merged configuration as YAML and exit.
    #[arg(long)]
    pub show_config: bool,

    /// Emit tracing output to stderr.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
