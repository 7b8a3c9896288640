use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::types::RuntimeKind;

#[derive(Parser, Debug)]
#[clap(name = "sandlot")]
#[clap(
    version,
    about = "Boot a sandboxed Node.js project, stream its output and preview the server"
)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SANDLOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot a sandbox, install dependencies and run the demo server
    Run(RunArgs),

    /// Open the demo project on StackBlitz
    Export(ExportArgs),

    /// Print the files mounted into the sandbox
    Files(FilesArgs),

    /// List sandbox runtimes and whether they are usable here
    Runtimes,

    /// Initialize a new sandlot configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Session Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Runtime to boot (overrides runtime.kind)
    #[clap(long, short = 'r', value_enum)]
    pub runtime: Option<RuntimeKind>,

    /// Do not fetch the preview page when it becomes ready or is refreshed
    #[clap(long)]
    pub no_fetch: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Only write the export form; do not launch a browser
    #[clap(long)]
    pub no_open: bool,

    /// File focused when the project opens (overrides export.open_file)
    #[clap(long)]
    pub open_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct FilesArgs {
    /// Print only this file
    pub path: Option<String>,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

// ============================================================================
// Common Types
// ============================================================================

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
