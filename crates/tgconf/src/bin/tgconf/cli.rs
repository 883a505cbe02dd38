//! tgconf cli interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; tgconf ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[clap(flatten)]
    pub resolve: ResolveArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resolved configuration of the work directory
    Resolve(ResolveCommand),

    /// Print whether the unit of the work directory should run
    ///
    /// Exits with status 1 when the unit is skipped.
    ShouldRun,

    /// Interpolate `${...}` spans of a string
    ///
    /// Variables of the resolved configuration are available when the work directory has one.
    #[command(alias = "evaluate")]
    Eval(EvalCommand),
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Configuration file, relative to the work directory
    #[clap(long = "config", env = "TGCONF_CONFIG", global(true))]
    pub config: Option<PathBuf>,

    /// Set a variable (key=value), has priority over every other source
    #[clap(long = "var", value_parser = parse_key_value, global(true))]
    pub vars: Vec<(String, String)>,

    /// Command the configuration is resolved for, used by `on_commands` filters
    #[clap(long = "command", global(true))]
    pub command: Option<String>,

    /// Documents merged as the outermost parent of a document without include
    #[clap(long = "boot-config", env = "TGCONF_BOOT_CONFIGS", value_delimiter = ',', global(true))]
    pub boot_configs: Vec<PathBuf>,

    /// Documents merged before the primary document is read
    #[clap(long = "pre-boot-config", env = "TGCONF_PRE_BOOT_CONFIGS", value_delimiter = ',', global(true))]
    pub pre_boot_configs: Vec<PathBuf>,

    /// Directory remote sources are fetched into
    #[clap(long = "download-dir", env = "TGCONF_DOWNLOAD_DIR", global(true))]
    pub download_dir: Option<PathBuf>,

    /// Replace unresolved variable references with an empty string
    #[clap(long = "erase-unresolved", env = "TGCONF_ERASE_UNRESOLVED", global(true))]
    pub erase_unresolved: bool,
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{input}'")),
    }
}

#[derive(Parser, Debug)]
pub struct ResolveCommand {
    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct EvalCommand {
    /// Text to interpolate
    pub text: String,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}
