//! cpm cli interface

use clap::{Parser, Subcommand, ValueEnum};
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
    /// This is equivalent to running { cd <directory>; cpm ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render configuration to its wire form
    ///
    /// Reads HCL from stdin unless any other source is provided (via --input-*)
    Render(RenderCommand),

    /// Work with wire filters read from stdin (JSON or YAML)
    Filter(FilterCommand),

    /// Convert a dynamic value read from stdin (JSON or YAML) into its tagged form
    Value(ValueCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct RenderCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    #[clap(flatten)]
    pub registry: RegistryArgs,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Load files from work directory
    #[clap(short = 'w', long = "input-workdir")]
    pub workdir: bool,

    /// Load a file
    #[clap(short = 'f', long = "input-file")]
    pub files: Vec<PathBuf>,

    /// Load files from given directory
    #[clap(short = 'd', long = "input-dir")]
    pub directories: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

/// How `target` blocks wait for filters
#[derive(Parser, Debug)]
pub struct RegistryArgs {
    /// Lookups after the first one before a filter counts as missing
    #[arg(long = "resolve-retries", default_value_t = cpm::registry::RetryPolicy::DEFAULT_RETRIES)]
    pub retries: u32,

    /// Delay between lookups in milliseconds
    #[arg(long = "resolve-delay-ms", default_value_t = 1000)]
    pub delay_ms: u64,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    #[default]
    Json,
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

#[derive(Parser, Debug)]
pub struct FilterCommand {
    #[command(subcommand)]
    pub command: FilterSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum FilterSubCommand {
    /// Print the normalized wire form
    Normalize(OutputArgs),
    /// Print the identity
    Identity,
}

#[derive(Parser, Debug)]
pub struct ValueCommand {
    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    Documents,
    Config,
}
