mod cli;

use cpm::filter::FilterNode;
use cpm::registry::{FilterRegistry, RetryPolicy};
use cpm::value::{TaggedValue, ValueState};
use std::time::Duration;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("CPM_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Render(render_cli) => render(render_cli),
        cli::Command::Filter(filter_cli) => filter(filter_cli),
        cli::Command::Value(value_cli) => value(value_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn render(cli: cli::RenderCommand) -> anyhow::Result<()> {
    let documents = load(&cli.input)?;
    let registry = FilterRegistry::new(RetryPolicy::new(
        cli.registry.retries,
        Duration::from_millis(cli.registry.delay_ms),
    ));
    let config = cpm::config::ConfigDocument::new(&documents, &registry)?;

    output(&cli.output, &config.render()?)
}

pub fn filter(cli: cli::FilterCommand) -> anyhow::Result<()> {
    let stdin = std::io::read_to_string(std::io::stdin())?;
    let node: FilterNode = serde_yaml::from_str(&stdin)?;

    match cli.command {
        cli::FilterSubCommand::Normalize(output_args) => output(&output_args, &node),
        cli::FilterSubCommand::Identity => {
            println!("{}", node.identity());
            Ok(())
        }
    }
}

pub fn value(cli: cli::ValueCommand) -> anyhow::Result<()> {
    let stdin = std::io::read_to_string(std::io::stdin())?;
    let raw: serde_json::Value = serde_yaml::from_str(&stdin)?;
    let value = TaggedValue::from_dynamic(&raw)?;

    output(&cli.output, &ValueState::from(&value))
}

fn load(input: &cli::InputArgs) -> anyhow::Result<cpm::hcl_documents::HclDocuments> {
    if !input.workdir && input.files.is_empty() && input.directories.is_empty() {
        let stdin = std::io::read_to_string(std::io::stdin())?;
        let body = hcl_edit::parser::parse_body(&stdin)?;
        return Ok(body.into());
    }

    let mut documents = cpm::hcl_documents::HclDocuments::default();

    if input.workdir {
        documents.load_directory(&std::env::current_dir()?)?;
    }

    for file_path in &input.files {
        documents.load_file(file_path)?;
    }

    for dir_path in &input.directories {
        documents.load_directory(dir_path)?;
    }

    anyhow::ensure!(documents.source_count() > 0, "No files loaded");

    Ok(documents)
}

fn output(output: &cli::OutputArgs, value: &impl serde::Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => {
            serde_json::to_writer_pretty(std::io::stdout(), value)?;
            println!();
        }
    };

    Ok(())
}

/// (cpm-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let mut documents = cpm::hcl_documents::HclDocuments::default();
    documents.load_directory(&std::env::current_dir()?)?;

    match cli.command {
        Documents => println!("{documents:#?}"),
        Config => {
            let registry = FilterRegistry::new(RetryPolicy::none());
            let config = cpm::config::ConfigDocument::new(&documents, &registry)?;
            println!("{config:#?}");
        }
    }

    Ok(())
}
