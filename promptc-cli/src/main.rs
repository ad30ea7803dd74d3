use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod data;
mod task;

#[derive(Parser)]
#[command(name = "promptc")]
#[command(about = "Compile LLM prompt programs against a metric and serve them")]
#[command(version = "0.2.0")]
pub struct Cli {
    /// Configuration file (.json, .yaml or .toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding stored programs, overrides the configuration
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a task against a labeled dataset and store the program
    Compile {
        /// Task file describing fields, module, optimizer and metric
        #[arg(short, long)]
        task: PathBuf,

        /// Labeled rows (.json array or .jsonl)
        #[arg(short, long)]
        data: PathBuf,
    },
    /// Run a stored program on one input
    Run {
        /// Program id
        #[arg(short, long)]
        program: String,

        /// Input field as name=value, repeatable
        #[arg(short, long = "input", value_parser = parse_key_value)]
        inputs: Vec<(String, String)>,
    },
    /// Run a stored program on every row of a file
    Batch {
        #[arg(short, long)]
        program: String,

        #[arg(short, long)]
        data: PathBuf,

        /// Where to write results, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored programs
    Programs,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{}'", s))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = commands::load_config(cli.config.as_deref(), cli.store)?;

    match cli.command {
        Commands::Compile { task, data } => commands::compile(&config, &task, &data).await,
        Commands::Run { program, inputs } => commands::run(&config, &program, inputs).await,
        Commands::Batch {
            program,
            data,
            output,
        } => commands::batch(&config, &program, &data, output.as_deref()).await,
        Commands::Programs => commands::programs(&config).await,
    }
}
