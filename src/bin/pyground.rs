//! Pyground CLI - run Python programs through the playground runtime
//!
//! Provides subcommands for running a file, listing the playground snippets
//! and running one of them.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pyground::runtime::config::{default_config_path, load_config};
use pyground::runtime::{BackendConfig, ExecutionResult, Playground, RuntimeConfig, snippets};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pyground")]
#[command(about = "Run learner Python code the way the course editor does", long_about = None)]
struct Cli {
    /// Configuration file (default: pyground.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Statement budget for the built-in interpreter
    #[arg(long)]
    step_limit: Option<u64>,

    /// Wall-clock limit per run in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Run on this CPython executable instead of the built-in interpreter
    #[arg(long)]
    python: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program file (`-` reads stdin)
    Run {
        /// Path to the program
        file: PathBuf,
    },

    /// List the playground snippets
    Snippets,

    /// Run a playground snippet
    Snippet {
        /// Snippet number as shown by `snippets`
        index: usize,
    },
}

fn resolve_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                load_config(&path)?
            } else {
                RuntimeConfig::default()
            }
        }
    };
    config = config.apply_env()?;

    if let Some(step_limit) = cli.step_limit {
        config.step_limit = Some(step_limit);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = Some(timeout_ms);
    }
    if let Some(python) = &cli.python {
        config.backend = BackendConfig::Process {
            python: python.clone(),
        };
    }
    Ok(config)
}

fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("failed to read program from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

/// Print a result; returns whether the run succeeded.
fn report(result: &ExecutionResult) -> bool {
    let rendered = result.render();
    let newline = if rendered.ends_with('\n') { "" } else { "\n" };
    if result.is_success() {
        print!("{}{}", rendered, newline);
    } else {
        eprint!("{}{}", rendered, newline);
    }
    result.is_success()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; program output owns stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let source = match &cli.command {
        Commands::Snippets => {
            for (index, snippet) in snippets::SNIPPETS.iter().enumerate() {
                println!("{:>2}  {}", index, snippet.title);
            }
            return Ok(());
        }
        Commands::Run { file } => read_source(file)?,
        Commands::Snippet { index } => match snippets::get(*index) {
            Some(snippet) => snippet.code.to_string(),
            None => bail!(
                "no snippet {} (there are {})",
                index,
                snippets::SNIPPETS.len()
            ),
        },
    };

    let playground = Playground::new(config);
    let result = playground.execute(&source).await;
    if !report(&result) {
        std::process::exit(1);
    }
    Ok(())
}
