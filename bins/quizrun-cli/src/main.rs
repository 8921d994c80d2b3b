mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quizrun-cli")]
#[command(about = "quizrun CLI - Compile and judge local source files", long_about = None)]
struct Cli {
    /// Override the run timeout (milliseconds)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a source file against a JSON array of test cases
    Run {
        /// Language name (python, javascript, cpp, java)
        #[arg(short, long)]
        lang: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// Test cases file: [{"input": "...", "expectedOutput": "..."}]
        #[arg(short, long)]
        tests: PathBuf,
    },

    /// Run a source file once with custom stdin
    RunCustom {
        /// Language name (python, javascript, cpp, java)
        #[arg(short, long)]
        lang: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// Stdin given inline
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Stdin read from a file
        #[arg(long)]
        input_file: Option<PathBuf>,
    },

    /// List supported languages and their toolchains
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { lang, file, tests } => {
            commands::run_tests(&lang, &file, &tests, cli.timeout_ms).await?;
        }
        Commands::RunCustom {
            lang,
            file,
            input,
            input_file,
        } => {
            commands::run_custom(&lang, &file, input, input_file.as_deref(), cli.timeout_ms)
                .await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
    }

    Ok(())
}
