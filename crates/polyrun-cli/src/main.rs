//! polyrun CLI - run code in many languages from one tool.

mod colors;
mod config_cmd;
mod extensions;
mod input;
mod languages;
mod run;
mod shell;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use polyrun_core::StudioConfig;

#[derive(Parser)]
#[command(name = "polyrun")]
#[command(about = "Multi-language code runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file
    Run {
        /// Path to the source file
        file: PathBuf,

        /// Language id (detected from the file extension if omitted)
        #[arg(short, long)]
        lang: Option<String>,

        /// Wall-clock limit in seconds
        #[arg(long, conflicts_with = "no_timeout")]
        timeout: Option<u64>,

        /// Run without a time limit
        #[arg(long)]
        no_timeout: bool,

        /// Keep the run directory after the run
        #[arg(long)]
        keep_temp: bool,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// List supported languages and whether their tools are installed
    Languages,

    /// Open an interactive terminal session
    Shell {
        /// Shell program (defaults to $SHELL)
        #[arg(long)]
        shell: Option<String>,
    },

    /// Scan and list extensions
    Extensions {
        /// Extensions directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Keep watching the directory and rescan on changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Run an extension action
    Invoke {
        /// Extension id
        extension: String,

        /// Action name
        action: String,

        /// Payload passed to the action
        #[arg(long, default_value = "")]
        payload: String,

        /// Extensions directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(StudioConfig::default_path);
    let config = StudioConfig::load_from(&config_path);

    // Helper to format polyrun-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<polyrun_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    let code = match cli.command {
        Commands::Run {
            file,
            lang,
            timeout,
            no_timeout,
            keep_temp,
            args,
        } => {
            let options = run::RunOptions {
                file,
                language: lang,
                timeout_secs: timeout,
                no_timeout,
                keep_temp,
                args,
            };
            run::execute(&config, options).await.map_err(format_error)?
        }

        Commands::Languages => {
            languages::execute(&config).map_err(format_error)?;
            0
        }

        Commands::Shell { shell } => shell::execute(&config, shell).await.map_err(format_error)?,

        Commands::Extensions { dir, watch } => {
            extensions::list(&config, dir, watch)
                .await
                .map_err(format_error)?;
            0
        }

        Commands::Invoke {
            extension,
            action,
            payload,
            dir,
        } => extensions::invoke(&config, dir, &extension, &action, &payload)
            .await
            .map_err(format_error)?,

        Commands::Config { init } => {
            config_cmd::execute(&config, &config_path, init).map_err(format_error)?;
            0
        }
    };

    Ok(exit_code(code))
}

/// Clamp a child's exit code into the range a process can report.
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
