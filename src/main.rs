use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxdesk::cli::commands;
use fxdesk::cli::{CommandContext, OutputFormat};
use fxdesk::config::ConfigFormat;
use fxdesk::types::Timeframe;

#[derive(Parser)]
#[command(name = "fxdesk")]
#[command(
    version,
    about = "Task-routed LLM research recommendations for forex pairs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./fxdesk.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis pipeline for one currency pair
    Analyze {
        #[arg(help = "Currency pair, e.g. EURUSD or EUR/USD")]
        symbol: String,
        #[arg(short = 't', long, default_value = "1h", help = "Candle timeframe: 1m, 5m, 15m, 30m, 1h, 4h, 1d")]
        timeframe: Timeframe,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
    },

    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Check backend reachability and show the routing table
    Doctor {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs, newest first
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
    },
    /// Show one run with its recommendation, rationales and verification reports
    Show {
        id: i64,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json, yaml")]
        format: ConfigFormat,
    },
    /// Show configuration file paths
    Path,
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mfxdesk encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Default hook prints the backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the command ran but reported a failed outcome
fn run_cli() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "fxdesk=debug"
    } else if cli.quiet {
        "error"
    } else {
        "fxdesk=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    let ok = match cli.command {
        Commands::Analyze {
            symbol,
            timeframe,
            format,
        } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::analyze::run(&ctx, &symbol, timeframe, format))?
        }
        Commands::Runs { action } => {
            let ctx = CommandContext::load(config_path)?;
            match action {
                RunsAction::List { limit, format } => commands::runs::list(&ctx, limit, format)?,
                RunsAction::Show { id, format } => commands::runs::show(&ctx, id, format)?,
            }
            true
        }
        Commands::Doctor { format } => {
            let ctx = CommandContext::config_only(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::doctor::run(&ctx, format))?
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show { format } => commands::config::show(config_path, format)?,
                ConfigAction::Path => commands::config::path(config_path),
            }
            true
        }
    };

    Ok(ok)
}
