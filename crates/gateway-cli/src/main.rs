//! `apigate`: run generated API operations from the command line.

mod config;

use anyhow::Context as _;
use apigate_gateway::dispatch::OperationSummary;
use apigate_gateway::{Dispatcher, PolicyAction, RiskLevel};
use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize as _;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apigate")]
#[command(about = "Call OpenAPI operations through an auth-gateway credential exchange")]
#[command(version)]
struct Cli {
    /// Service configuration file.
    #[arg(long, env = "APIGATE_CONFIG", default_value = "service.yaml", global = true)]
    config: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: config::Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List generated operations with their policy classification
    Operations {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Authenticate with a session token and call one operation
    Call {
        /// Operation name, as shown by `operations`.
        name: String,
        #[arg(long, env = "APIGATE_SESSION_TOKEN", hide_env_values = true)]
        token: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Confirm an operation that policy marks as requiring confirmation.
        #[arg(long)]
        confirm: bool,
    },
    /// Exchange a session token and show the resulting session status
    Status {
        #[arg(long, env = "APIGATE_SESSION_TOKEN", hide_env_values = true)]
        token: String,
    },
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let cfg = config::load_config(&cli.config, &cli.overrides)?;
    tracing::debug!("Loaded config from {}", cli.config.display());
    let dispatcher = Dispatcher::from_config(&cfg)
        .await
        .with_context(|| format!("start service '{}'", cfg.service.name))?;

    match cli.command {
        Commands::Operations { json } => {
            let ops = dispatcher.list_operations();
            if json {
                println!("{}", serde_json::to_string_pretty(&ops)?);
            } else {
                print_operations(&ops);
            }
        }
        Commands::Call {
            name,
            token,
            args,
            confirm,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be valid JSON")?;
            dispatcher.set_session_token(&token).await?;
            let out = dispatcher.call(&name, &args, confirm).await?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Status { token } => {
            dispatcher.set_session_token(&token).await?;
            let status = dispatcher.session_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

fn print_operations(ops: &[OperationSummary]) {
    if ops.is_empty() {
        println!("{}", "no operations".dimmed());
        return;
    }
    let width = ops.iter().map(|o| o.name.len()).max().unwrap_or_default();
    for op in ops {
        // Pad before colouring; escape codes would otherwise count towards the width.
        let name = format!("{:width$}", op.name);
        let name = if op.callable {
            name
        } else {
            name.strikethrough().to_string()
        };
        let method = format!("{:<7}", op.method.to_string());
        let risk = format!("{:<8}", op.risk.as_str());
        let risk = match op.risk {
            RiskLevel::Low => risk.green().to_string(),
            RiskLevel::Medium => risk.yellow().to_string(),
            RiskLevel::High | RiskLevel::Critical => risk.red().to_string(),
        };
        let action = match op.action {
            PolicyAction::Block => op.action.red().bold().to_string(),
            PolicyAction::RequireConfirmation => op.action.yellow().to_string(),
            PolicyAction::Allow | PolicyAction::AllowWithLogging => op.action.to_string(),
        };
        let summary = op.summary.as_deref().unwrap_or_default();
        println!(
            "{name}  {}  {risk}  {action}  {}  {}",
            method.cyan(),
            op.path,
            summary.dimmed()
        );
    }
}
