//! SelfHeal CLI - Main Entry Point
//!
//! Heals failed browser-test steps from the command line: one failure at a
//! time, a whole run from a JSON file, or the built-in demo scenarios.

use clap::{Parser, Subcommand};
use selfheal_common::HealingRequest;
use selfheal_engine::strategy::{self, StrategyFlags};
use selfheal_engine::{classify, HealingService};
use serde::Serialize;
use std::path::PathBuf;

mod commands;
mod output;

use commands::{batch, config, demo, heal};
use output::{print_error, print_item, print_success, OutputFormat, TableDisplay};

/// SelfHeal CLI - self-healing for browser tests
#[derive(Parser)]
#[command(name = "selfheal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to ~/.selfheal/config.toml)
    #[arg(short, long, global = true, env = "SELFHEAL_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Heal a single failed test step
    Heal(heal::HealArgs),

    /// Heal every request in a JSON file
    Batch(batch::BatchArgs),

    /// Run the built-in healing scenarios
    Demo(demo::DemoArgs),

    /// Classify an error message and show the strategy it would get
    Classify {
        /// Error text reported by the test runner
        message: String,

        /// Selector involved in the failure
        #[arg(short, long)]
        selector: Option<String>,
    },

    /// Check the repair and visual backends
    Health,

    /// Manage the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[derive(Serialize)]
struct Classification {
    failure_type: String,
    strategy: String,
}

impl TableDisplay for Classification {
    fn headers() -> Vec<&'static str> {
        vec!["Failure Type", "Strategy"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.failure_type.clone(), self.strategy.clone()]
    }
}

#[derive(Serialize)]
struct BackendHealth {
    backend: String,
    healthy: bool,
    detail: String,
}

impl TableDisplay for BackendHealth {
    fn headers() -> Vec<&'static str> {
        vec!["Backend", "Healthy", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.backend.clone(),
            if self.healthy { "✓" } else { "✗" }.to_string(),
            self.detail.clone(),
        ]
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn health(config_path: Option<&std::path::Path>, format: OutputFormat) -> anyhow::Result<()> {
    let config = commands::load_config(config_path)?;
    let visual_configured = config.features.enable_visual_healing;
    let visual_endpoint = config.visual.endpoint.clone();
    let repair_model = config.repair.model.clone();
    let repair_ready = config.has_repair_credentials();

    let service = HealingService::new(config).await?;
    let visual_enabled = service.visual_enabled();
    let checked = service.health_check().await;
    service.close().await;

    let mut rows = vec![BackendHealth {
        backend: "repair".to_string(),
        healthy: repair_ready,
        detail: if repair_ready {
            repair_model
        } else {
            format!("{} (API key not configured)", repair_model)
        },
    }];
    if visual_configured {
        rows.push(match &checked {
            Ok(Some(status)) => BackendHealth {
                backend: "visual".to_string(),
                healthy: true,
                detail: format!(
                    "{} on {} ({}/{} MB, {:.1}ms avg)",
                    status.model_loaded,
                    status.device,
                    status.memory_used_mb,
                    status.memory_total_mb,
                    status.avg_inference_ms
                ),
            },
            Err(selfheal_common::Error::ServiceUnavailable(msg)) => BackendHealth {
                backend: "visual".to_string(),
                healthy: false,
                detail: msg.clone(),
            },
            _ => BackendHealth {
                backend: "visual".to_string(),
                healthy: visual_enabled,
                detail: if visual_enabled {
                    visual_endpoint
                } else {
                    format!("{} (client unavailable)", visual_endpoint)
                },
            },
        });
    }
    output::print_list(&rows, format);

    match checked {
        Ok(_) => {
            if format.is_human() {
                print_success("All backends healthy");
            }
            Ok(())
        }
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Heal(args) => heal::execute(args, config_path, cli.format).await?,
        Commands::Batch(args) => batch::execute(args, config_path, cli.format).await?,
        Commands::Demo(args) => demo::execute(args, config_path, cli.format).await?,
        Commands::Classify { message, selector } => {
            let config = commands::load_config(config_path)?;
            let request = HealingRequest {
                selector,
                ..HealingRequest::new("cli", message)
            };
            let failure_type = classify(&request.error_message);
            let flags = StrategyFlags {
                visual_healing: config.features.enable_visual_healing,
            };
            let chosen = strategy::choose(&request, failure_type, flags);
            print_item(
                &Classification {
                    failure_type: failure_type.to_string(),
                    strategy: chosen.to_string(),
                },
                cli.format,
            );
        }
        Commands::Health => health(config_path, cli.format).await?,
        Commands::Config(cmd) => config::execute(cmd, config_path, cli.format)?,
        Commands::Version => {
            output::print_message(
                &format!("SelfHeal CLI v{}", selfheal_common::VERSION),
                cli.format,
            );
        }
    }

    Ok(())
}
