//! Configuration file management

use crate::output::{print_info, print_success, OutputFormat};
use anyhow::Context;
use clap::Subcommand;
use selfheal_engine::HealingConfig;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (file, environment and defaults)
    Show,
}

pub fn execute(
    cmd: ConfigCommands,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path: PathBuf = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(selfheal_common::default_config_path);

    match cmd {
        ConfigCommands::Init { force } => {
            init(&path, force)?;
            print_success(&format!("Configuration written to {}", path.display()));
            print_info("Set ANTHROPIC_API_KEY or repair.api_key before healing");
        }
        ConfigCommands::Show => {
            let mut config = super::load_config(Some(&path))?;
            if !config.repair.api_key.is_empty() {
                config.repair.api_key = "********".to_string();
            }
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&config)?),
                OutputFormat::Table | OutputFormat::Plain => {
                    print!("{}", toml::to_string_pretty(&config)?)
                }
            }
        }
    }

    Ok(())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    HealingConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
