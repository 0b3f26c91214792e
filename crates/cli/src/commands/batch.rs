//! Heal every failure of a test run from a JSON file

use super::{interrupt_token, load_config, read_file, BackendArgs};
use crate::output::{print_item, print_list, print_warning, OutputFormat, ResultDisplay};
use anyhow::Context;
use clap::Args;
use selfheal_common::{Error, HealingRequest, HealingResult, HealingSummary};
use selfheal_engine::HealingService;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// JSON file holding an array of healing requests
    pub file: PathBuf,

    /// Maximum requests healed at once (overrides the config)
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Also write results and summary as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub backend: BackendArgs,
}

/// Batch report written with `--output` and printed for JSON/YAML
#[derive(Debug, Serialize)]
struct BatchReport<'a> {
    summary: HealingSummary,
    results: &'a [HealingResult],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn parse_requests(content: &str) -> anyhow::Result<Vec<HealingRequest>> {
    serde_json::from_str(content).context("Expected a JSON array of healing requests")
}

pub async fn execute(
    args: BatchArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.backend.apply(&mut config);
    if let Some(n) = args.concurrency {
        config.max_concurrency = n;
    }

    let requests = parse_requests(&read_file(&args.file)?)
        .with_context(|| format!("Invalid batch file {}", args.file.display()))?;
    let names: Vec<String> = requests.iter().map(|r| r.test_name.clone()).collect();

    let service = HealingService::new(config)
        .await
        .context("Failed to create healing service")?;
    let cancel = interrupt_token();
    let outcome = service.batch_heal_with_cancel(requests, &cancel).await;
    service.close().await;

    let summary = HealingSummary::from_results(&outcome.results);
    let report = BatchReport {
        summary: summary.clone(),
        results: &outcome.results,
        error: outcome.first_error.as_ref().map(ToString::to_string),
    };

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if format.is_human() {
        let rows: Vec<ResultDisplay> = outcome
            .results
            .iter()
            .zip(&names)
            .map(|(result, name)| ResultDisplay::with_test(result, name))
            .collect();
        print_list(&rows, format);
        println!();
        print_item(&summary, format);
    } else {
        let value = serde_json::to_value(&report)?;
        match format {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&value)?),
            _ => println!("{}", serde_json::to_string_pretty(&value)?),
        }
    }

    match outcome.first_error {
        Some(Error::Cancelled) => anyhow::bail!("Batch cancelled"),
        Some(e) => {
            print_warning(&format!("Some requests were aborted: {}", e));
            Ok(())
        }
        None => Ok(()),
    }
}
