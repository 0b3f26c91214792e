//! Heal a single failed test step

use super::{interrupt_token, load_config, read_file, BackendArgs};
use crate::output::{print_result, print_warning, OutputFormat};
use anyhow::Context;
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use selfheal_common::{HealingRequest, HealingStatus};
use selfheal_engine::{classify, HealingService};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct HealArgs {
    /// Read the whole request from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["selector", "error", "html", "code"])]
    pub request: Option<PathBuf>,

    /// Failed selector to repair
    #[arg(short, long)]
    pub selector: Option<String>,

    /// Error message from the test failure
    #[arg(short, long, required_unless_present = "request")]
    pub error: Option<String>,

    /// Page URL where the failure occurred
    #[arg(long, default_value = "")]
    pub url: String,

    /// File containing the page HTML
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// File containing the failing test source
    #[arg(long)]
    pub code: Option<PathBuf>,

    /// Line number that failed
    #[arg(long, default_value_t = 0)]
    pub line: u32,

    /// Test name
    #[arg(long, default_value = "manual-test")]
    pub test_name: String,

    /// Screenshot taken at the failure
    #[arg(long)]
    pub screenshot: Option<String>,

    /// Baseline screenshot of the passing run
    #[arg(long)]
    pub baseline: Option<String>,

    #[command(flatten)]
    pub backend: BackendArgs,
}

impl HealArgs {
    fn build_request(&self) -> anyhow::Result<HealingRequest> {
        if let Some(path) = &self.request {
            let content = read_file(path)?;
            return serde_json::from_str(&content)
                .with_context(|| format!("Invalid healing request in {}", path.display()));
        }

        let error = self.error.clone().unwrap_or_default();
        // classified up front so the header can show it
        Ok(HealingRequest {
            failure_type: Some(classify(&error)),
            failed_line: self.line,
            selector: self.selector.clone(),
            page_url: self.url.clone(),
            page_html: read_optional(self.html.as_deref())?,
            test_code: read_optional(self.code.as_deref())?,
            screenshot_uri: self.screenshot.clone(),
            baseline_uri: self.baseline.clone(),
            ..HealingRequest::new(self.test_name.clone(), error)
        })
    }
}

fn read_optional(path: Option<&Path>) -> anyhow::Result<String> {
    path.map(read_file).transpose().map(Option::unwrap_or_default)
}

pub async fn execute(
    args: HealArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.backend.apply(&mut config);
    let request = args.build_request()?;

    if format.is_human() {
        println!("{}", "🔧 Healing Request".bold());
        println!("   Test:         {}", request.test_name);
        println!("   Selector:     {}", request.selector().unwrap_or("-"));
        println!("   Error:        {}", crate::output::truncate(&request.error_message, 120));
        println!(
            "   Failure Type: {}",
            request.failure_type.unwrap_or_else(|| classify(&request.error_message))
        );
        println!();
    }

    let service = HealingService::new(config)
        .await
        .context("Failed to create healing service")?;
    let cancel = interrupt_token();

    let spinner = format.is_human().then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Healing...");
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    });

    let outcome = service.heal_with_cancel(&request, &cancel).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    service.close().await;

    let result = outcome.context("Healing failed")?;
    print_result(&result, format);

    if result.status == HealingStatus::Failed && format.is_human() {
        print_warning("The failure could not be healed automatically");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: HealArgs,
    }

    #[test]
    fn test_request_from_flags_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("page.html");
        std::fs::write(&html, "<button data-testid=\"login-submit\">Sign in</button>").unwrap();

        let wrapper = Wrapper::parse_from([
            "heal",
            "--selector",
            "button.login-btn",
            "--error",
            "waiting for selector \"button.login-btn\"",
            "--html",
            html.to_str().unwrap(),
            "--line",
            "5",
        ]);
        let request = wrapper.args.build_request().unwrap();

        assert_eq!(request.selector(), Some("button.login-btn"));
        assert_eq!(request.failed_line, 5);
        assert!(request.page_html.contains("login-submit"));
        assert_eq!(
            request.failure_type,
            Some(classify("waiting for selector \"button.login-btn\""))
        );
    }

    #[test]
    fn test_request_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{"test_name": "checkout", "error_message": "net::ERR_CONNECTION_REFUSED"}"#,
        )
        .unwrap();

        let wrapper = Wrapper::parse_from(["heal", "--request", path.to_str().unwrap()]);
        let request = wrapper.args.build_request().unwrap();
        assert_eq!(request.test_name, "checkout");
        assert!(request.failure_type.is_none());
    }
}
