//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use selfheal_common::{HealingResult, HealingStatus, HealingSuggestion, HealingSummary};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

impl OutputFormat {
    /// Whether progress and decoration may be written to the terminal
    pub fn is_human(&self) -> bool {
        matches!(self, OutputFormat::Table | OutputFormat::Plain)
    }
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_serialized<T: Serialize + ?Sized>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => print_error(&format!("Failed to encode JSON: {}", e)),
        },
        OutputFormat::Yaml => match serde_yaml::to_string(value) {
            Ok(s) => print!("{}", s),
            Err(e) => print_error(&format!("Failed to encode YAML: {}", e)),
        },
        OutputFormat::Table | OutputFormat::Plain => {}
    }
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(T::headers());
            table.add_row(item.row());
            println!("{table}");
        }
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(item, format),
        OutputFormat::Plain => {
            let row = item.row();
            for (header, value) in T::headers().iter().zip(row.iter()) {
                println!("{}: {}", header, value);
            }
        }
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() && format.is_human() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
        OutputFormat::Json | OutputFormat::Yaml => print_serialized(items, format),
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print one healing result. JSON and YAML carry the full result, the
/// human formats a summary row plus its suggestions.
pub fn print_result(result: &HealingResult, format: OutputFormat) {
    if !format.is_human() {
        print_serialized(result, format);
        return;
    }

    print_item(&ResultDisplay::from(result), format);

    if !result.explanation.is_empty() {
        println!();
        println!("{}", "Explanation".bold());
        println!("   {}", result.explanation);
    }

    if !result.suggestions.is_empty() {
        println!();
        println!("{}", "Suggestions".bold());
        let rows: Vec<SuggestionDisplay> =
            result.suggestions.iter().map(SuggestionDisplay::from).collect();
        print_list(&rows, format);
    }

    if let Some(code) = &result.healed_code {
        println!();
        println!("{}", "Healed code".bold());
        println!("```typescript");
        println!("{}", code);
        println!("```");
    }
}

/// Print a simple message
pub fn print_message(message: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "message": message }));
        }
        _ => {
            println!("{}", message);
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

pub fn status_label(status: HealingStatus) -> String {
    let label = status.to_string();
    match status {
        HealingStatus::Success => label.green().to_string(),
        HealingStatus::Failed => label.red().to_string(),
        HealingStatus::Skipped => label.yellow().to_string(),
        HealingStatus::Pending | HealingStatus::InProgress => label.dimmed().to_string(),
    }
}

pub fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Cut `s` to at most `max` characters, marking the cut
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Summary row of a healing result
#[derive(Debug, Serialize)]
pub struct ResultDisplay {
    pub test: String,
    pub status: HealingStatus,
    pub strategy: String,
    pub confidence: f64,
    pub healed_selector: Option<String>,
    pub validated: bool,
    pub attempts: u32,
    pub duration_ms: u128,
}

impl ResultDisplay {
    pub fn with_test(result: &HealingResult, test: &str) -> Self {
        Self {
            test: test.to_string(),
            ..Self::from(result)
        }
    }
}

impl From<&HealingResult> for ResultDisplay {
    fn from(result: &HealingResult) -> Self {
        Self {
            test: String::new(),
            status: result.status,
            strategy: result.strategy.to_string(),
            confidence: result.confidence,
            healed_selector: result.healed_selector.clone(),
            validated: result.validated,
            attempts: result.attempts,
            duration_ms: result.duration.as_millis(),
        }
    }
}

impl TableDisplay for ResultDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "Test", "Status", "Strategy", "Confidence", "Healed Selector", "Validated",
            "Attempts", "Duration",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            if self.test.is_empty() { "-".to_string() } else { self.test.clone() },
            status_label(self.status),
            self.strategy.clone(),
            percent(self.confidence),
            self.healed_selector.clone().unwrap_or_else(|| "-".to_string()),
            if self.validated { "yes" } else { "no" }.to_string(),
            self.attempts.to_string(),
            format!("{}ms", self.duration_ms),
        ]
    }
}

/// One suggestion attached to a result
#[derive(Debug, Serialize)]
pub struct SuggestionDisplay {
    pub strategy: String,
    pub confidence: f64,
    pub description: String,
    pub selector: Option<String>,
    pub code: Option<String>,
}

impl From<&HealingSuggestion> for SuggestionDisplay {
    fn from(s: &HealingSuggestion) -> Self {
        Self {
            strategy: s.strategy.to_string(),
            confidence: s.confidence,
            description: s.description.clone(),
            selector: s.selector.clone(),
            code: s.code.clone(),
        }
    }
}

impl TableDisplay for SuggestionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Strategy", "Confidence", "Description", "Selector / Code"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.strategy.clone(),
            format!("{:.0}%", self.confidence * 100.0),
            self.description.clone(),
            self.selector
                .clone()
                .or_else(|| self.code.clone())
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

impl TableDisplay for HealingSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Total", "Healed", "Failed", "Skipped", "Validated", "Mean Confidence"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.total.to_string(),
            self.healed.to_string(),
            self.failed.to_string(),
            self.skipped.to_string(),
            self.validated.to_string(),
            percent(self.mean_confidence),
        ]
    }
}
