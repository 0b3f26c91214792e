//! Built-in healing scenarios
//!
//! Runs a handful of realistic failures through the engine, either against
//! the configured repair backend or, with `--offline`, against a local
//! heuristic backend that ranks the page's test ids, ids, labels and classes
//! by how much they share with the broken selector.

use super::{interrupt_token, load_config, BackendArgs};
use crate::output::{percent, print_item, status_label, truncate, OutputFormat};
use anyhow::Context;
use async_trait::async_trait;
use clap::Args;
use colored::Colorize;
use selfheal_common::{
    Error, FailureType, HealingRequest, HealingResult, HealingStrategy, HealingSummary, Result,
};
use selfheal_engine::repair::{
    AlternativeSelector, FailureAnalysis, LocatorType, RepairBackend, SelectorChangeType,
    SelectorRepairRequest, SelectorRepairResponse,
};
use selfheal_engine::{classify, HealingService};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Use the built-in heuristic repair backend instead of the remote one
    #[arg(long)]
    pub offline: bool,

    /// Run only this scenario (number or name)
    #[arg(short, long)]
    pub scenario: Option<String>,

    #[command(flatten)]
    pub backend: BackendArgs,
}

pub struct Scenario {
    pub slug: &'static str,
    pub name: &'static str,
    pub request: HealingRequest,
}

#[derive(Serialize)]
struct ScenarioReport<'a> {
    scenario: &'a str,
    result: &'a HealingResult,
}

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            slug: "login-submit",
            name: "Selector Changed - Class Renamed",
            request: HealingRequest {
                test_file: "tests/login.spec.ts".into(),
                page_url: "https://example.com/login".into(),
                page_html: LOGIN_HTML.into(),
                test_code: LOGIN_TEST.into(),
                failed_line: 5,
                ..HealingRequest::new(
                    "login.spec.ts",
                    "Error: Timeout 30000ms exceeded.\nWaiting for selector \"button.btn-primary.login-btn\"\n=========================== logs ===========================\nwaiting for selector \"button.btn-primary.login-btn\"",
                )
                .with_selector("button.btn-primary.login-btn")
            },
        },
        Scenario {
            slug: "add-to-cart",
            name: "Element Moved - ID Changed",
            request: HealingRequest {
                test_file: "tests/checkout.spec.ts".into(),
                page_url: "https://example.com/product/12345".into(),
                page_html: PRODUCT_HTML.into(),
                test_code: PRODUCT_TEST.into(),
                failed_line: 4,
                ..HealingRequest::new(
                    "checkout.spec.ts",
                    "Error: locator.click: Error: element not found\n  selector \"#add-to-cart-btn\"",
                )
                .with_selector("#add-to-cart-btn")
            },
        },
        Scenario {
            slug: "slow-dashboard",
            name: "Timeout - Slow Loading Element",
            request: HealingRequest {
                test_file: "tests/dashboard.spec.ts".into(),
                // the element exists but stays hidden until data loads
                failure_type: Some(FailureType::Timeout),
                page_url: "https://example.com/dashboard".into(),
                page_html: DASHBOARD_HTML.into(),
                test_code: DASHBOARD_TEST.into(),
                failed_line: 3,
                ..HealingRequest::new(
                    "dashboard.spec.ts",
                    "Error: Timeout 5000ms exceeded.\nCall log:\n  - waiting for selector \".dashboard-stats\"\n  - selector resolved to hidden element",
                )
                .with_selector(".dashboard-stats")
            },
        },
    ]
}

fn select(all: Vec<Scenario>, filter: Option<&str>) -> anyhow::Result<Vec<Scenario>> {
    let Some(filter) = filter else {
        return Ok(all);
    };
    let index = filter.parse::<usize>().ok();
    let picked: Vec<Scenario> = all
        .into_iter()
        .enumerate()
        .filter(|(i, s)| index == Some(i + 1) || s.slug == filter)
        .map(|(_, s)| s)
        .collect();
    if picked.is_empty() {
        anyhow::bail!("Unknown scenario '{}'", filter);
    }
    Ok(picked)
}

pub async fn execute(
    args: DemoArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    args.backend.apply(&mut config);
    let scenarios = select(scenarios(), args.scenario.as_deref())?;

    let service = if args.offline {
        HealingService::builder(config)
            .repair_backend(Arc::new(OfflineRepair))
            .visual_backend(None)
            .build()
            .await?
    } else {
        if !config.has_repair_credentials() {
            anyhow::bail!(
                "Repair backend API key required. Set ANTHROPIC_API_KEY, use --api-key, or run with --offline"
            );
        }
        HealingService::new(config)
            .await
            .context("Failed to create healing service")?
    };

    let human = format.is_human();
    if human {
        println!("{}", "🧪 SelfHeal Demo".bold());
        println!("{}", "=".repeat(50).dimmed());
    }

    let cancel = interrupt_token();
    let mut results = Vec::with_capacity(scenarios.len());

    for (i, scenario) in scenarios.iter().enumerate() {
        let request = &scenario.request;
        if human {
            println!();
            println!("{}", format!("📋 Scenario {}: {}", i + 1, scenario.name).bold());
            println!("   Failed Selector: {}", request.selector().unwrap_or("-"));
            println!(
                "   Failure Type:    {}",
                request.failure_type.unwrap_or_else(|| classify(&request.error_message))
            );
        }

        let started = Instant::now();
        let result = match service.heal_with_cancel(request, &cancel).await {
            Ok(result) => result,
            Err(Error::Cancelled) => {
                service.close().await;
                anyhow::bail!("Demo cancelled");
            }
            Err(e) => {
                if human {
                    println!("   {} {}", "❌ Error:".red(), e);
                }
                continue;
            }
        };

        if human {
            print_scenario(request, &result, started.elapsed());
        }
        results.push((scenario.slug, result));
    }

    service.close().await;

    let healed: Vec<HealingResult> = results.iter().map(|(_, r)| r.clone()).collect();
    let summary = HealingSummary::from_results(&healed);

    if human {
        println!();
        println!("{}", "=".repeat(50).dimmed());
        print_item(&summary, format);
        println!("{}", "✨ Demo Complete!".bold());
        println!();
        println!("Heal your own failure with:");
        println!(
            "  {}",
            "selfheal heal --selector 'button.old-class' --error 'selector not found' --html page.html --url 'https://example.com'"
                .cyan()
        );
    } else {
        let reports: Vec<ScenarioReport> = results
            .iter()
            .map(|(slug, result)| ScenarioReport {
                scenario: slug,
                result,
            })
            .collect();
        let value = serde_json::json!({ "scenarios": reports, "summary": summary });
        match format {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&value)?),
            _ => println!("{}", serde_json::to_string_pretty(&value)?),
        }
    }

    Ok(())
}

fn print_scenario(request: &HealingRequest, result: &HealingResult, elapsed: std::time::Duration) {
    println!();
    println!("   📊 Result:");
    println!("      Status:     {}", status_label(result.status));
    println!("      Strategy:   {}", result.strategy);
    println!("      Confidence: {}", percent(result.confidence));
    println!("      Time:       {:?}", elapsed);

    if let Some(healed) = &result.healed_selector {
        println!();
        println!("   {}", "✅ Healed Selector:".green());
        println!("      Before: {}", request.selector().unwrap_or("-"));
        println!("      After:  {}", healed.green());
    }

    println!();
    println!("   📝 Explanation:");
    println!("      {}", truncate(&result.explanation, 200));

    if !result.suggestions.is_empty() {
        println!();
        println!("   💡 Alternatives:");
        for (j, s) in result.suggestions.iter().enumerate() {
            if j >= 3 {
                println!("      ... and {} more", result.suggestions.len() - 3);
                break;
            }
            println!("      {}. [{:.0}%] {}", j + 1, s.confidence * 100.0, s.description);
            if let Some(selector) = &s.selector {
                println!("         {}", selector.cyan());
            }
        }
    }

    if let Some(change) = result.metadata.get("change_type").and_then(|v| v.as_str()) {
        println!();
        println!("   🔍 Root Cause: {}", change);
    }
}

/// Local repair backend for demos and offline runs
pub struct OfflineRepair;

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    selector: String,
    locator_type: LocatorType,
    attribute: &'static str,
    score: f64,
    overlap: usize,
}

/// Attribute, selector template and ranking bonus
const ATTRIBUTES: [(&str, LocatorType, f64); 4] = [
    ("data-testid", LocatorType::Testid, 1.5),
    ("id", LocatorType::Css, 1.0),
    ("aria-label", LocatorType::Css, 0.5),
    ("class", LocatorType::Css, 0.0),
];

fn tokens(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Values of `name="..."` attributes in `html`
fn attribute_values<'a>(html: &'a str, name: &str) -> Vec<&'a str> {
    let needle = format!("{}=\"", name);
    let mut values = Vec::new();
    for (start, _) in html.match_indices(&needle) {
        let preceded_by_space = html[..start]
            .chars()
            .next_back()
            .map_or(false, char::is_whitespace);
        if !preceded_by_space {
            continue;
        }
        let rest = &html[start + needle.len()..];
        if let Some(end) = rest.find('"') {
            values.push(&rest[..end]);
        }
    }
    values
}

fn selector_for(attribute: &str, value: &str) -> String {
    match attribute {
        "id" => format!("#{}", value),
        "class" => format!(".{}", value),
        _ => format!("[{}=\"{}\"]", attribute, value),
    }
}

fn candidates(html: &str, failed_selector: &str) -> Vec<Candidate> {
    let wanted = tokens(failed_selector);
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for (attribute, locator_type, bonus) in ATTRIBUTES {
        for value in attribute_values(html, attribute) {
            let values: Vec<&str> = if attribute == "class" {
                value.split_whitespace().collect()
            } else {
                vec![value]
            };
            for value in values {
                let selector = selector_for(attribute, value);
                if selector == failed_selector || !seen.insert(selector.clone()) {
                    continue;
                }
                let overlap = tokens(value).intersection(&wanted).count();
                if overlap == 0 {
                    continue;
                }
                found.push(Candidate {
                    selector,
                    locator_type,
                    attribute,
                    score: overlap as f64 + bonus,
                    overlap,
                });
            }
        }
    }

    found.sort_by(|a, b| b.score.total_cmp(&a.score));
    found
}

fn change_type(failed_selector: &str, best: &Candidate) -> SelectorChangeType {
    match (failed_selector.starts_with('#'), best.attribute) {
        (true, "id") => SelectorChangeType::IdChanged,
        (true, _) => SelectorChangeType::ElementMoved,
        (false, _) if failed_selector.contains('.') => SelectorChangeType::ClassChanged,
        _ => SelectorChangeType::StructureChanged,
    }
}

#[async_trait]
impl RepairBackend for OfflineRepair {
    async fn repair(&self, request: &SelectorRepairRequest) -> Result<SelectorRepairResponse> {
        let mut ranked = candidates(&request.page_html, &request.failed_selector).into_iter();
        let best = ranked.next().ok_or_else(|| {
            Error::MalformedResponse(format!(
                "no element on the page resembles '{}'",
                request.failed_selector
            ))
        })?;

        let alternative_selectors = ranked
            .take(3)
            .map(|c| AlternativeSelector {
                confidence: (0.4 + 0.1 * c.overlap as f64).min(0.8),
                reasoning: format!("{} shares {} token(s) with the old selector", c.attribute, c.overlap),
                selector: c.selector,
                locator_type: c.locator_type,
            })
            .collect();

        Ok(SelectorRepairResponse {
            explanation: format!(
                "'{}' no longer matches; the element is now reachable through its {} attribute",
                request.failed_selector, best.attribute
            ),
            confidence: (0.5 + 0.1 * best.overlap as f64 + 0.1 * (best.score - best.overlap as f64))
                .min(0.95),
            change_type: change_type(&request.failed_selector, &best),
            root_cause: "Markup changed between test runs".to_string(),
            repaired_selector: best.selector,
            alternative_selectors,
        })
    }

    async fn generate_fix(
        &self,
        request: &HealingRequest,
        repair: &SelectorRepairResponse,
    ) -> Result<String> {
        let old = request.selector().unwrap_or_default();
        if old.is_empty() || !request.test_code.contains(old) {
            return Err(Error::MalformedResponse(
                "failed selector does not appear in the test code".into(),
            ));
        }
        Ok(request.test_code.replace(old, &repair.repaired_selector))
    }

    async fn analyze_failure(&self, request: &HealingRequest) -> Result<FailureAnalysis> {
        let lower = request.error_message.to_lowercase();
        let hidden = lower.contains("hidden") || lower.contains("not visible");
        Ok(FailureAnalysis {
            failure_type: Some(classify(&request.error_message)),
            root_cause: if hidden {
                "Element is rendered but stays hidden until its data loads".to_string()
            } else {
                "Page did not reach the expected state in time".to_string()
            },
            is_flaky: hidden,
            flakiness_reason: if hidden {
                "Visibility depends on backend response time".to_string()
            } else {
                String::new()
            },
            recommended_strategy: Some(HealingStrategy::WaitAdjustment),
            confidence: 0.6,
            additional_context: String::new(),
        })
    }
}

const LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Login</title></head>
<body>
  <div class="container">
    <form class="login-form" id="loginForm">
      <h1>Welcome Back</h1>
      <div class="form-group">
        <label for="email">Email</label>
        <input type="email" id="email" name="email" placeholder="Enter your email">
      </div>
      <div class="form-group">
        <label for="password">Password</label>
        <input type="password" id="password" name="password" placeholder="Enter your password">
      </div>
      <button type="submit" class="btn btn-primary submit-btn" data-testid="login-submit">
        Sign In
      </button>
      <a href="/forgot-password" class="forgot-link">Forgot password?</a>
    </form>
  </div>
</body>
</html>"#;

const LOGIN_TEST: &str = r#"test('user can login', async ({ page }) => {
  await page.goto('/login');
  await page.fill('#email', 'user@example.com');
  await page.fill('#password', 'password123');
  await page.click('button.btn-primary.login-btn');
  await expect(page).toHaveURL('/dashboard');
});"#;

const PRODUCT_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Product Page</title></head>
<body>
  <div class="product-container">
    <div class="product-info">
      <h1>Premium Widget</h1>
      <p class="price">$49.99</p>
      <p class="description">A fantastic widget for all your needs.</p>
    </div>
    <div class="product-actions">
      <select id="quantity" name="quantity">
        <option value="1">1</option>
        <option value="2">2</option>
        <option value="3">3</option>
      </select>
      <button
        type="button"
        id="btn-add-cart"
        class="btn btn-success add-cart-action"
        data-product-id="12345"
        aria-label="Add to shopping cart">
        Add to Cart
      </button>
      <button type="button" class="btn btn-outline wishlist-btn">
        Add to Wishlist
      </button>
    </div>
  </div>
</body>
</html>"#;

const PRODUCT_TEST: &str = r#"test('add product to cart', async ({ page }) => {
  await page.goto('/product/12345');
  await page.selectOption('#quantity', '2');
  await page.click('#add-to-cart-btn');
  await expect(page.locator('.cart-count')).toHaveText('2');
});"#;

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Dashboard</title></head>
<body>
  <div class="dashboard">
    <header class="dashboard-header">
      <h1>Welcome, User</h1>
    </header>
    <div class="loading-placeholder" data-loading="true">
      Loading statistics...
    </div>
    <div class="dashboard-stats" style="display: none;" data-loaded="false">
      <div class="stat-card">Revenue: $10,000</div>
      <div class="stat-card">Orders: 150</div>
    </div>
  </div>
  <script>
    setTimeout(() => {
      document.querySelector('.loading-placeholder').style.display = 'none';
      document.querySelector('.dashboard-stats').style.display = 'block';
    }, 3000);
  </script>
</body>
</html>"#;

const DASHBOARD_TEST: &str = r#"test('dashboard shows statistics', async ({ page }) => {
  await page.goto('/dashboard');
  await page.waitForSelector('.dashboard-stats');
  await expect(page.locator('.stat-card').first()).toBeVisible();
});"#;
