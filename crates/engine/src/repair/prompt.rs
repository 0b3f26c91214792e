//! Prompt construction and response parsing for the repair backend

use super::{FailureAnalysis, SelectorRepairRequest, SelectorRepairResponse};
use selfheal_common::{Error, HealingRequest, Result};
use std::fmt::Write;

pub const REPAIR_SYSTEM_PROMPT: &str = r#"You are an expert Playwright test automation engineer specializing in fixing broken selectors.

Your task is to analyze a failed Playwright test and provide repaired selectors that will work with the current page structure.

## Analysis Process
1. Understand what element the original selector was trying to target
2. Analyze the provided HTML to find the correct element
3. Generate multiple selector strategies (CSS, XPath, text, role, test-id)
4. Rank selectors by reliability and maintainability

## Selector Guidelines
1. Prefer stable attributes: data-testid, aria-label, role
2. Avoid brittle selectors: nth-child, long CSS paths, generated classes
3. Use semantic selectors: getByRole, getByText, getByLabel when possible
4. Keep selectors short

## Output Format
Respond with ONLY a JSON object (no markdown, no text outside the JSON):
{
  "repaired_selector": "the best selector to use",
  "alternative_selectors": [
    {"selector": "...", "type": "css|xpath|text|role|testid", "confidence": 0.0-1.0, "reasoning": "..."}
  ],
  "explanation": "why the original selector failed and how the repair works",
  "confidence": 0.0-1.0,
  "change_type": "id_changed|class_changed|structure_changed|text_changed|element_removed|element_moved|unknown",
  "root_cause": "brief explanation of what changed in the application"
}"#;

pub const FIX_SYSTEM_PROMPT: &str = "You are an expert Playwright test automation engineer.
Given a test failure and a repaired selector, generate the corrected test code.
Output ONLY the corrected code block, no explanations.";

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert test automation engineer analyzing a test failure.
Analyze the failure and provide insights about the root cause and recommended fixes.
Output ONLY a JSON object with the following structure:
{
  "failure_type": "selector|timeout|assertion|navigation|visual|network|unknown",
  "root_cause": "detailed explanation of what caused the failure",
  "is_flaky": true/false,
  "flakiness_reason": "if flaky, explain why",
  "recommended_strategy": "selector_repair|visual_locator|wait_adjustment|retry|skip",
  "confidence": 0.0-1.0,
  "additional_context": "any other relevant information"
}"#;

pub fn repair_prompt(req: &SelectorRepairRequest) -> String {
    let mut out = String::new();

    out.push_str("## Failed Selector Analysis Request\n\n");
    let _ = write!(out, "### Failed Selector\n```\n{}\n```\n\n", req.failed_selector);
    let _ = write!(out, "### Error Message\n```\n{}\n```\n\n", req.error_message);
    let _ = write!(out, "### Page URL\n{}\n\n", req.page_url);

    if !req.test_context.is_empty() {
        let _ = write!(out, "### Test Context\n{}\n\n", req.test_context);
    }

    if !req.test_code.is_empty() {
        let _ = write!(out, "### Relevant Test Code\n```typescript\n{}\n```\n\n", req.test_code);
        if req.failed_line > 0 {
            let _ = write!(out, "Failed at line: {}\n\n", req.failed_line);
        }
    }

    if !req.hints.is_empty() {
        out.push_str("### Hints\n");
        for hint in &req.hints {
            let _ = writeln!(out, "- {}", hint);
        }
        out.push('\n');
    }

    let _ = write!(
        out,
        "### Current Page HTML (relevant portion)\n```html\n{}\n```\n\n",
        req.page_html
    );
    out.push_str("Please analyze the failure and provide repaired selectors.");
    out
}

pub fn fix_prompt(req: &HealingRequest, repair: &SelectorRepairResponse) -> String {
    let mut out = String::new();
    let _ = write!(out, "## Original Test Code\n```typescript\n{}\n```\n\n", req.test_code);
    let _ = write!(out, "## Failed Line: {}\n\n", req.failed_line);
    let _ = write!(out, "## Original Selector: {}\n\n", req.selector().unwrap_or_default());
    let _ = write!(out, "## Repaired Selector: {}\n\n", repair.repaired_selector);
    let _ = write!(out, "## Change Explanation: {}\n\n", repair.explanation);
    out.push_str("Generate the corrected test code with the repaired selector.");
    out
}

pub fn analysis_prompt(req: &HealingRequest) -> String {
    let mut out = String::new();
    out.push_str("## Test Failure Analysis Request\n\n");
    let _ = writeln!(out, "### Test: {}", req.test_name);
    let _ = write!(out, "### File: {}\n\n", req.test_file);
    let _ = write!(out, "### Error Message\n```\n{}\n```\n\n", req.error_message);
    let _ = write!(out, "### Failed Step\n{}\n\n", req.failed_step);
    if let Some(selector) = req.selector() {
        let _ = write!(out, "### Selector\n{}\n\n", selector);
    }
    if !req.page_url.is_empty() {
        let _ = write!(out, "### Page URL\n{}\n\n", req.page_url);
    }
    let _ = write!(out, "### Test Code\n```typescript\n{}\n```\n\n", req.test_code);
    out
}

/// Remove a surrounding markdown code fence (with or without a language tag)
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, if any.
    let body = match rest.find('\n') {
        Some(nl) if !rest[..nl].contains(char::is_whitespace) => &rest[nl + 1..],
        _ => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_repair_response(text: &str) -> Result<SelectorRepairResponse> {
    let body = strip_code_fence(text);
    let mut resp: SelectorRepairResponse = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("invalid repair JSON: {}", e)))?;

    if resp.repaired_selector.trim().is_empty() {
        return Err(Error::MalformedResponse(
            "response missing repaired_selector".into(),
        ));
    }

    resp.confidence = resp.confidence.clamp(0.0, 1.0);
    for alt in &mut resp.alternative_selectors {
        alt.confidence = alt.confidence.clamp(0.0, 1.0);
    }
    Ok(resp)
}

pub fn parse_analysis(text: &str) -> Result<FailureAnalysis> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| Error::MalformedResponse(format!("invalid analysis JSON: {}", e)))
}
