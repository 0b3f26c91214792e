//! Page markup reduction
//!
//! Repair prompts carry the page markup, which is frequently far larger than a
//! remote model accepts. [`extract`] keeps the part of the page most likely to
//! contain the element a selector was aiming at.

/// Prefix of a window chosen by term scoring
pub const EXTRACTED_MARKER: &str = "<!-- extracted relevant section -->\n";

/// Suffix of a plain prefix truncation
pub const TRUNCATED_MARKER: &str = "\n<!-- truncated -->";

/// Largest number of bytes [`extract`] may add on top of `max_size`
pub const MARKER_OVERHEAD: usize = if EXTRACTED_MARKER.len() > TRUNCATED_MARKER.len() {
    EXTRACTED_MARKER.len()
} else {
    TRUNCATED_MARKER.len()
};

/// Accessors whose first quoted argument is searched for literally
const TEXT_ACCESSORS: &[&str] = &[
    "getByText(",
    "getByRole(",
    "getByLabel(",
    "getByPlaceholder(",
];

/// Reduce `markup` to at most `max_size` bytes (plus a marker).
///
/// Markup that already fits is returned unchanged. Otherwise the markup is cut
/// into half-overlapping windows of `max_size / 2` bytes and the window
/// containing the most selector-derived search terms wins. Without terms, or
/// without any window scoring above zero, the markup is truncated.
pub fn extract(markup: &str, selector: &str, max_size: usize) -> String {
    if markup.len() <= max_size {
        return markup.to_string();
    }

    let terms = search_terms(selector);
    if terms.is_empty() {
        return truncate(markup, max_size);
    }

    let window = (max_size / 2).max(1);
    let step = (window / 2).max(1);

    let mut best: Option<(&str, usize)> = None;
    let mut start = 0;
    loop {
        let from = floor_char_boundary(markup, start);
        let to = floor_char_boundary(markup, (start + window).min(markup.len()));
        let chunk = &markup[from..to];

        let score = terms.iter().filter(|t| chunk.contains(t.as_str())).count();
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((chunk, score));
        }

        if start + window >= markup.len() {
            break;
        }
        start += step;
    }

    match best {
        Some((chunk, _)) => format!("{}{}", EXTRACTED_MARKER, chunk),
        None => truncate(markup, max_size),
    }
}

fn truncate(markup: &str, max_size: usize) -> String {
    let end = floor_char_boundary(markup, max_size.min(markup.len()));
    format!("{}{}", &markup[..end], TRUNCATED_MARKER)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn ident_at(s: &str) -> &str {
    let end = s.find(|c: char| !is_ident_char(c)).unwrap_or(s.len());
    &s[..end]
}

/// Quoted literal at the start of `s`, if any
fn quoted_at(s: &str) -> Option<&str> {
    let quote = s.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
    let rest = &s[quote.len_utf8()..];
    let end = rest.find(quote)?;
    Some(&rest[..end]).filter(|lit| !lit.is_empty())
}

/// Search terms derived from a selector: id and class fragments, `data-*`
/// attribute names and values, and quoted literals passed to text, role,
/// label or placeholder accessors.
pub fn search_terms(selector: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |term: &str| {
        if !term.is_empty() && !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    };

    for marker in ['#', '.'] {
        for (idx, _) in selector.match_indices(marker) {
            let word = ident_at(&selector[idx + 1..]);
            if word.len() > 2 {
                push(word);
            }
        }
    }

    for (idx, _) in selector.match_indices("data-") {
        let name = ident_at(&selector[idx..]);
        push(name);

        let after = &selector[idx + name.len()..];
        if let Some(value) = after.strip_prefix('=').and_then(quoted_at) {
            push(value);
        }
    }

    for accessor in TEXT_ACCESSORS {
        for (idx, _) in selector.match_indices(accessor) {
            if let Some(literal) = quoted_at(&selector[idx + accessor.len()..]) {
                push(literal);
            }
        }
    }

    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_page(filler: usize, body: &str) -> String {
        let pad = "<div class=\"filler\">lorem ipsum</div>\n".repeat(filler);
        format!("<html><body>{}{}{}</body></html>", pad, body, pad)
    }

    #[test]
    fn test_fits_unchanged() {
        let html = "<button id=\"go\">Go</button>";
        assert_eq!(extract(html, "#go", 1000), html);
        assert_eq!(extract(html, "#go", html.len()), html);
    }

    #[test]
    fn test_idempotent_when_fits() {
        let html = padded_page(2, "<span>x</span>");
        let once = extract(&html, ".x", html.len() + 10);
        assert_eq!(extract(&once, ".x", html.len() + 10), once);
    }

    #[test]
    fn test_search_terms() {
        assert_eq!(
            search_terms("button.btn-primary.login-btn"),
            vec!["btn-primary".to_string(), "login-btn".to_string()]
        );
        assert_eq!(search_terms("#add-to-cart-btn"), vec!["add-to-cart-btn".to_string()]);
        assert_eq!(
            search_terms("[data-testid='login-submit']"),
            vec!["data-testid".to_string(), "login-submit".to_string()]
        );
        assert_eq!(
            search_terms("page.getByRole('button', { name: 'Sign In' })"),
            vec!["getByRole".to_string(), "button".to_string()]
        );
        assert_eq!(search_terms("getByText(\"Add to Cart\")"), vec!["Add to Cart".to_string()]);
        // Fragments of two characters or fewer are noise.
        assert!(search_terms("#a.b").is_empty());
    }

    #[test]
    fn test_picks_relevant_window() {
        let html = padded_page(400, "<button class=\"btn submit-btn\" data-testid=\"login-submit\">Sign In</button>");
        let max = 2000;
        let out = extract(&html, "[data-testid='login-submit']", max);

        assert!(out.starts_with(EXTRACTED_MARKER));
        assert!(out.contains("login-submit"));
        assert!(out.len() <= max + MARKER_OVERHEAD);
    }

    #[test]
    fn test_truncates_without_terms() {
        let html = padded_page(400, "<p>x</p>");
        let out = extract(&html, "p", 500);
        assert!(out.ends_with(TRUNCATED_MARKER));
        assert!(out.len() <= 500 + MARKER_OVERHEAD);
        assert!(html.starts_with(out.trim_end_matches(TRUNCATED_MARKER)));
    }

    #[test]
    fn test_truncates_when_nothing_scores() {
        let html = padded_page(400, "<p>x</p>");
        let out = extract(&html, "#nowhere-to-be-found", 500);
        assert!(out.ends_with(TRUNCATED_MARKER));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let html = "ünïcødé ".repeat(500) + "<i class=\"needle-icon\"></i>" + &"ß".repeat(700);
        for max in [7, 31, 256, 1001] {
            let out = extract(&html, ".needle-icon", max);
            assert!(out.len() <= max + MARKER_OVERHEAD, "max={} len={}", max, out.len());
        }
    }

    #[test]
    fn test_tiny_max_size_terminates() {
        let html = "<div class=\"target\"></div>".repeat(10);
        let out = extract(&html, ".target", 1);
        assert!(out.len() <= 1 + MARKER_OVERHEAD);
    }
}
