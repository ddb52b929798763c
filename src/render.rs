//! Turns completion text into display fragments.
//!
//! Classification is line-granular and single-pass: every line is tested
//! against [`RULES`] in order and the first rule that matches decides its
//! fragment. There is no nesting and no inline markup beyond stripping the
//! heading markers.

use crate::error::AppError;
use crate::models::{FailureCategory, QueryResult, UsageSnapshot};
use askama::Template;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Heading(String),
    ListItem(String),
    Paragraph(String),
}

type Rule = fn(&str) -> Option<Option<Fragment>>;

/// Ordered classification rules. `Some(None)` means the line matched but
/// yields no fragment.
const RULES: [Rule; 4] = [heading_rule, bullet_rule, paragraph_rule, blank_rule];

fn heading_rule(line: &str) -> Option<Option<Fragment>> {
    let trimmed = line.trim();
    if !(trimmed.starts_with("**") && trimmed.ends_with("**")) {
        return None;
    }
    let text = trimmed.replace("**", "");
    let text = text.trim();
    // A marker-only line is consumed without producing an empty heading.
    Some((!text.is_empty()).then(|| Fragment::Heading(text.to_string())))
}

fn bullet_rule(line: &str) -> Option<Option<Fragment>> {
    line.trim()
        .strip_prefix("- ")
        .map(|rest| Some(Fragment::ListItem(rest.trim().to_string())))
}

fn paragraph_rule(line: &str) -> Option<Option<Fragment>> {
    let trimmed = line.trim();
    (!trimmed.is_empty()).then(|| Some(Fragment::Paragraph(trimmed.to_string())))
}

fn blank_rule(_line: &str) -> Option<Option<Fragment>> {
    Some(None)
}

fn classify(line: &str) -> Option<Fragment> {
    RULES.iter().find_map(|rule| rule(line)).flatten()
}

pub fn render(raw: &str) -> Vec<Fragment> {
    raw.lines().filter_map(classify).collect()
}

impl Fragment {
    pub fn text(&self) -> &str {
        match self {
            Fragment::Heading(t) | Fragment::ListItem(t) | Fragment::Paragraph(t) => t,
        }
    }

    /// HTML element the fragment is emitted as.
    pub fn tag(&self) -> &'static str {
        match self {
            Fragment::Heading(_) => "h4",
            Fragment::ListItem(_) => "li",
            Fragment::Paragraph(_) => "p",
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Heading(t) => write!(f, "\n{}\n{}", t, "-".repeat(t.chars().count())),
            Fragment::ListItem(t) => write!(f, "  * {t}"),
            Fragment::Paragraph(t) => write!(f, "{t}"),
        }
    }
}

#[derive(Template)]
#[template(
    source = "{% for f in fragments %}<{{ f.tag() }}>{{ f.text() }}</{{ f.tag() }}>{% endfor %}",
    ext = "html"
)]
struct FragmentsHtml<'a> {
    fragments: &'a [Fragment],
}

pub fn fragments_html(fragments: &[Fragment]) -> Result<String, AppError> {
    Ok(FragmentsHtml { fragments }.render()?)
}

const TRANSPORT_GUIDANCE: [&str; 4] = [
    "Browser or proxy blocking cross-origin requests",
    "Completion API service temporarily unavailable",
    "Network connectivity issues",
    "API key authentication problems",
];

#[derive(Template)]
#[template(path = "panels/answer.html")]
struct AnswerPanel<'a> {
    query: &'a str,
    body: String,
}

#[derive(Template)]
#[template(path = "panels/rate_limited.html")]
struct RateLimitedPanel<'a> {
    reason: String,
    usage: &'a UsageSnapshot,
}

#[derive(Template)]
#[template(path = "panels/transport_error.html")]
struct TransportErrorPanel<'a> {
    message: &'a str,
    guidance: &'a [&'a str],
}

/// Search-result panel for one query, including the failure variants.
pub fn result_html(query: &str, result: &QueryResult) -> Result<String, AppError> {
    let html = match result {
        QueryResult::Success { text, .. } => AnswerPanel {
            query,
            body: fragments_html(&render(text))?,
        }
        .render()?,
        QueryResult::RateLimited { usage, limit } => RateLimitedPanel {
            reason: limit.describe(usage),
            usage,
        }
        .render()?,
        QueryResult::TransportError(err) => TransportErrorPanel {
            message: &err.message,
            guidance: &TRANSPORT_GUIDANCE,
        }
        .render()?,
    };
    Ok(html)
}

/// Plain-text counterpart of [`result_html`] for terminal output.
pub fn result_text(result: &QueryResult) -> String {
    match result {
        QueryResult::Success { text, .. } => render(text)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
            .trim_start()
            .to_string(),
        QueryResult::RateLimited { usage, limit } => format!(
            "Rate limit reached\n{}\nCurrent usage: {}",
            limit.describe(usage),
            usage
        ),
        QueryResult::TransportError(err) => {
            let hint = match err.category {
                FailureCategory::Http { .. } => "The completion API rejected the request.",
                FailureCategory::Network => "Check your network connection and try again.",
                FailureCategory::Unknown => "Please try again.",
            };
            format!("Oops! Something went wrong\nError: {}\n{}", err.message, hint)
        }
    }
}
