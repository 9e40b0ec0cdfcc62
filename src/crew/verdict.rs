//! Review verdict parser: turns a reviewer's markdown output
//! into a structured [`ReviewVerdict`].

use once_cell::sync::Lazy;
use regex::Regex;

use super::model::{ReviewVerdict, Verdict};

static VERDICT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^#*\s*Verdict:\s*(SHIP|NEEDS_WORK|MAJOR_RETHINK)\s*$").unwrap());
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*[-*]\s+(.+)$").unwrap());

/// Parses `markdown` into a [`ReviewVerdict`]. On malformed input (no
/// recognizable `Verdict:` heading) defaults to `NEEDS_WORK` with an empty
/// issue list: "so work continues under a safe assumption".
pub fn parse(markdown: &str) -> ReviewVerdict {
    let Some(caps) = VERDICT_LINE.captures(markdown) else {
        return ReviewVerdict {
            verdict: Verdict::NeedsWork,
            summary: String::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
        };
    };

    let verdict = match &caps[1] {
        "SHIP" => Verdict::Ship,
        "MAJOR_RETHINK" => Verdict::MajorRethink,
        _ => Verdict::NeedsWork,
    };

    let verdict_end = caps.get(0).unwrap().end();
    let rest = &markdown[verdict_end..];

    let summary = section_before_next_heading(rest).trim().to_string();
    let issues = extract_bulleted_section(rest, "Issues");
    let suggestions = extract_bulleted_section(rest, "Suggestions");

    ReviewVerdict { verdict, summary, issues, suggestions }
}

fn section_before_next_heading(text: &str) -> String {
    text.lines()
        .take_while(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_bulleted_section(text: &str, heading: &str) -> Vec<String> {
    let Some(start) = text.to_lowercase().find(&format!("{}:", heading.to_lowercase())) else {
        // Also accept a markdown heading form, e.g. "## Issues".
        return match text.to_lowercase().find(&format!("## {}", heading.to_lowercase())) {
            Some(idx) => bullets_in_section(&text[idx..]),
            None => Vec::new(),
        };
    };
    bullets_in_section(&text[start..])
}

fn bullets_in_section(section: &str) -> Vec<String> {
    let next_heading = section[1..].find("\n#").map(|i| i + 1).unwrap_or(section.len());
    let window = &section[..next_heading];
    BULLET.captures_iter(window).map(|c| c[1].trim().to_string()).collect()
}
