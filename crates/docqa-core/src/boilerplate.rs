//! Front-matter page detection and cleanup.
//!
//! Technical documents often open with a table of contents and a revision
//! history. Those pages match almost every query on keywords alone, so they
//! are dropped before chunking.
//!
//! A page is boilerplate when either:
//!
//! - it contains a table-of-contents keyword (case-insensitive, any run of
//!   whitespace between words), or
//! - at least `min_dotted_lines` of its non-blank lines are dotted leaders
//!   (`Installing ....... 17`) and they make up at least `dotted_line_ratio`
//!   of the non-blank lines.

use regex::Regex;
use std::sync::OnceLock;

/// Tunable thresholds for [`is_boilerplate_page`].
#[derive(Debug, Clone)]
pub struct BoilerplateRules {
    pub toc_keywords: Vec<String>,
    pub min_dotted_lines: usize,
    pub dotted_line_ratio: f64,
}

impl Default for BoilerplateRules {
    fn default() -> Self {
        Self {
            toc_keywords: vec!["table of contents".to_string()],
            min_dotted_lines: 3,
            dotted_line_ratio: 0.30,
        }
    }
}

impl BoilerplateRules {
    /// Compile the keyword list into one case-insensitive, word-bounded regex.
    fn keyword_regex(&self) -> Option<Regex> {
        let alternatives: Vec<String> = self
            .toc_keywords
            .iter()
            .map(|k| k.split_whitespace().map(regex::escape).collect::<Vec<_>>())
            .filter(|words| !words.is_empty())
            .map(|words| words.join(r"\s+"))
            .collect();
        if alternatives.is_empty() {
            return None;
        }
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
    }
}

fn dotted_leader() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.{2,}\s*\d+\s*$").expect("static regex"))
}

fn update_history_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)DOCUMENT UPDATE HISTORY.*?CLASSIFICATION").expect("static regex")
    })
}

fn toc_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)Table of contents.*?\n1\s+Introduction").expect("static regex")
    })
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Returns `true` if the page looks like a table of contents or revision history.
pub fn is_boilerplate_page(page: &str, rules: &BoilerplateRules) -> bool {
    if let Some(re) = rules.keyword_regex() {
        if re.is_match(page) {
            return true;
        }
    }
    dotted_leader_page(page, rules)
}

fn dotted_leader_page(page: &str, rules: &BoilerplateRules) -> bool {
    let lines: Vec<&str> = page.lines().filter(|l| !l.trim().is_empty()).collect();
    let dotted = lines
        .iter()
        .filter(|l| dotted_leader().is_match(l))
        .count();
    dotted >= rules.min_dotted_lines
        && dotted as f64 / lines.len().max(1) as f64 >= rules.dotted_line_ratio
}

/// Join the non-boilerplate pages into one text.
///
/// Each retained page is preceded by a `--- Page N ---` header carrying its
/// original 1-based page number. The result is passed through
/// [`strip_sections`]. Returns the text and the number of pages retained.
pub fn assemble_pages(pages: &[String], rules: &BoilerplateRules) -> (String, usize) {
    let keyword_re = rules.keyword_regex();
    let mut out: Vec<String> = Vec::new();
    let mut kept = 0usize;

    for (i, page) in pages.iter().enumerate() {
        let keyword_hit = keyword_re.as_ref().is_some_and(|re| re.is_match(page));
        if keyword_hit || dotted_leader_page(page, rules) {
            continue;
        }
        if page.trim().is_empty() {
            continue;
        }
        kept += 1;
        out.push(format!("--- Page {} ---", i + 1));
        out.push(page.trim_end().to_string());
        out.push(String::new());
    }

    (strip_sections(&out.join("\n")), kept)
}

/// Regex cleanup for front matter that shares a page with real content.
///
/// Removes `DOCUMENT UPDATE HISTORY … CLASSIFICATION` spans, rewrites
/// `Table of contents … 1 Introduction` to `1   Introduction`, and collapses
/// three or more consecutive newlines to two.
pub fn strip_sections(raw: &str) -> String {
    let text = update_history_block().replace_all(raw, "");
    let text = toc_block().replace_all(&text, "1   Introduction");
    blank_runs().replace_all(&text, "\n\n").into_owned()
}
