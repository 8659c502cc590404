//! Highlighted excerpts for search hits.

use lazy_static::lazy_static;
use regex::Regex;
use sitesearch_core::html;
use sitesearch_core::lemmas::word_spans;
use sitesearch_core::morphology::Analyzer;
use std::collections::HashSet;

lazy_static! {
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?](\s+|$)").expect("valid regex");
}

pub const MAX_FRAGMENTS: usize = 3;
pub const SEPARATOR: &str = "<br />";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub matches: usize,
}

/// Splits text after `.`, `!` or `?` that end the text or precede whitespace.
/// The terminator stays with its fragment.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let end = m.start() + 1;
        push_trimmed(&mut out, &text[start..end]);
        start = m.end();
    }
    push_trimmed(&mut out, &text[start..]);
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s);
    }
}

fn escape(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
}

/// Wraps every word whose normal form is one of `lemmas` in `<b>` and counts them.
pub fn highlight(fragment: &str, lemmas: &HashSet<String>, analyzer: &Analyzer) -> Fragment {
    let mut text = String::with_capacity(fragment.len() + 16);
    let mut matches = 0;
    let mut last = 0;
    for span in word_spans(fragment) {
        let hit = analyzer.canonicalize(&span.word).is_some_and(|l| lemmas.contains(&l));
        if !hit {
            continue;
        }
        escape(&fragment[last..span.range.start], &mut text);
        text.push_str("<b>");
        escape(&fragment[span.range.clone()], &mut text);
        text.push_str("</b>");
        last = span.range.end;
        matches += 1;
    }
    escape(&fragment[last..], &mut text);
    Fragment { text, matches }
}

/// Up to three fragments of the page's body text with the most highlighted
/// words, joined by `<br />`. Fragments without a match are never used.
pub fn snippet(page_html: &str, lemmas: &HashSet<String>, analyzer: &Analyzer) -> String {
    let mut fragments: Vec<Fragment> = html::body_texts(page_html)
        .iter()
        .flat_map(|text| sentences(text).into_iter().map(|s| highlight(s, lemmas, analyzer)).collect::<Vec<_>>())
        .filter(|f| f.matches > 0)
        .collect();
    fragments.sort_by(|a, b| b.matches.cmp(&a.matches));
    fragments.into_iter().take(MAX_FRAGMENTS).map(|f| f.text).collect::<Vec<_>>().join(SEPARATOR)
}
