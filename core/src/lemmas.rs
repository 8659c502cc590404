use crate::html;
use crate::morphology::Analyzer;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref LATIN: Regex = Regex::new(r"^[a-z]+$").expect("valid regex");
    static ref CYRILLIC: Regex = Regex::new(r"^[а-яё]+$").expect("valid regex");
}

pub type LemmaCounts = BTreeMap<String, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Latin,
    Cyrillic,
}

fn alphabet(folded: &str) -> Option<Alphabet> {
    if LATIN.is_match(folded) {
        Some(Alphabet::Latin)
    } else if CYRILLIC.is_match(folded) {
        Some(Alphabet::Cyrillic)
    } else {
        None
    }
}

/// A word together with the bytes of the source text it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordSpan {
    pub range: Range<usize>,
    pub word: String,
}

/// Words of `text` with their source ranges. Each character is NFKC-folded
/// and lowercased; a word is a run of folded characters from one alphabet,
/// so "abcабв" yields two words. Words shorter than two letters are dropped.
pub fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut current: Option<(Alphabet, usize, String)> = None;
    for (at, c) in text.char_indices() {
        let folded = std::iter::once(c).nfkc().collect::<String>().to_lowercase();
        let class = alphabet(&folded);
        if let (Some((run, _, word)), Some(class)) = (current.as_mut(), class) {
            if *run == class {
                word.push_str(&folded);
                continue;
            }
        }
        if let Some((_, start, word)) = current.take() {
            push_span(&mut spans, start..at, word);
        }
        current = class.map(|class| (class, at, folded));
    }
    if let Some((_, start, word)) = current {
        push_span(&mut spans, start..text.len(), word);
    }
    spans
}

fn push_span(spans: &mut Vec<WordSpan>, range: Range<usize>, word: String) {
    if word.chars().count() >= 2 {
        spans.push(WordSpan { range, word });
    }
}

/// Lowercased, alphabet-homogeneous words of at least two letters.
pub fn words(text: &str) -> Vec<String> {
    word_spans(text).into_iter().map(|s| s.word).collect()
}

pub struct LemmaExtractor {
    analyzer: Analyzer,
}

impl Default for LemmaExtractor {
    fn default() -> Self {
        Self::new(Analyzer::default())
    }
}

impl LemmaExtractor {
    pub fn new(analyzer: Analyzer) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Lemma counts over the visible text of an HTML document.
    pub fn extract_lemmas(&self, html: &str) -> LemmaCounts {
        self.extract_text_lemmas(&html::visible_text(html))
    }

    /// Lemma counts over plain text, e.g. a search query.
    pub fn extract_text_lemmas(&self, text: &str) -> LemmaCounts {
        let mut counts = LemmaCounts::new();
        for word in words(text) {
            if self.analyzer.is_function_word(&word) {
                continue;
            }
            if let Some(lemma) = self.analyzer.canonicalize(&word) {
                *counts.entry(lemma).or_insert(0) += 1;
            }
        }
        counts
    }
}
