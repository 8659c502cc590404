//! Per-language word analysis: alphabet check, normal form, grammatical tags.
//!
//! Normal forms come from the Snowball stemmers in `rust-stemmers`; tags come
//! from a closed-class lexicon, which is all the indexer needs to tell
//! function words apart from content words.

use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("word {word:?} is outside the {language} alphabet")]
pub struct WrongAlphabet {
    pub word: String,
    pub language: &'static str,
}

/// One language's analyzer.
pub trait Morphology: Send + Sync {
    fn language(&self) -> &'static str;

    /// True when every character of `word` belongs to this language's alphabet.
    fn accepts(&self, word: &str) -> bool;

    fn normal_forms(&self, word: &str) -> Result<Vec<String>, WrongAlphabet>;

    fn grammatical_tags(&self, word: &str) -> Result<Vec<&'static str>, WrongAlphabet>;

    /// Tags marking articles, prepositions, conjunctions, particles and interjections.
    fn particle_tags(&self) -> &'static [&'static str];

    fn is_function_word(&self, word: &str) -> bool {
        let particles = self.particle_tags();
        self.grammatical_tags(word)
            .map(|tags| tags.iter().any(|t| particles.contains(t)))
            .unwrap_or(false)
    }

    fn canonicalize(&self, word: &str) -> Option<String> {
        self.normal_forms(word).ok()?.into_iter().next()
    }
}

lazy_static! {
    static ref ENGLISH_STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref RUSSIAN_STEMMER: Stemmer = Stemmer::create(Algorithm::Russian);
    static ref ENGLISH_LEXICON: HashMap<&'static str, &'static str> = lexicon(&[
        ("ARTICLE", &["a", "an", "the"]),
        ("PREP", &[
            "about", "above", "across", "after", "against", "along", "among", "around", "at", "before",
            "behind", "below", "beneath", "beside", "between", "beyond", "by", "despite", "down", "during",
            "except", "for", "from", "in", "inside", "into", "near", "of", "off", "on", "onto", "out",
            "outside", "over", "past", "since", "through", "throughout", "till", "to", "toward", "towards",
            "under", "underneath", "until", "unto", "up", "upon", "via", "with", "within", "without",
        ]),
        ("CONJ", &[
            "and", "although", "because", "but", "either", "if", "lest", "neither", "nor", "or", "than",
            "that", "though", "unless", "whereas", "whether", "while", "yet",
        ]),
        ("PART", &["not", "no", "so", "too", "also", "only", "just", "very", "even"]),
        ("INT", &["ah", "aha", "alas", "hey", "hi", "hmm", "oh", "oops", "ouch", "wow", "yeah", "yes"]),
        ("PN", &[
            "he", "her", "hers", "herself", "him", "himself", "his", "it", "its", "itself", "me", "my",
            "myself", "our", "ours", "ourselves", "she", "their", "theirs", "them", "themselves", "these",
            "they", "this", "those", "us", "we", "what", "which", "who", "whom", "whose", "you", "your",
            "yours", "yourself", "yourselves",
        ]),
        ("VBAUX", &[
            "am", "are", "be", "been", "being", "can", "could", "did", "do", "does", "had", "has", "have",
            "is", "may", "might", "must", "shall", "should", "was", "were", "will", "would",
        ]),
    ]);
    static ref RUSSIAN_LEXICON: HashMap<&'static str, &'static str> = lexicon(&[
        ("ПРЕДЛ", &[
            "без", "в", "во", "для", "до", "за", "из", "изо", "к", "ко", "между", "на", "над", "о", "об",
            "обо", "от", "ото", "перед", "по", "под", "подо", "при", "про", "с", "со", "у", "через",
        ]),
        ("СОЮЗ", &[
            "а", "или", "и", "но", "да", "зато", "если", "как", "когда", "либо", "потому", "чтобы",
            "что", "хотя", "тоже", "также", "однако", "будто", "пока",
        ]),
        ("ЧАСТ", &[
            "бы", "же", "ли", "не", "ни", "вот", "вон", "даже", "лишь", "только", "уже", "еще", "ещё",
            "ведь", "разве", "неужели", "пусть",
        ]),
        ("МЕЖД", &["ах", "ох", "эх", "ой", "ура", "увы", "ага", "эй", "ну", "ай"]),
        ("МС", &[
            "я", "ты", "он", "она", "оно", "мы", "вы", "они", "его", "ее", "её", "их", "мой", "твой",
            "наш", "ваш", "свой", "этот", "тот", "это", "то",
        ]),
    ]);
}

fn lexicon(groups: &[(&'static str, &[&'static str])]) -> HashMap<&'static str, &'static str> {
    groups
        .iter()
        .flat_map(|(tag, words)| words.iter().map(move |w| (*w, *tag)))
        .collect()
}

fn lexicon_tags(lexicon: &HashMap<&'static str, &'static str>, word: &str) -> Vec<&'static str> {
    lexicon.get(word).copied().into_iter().collect()
}

fn stem(stemmer: &Stemmer, word: &str) -> Vec<String> {
    let stem = stemmer.stem(word);
    if stem.chars().count() < 2 {
        return Vec::new();
    }
    vec![stem.into_owned()]
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishMorphology;

impl Morphology for EnglishMorphology {
    fn language(&self) -> &'static str {
        "english"
    }

    fn accepts(&self, word: &str) -> bool {
        !word.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic() || c == '\'')
    }

    fn normal_forms(&self, word: &str) -> Result<Vec<String>, WrongAlphabet> {
        self.check(word)?;
        Ok(stem(&ENGLISH_STEMMER, &word.to_lowercase()))
    }

    fn grammatical_tags(&self, word: &str) -> Result<Vec<&'static str>, WrongAlphabet> {
        self.check(word)?;
        Ok(lexicon_tags(&ENGLISH_LEXICON, &word.to_lowercase()))
    }

    fn particle_tags(&self) -> &'static [&'static str] {
        &["INT", "PREP", "CONJ", "ARTICLE", "PART"]
    }
}

impl EnglishMorphology {
    fn check(&self, word: &str) -> Result<(), WrongAlphabet> {
        if self.accepts(word) {
            Ok(())
        } else {
            Err(WrongAlphabet { word: word.to_string(), language: self.language() })
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RussianMorphology;

impl Morphology for RussianMorphology {
    fn language(&self) -> &'static str {
        "russian"
    }

    fn accepts(&self, word: &str) -> bool {
        !word.is_empty() && word.chars().all(is_cyrillic)
    }

    fn normal_forms(&self, word: &str) -> Result<Vec<String>, WrongAlphabet> {
        self.check(word)?;
        Ok(stem(&RUSSIAN_STEMMER, &word.to_lowercase().replace('ё', "е")))
    }

    fn grammatical_tags(&self, word: &str) -> Result<Vec<&'static str>, WrongAlphabet> {
        self.check(word)?;
        Ok(lexicon_tags(&RUSSIAN_LEXICON, &word.to_lowercase()))
    }

    fn particle_tags(&self) -> &'static [&'static str] {
        &["МЕЖД", "ПРЕДЛ", "СОЮЗ", "ЧАСТ"]
    }
}

impl RussianMorphology {
    fn check(&self, word: &str) -> Result<(), WrongAlphabet> {
        if self.accepts(word) {
            Ok(())
        } else {
            Err(WrongAlphabet { word: word.to_string(), language: self.language() })
        }
    }
}

fn is_cyrillic(c: char) -> bool {
    matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё')
}

/// Ordered list of morphologies; the first one whose alphabet accepts a word handles it.
pub struct Analyzer {
    languages: Vec<Box<dyn Morphology>>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(vec![Box::new(EnglishMorphology), Box::new(RussianMorphology)])
    }
}

impl Analyzer {
    pub fn new(languages: Vec<Box<dyn Morphology>>) -> Self {
        Self { languages }
    }

    pub fn morphology_for(&self, word: &str) -> Option<&dyn Morphology> {
        self.languages.iter().map(|m| m.as_ref()).find(|m| m.accepts(word))
    }

    pub fn normal_forms(&self, word: &str) -> Vec<String> {
        self.morphology_for(word)
            .and_then(|m| m.normal_forms(word).ok())
            .unwrap_or_default()
    }

    pub fn is_function_word(&self, word: &str) -> bool {
        self.morphology_for(word).is_some_and(|m| m.is_function_word(word))
    }

    pub fn canonicalize(&self, word: &str) -> Option<String> {
        self.morphology_for(word)?.canonicalize(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_rejects_cyrillic() {
        let err = EnglishMorphology.normal_forms("кошка").unwrap_err();
        assert_eq!(err.language, "english");
        assert!(RussianMorphology.normal_forms("cat").is_err());
    }

    #[test]
    fn stems_inflected_forms_together() {
        let en = EnglishMorphology;
        assert_eq!(en.canonicalize("cats"), en.canonicalize("cat"));
        assert_eq!(en.canonicalize("running").as_deref(), Some("run"));
        let ru = RussianMorphology;
        assert_eq!(ru.canonicalize("кошки"), ru.canonicalize("кошка"));
    }

    #[test]
    fn function_words_by_tag() {
        let en = EnglishMorphology;
        assert_eq!(en.grammatical_tags("the").unwrap(), vec!["ARTICLE"]);
        assert!(en.is_function_word("and"));
        assert!(!en.is_function_word("dog"));
        assert!(RussianMorphology.is_function_word("под"));
        assert!(!RussianMorphology.is_function_word("собака"));
    }

    #[test]
    fn pronouns_and_modals_are_content_words() {
        let en = EnglishMorphology;
        assert_eq!(en.grammatical_tags("will").unwrap(), vec!["VBAUX"]);
        for word in ["will", "may", "can", "must", "being", "this", "it"] {
            assert!(!en.is_function_word(word), "{word}");
        }
        assert_eq!(RussianMorphology.grammatical_tags("они").unwrap(), vec!["МС"]);
        assert!(!RussianMorphology.is_function_word("они"));
    }

    #[test]
    fn analyzer_picks_by_alphabet() {
        let analyzer = Analyzer::default();
        assert_eq!(analyzer.morphology_for("dog").map(|m| m.language()), Some("english"));
        assert_eq!(analyzer.morphology_for("собака").map(|m| m.language()), Some("russian"));
        assert!(analyzer.morphology_for("dogсобака").is_none());
        assert!(analyzer.canonicalize("42").is_none());
    }
}
