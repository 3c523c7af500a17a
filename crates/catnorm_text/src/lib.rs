//! Text normalization and tokenization (§4.1 "Preprocess stage").
//!
//! Kept deliberately free of any database or session concept: this crate
//! is a pure function library `catnorm_stages::preprocess` calls per row.

mod stemmer;
mod stopwords;
mod transliterate;

pub use stemmer::{NoopStemmer, RuSuffixStemmer, Stemmer};

use thiserror::Error;

/// Catalog names beyond this length are almost always a pasted
/// description or a data-entry mistake, not a product name (§4.1 edge
/// cases).
pub const MAX_INPUT_CHARS: usize = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextError {
    #[error("input is {0} characters, exceeding the {MAX_INPUT_CHARS}-character limit")]
    InputTooLarge(usize),
}

/// Options controlling which optional passes [`normalize`] applies. Case
/// folding, whitespace collapsing and punctuation stripping always run.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Map visually-confusable Latin letters (from a wrong keyboard
    /// layout or OCR) back to their Cyrillic look-alikes.
    pub transliterate: bool,
    pub remove_stop_words: bool,
    pub stem: bool,
    /// Keep digits through punctuation stripping (§4.1). Catalog names
    /// routinely carry article numbers and dimensions (`"М6х20"`), so this
    /// defaults to `true`; turn it off to fold digit runs away like any
    /// other punctuation.
    pub preserve_digits: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            transliterate: false,
            remove_stop_words: false,
            stem: false,
            preserve_digits: true,
        }
    }
}

/// Normalize one catalog field: case-fold, collapse whitespace, drop
/// punctuation and control characters, then apply whichever optional
/// passes `options` requests, in that order (§4.1).
pub fn normalize(input: &str, options: &NormalizeOptions) -> Result<String, TextError> {
    let char_count = input.chars().count();
    if char_count > MAX_INPUT_CHARS {
        return Err(TextError::InputTooLarge(char_count));
    }

    let mut text = if options.transliterate {
        transliterate::delatinize(input)
    } else {
        input.to_string()
    };

    text = text.to_lowercase();
    text = strip_punctuation_and_control(&text, options.preserve_digits);
    text = collapse_whitespace(&text);

    if options.remove_stop_words || options.stem {
        let mut tokens: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        if options.remove_stop_words {
            tokens.retain(|t| !stopwords::is_stop_word(t));
        }
        if options.stem {
            let stemmer = RuSuffixStemmer;
            tokens = tokens.iter().map(|t| stemmer.stem(t)).collect();
        }
        text = tokens.join(" ");
    }

    Ok(text)
}

/// Split an already-normalized string into whitespace-delimited tokens.
/// Exposed separately from [`normalize`] so the dedup analyzer can
/// tokenize without re-running the optional passes.
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized.split_whitespace().map(str::to_string).collect()
}

fn strip_punctuation_and_control(s: &str, preserve_digits: bool) -> String {
    s.chars()
        .filter(|c| !c.is_control())
        .map(|c| {
            let keep = c.is_whitespace() || (if preserve_digits { c.is_alphanumeric() } else { c.is_alphabetic() });
            if keep {
                c
            } else {
                ' '
            }
        })
        .collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_case() {
        let result = normalize("  Болт  М6х20  ", &NormalizeOptions::default()).unwrap();
        assert_eq!(result, "болт м6х20");
    }

    #[test]
    fn strips_punctuation() {
        let result = normalize("болт, м6/20 (оцинк.)", &NormalizeOptions::default()).unwrap();
        assert_eq!(result, "болт м6 20 оцинк");
    }

    #[test]
    fn rejects_oversized_input() {
        let huge = "а".repeat(MAX_INPUT_CHARS + 1);
        assert_eq!(
            normalize(&huge, &NormalizeOptions::default()),
            Err(TextError::InputTooLarge(MAX_INPUT_CHARS + 1))
        );
    }

    #[test]
    fn accepts_input_at_exact_limit() {
        let exact = "а".repeat(MAX_INPUT_CHARS);
        assert!(normalize(&exact, &NormalizeOptions::default()).is_ok());
    }

    #[test]
    fn is_idempotent() {
        let options = NormalizeOptions {
            transliterate: true,
            remove_stop_words: true,
            stem: true,
            ..Default::default()
        };
        let once = normalize("Болты  и  Гайки для крепления", &options).unwrap();
        let twice = normalize(&once, &options).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn removes_stop_words_when_requested() {
        let options = NormalizeOptions {
            remove_stop_words: true,
            ..Default::default()
        };
        let result = normalize("болт и гайка для станка", &options).unwrap();
        assert!(!result.split_whitespace().any(|t| t == "и" || t == "для"));
    }

    #[test]
    fn transliterates_confusable_latin_letters() {
        let options = NormalizeOptions {
            transliterate: true,
            ..Default::default()
        };
        // "6oлт" typed with a Latin "o" instead of Cyrillic "о".
        let result = normalize("6oлт", &options).unwrap();
        assert_eq!(result, "6олт");
    }

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("болт м6 оцинк"), vec!["болт", "м6", "оцинк"]);
    }
}
