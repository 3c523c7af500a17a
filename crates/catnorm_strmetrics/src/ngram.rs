use std::collections::HashSet;

/// Character n-gram Jaccard similarity. `n` is typically 3 (trigrams) for
/// the fuzzy pass (§4.3); shorter inputs fall back to whole-string
/// comparison so short catalog codes don't get a meaningless score.
pub fn ngram_jaccard(a: &str, b: &str, n: usize) -> f64 {
    let grams_a = ngrams(a, n);
    let grams_b = ngrams(b, n);

    if grams_a.is_empty() && grams_b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let intersection = grams_a.intersection(&grams_b).count();
    let union = grams_a.union(&grams_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn ngrams(s: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < n {
        if chars.is_empty() {
            return HashSet::new();
        }
        return HashSet::from([chars.iter().collect::<String>()]);
    }
    (0..=chars.len() - n)
        .map(|i| chars[i..i + n].iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(ngram_jaccard("нормализация", "нормализация", 3), 1.0);
    }

    #[test]
    fn shares_no_trigrams_scores_zero() {
        assert_eq!(ngram_jaccard("абв", "where", 3), 0.0);
    }

    #[test]
    fn short_strings_fall_back_to_whole_string_comparison() {
        assert_eq!(ngram_jaccard("м6", "м6", 3), 1.0);
        assert_eq!(ngram_jaccard("м6", "м8", 3), 0.0);
    }

    #[test]
    fn partial_overlap_is_between_zero_and_one() {
        let score = ngram_jaccard("болт м6х20", "болт м6х25", 3);
        assert!(score > 0.0 && score < 1.0);
    }
}
