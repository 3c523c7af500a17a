/// Common Russian prepositions and conjunctions that carry no
/// discriminating signal for catalog-item matching (§4.1).
const STOP_WORDS: &[&str] = &[
    "и", "в", "во", "на", "с", "со", "по", "для", "от", "до", "из", "к", "о", "об", "у", "за",
    "под", "над", "при", "без", "или", "а", "но", "же", "бы", "ли", "то", "это",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_prepositions() {
        assert!(is_stop_word("для"));
        assert!(is_stop_word("и"));
    }

    #[test]
    fn does_not_flag_content_words() {
        assert!(!is_stop_word("болт"));
        assert!(!is_stop_word("гайка"));
    }
}
