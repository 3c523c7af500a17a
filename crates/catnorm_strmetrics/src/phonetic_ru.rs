//! Russian phonetic keys (§4.3, §9 Open Question "phonetic algorithm").
//!
//! Both algorithms are pinned to one fixed consonant-class table rather
//! than left configurable: the weighted fuzzy score needs a stable key to
//! compare against, and a configurable table would make the duplicate
//! threshold mean different things across installations.

/// Soundex-style class for a Cyrillic consonant. Vowels, the soft/hard
/// signs and `й` carry no class and are dropped from the key.
fn consonant_class(c: char) -> Option<u8> {
    match c {
        'б' | 'п' => Some(1),
        'в' | 'ф' => Some(2),
        'г' | 'к' | 'х' => Some(3),
        'д' | 'т' => Some(4),
        'ж' | 'ш' | 'щ' | 'ч' => Some(5),
        'з' | 'с' | 'ц' => Some(6),
        'л' => Some(7),
        'м' | 'н' => Some(8),
        'р' => Some(9),
        _ => None,
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'а' | 'е' | 'ё' | 'и' | 'о' | 'у' | 'ы' | 'э' | 'ю' | 'я')
}

/// Soundex-RU: first letter kept verbatim, remaining consonants mapped
/// into the table above, vowels and doubled codes dropped, result padded
/// or truncated to four characters (one letter + three digits).
pub fn soundex_ru(word: &str) -> String {
    let lowered = word.to_lowercase();
    let chars: Vec<char> = lowered.chars().filter(|c| c.is_alphabetic()).collect();
    if chars.is_empty() {
        return String::new();
    }

    let first = chars[0];
    let mut code: Vec<char> = vec![first];

    let mut last_class = consonant_class(first);
    for &c in &chars[1..] {
        if is_vowel(c) {
            last_class = None;
            continue;
        }
        let class = consonant_class(c);
        if let Some(class) = class {
            if Some(class) != last_class {
                code.push((b'0' + class) as char);
            }
            last_class = Some(class);
        }
        if code.len() == 4 {
            break;
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    code.truncate(4);
    code.into_iter().collect()
}

/// Devoiced form of a word-final or pre-consonant voiced obstruent, per
/// standard Russian final devoicing. Used by [`metaphone_ru`] so that
/// e.g. `"завод"` and `"завот"` key the same.
fn devoice(c: char) -> char {
    match c {
        'б' => 'п',
        'в' => 'ф',
        'г' => 'к',
        'д' => 'т',
        'ж' => 'ш',
        'з' => 'с',
        other => other,
    }
}

/// Metaphone-RU: a simplified phonetic key that normalizes `ё` to `е`,
/// collapses doubled letters, applies final-consonant devoicing, then
/// drops vowels except the first letter of the word.
pub fn metaphone_ru(word: &str) -> String {
    let lowered = word.to_lowercase().replace('ё', "е");
    let chars: Vec<char> = lowered.chars().filter(|c| c.is_alphabetic()).collect();
    if chars.is_empty() {
        return String::new();
    }

    // Collapse doubled letters first (русский -> русскии -> collapsed).
    let mut collapsed: Vec<char> = Vec::with_capacity(chars.len());
    for c in chars {
        if collapsed.last() != Some(&c) {
            collapsed.push(c);
        }
    }

    // Final devoicing: last letter, and any consonant immediately before
    // another consonant, devoices.
    let len = collapsed.len();
    for i in 0..len {
        let is_before_consonant = collapsed
            .get(i + 1)
            .map(|&next| !is_vowel(next))
            .unwrap_or(true);
        if is_before_consonant {
            collapsed[i] = devoice(collapsed[i]);
        }
    }

    let mut key = String::new();
    key.push(collapsed[0]);
    for &c in &collapsed[1..] {
        if !is_vowel(c) {
            key.push(c);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fixed ground-truth pairs the phonetic key must collapse together.
    const SOUNDEX_GROUND_TRUTH: &[(&str, &str)] = &[("молоток", "малаток"), ("гайка", "гайка")];

    #[test]
    fn soundex_is_four_characters() {
        for word in ["болт", "гайка", "саморез", "а"] {
            assert_eq!(soundex_ru(word).chars().count(), 4, "word: {word}");
        }
    }

    #[test]
    fn soundex_collapses_known_variants() {
        for (a, b) in SOUNDEX_GROUND_TRUTH {
            assert_eq!(soundex_ru(a), soundex_ru(b), "{a} vs {b}");
        }
    }

    #[test]
    fn soundex_empty_input_is_empty() {
        assert_eq!(soundex_ru(""), "");
    }

    #[test]
    fn metaphone_devoices_final_consonant() {
        assert_eq!(metaphone_ru("завод"), metaphone_ru("завот"));
    }

    #[test]
    fn metaphone_normalizes_yo() {
        assert_eq!(metaphone_ru("трёх"), metaphone_ru("трех"));
    }

    #[test]
    fn metaphone_collapses_doubled_letters() {
        assert_eq!(metaphone_ru("ванна"), metaphone_ru("вана"));
    }
}
