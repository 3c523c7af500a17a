/// Map visually-confusable Latin letters to their Cyrillic look-alikes.
/// Covers the common "wrong keyboard layout" and OCR confusions; anything
/// not in the table passes through unchanged.
pub fn delatinize(input: &str) -> String {
    input.chars().map(confusable).collect()
}

fn confusable(c: char) -> char {
    match c {
        'A' => 'А',
        'a' => 'а',
        'B' => 'В',
        'C' => 'С',
        'c' => 'с',
        'E' => 'Е',
        'e' => 'е',
        'H' => 'Н',
        'K' => 'К',
        'k' => 'к',
        'M' => 'М',
        'm' => 'м',
        'O' => 'О',
        'o' => 'о',
        'P' => 'Р',
        'p' => 'р',
        'T' => 'Т',
        't' => 'т',
        'X' => 'Х',
        'x' => 'х',
        'Y' => 'У',
        'y' => 'у',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_confusables() {
        assert_eq!(delatinize("Apple"), "Аррlе");
    }

    #[test]
    fn leaves_unmapped_characters_alone() {
        assert_eq!(delatinize("щ7"), "щ7");
    }
}
