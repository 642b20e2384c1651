//! Canonical phone normalization.
//!
//! Every subsystem that touches a phone number (registration submit, bot
//! contact handler, user lookup, verification check) goes through this one
//! function, so the same free-form input always yields the same lookup key.

/// Normalize free-form phone input into a `+7XXXXXXXXXX` key.
///
/// Rules, applied in order: strip everything but digits and `+`; a leading
/// `8` becomes `+7`; a leading bare `7` gets a `+` prefix; a bare 10-digit
/// number gets `+7` prepended. No digit-count validation beyond that:
/// malformed input produces a malformed key.
pub fn normalize_phone(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if let Some(rest) = cleaned.strip_prefix('8') {
        if rest.len() == 10 {
            return format!("+7{}", rest);
        }
    }

    if cleaned.len() == 11 && cleaned.starts_with('7') {
        return format!("+{}", cleaned);
    }

    if cleaned.len() == 10 && !cleaned.starts_with('+') {
        return format!("+7{}", cleaned);
    }

    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_collapse() {
        assert_eq!(normalize_phone("89991234567"), "+79991234567");
        assert_eq!(normalize_phone("+79991234567"), "+79991234567");
        assert_eq!(normalize_phone("79991234567"), "+79991234567");
        assert_eq!(normalize_phone("9991234567"), "+79991234567");
    }

    #[test]
    fn punctuation_is_stripped() {
        assert_eq!(normalize_phone("8 (999) 123-45-67"), "+79991234567");
        assert_eq!(normalize_phone("+7 999 123 45 67"), "+79991234567");
    }

    #[test]
    fn idempotent() {
        for input in ["89991234567", "+79991234567", "9991234567", "8 (999) 123-45-67"] {
            let once = normalize_phone(input);
            assert_eq!(normalize_phone(&once), once);
        }
    }

    #[test]
    fn malformed_input_passes_through() {
        assert_eq!(normalize_phone("12345"), "12345");
        assert_eq!(normalize_phone(""), "");
    }
}
