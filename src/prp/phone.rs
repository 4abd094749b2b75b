//! Mobile number normalization into E.164 (`+<country code><national number>`).
//!
//! Numbers are interpreted with Bangladesh numbering rules when the country
//! code is `880`: national numbers are ten digits starting with `1`, commonly
//! written with a trunk prefix `0` (`01XXXXXXXXX`).

use tracing::debug;

const BD_COUNTRY_CODE: &str = "880";
const BD_NATIONAL_LEN: usize = 10;

/// Normalizes `raw` into international format.
///
/// Returns `None` for empty input. Shapes that cannot be interpreted are kept
/// as the trimmed original so nothing the portal sent is lost.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }

    match national_number(&digits, has_plus, country_code) {
        Some(national) => Some(format!("+{country_code}{national}")),
        None => {
            debug!(phone = trimmed, "Unrecognized phone number format, kept as is");
            Some(trimmed.to_string())
        }
    }
}

fn national_number<'a>(digits: &'a str, has_plus: bool, country_code: &str) -> Option<&'a str> {
    // Explicit international prefix: +CC..., 00CC...
    let international = if has_plus {
        digits.strip_prefix(country_code)
    } else {
        digits
            .strip_prefix("00")
            .and_then(|rest| rest.strip_prefix(country_code))
    };
    if let Some(national) = international {
        return valid_national(national, country_code);
    }
    if has_plus {
        return None;
    }

    if country_code == BD_COUNTRY_CODE {
        if digits.len() == BD_NATIONAL_LEN + country_code.len() {
            if let Some(national) = digits.strip_prefix(country_code) {
                return valid_national(national, country_code);
            }
        }
        if digits.len() == BD_NATIONAL_LEN + 1 {
            if let Some(national) = digits.strip_prefix('0') {
                return valid_national(national, country_code);
            }
        }
        return valid_national(digits, country_code);
    }

    // Other regions: drop a single trunk zero, keep the rest.
    let national = digits.strip_prefix('0').unwrap_or(digits);
    (!national.is_empty()).then_some(national)
}

fn valid_national<'a>(national: &'a str, country_code: &str) -> Option<&'a str> {
    if country_code != BD_COUNTRY_CODE {
        return (!national.is_empty()).then_some(national);
    }
    // Bangladeshi mobiles: 1[3-9]XXXXXXXX
    let valid = national.len() == BD_NATIONAL_LEN
        && national.starts_with('1')
        && national
            .as_bytes()
            .get(1)
            .is_some_and(|d| (b'3'..=b'9').contains(d));
    valid.then_some(national)
}
