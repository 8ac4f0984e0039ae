//! Base-40 callsign codec.
//!
//! A station identifier of up to six characters (`A`–`Z`, `0`–`9`) packs into
//! a single 32-bit header field. Characters are encoded least-significant
//! first, so short callsigns produce small codes.

/// Maximum number of characters in a callsign.
pub const MAX_LEN: usize = 6;

const BASE: u32 = 40;

/// Largest code a six-character callsign can produce (`40^6 - 1`).
const MAX_CODE: u32 = 0xF423_FFFF;

/// Encode a callsign into its base-40 code.
///
/// Only the first [`MAX_LEN`] characters are considered. Lowercase letters
/// encode as their uppercase equivalents; characters outside `A`–`Z` and
/// `0`–`9` contribute an empty digit.
pub fn encode(callsign: &str) -> u32 {
    let mut code: u32 = 0;
    for b in callsign.bytes().take(MAX_LEN).rev() {
        code *= BASE;
        code += match b {
            b'A'..=b'Z' => u32::from(b - b'A') + 14,
            b'a'..=b'z' => u32::from(b - b'a') + 14,
            b'0'..=b'9' => u32::from(b - b'0') + 1,
            _ => 0,
        };
    }
    code
}

/// Decode a base-40 code back into callsign text.
///
/// Codes beyond the six-character ceiling decode to an empty string. Digit
/// values with no character assignment render as `-`.
pub fn decode(mut code: u32) -> String {
    let mut callsign = String::new();
    if code > MAX_CODE {
        return callsign;
    }
    while code > 0 {
        let digit = (code % BASE) as u8;
        callsign.push(match digit {
            0 | 11..=13 => '-',
            1..=10 => (b'0' + digit - 1) as char,
            _ => (b'A' + digit - 14) as char,
        });
        code /= BASE;
    }
    callsign
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_characters() {
        assert_eq!(encode("A"), 14);
        assert_eq!(encode("Z"), 39);
        assert_eq!(encode("0"), 1);
        assert_eq!(encode("9"), 10);
        assert_eq!(decode(14), "A");
        assert_eq!(decode(1), "0");
    }

    #[test]
    fn least_significant_first() {
        // "AB" = 14 + 15 * 40
        assert_eq!(encode("AB"), 614);
        assert_eq!(decode(614), "AB");
    }

    #[test]
    fn roundtrip() {
        for callsign in ["M0XYZ", "N0CALL", "KD2ABC", "Q", "42", "ZZZZZZ"] {
            assert_eq!(decode(encode(callsign)), *callsign);
        }
    }

    #[test]
    fn lowercase_folds_to_uppercase() {
        assert_eq!(encode("n0call"), encode("N0CALL"));
    }

    #[test]
    fn truncates_to_six_characters() {
        assert_eq!(encode("ABCDEFGH"), encode("ABCDEF"));
    }

    #[test]
    fn empty_and_invalid() {
        assert_eq!(encode(""), 0);
        assert_eq!(decode(0), "");
        // Codes past the six-character ceiling are not callsigns.
        assert_eq!(decode(MAX_CODE + 1), "");
        assert_eq!(decode(u32::MAX), "");
    }

    #[test]
    fn ceiling_is_six_zs() {
        assert_eq!(encode("ZZZZZZ"), 0xF423_FFFF);
    }
}
