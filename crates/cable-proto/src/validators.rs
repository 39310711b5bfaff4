//! Total, side-effect-free recognizers for the wire-format string shapes
//! (C1). None of these allocate beyond what the caller already owns.

use crate::constants::{I2P_HOSTNAME_LENGTH, TOR_HOSTNAME_LENGTH};

/// True iff `s` is exactly `n` lowercase hex digits.
pub fn is_hex(n: usize, s: &str) -> bool {
    s.len() == n && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// True iff `s` is exactly `n` lowercase base-32 characters (`a-z`, `2-7`).
pub fn is_b32(n: usize, s: &str) -> bool {
    s.len() == n && s.bytes().all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
}

/// True iff `s` is a well-formed `<16 b32>.onion` or `<52 b32>.b32.i2p`
/// hostname.
pub fn is_host(s: &str) -> bool {
    let Some(dot) = s.find('.') else {
        return false;
    };
    let (label, suffix) = s.split_at(dot);
    let suffix = &suffix[1..];
    match suffix {
        "onion" => is_b32(TOR_HOSTNAME_LENGTH, label),
        "b32.i2p" => is_b32(I2P_HOSTNAME_LENGTH, label),
        _ => false,
    }
}

/// True iff `s` is `<40 hex>` or `<40 hex>.del`.
pub fn is_msgdir_name(s: &str) -> bool {
    use crate::constants::{DEL_SUFFIX, MSGID_LENGTH};
    match s.strip_suffix(DEL_SUFFIX) {
        Some(stem) => is_hex(MSGID_LENGTH, stem),
        None => is_hex(MSGID_LENGTH, s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_accepts_exact_length_lowercase() {
        assert!(is_hex(4, "0a9f"));
        assert!(!is_hex(4, "0A9f"));
        assert!(!is_hex(4, "0a9"));
        assert!(!is_hex(4, "0a9fg"));
    }

    #[test]
    fn hex_rejects_embedded_nul() {
        assert!(!is_hex(4, "0a\09"));
    }

    #[test]
    fn b32_accepts_lowercase_and_digits_2_7() {
        assert!(is_b32(8, "abcdef27"));
        assert!(!is_b32(8, "abcdef01"));
        assert!(!is_b32(8, "ABCDEF27"));
    }

    #[test]
    fn host_recognizes_onion() {
        assert!(is_host("abcdefghijklmnop.onion"));
        assert!(!is_host("abcdefghijklmno.onion"));
        assert!(!is_host("ABCDEFGHIJKLMNOP.onion"));
    }

    #[test]
    fn host_recognizes_i2p() {
        let label = "a".repeat(I2P_HOSTNAME_LENGTH);
        assert!(is_host(&format!("{label}.b32.i2p")));
    }

    #[test]
    fn host_rejects_unknown_suffix() {
        assert!(!is_host("abcdefghijklmnop.exit"));
        assert!(!is_host("nodothere"));
    }

    #[test]
    fn msgdir_name_accepts_hex_and_del() {
        let id = "0".repeat(40);
        assert!(is_msgdir_name(&id));
        assert!(is_msgdir_name(&format!("{id}.del")));
        assert!(!is_msgdir_name(&format!("{id}.new")));
    }
}
