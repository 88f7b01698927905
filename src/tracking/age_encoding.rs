//! Lexicographic-order-preserving encoding for the presence hash's `pid:age`
//! field: a UnixNano timestamp encoded with a base64 variant whose alphabet
//! preserves lexicographic order of the underlying integer.
//!
//! Reuses `client::public_id`'s ordered alphabet and digit codec, so one
//! encoder/decoder pair serves both. A `u64` UnixNano fits 11 six-bit
//! digits (66 bits, top two always zero), the same width `PublicId`'s
//! timestamp prefix already uses.

use crate::client::public_id::{decode_digits, encode_digits};

const AGE_DIGITS: usize = 11;

/// Encode a UnixNano timestamp so that byte-wise string comparison agrees
/// with numeric comparison of the input.
pub fn encode_age(unix_nanos: u64) -> String {
    encode_digits(unix_nanos, AGE_DIGITS)
}

/// Decode a previously encoded age back to UnixNano. Returns `None` for a
/// malformed field (stored by something other than this encoder).
pub fn decode_age(encoded: &str) -> Option<u64> {
    if encoded.chars().count() != AGE_DIGITS {
        return None;
    }
    decode_digits(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let now = 1_700_000_000_000_000_000u64;
        assert_eq!(decode_age(&encode_age(now)), Some(now));
    }

    #[test]
    fn ordering_matches_numeric_ordering() {
        let a = encode_age(1_000);
        let b = encode_age(2_000);
        assert!(a < b);
    }

    #[test]
    fn malformed_field_decodes_to_none() {
        assert_eq!(decode_age("short"), None);
    }
}
