//! `PublicId`: 22-character externally visible client identifier.
//!
//! Not standard base64. The alphabet below is chosen so that byte-wise
//! (and therefore lexicographic) string order matches numeric order of the
//! packed value, which standard base64's `A-Za-z0-9+/` alphabet does not
//! provide (`+`/`/` sort before `0-9` in ASCII but after them in the
//! standard alphabet's digit assignment).

use rand::Rng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// 64-symbol alphabet, strictly ascending in ASCII order: `-`, `0-9`, `A-Z`,
/// `_`, `a-z`. Index `i` of this array is always the character for digit
/// value `i`, and the array itself is sorted, so encoding a larger integer
/// with more-significant digits first always yields a lexicographically
/// larger string.
pub(crate) const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIMESTAMP_DIGITS: usize = 11;
const RANDOM_DIGITS: usize = 11;
const TOTAL_LEN: usize = TIMESTAMP_DIGITS + RANDOM_DIGITS;

/// The shard-bucket portion of the alphabet: indices `1..=16` are exactly
/// `0123456789ABCDEF`, a true hex digit. The last character of every
/// `PublicId` is drawn from this 16-symbol sub-alphabet so that "clients
/// whose public id ends in 'a'" partitions the population into 16 disjoint,
/// roughly uniform buckets.
const HEX_BUCKET_OFFSET: usize = 1;
const HEX_BUCKET_COUNT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct PublicId(String);

impl PublicId {
    /// Generate a new id with the current wall-clock time as the timestamp
    /// prefix and a random suffix.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_nanos() as u64;
        Self::generate_at(nanos, &mut rand::thread_rng())
    }

    /// Deterministic constructor for tests: caller supplies the nanosecond
    /// timestamp and an rng.
    pub fn generate_at(nanos: u64, rng: &mut impl Rng) -> Self {
        let mut out = String::with_capacity(TOTAL_LEN);
        out.push_str(&encode_digits(nanos, TIMESTAMP_DIGITS));
        for _ in 0..RANDOM_DIGITS - 1 {
            let v: usize = rng.gen_range(0..64);
            out.push(ALPHABET[v] as char);
        }
        let bucket: usize = rng.gen_range(0..HEX_BUCKET_COUNT);
        out.push(ALPHABET[HEX_BUCKET_OFFSET + bucket] as char);
        PublicId(out)
    }

    /// The shard bucket this id falls into: one of 16 hex digits.
    pub fn shard_bucket(&self) -> char {
        self.0.chars().last().expect("PublicId is never empty")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PublicId {
    type Err = InvalidPublicId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().count() != TOTAL_LEN {
            return Err(InvalidPublicId::WrongLength(s.chars().count()));
        }
        if !s.chars().all(|c| ALPHABET.contains(&(c as u8))) {
            return Err(InvalidPublicId::BadCharacter);
        }
        Ok(PublicId(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum InvalidPublicId {
    #[error("public id has {0} characters, expected {TOTAL_LEN}")]
    WrongLength(usize),
    #[error("public id contains a character outside the ordered alphabet")]
    BadCharacter,
}

pub(crate) fn encode_digits(value: u64, digits: usize) -> String {
    let mut out = String::with_capacity(digits);
    for i in (0..digits).rev() {
        let shift = i * 6;
        let chunk = ((value >> shift) & 0x3f) as usize;
        out.push(ALPHABET[chunk] as char);
    }
    out
}

/// Inverse of [`encode_digits`]: used by `tracking::age_encoding` to decode
/// the `pid:age` field back into a UnixNano timestamp for staleness checks.
pub(crate) fn decode_digits(s: &str) -> Option<u64> {
    let mut value: u64 = 0;
    for c in s.chars() {
        let digit = ALPHABET.iter().position(|&b| b as char == c)?;
        value = (value << 6) | digit as u64;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn is_twenty_two_characters() {
        let id = PublicId::generate_at(12345, &mut rand::rngs::StdRng::seed_from_u64(1));
        assert_eq!(id.as_str().chars().count(), 22);
    }

    #[test]
    fn later_timestamps_sort_later_lexicographically() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let earlier = PublicId::generate_at(1_000_000_000, &mut rng);
        let later = PublicId::generate_at(2_000_000_000, &mut rng);
        assert!(earlier < later);
    }

    #[test]
    fn shard_bucket_is_one_of_sixteen_hex_digits() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let id = PublicId::generate_at(1, &mut rng);
            let bucket = id.shard_bucket();
            assert!(bucket.is_ascii_digit() || ('A'..='F').contains(&bucket));
        }
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let id = PublicId::generate_at(42, &mut rand::rngs::StdRng::seed_from_u64(9));
        let s = id.to_string();
        let parsed: PublicId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn digit_encoding_round_trips() {
        let value = 1_700_000_000_123_456_789u64;
        let encoded = encode_digits(value, TIMESTAMP_DIGITS);
        assert_eq!(decode_digits(&encoded), Some(value));
    }

    #[test]
    fn rejects_wrong_length() {
        let err = "short".parse::<PublicId>().unwrap_err();
        assert_eq!(err, InvalidPublicId::WrongLength(5));
    }
}
