//! A `Snippet` is an ordered sequence of Unicode code points, not bytes.
//! Every OT position/length in this module counts code points so that a
//! multi-byte character never desyncs an offset between client and server.

/// UTF-8-safe, code-point-addressed text buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snippet(Vec<char>);

impl Snippet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Code points in `[start, end)`, or `None` if out of bounds.
    pub fn slice(&self, start: usize, end: usize) -> Option<&[char]> {
        if start > end || end > self.0.len() {
            return None;
        }
        Some(&self.0[start..end])
    }

    pub fn as_chars(&self) -> &[char] {
        &self.0
    }

    /// Insert `other` at code-point offset `at`. Fails silently (caller must
    /// bounds-check first) if `at > len`.
    pub fn splice_insert(&mut self, at: usize, other: &Snippet) {
        debug_assert!(at <= self.0.len());
        let mut tail = self.0.split_off(at);
        self.0.extend_from_slice(&other.0);
        self.0.append(&mut tail);
    }

    /// Remove `len` code points starting at `at`.
    pub fn splice_delete(&mut self, at: usize, len: usize) {
        debug_assert!(at + len <= self.0.len());
        self.0.drain(at..at + len);
    }
}

impl From<&str> for Snippet {
    fn from(s: &str) -> Self {
        Self(s.chars().collect())
    }
}

impl From<String> for Snippet {
    fn from(s: String) -> Self {
        Self(s.chars().collect())
    }
}

impl std::fmt::Display for Snippet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: String = self.0.iter().collect();
        write!(f, "{s}")
    }
}

impl serde::Serialize for Snippet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Snippet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Snippet::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_point_len_not_byte_len() {
        let s = Snippet::from("föö");
        assert_eq!(s.len(), 3);
        assert_eq!("föö".len(), 4); // ö is 2 bytes in UTF-8
    }

    #[test]
    fn splice_insert_and_delete_roundtrip() {
        let mut s = Snippet::from("foo");
        s.splice_insert(3, &Snippet::from("Bar"));
        assert_eq!(s.to_string(), "fooBar");
        s.splice_delete(3, 3);
        assert_eq!(s.to_string(), "foo");
    }
}
