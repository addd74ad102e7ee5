//! Ordered named byte-string attributes.
//!
//! An [`AttributeList`] is the bag-of-bytes representation tokens are decoded into
//! before a typed view (see [`crate::token::kinds`]) is built on top. Names are
//! conventionally four ASCII characters or fewer; duplicates are permitted on the
//! wire but lookup always returns the first match, matching the original's
//! linear-scan semantics.

use smol_str::SmolStr;

/// A short ASCII attribute name, e.g. `t`, `s`, `ct`, `et`.
pub type AttrName = SmolStr;

#[derive(Debug, thiserror::Error)]
pub enum AttrError {
    #[error("attribute `{0}` is missing")]
    Missing(AttrName),
    #[error("attribute `{0}` is not valid UTF-8")]
    NotUtf8(AttrName),
    #[error("attribute `{0}` is not a valid 10-digit decimal time")]
    BadTime(AttrName),
    #[error("unterminated escape sequence while decoding attribute list")]
    UnterminatedEscape,
}

/// An ordered, append-only sequence of `(name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    entries: Vec<(AttrName, Vec<u8>)>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
        }
    }

    pub fn add(&mut self, name: impl Into<AttrName>, value: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn add_str(&mut self, name: impl Into<AttrName>, value: impl AsRef<str>) {
        self.add(name, value.as_ref().as_bytes().to_vec());
    }

    /// Encodes a Unix timestamp as a fixed-width 10-digit decimal string.
    pub fn add_time(&mut self, name: impl Into<AttrName>, time: i64) {
        self.add_str(name, format!("{time:010}"));
    }

    /// Index of the first occurrence of `name`, if any.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.find(name).map(|i| self.entries[i].1.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Result<&str, AttrError> {
        let bytes = self.get(name).ok_or_else(|| AttrError::Missing(name.into()))?;
        core::str::from_utf8(bytes).map_err(|_| AttrError::NotUtf8(name.into()))
    }

    pub fn get_time(&self, name: &str) -> Result<i64, AttrError> {
        let s = self.get_str(name)?;
        s.parse::<i64>().map_err(|_| AttrError::BadTime(name.into()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AttrName, &[u8])> {
        self.entries.iter().map(|(n, v)| (n, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the encoded form, computed without allocating.
    ///
    /// Every `;` inside a value is doubled on encode, so each occurrence costs one
    /// extra byte on top of `name=value;`.
    pub fn encoded_length(&self) -> usize {
        self.entries
            .iter()
            .map(|(name, value)| {
                let escapes = value.iter().filter(|b| **b == b';').count();
                name.len() + 1 + value.len() + escapes + 1
            })
            .sum()
    }

    /// Encodes as `name '=' value ';'`, doubling any `;` found inside a value.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_length());
        for (name, value) in &self.entries {
            out.extend_from_slice(name.as_bytes());
            out.push(b'=');
            for byte in value {
                out.push(*byte);
                if *byte == b';' {
                    out.push(b';');
                }
            }
            out.push(b';');
        }
        out
    }

    /// Decodes the `encode` wire format. First occurrence of a name wins on lookup,
    /// but all occurrences are retained in `entries` (order preserved).
    pub fn decode(bytes: &[u8]) -> Result<Self, AttrError> {
        let mut entries = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let eq = bytes[i..]
                .iter()
                .position(|b| *b == b'=')
                .map(|p| i + p)
                .ok_or(AttrError::UnterminatedEscape)?;
            let name = AttrName::new(String::from_utf8_lossy(&bytes[i..eq]));

            let mut value = Vec::new();
            let mut j = eq + 1;
            loop {
                let semi = bytes[j..]
                    .iter()
                    .position(|b| *b == b';')
                    .map(|p| j + p)
                    .ok_or(AttrError::UnterminatedEscape)?;
                value.extend_from_slice(&bytes[j..semi]);
                if bytes.get(semi + 1) == Some(&b';') {
                    // escaped `;;` inside the value, keep scanning
                    value.push(b';');
                    j = semi + 2;
                } else {
                    j = semi + 1;
                    break;
                }
            }

            entries.push((name, value));
            i = j;
        }

        Ok(Self { entries })
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "test code, panics are expected")]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_values() {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "id");
        attrs.add_str("s", "alice@EXAMPLE.ORG");
        attrs.add_time("ct", 1_700_000_000);

        let encoded = attrs.encode();
        assert_eq!(encoded.len(), attrs.encoded_length());

        let decoded = AttributeList::decode(&encoded).expect("valid encoding");
        assert_eq!(decoded.get_str("t").unwrap(), "id");
        assert_eq!(decoded.get_str("s").unwrap(), "alice@EXAMPLE.ORG");
        assert_eq!(decoded.get_time("ct").unwrap(), 1_700_000_000);
    }

    #[test]
    fn escapes_embedded_semicolons() {
        let mut attrs = AttributeList::new();
        attrs.add_str("em", "a;b;;c");

        let encoded = attrs.encode();
        let decoded = AttributeList::decode(&encoded).expect("valid encoding");
        assert_eq!(decoded.get_str("em").unwrap(), "a;b;;c");
    }

    #[test]
    fn first_occurrence_wins_on_lookup() {
        let mut attrs = AttributeList::new();
        attrs.add_str("t", "first");
        attrs.add_str("t", "second");

        assert_eq!(attrs.get_str("t").unwrap(), "first");
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn missing_attribute_errors() {
        let attrs = AttributeList::new();
        assert!(matches!(attrs.get_str("t"), Err(AttrError::Missing(_))));
    }

    #[test]
    fn bad_time_errors() {
        let mut attrs = AttributeList::new();
        attrs.add_str("ct", "not-a-number");
        assert!(matches!(attrs.get_time("ct"), Err(AttrError::BadTime(_))));
    }

    #[test]
    fn empty_value_round_trips() {
        let mut attrs = AttributeList::new();
        attrs.add_str("sad", "");
        let decoded = AttributeList::decode(&attrs.encode()).unwrap();
        assert_eq!(decoded.get_str("sad").unwrap(), "");
    }
}
