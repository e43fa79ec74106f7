//! Hierarchical storage keys
//!
//! A [`Key`] is an ordered sequence of segments. The canonical string form
//! joins the segments with `/`; the root key has no segments and renders as
//! an empty string.
//!
//! Segments are not validated. A segment containing `/` breaks the
//! round-trip between [`Key::parts`] and [`Key::parse`]; callers must not
//! produce such segments.

use std::fmt;

/// Segment delimiter of the canonical string form
pub const DELIMITER: char = '/';

/// Immutable hierarchical key
///
/// Equality and ordering compare segments one by one, so `a/b` sorts before
/// `a/b/c`, which sorts before `a/c`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    parts: Vec<String>,
}

impl Key {
    /// The root key (no segments)
    pub const ROOT: Key = Key { parts: Vec::new() };

    /// Build a key from ordered segments
    ///
    /// ```
    /// use asto::Key;
    ///
    /// let key = Key::new(["a", "b", "c"]);
    /// assert_eq!(key.string(), "a/b/c");
    /// ```
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a canonical string; the empty string is the root key
    #[must_use]
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::ROOT;
        }
        Self::new(path.split(DELIMITER))
    }

    /// Canonical string form
    #[must_use]
    pub fn string(&self) -> String {
        self.parts.join("/")
    }

    /// Ordered segments
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Append one segment
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(segment.into());
        Self { parts }
    }

    /// Append every segment of `other`
    #[must_use]
    pub fn join(&self, other: &Key) -> Self {
        let mut parts = self.parts.clone();
        parts.extend(other.parts.iter().cloned());
        Self { parts }
    }

    /// Key without its last segment; `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.parts.split_last()?;
        Some(Self {
            parts: rest.to_vec(),
        })
    }

    /// Segment-wise prefix test. Every key starts with the root.
    #[must_use]
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.parts.starts_with(&prefix.parts)
    }

    /// Remainder of the key after `prefix`, if `prefix` is a segment-wise prefix
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Key) -> Option<Self> {
        self.parts.strip_prefix(prefix.parts.as_slice()).map(|rest| Self {
            parts: rest.to_vec(),
        })
    }

    /// Drop the segment at `index`. An out-of-range index returns the key unchanged.
    #[must_use]
    pub fn exclude_index(&self, index: usize) -> Self {
        let mut parts = self.parts.clone();
        if index < parts.len() {
            parts.remove(index);
        }
        Self { parts }
    }

    /// Drop the first segment equal to `segment`, if any
    #[must_use]
    pub fn exclude_first(&self, segment: &str) -> Self {
        match self.parts.iter().position(|p| p == segment) {
            Some(index) => self.exclude_index(index),
            None => self.clone(),
        }
    }

    /// Drop the last segment equal to `segment`, if any
    #[must_use]
    pub fn exclude_last(&self, segment: &str) -> Self {
        match self.parts.iter().rposition(|p| p == segment) {
            Some(index) => self.exclude_index(index),
            None => self.clone(),
        }
    }

    /// Drop every segment equal to `segment`
    #[must_use]
    pub fn exclude_all(&self, segment: &str) -> Self {
        Self {
            parts: self
                .parts
                .iter()
                .filter(|p| p.as_str() != segment)
                .cloned()
                .collect(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string())
    }
}

impl From<&str> for Key {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl From<String> for Key {
    fn from(path: String) -> Self {
        Self::parse(&path)
    }
}
