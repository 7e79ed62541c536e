//! Paths addressing entries inside a document.

use serde::{Deserialize, Serialize};

/// Keys from the document root down to an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Create a new empty path (root).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Create a path from segments.
    #[must_use]
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parse from dotted form (`"user.name"`). The empty string is the root.
    ///
    /// Keys containing `.` cannot be expressed this way; use
    /// [`Path::from_segments`] for those.
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self {
            segments: dotted.split('.').map(str::to_string).collect(),
        }
    }

    /// Append a segment to the path.
    #[must_use]
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(key.into());
        Self { segments }
    }

    /// The path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Check if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Split into the final key and the keys of its ancestors.
    #[must_use]
    pub fn split_last(&self) -> Option<(&str, &[String])> {
        self.segments
            .split_last()
            .map(|(key, parents)| (key.as_str(), parents))
    }

    /// Convert to dotted string form.
    #[must_use]
    pub fn to_dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_dotted())
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<&[String]> for Path {
    fn from(segments: &[String]) -> Self {
        Self::from_segments(segments.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Path {
    fn from(segments: [&str; N]) -> Self {
        Self {
            segments: segments.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_roundtrip() {
        let path = Path::from(["user", "profile", "name"]);

        assert_eq!(path.to_dotted(), "user.profile.name");
        assert_eq!(Path::parse("user.profile.name"), path);
    }

    #[test]
    fn empty_string_is_root() {
        assert!(Path::parse("").is_root());
        assert!(Path::root().split_last().is_none());
    }

    #[test]
    fn split_last_separates_key_from_ancestors() {
        let path = Path::parse("a.b.c");
        let (key, parents) = path.split_last().unwrap();

        assert_eq!(key, "c");
        assert_eq!(parents, ["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn child_appends_segment_with_dots() {
        let path = Path::parse("prefs").child("ui.theme");

        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.segments()[1], "ui.theme");
    }
}
