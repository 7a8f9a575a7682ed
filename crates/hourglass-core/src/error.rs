// ABOUTME: Error type shared by the classifier, deep-copy engine, class registry and merge engine.
// ABOUTME: Every variant carries the breadcrumb path of the value that failed.

use thiserror::Error;

/// Errors raised while classifying, copying, encoding, decoding or merging values.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("unsupported value at '{path}': {reason}")]
    UnsupportedValue { path: String, reason: String },

    #[error("unknown class '{name}' at '{path}'")]
    UnknownClass { path: String, name: String },

    #[error("table at '{path}' carries foreign identity marker '{marker}'")]
    MetatableRejection { path: String, marker: String },

    #[error("value at '{path}' contains itself")]
    CyclicValue { path: String },

    #[error("malformed encoded data at '{path}': {reason}")]
    Malformed { path: String, reason: String },
}

impl CopyError {
    pub(crate) fn unsupported(path: &str, reason: impl Into<String>) -> Self {
        CopyError::UnsupportedValue {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        CopyError::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Breadcrumb of the value that failed.
    pub fn path(&self) -> &str {
        match self {
            CopyError::UnsupportedValue { path, .. }
            | CopyError::UnknownClass { path, .. }
            | CopyError::MetatableRejection { path, .. }
            | CopyError::CyclicValue { path }
            | CopyError::Malformed { path, .. } => path,
        }
    }
}

/// Extend a breadcrumb with one more segment.
pub fn child_path(parent: &str, segment: impl std::fmt::Display) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{} --> {}", parent, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_joins_with_arrows() {
        let root = child_path("", "feature1");
        let nested = child_path(&child_path(&root, "run"), 3);
        assert_eq!(nested, "feature1 --> run --> 3");
    }

    #[test]
    fn display_includes_path() {
        let err = CopyError::unsupported("a --> b", "functions cannot be encoded");
        assert_eq!(err.path(), "a --> b");
        assert!(err.to_string().contains("a --> b"));
    }
}
