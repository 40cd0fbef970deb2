use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of the selection-and-extraction pipeline.
///
/// Only [`SelectionError::Configuration`] raised while validating the run
/// setup reaches the caller of [`crate::aggregate::RegionAggregator::load_all`].
/// Every per-file or per-region failure is logged and turned into a missing
/// contribution for that pair.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// A catalog entry, selection or cut references something with no
    /// resolution strategy.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A custom-cut expression does not match the restricted grammar.
    #[error("cannot parse cut expression '{expression}': {reason}")]
    Parse { expression: String, reason: String },

    /// A source file cannot be opened, its table is missing, or a column it
    /// must provide cannot be read.
    #[error("cannot read {path}: {reason}")]
    FileAccess { path: PathBuf, reason: String },

    /// Pooling was requested for a region with no contributing files.
    #[error("region '{0}' has no contributing files")]
    EmptyRegion(String),
}

impl SelectionError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        SelectionError::Configuration(message.into())
    }

    pub(crate) fn parse(expression: &str, reason: impl Into<String>) -> Self {
        SelectionError::Parse {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn file_access(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SelectionError::FileAccess {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SelectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = SelectionError::parse("x>>1", "expected a numeric literal");
        assert!(err.to_string().contains("x>>1"));

        let err = SelectionError::file_access("/tmp/a.parquet", "table missing");
        assert!(err.to_string().contains("/tmp/a.parquet"));
        assert!(err.to_string().contains("table missing"));

        let err = SelectionError::EmptyRegion("CustomRegion1".into());
        assert_eq!(err.to_string(), "region 'CustomRegion1' has no contributing files");
    }
}
