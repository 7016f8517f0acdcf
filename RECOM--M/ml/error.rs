use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type RecomResult<T> = Result<T, RecomError>;

/// Errors raised by the parsing, training, evaluation and storage stages.
#[derive(Debug, Error)]
pub enum RecomError {
    /// A line did not hold exactly four parseable fields.
    #[error("malformed record{}: {reason} (`{line}`)", line_suffix(.line_number))]
    MalformedRecord {
        /// 1-based line number within its source, when known.
        line_number: Option<usize>,
        /// Raw line text.
        line: String,
        /// What was wrong with it.
        reason: String,
    },
    /// Split ratios were empty, non-positive or did not sum to one.
    #[error("invalid split ratios {ratios:?}: {reason}")]
    InvalidRatio {
        /// Ratios as supplied.
        ratios: Vec<f64>,
        /// What was wrong with them.
        reason: String,
    },
    /// A training hyperparameter was out of range.
    #[error("invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter {
        /// Parameter name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    /// The training subset held no records.
    #[error("training subset is empty; nothing to factorize")]
    EmptyTrainingSet,
    /// Every test record hit a cold-start gap.
    #[error(
        "none of the {records} test records could be scored (all users or items unseen in training)"
    )]
    NoScorableRecords {
        /// Size of the test subset.
        records: usize,
    },
    /// Persisting a model failed.
    #[error("failed to write model to {}: {source}", .path.display())]
    StorageWrite {
        /// Destination directory.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: StorageCause,
    },
    /// Reading a persisted model failed.
    #[error("failed to read model from {}: {source}", .path.display())]
    StorageRead {
        /// Source directory.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: StorageCause,
    },
    /// Input records could not be read.
    #[error("failed to read input {}: {source}", .path.display())]
    Input {
        /// File or directory being read.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Low-level cause behind a storage failure.
#[derive(Debug, Error)]
pub enum StorageCause {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Content was readable but not a usable model.
    #[error("{0}")]
    Format(String),
}

impl RecomError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line_number: None,
            line: line.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn hyperparameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidHyperparameter {
            name,
            reason: reason.into(),
        }
    }

    /// Attaches a line number to a malformed-record error; other variants pass through.
    #[must_use]
    pub fn at_line(self, number: usize) -> Self {
        match self {
            Self::MalformedRecord { line, reason, .. } => Self::MalformedRecord {
                line_number: Some(number),
                line,
                reason,
            },
            other => other,
        }
    }
}

#[allow(clippy::ref_option)]
fn line_suffix(line_number: &Option<usize>) -> String {
    line_number.map_or_else(String::new, |n| format!(" at line {n}"))
}
