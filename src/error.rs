use core::fmt;
use std::path::PathBuf;

/// Result alias for `clustergram`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by distance computation, clustering and output writing.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Input was empty.
    EmptyInput,

    /// Matrix dimension mismatch (ragged input rows).
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// The clustered axis has too few elements to cluster.
    DegenerateInput {
        /// Number of elements on the axis.
        n_items: usize,
    },

    /// `Metric::None` was passed where a concrete metric is required.
    InvalidMetric,

    /// Invalid number of clusters requested.
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of items.
        n_items: usize,
    },

    /// Invalid parameter value.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },

    /// Neither axis of a clustering run requested a metric.
    NothingToCluster,

    /// The run was cancelled by the caller. Not a failure; the coordinator
    /// maps this to its `Cancelled` outcome.
    Cancelled,

    /// An artifact file could not be written or read.
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Message from the underlying I/O error.
        message: String,
    },

    /// Generic error with message.
    Other(String),
}

impl Error {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => write!(f, "empty input provided"),
            Error::DimensionMismatch { expected, found } => {
                write!(f, "dimension mismatch: expected {expected}, found {found}")
            }
            Error::DegenerateInput { n_items } => {
                write!(f, "cannot cluster an axis with {n_items} element(s)")
            }
            Error::InvalidMetric => {
                write!(f, "no distance metric selected for this computation")
            }
            Error::InvalidClusterCount { requested, n_items } => {
                write!(f, "cannot create {requested} clusters from {n_items} items")
            }
            Error::InvalidParameter { name, message } => {
                write!(f, "invalid parameter '{name}': {message}")
            }
            Error::NothingToCluster => {
                write!(f, "no axis selected for clustering")
            }
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Io { path, message } => {
                write!(f, "i/o error at {}: {message}", path.display())
            }
            Error::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}
