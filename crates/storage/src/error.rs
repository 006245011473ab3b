//! Error types for the storage driver.

use snafu::Snafu;

/// Result alias for storage operations.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Storage driver failure.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Underlying filesystem I/O failed.
    #[snafu(display("I/O error on {category}/{key}: {source}"))]
    Io {
        /// Category the operation targeted.
        category: String,
        /// Key the operation targeted.
        key: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A key or category contains characters the driver refuses to map to a
    /// path.
    #[snafu(display("Invalid storage key {key:?}: {reason}"))]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}
