//! Error types for instance extraction.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`ExtractError`].
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Errors that can occur while extracting instances.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The label table has not been produced yet.
    #[error("label file {} does not exist; the label processor must be run first", .0.display())]
    MissingLabels(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A label table or raster tile could not be parsed.
    #[error(transparent)]
    Load(#[from] anyhow::Error),

    /// Array dimensions that do not fit together.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// An index needs a reflectance band the array does not carry.
    #[error("band {band} (position {position}) missing from array with {available} channels")]
    MissingBand {
        /// Band name, e.g. `B8`.
        band: &'static str,
        /// Expected channel position.
        position: usize,
        /// Number of channels in the array.
        available: usize,
    },

    /// A crop type that is not part of the class index.
    #[error("crop type '{0}' is not in the class index")]
    UnknownClass(String),

    /// An accumulator received an array with a different channel count.
    #[error("accumulator tracks {expected} channels but array has {actual}")]
    ChannelMismatch {
        /// Channels already tracked.
        expected: usize,
        /// Channels in the offending array.
        actual: usize,
    },

    /// A persisted class index whose ids are not contiguous from 0.
    #[error("invalid class index: {0}")]
    InvalidClassIndex(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
