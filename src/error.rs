//! Crate-wide error taxonomy.
//!
//! Every fallible operation returns [`RagError`] through the crate-local
//! [`Result`] alias. Variants are grouped by the stage that raises them so
//! callers can match on what went wrong instead of parsing strings.

use serde::Serialize;
use std::fmt;

/// Everything that can go wrong across the index, the persistence layer, and
/// the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RagError {
    /// A vector's length did not match the index dimension.
    DimensionMismatch { expected: usize, actual: usize },
    /// The index is full; `max_elements` is fixed at creation.
    CapacityExceeded { max_elements: usize },
    /// A search was attempted against an index with no elements.
    IndexEmpty,
    /// No saved index unit with the given name exists.
    NotFound(String),
    /// A saved index unit exists but could not be decoded consistently.
    CorruptState(String),
    /// The pipeline has no built or loaded index.
    NotReady,
    /// The embedding boundary failed for a query or content item.
    EncodingFailed(String),
    /// The generation boundary failed for one retrieved item.
    GenerationFailed(String),
    /// An index build was asked to run over an empty candidate list.
    NoContent,
    /// Every embedding attempt in a build failed.
    NoEmbeddings,
    /// Configuration failed validation.
    InvalidConfig(String),
    /// Filesystem failure during persistence or export.
    Io(String),
}

impl fmt::Display for RagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {expected}, got {actual}")
            }
            Self::CapacityExceeded { max_elements } => {
                write!(f, "index is full (max_elements = {max_elements})")
            }
            Self::IndexEmpty => write!(f, "index contains no elements"),
            Self::NotFound(name) => write!(f, "no saved index named '{name}'"),
            Self::CorruptState(detail) => write!(f, "saved index is corrupt: {detail}"),
            Self::NotReady => write!(f, "no index is built or loaded"),
            Self::EncodingFailed(detail) => write!(f, "embedding failed: {detail}"),
            Self::GenerationFailed(detail) => write!(f, "generation failed: {detail}"),
            Self::NoContent => write!(f, "no content references to index"),
            Self::NoEmbeddings => write!(f, "no content could be embedded"),
            Self::InvalidConfig(detail) => write!(f, "invalid configuration: {detail}"),
            Self::Io(detail) => write!(f, "i/o error: {detail}"),
        }
    }
}

impl std::error::Error for RagError {}

impl From<std::io::Error> for RagError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
