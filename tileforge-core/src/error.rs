//! Error taxonomy shared across the engine.

/// A convenience [`Result`] for fallible engine operations.
pub type TileForgeResult<T> = Result<T, TileForgeError>;

/// Errors surfaced by the public tile operations.
#[derive(thiserror::Error, Debug)]
pub enum TileForgeError {
    /// Range, type, or enum violation at the API boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed protobuf or compression framing.
    #[error("corrupt tile input: {0}")]
    CorruptInput(String),

    /// Layer version outside `{1, 2}`, or v1 content without the upgrade flag.
    #[error("unsupported layer version {0}")]
    UnsupportedVersion(u32),

    /// Backward reprojection of a sentinel point was undefined.
    #[error("projection failure: {0}")]
    Projection(String),

    /// Clipping, simplification, or validity failure the caller asked to be fatal.
    #[error("geometry failure: {0}")]
    Geometry(String),

    /// Composite aborted; the target tile is unchanged.
    #[error("composite failed for source tile {source_index}: {source}")]
    Composite {
        source_index: usize,
        #[source]
        source: Box<TileForgeError>,
    },

    /// Image payload or compression IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TileForgeError {
    /// Wraps an error produced while processing the composite source at
    /// `source_index`.
    #[must_use]
    pub fn for_composite_source(self, source_index: usize) -> Self {
        Self::Composite {
            source_index,
            source: Box::new(self),
        }
    }
}
