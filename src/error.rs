use std::path::PathBuf;

use thiserror::Error;

/// The engine's typed error surface (spec.md §7).
///
/// Kinds map one-to-one onto the taxonomy in spec.md §7. Filesystem and
/// asset-I/O kinds are operation-local and are usually recovered from by
/// the caller (the sync engine); configuration and zone kinds are fatal.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("shared resources accessed before setup")]
    NotInitiated,

    #[error("shared resources setup called more than once")]
    AlreadyInitiated,

    #[error("resource file at {path:?} is not valid: {reason}")]
    InvalidResourceFile { path: PathBuf, reason: String },

    #[error("album path already exists: {0:?}")]
    AlreadyExists(PathBuf),

    #[error("album directory is not empty of real content: {0:?}")]
    NotEmpty(PathBuf),

    #[error("parent album {0} could not be located under the data directory")]
    ParentNotFound(String),

    #[error("more than one directory named .{0} exists in the tree (I3 violation)")]
    AmbiguousTree(String),

    #[error("move source path missing: {0:?}")]
    MoveSourceMissing(PathBuf),

    #[error("move destination path already exists: {0:?}")]
    MoveDestinationExists(PathBuf),

    #[error("download of asset {uuid} failed: {source}")]
    DownloadFailed {
        uuid: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("verification of asset {uuid} failed: {reason}")]
    VerificationFailed { uuid: String, reason: String },

    #[error("unable to write resource file {path:?}: {source}")]
    UnableToWriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no primary photo zone available")]
    NoPrimaryZone,

    #[error("no shared photo zone available")]
    NoSharedZone,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True for errors that threaten tree invariants and must halt the run
    /// with `ERROR` rather than being recorded as a per-item failure
    /// (spec.md §7, "Propagation policy").
    pub fn is_invariant_threatening(&self) -> bool {
        matches!(self, EngineError::AmbiguousTree(_) | EngineError::NotEmpty(_))
    }

    /// A stable code for the structured cause chain in an `ERROR` event
    /// (spec.md §7, "User-visible behavior"). One per taxonomy kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotInitiated => "NotInitiated",
            EngineError::AlreadyInitiated => "AlreadyInitiated",
            EngineError::InvalidResourceFile { .. } => "InvalidResourceFile",
            EngineError::AlreadyExists(_) => "AlreadyExists",
            EngineError::NotEmpty(_) => "NotEmpty",
            EngineError::ParentNotFound(_) => "ParentNotFound",
            EngineError::AmbiguousTree(_) => "AmbiguousTree",
            EngineError::MoveSourceMissing(_) => "MoveSourceMissing",
            EngineError::MoveDestinationExists(_) => "MoveDestinationExists",
            EngineError::DownloadFailed { .. } => "DownloadFailed",
            EngineError::VerificationFailed { .. } => "VerificationFailed",
            EngineError::UnableToWriteFile { .. } => "UnableToWriteFile",
            EngineError::NoPrimaryZone => "NoPrimaryZone",
            EngineError::NoSharedZone => "NoSharedZone",
            EngineError::Io(_) => "Io",
        }
    }

    /// Walks one level of `std::error::Error::source` into a boxed
    /// `ErrorReport`, if the underlying cause carries a message worth
    /// surfacing (spec.md §7, structured cause chain).
    pub fn source_report(&self) -> Option<crate::events::ErrorReport> {
        use std::error::Error as _;
        self.source().map(|source| crate::events::ErrorReport {
            code: "cause",
            message: source.to_string(),
            cause: None,
        })
    }
}
