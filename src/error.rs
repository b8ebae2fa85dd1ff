//! Error types for the storage core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Recovery posture for an error, per the taxonomy in SPEC_FULL.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPosture {
    /// The caller can retry, typically after rotating a journal or releasing a barrier.
    RetryAtCaller,
    /// The error reflects a legitimate caller mistake; surface it unchanged.
    SurfaceToUser,
    /// The collection (not just the operation) is no longer trustworthy.
    FatalForCollection,
    /// A single marker/record is bad; skip it and keep going.
    LocalRecoverAndContinue,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("datafile is full")]
    DatafileFull,

    #[error("datafile is read-only")]
    ReadOnly,

    #[error("document too large: {size} bytes exceeds limit {limit}")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("marker too large: {0} bytes exceeds 256 MiB")]
    MarkerTooLarge(usize),

    #[error("corrupted datafile: {0}")]
    CorruptedDatafile(String),

    #[error("filesystem full during sync")]
    FilesystemFull,

    #[error("out of memory mapping datafile")]
    OutOfMemoryMmap,

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("update conflict: expected revision {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("unique constraint violation")]
    UniqueViolation,

    #[error("update policy not implemented")]
    NotImplemented,

    #[error("missing document: {0}")]
    MissingDocument(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,

    #[error("rename target already exists: {0}")]
    RenameTargetExists(String),

    #[error("invalid marker: {0}")]
    InvalidMarker(String),

    #[error("invalid parameter file: {0}")]
    InvalidParameters(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Which of the four recovery postures this error falls into.
    pub fn posture(&self) -> ErrorPosture {
        use StorageError::*;
        match self {
            DatafileFull | OutOfMemoryMmap | ShutdownInProgress => ErrorPosture::RetryAtCaller,
            Conflict { .. } | UniqueViolation | DocumentTooLarge { .. } | ReadOnly
            | NotImplemented | MissingDocument(_) | InvalidParameters(_) => {
                ErrorPosture::SurfaceToUser
            }
            CorruptedDatafile(_) | FilesystemFull | IllegalState(_) | RenameTargetExists(_)
            | Io(_) | Json(_) => ErrorPosture::FatalForCollection,
            InvalidMarker(_) | MarkerTooLarge(_) => ErrorPosture::LocalRecoverAndContinue,
        }
    }

    /// Stable string code for the wire boundary (mirrors `GraphError::code()`).
    pub fn code(&self) -> &'static str {
        use StorageError::*;
        match self {
            DatafileFull => "DATAFILE_FULL",
            ReadOnly => "READ_ONLY",
            DocumentTooLarge { .. } => "DOCUMENT_TOO_LARGE",
            MarkerTooLarge(_) => "MARKER_TOO_LARGE",
            CorruptedDatafile(_) => "CORRUPTED_DATAFILE",
            FilesystemFull => "FILESYSTEM_FULL",
            OutOfMemoryMmap => "OUT_OF_MEMORY_MMAP",
            IllegalState(_) => "ILLEGAL_STATE",
            Conflict { .. } => "CONFLICT",
            UniqueViolation => "UNIQUE_VIOLATION",
            NotImplemented => "NOT_IMPLEMENTED",
            MissingDocument(_) => "MISSING_DOCUMENT",
            ShutdownInProgress => "SHUTDOWN_IN_PROGRESS",
            RenameTargetExists(_) => "RENAME_TARGET_EXISTS",
            InvalidMarker(_) => "INVALID_MARKER",
            InvalidParameters(_) => "INVALID_PARAMETERS",
            Io(_) => "IO_ERROR",
            Json(_) => "JSON_ERROR",
        }
    }
}
