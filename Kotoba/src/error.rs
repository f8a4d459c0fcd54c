//! Error types for `Kotoba`

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error type for `Kotoba` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Container Format Errors ====================
    /// The file is not a valid master container (missing KMDB magic).
    #[error("invalid container magic: expected KMDB, found {0:?}")]
    InvalidContainerMagic([u8; 4]),

    /// The container format version is not supported.
    #[error("unsupported container version: {version} (supported: 1)")]
    UnsupportedContainerVersion {
        /// The version number found in the file.
        version: u32,
    },

    /// The body checksum does not match the header.
    #[error("container checksum mismatch: header says {expected:#010x}, body hashes to {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed over the body.
        actual: u32,
    },

    /// A table row ended before all columns were read.
    #[error("table '{table}': row {row} is truncated")]
    TruncatedRow {
        /// Table name.
        table: String,
        /// Zero-based row index.
        row: usize,
    },

    /// A table or directory failed an internal consistency check.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// The companion layout file is inconsistent.
    #[error("invalid table layout: {0}")]
    InvalidLayout(String),

    /// A row was encoded from an incomplete image.
    #[error("table '{table}': row {row} has no loaded value for column '{column}'")]
    MissingSource {
        /// Table name.
        table: String,
        /// Zero-based row index.
        row: usize,
        /// Column that was never loaded.
        column: String,
    },

    // ==================== Script Block Errors ====================
    /// The data is not a valid script block (missing SCRB magic).
    #[error("invalid script block magic: expected SCRB, found {0:?}")]
    InvalidScriptMagic([u8; 4]),

    /// The script block version is not supported.
    #[error("unsupported script block version: {version} (supported: 1)")]
    UnsupportedScriptVersion {
        /// The version number found in the block.
        version: u8,
    },

    /// Unsupported compression method.
    #[error("unsupported compression method: {method}")]
    UnsupportedCompressionMethod {
        /// The compression method identifier.
        method: u8,
    },

    /// The script body does not match its declared shape.
    #[error("malformed script block: {0}")]
    MalformedScript(String),

    /// Decompression failed.
    #[error("decompression failed: {0}")]
    DecompressionError(String),

    // ==================== Workspace Errors ====================
    /// The asset is not part of the workspace.
    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    /// The entry is not part of the asset.
    #[error("asset {asset}: unknown field '{field}'")]
    UnknownField {
        /// Asset identifier.
        asset: String,
        /// Field path inside the asset.
        field: String,
    },

    /// The operation is not allowed on (or requires) an orphaned entry.
    #[error("asset {asset}: field '{field}' {reason}")]
    OrphanedEntry {
        /// Asset identifier.
        asset: String,
        /// Field path inside the asset.
        field: String,
        /// What went wrong.
        reason: String,
    },

    /// A workspace file was written by a newer schema.
    #[error("{path}: unsupported workspace schema version {version}")]
    UnsupportedSchemaVersion {
        /// File that was loaded.
        path: PathBuf,
        /// Schema version found.
        version: u32,
    },

    /// The string does not name an asset.
    #[error("invalid asset id: {0}")]
    InvalidAssetId(String),

    /// The string does not name an entry status.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// The workspace has never been dumped.
    #[error("workspace at {0} has no manifest; run a dump first")]
    WorkspaceNotInitialized(PathBuf),

    // ==================== Build Errors ====================
    /// The manifest holds no source image for the asset.
    #[error("asset {asset}: source image missing from manifest ({detail})")]
    IncompleteSource {
        /// Asset identifier.
        asset: String,
        /// Which image was missing.
        detail: String,
    },

    /// One or more assets failed to build.
    #[error("build failed for {failed} of {total} assets")]
    BuildFailed {
        /// Number of failed assets.
        failed: usize,
        /// Number of assets attempted.
        total: usize,
    },

    // ==================== Sync Errors ====================
    /// The HTTP client could not be set up.
    #[error("sync client error: {0}")]
    SyncClient(String),

    // ==================== Pipeline Errors ====================
    /// Another task already holds the workspace.
    #[error("another pipeline task is already running on this workspace")]
    Busy,

    /// The task was cancelled between units.
    #[error("operation cancelled")]
    Cancelled,

    /// A background task ended without a result.
    #[error("pipeline task panicked: {0}")]
    TaskPanicked(String),

    // ==================== Config Errors ====================
    /// Settings file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Settings could not be serialized.
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// An autofill rule is not usable.
    #[error("invalid autofill rule '{rule}': {message}")]
    InvalidRule {
        /// Rule label.
        rule: String,
        /// What is wrong with it.
        message: String,
    },

    // ==================== Parsing Errors ====================
    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    // ==================== File System Errors ====================
    /// Invalid file path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Directory traversal error.
    #[error("directory walk error: {0}")]
    WalkDirError(String),
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Error::WalkDirError(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io(err.error)
    }
}

/// Coarse classification used in per-asset outcome lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed container or script data.
    Format,
    /// Row encoded from an incomplete image.
    MissingSource,
    /// Build attempted without a dumped source image.
    IncompleteSource,
    /// Source field removed upstream, or orphan misuse.
    OrphanedEntry,
    /// File system failure.
    Io,
    /// Settings or rule problems.
    Config,
    /// Workspace bookkeeping problems.
    Workspace,
    /// Live sync with the running game.
    Sync,
    /// Pipeline scheduling (busy, cancelled).
    Pipeline,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Format => "FormatError",
            Self::MissingSource => "MissingSourceError",
            Self::IncompleteSource => "IncompleteSourceError",
            Self::OrphanedEntry => "OrphanedEntryError",
            Self::Io => "IoError",
            Self::Config => "ConfigError",
            Self::Workspace => "WorkspaceError",
            Self::Sync => "SyncError",
            Self::Pipeline => "PipelineError",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error for outcome reporting.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidContainerMagic(_)
            | Self::UnsupportedContainerVersion { .. }
            | Self::ChecksumMismatch { .. }
            | Self::TruncatedRow { .. }
            | Self::MalformedContainer(_)
            | Self::InvalidLayout(_)
            | Self::InvalidScriptMagic(_)
            | Self::UnsupportedScriptVersion { .. }
            | Self::UnsupportedCompressionMethod { .. }
            | Self::MalformedScript(_)
            | Self::DecompressionError(_)
            | Self::Utf8Error(_) => ErrorKind::Format,
            Self::MissingSource { .. } => ErrorKind::MissingSource,
            Self::IncompleteSource { .. } => ErrorKind::IncompleteSource,
            Self::OrphanedEntry { .. } => ErrorKind::OrphanedEntry,
            Self::Io(_) | Self::InvalidPath(_) | Self::WalkDirError(_) => ErrorKind::Io,
            Self::ConfigParse(_) | Self::ConfigSerialize(_) | Self::InvalidRule { .. } => {
                ErrorKind::Config
            }
            Self::UnknownAsset(_)
            | Self::UnknownField { .. }
            | Self::UnsupportedSchemaVersion { .. }
            | Self::InvalidAssetId(_)
            | Self::InvalidStatus(_)
            | Self::WorkspaceNotInitialized(_)
            | Self::JsonError(_) => ErrorKind::Workspace,
            Self::SyncClient(_) => ErrorKind::Sync,
            Self::BuildFailed { .. }
            | Self::Busy
            | Self::Cancelled
            | Self::TaskPanicked(_) => ErrorKind::Pipeline,
        }
    }
}

/// One per-asset failure in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    /// Asset identifier (or table name for table-level failures).
    pub asset_id: String,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl AssetOutcome {
    /// Record a failure for an asset.
    pub fn new(asset_id: impl fmt::Display, error: &Error) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for AssetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.asset_id, self.kind, self.message)
    }
}

/// A specialized Result type for `Kotoba` operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(Error::InvalidContainerMagic(*b"NOPE").kind(), ErrorKind::Format);
        assert_eq!(
            Error::MissingSource {
                table: "t".into(),
                row: 0,
                column: "c".into()
            }
            .kind(),
            ErrorKind::MissingSource
        );
        assert_eq!(ErrorKind::IncompleteSource.to_string(), "IncompleteSourceError");
    }
}
