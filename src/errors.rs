//! Error types for the Verdant engine.
//!
//! This module defines a unified error enumeration used across the store,
//! content pipelines, reweave, sessions, and integrity tooling. It integrates
//! with `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Every variant maps to a stable machine-readable code via [`VaultError::code`];
//!   the public result envelope carries that code, never the variant name.
//! - Storage failures are classified as recoverable (retry after an
//!   integrity fix) or fatal via [`VaultError::is_recoverable`].

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Verdant engine.
///
/// - Used across the index store, pipelines, reweave, graph, session and
///   integrity subsystems.
/// - Implements `std::error::Error` via `thiserror`.
pub enum VaultError {
    /// Content item does not exist in the index.
    #[error("Content not found: {0}")]
    NotFound(String),

    /// Reweave undo requested but no matching audit entries exist.
    #[error("No reweave history to undo for {0}")]
    NoHistory(String),

    /// Rollback requested but the backup directory holds no backups.
    #[error("No index backups available")]
    NoBackups,

    /// Two nodes are not connected by any path.
    #[error("No path between `{0}` and `{1}`")]
    NoPath(String, String),

    /// The requested link does not exist.
    #[error("No link from `{0}` to `{1}`")]
    NoLink(String, String),

    /// A session operation requires an open session and none exists.
    #[error("No active session")]
    NoActiveSession,

    /// The vault has no configuration file.
    #[error("No vault configuration found at {0}")]
    NoConfig(String),

    /// Init attempted over an existing vault.
    #[error("Vault already exists at {0}")]
    VaultExists(String),

    /// A generated ID already belongs to a different node.
    #[error("ID collision: `{id}` already exists with title `{existing_title}`")]
    IdCollision { id: String, existing_title: String },

    /// A second session may not be opened while one is active.
    #[error("Session `{0}` is already open")]
    ActiveSessionExists(String),

    /// Reopen attempted on a session that is not closed.
    #[error("Session `{0}` is already open; close it first")]
    AlreadyOpen(String),

    /// A status change violates the content model's transition table.
    #[error("Invalid status transition for `{id}`: {current} -> {attempted} (allowed: {allowed:?})")]
    InvalidTransition {
        id: String,
        current: String,
        attempted: String,
        allowed: Vec<String>,
    },

    /// Content-model validation rejected the input.
    #[error("Validation failed: {message} (fields: {fields:?})")]
    ValidationFailed { message: String, fields: Vec<String> },

    /// Full-text search was called with an empty query.
    #[error("Search query must not be empty")]
    EmptyQuery,

    /// Unknown content type or subtype.
    #[error("Unknown content type: `{0}`")]
    UnknownType(String),

    /// Malformed frontmatter, ID, or on-disk structure.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Update produced an empty effective change set.
    #[error("No changes to apply to `{0}`")]
    NoChanges(String),

    /// All-or-nothing batch failed; nothing was created.
    #[error("Batch failed at item {index}: {message}")]
    BatchFailed { index: usize, message: String },

    /// Partial batch finished with at least one item error.
    #[error("Batch completed with {failed} of {total} items failing")]
    BatchPartial { failed: usize, total: usize },

    /// Integrity scan could not run to completion.
    #[error("Integrity check failed: {0}")]
    CheckFailed(String),

    /// Index backup could not be created.
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// Schema migration could not be applied.
    #[error("Migration to schema version {version} failed: {message}")]
    MigrationFailed { version: i64, message: String },

    /// Migration bookkeeping (version stamp) could not be written.
    #[error("Failed to stamp schema version: {0}")]
    StampFailed(String),

    /// Semantic ranking requested without a registered capability.
    #[error("Semantic search is not available: {0}")]
    SemanticUnavailable(String),

    /// A file the index refers to is missing on disk.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Underlying SQLite failure.
    #[error("Storage error: {source}")]
    Storage {
        #[from]
        source: rusqlite::Error,
    },

    /// I/O error from the vault filesystem.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Stable machine-readable code carried in the result envelope.
    ///
    /// Codes never change between releases; messages may.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::NotFound(_) => "NotFound",
            VaultError::NoHistory(_) => "NoHistory",
            VaultError::NoBackups => "NoBackups",
            VaultError::NoPath(_, _) => "NoPath",
            VaultError::NoLink(_, _) => "NoLink",
            VaultError::NoActiveSession => "NoActiveSession",
            VaultError::NoConfig(_) => "NoConfig",
            VaultError::VaultExists(_) => "VaultExists",
            VaultError::IdCollision { .. } => "IdCollision",
            VaultError::ActiveSessionExists(_) => "ActiveSessionExists",
            VaultError::AlreadyOpen(_) => "AlreadyOpen",
            VaultError::InvalidTransition { .. } => "InvalidTransition",
            VaultError::ValidationFailed { .. } => "ValidationFailed",
            VaultError::EmptyQuery => "EmptyQuery",
            VaultError::UnknownType(_) => "UnknownType",
            VaultError::InvalidFormat(_) => "InvalidFormat",
            VaultError::NoChanges(_) => "NoChanges",
            VaultError::BatchFailed { .. } => "BatchFailed",
            VaultError::BatchPartial { .. } => "BatchPartial",
            VaultError::CheckFailed(_) => "CheckFailed",
            VaultError::BackupFailed(_) => "BackupFailed",
            VaultError::MigrationFailed { .. } => "MigrationFailed",
            VaultError::StampFailed(_) => "StampFailed",
            VaultError::SemanticUnavailable(_) => "SemanticUnavailable",
            VaultError::FileNotFound(_) => "FileNotFound",
            VaultError::Storage { .. } => "Storage",
            VaultError::Io(_) => "IOError",
        }
    }

    /// Structured machine-readable context for the envelope `error.detail`.
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            VaultError::InvalidTransition {
                current,
                attempted,
                allowed,
                ..
            } => Some(serde_json::json!({
                "current": current,
                "attempted": attempted,
                "allowed": allowed,
            })),
            VaultError::ValidationFailed { fields, .. } => {
                Some(serde_json::json!({ "fields": fields }))
            }
            VaultError::IdCollision { id, existing_title } => Some(serde_json::json!({
                "id": id,
                "existing_title": existing_title,
            })),
            VaultError::BatchFailed { index, .. } => Some(serde_json::json!({ "index": index })),
            VaultError::BatchPartial { failed, total } => Some(serde_json::json!({
                "failed": failed,
                "total": total,
            })),
            _ => None,
        }
    }

    /// Whether the caller can plausibly retry after an integrity fix.
    ///
    /// Storage-level busy/locked conditions are recoverable; schema and
    /// filesystem corruption are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            VaultError::Storage { source } => matches!(
                source,
                rusqlite::Error::SqliteFailure(e, _)
                    if e.code == rusqlite::ErrorCode::DatabaseBusy
                        || e.code == rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Every code must be stable and distinct from the Display text.
    #[test]
    fn test_error_codes_are_stable() {
        let e = VaultError::EmptyQuery;
        assert_eq!(e.code(), "EmptyQuery");

        let e = VaultError::InvalidTransition {
            id: "TASK-0001".into(),
            current: "inbox".into(),
            attempted: "done".into(),
            allowed: vec!["active".into(), "dropped".into()],
        };
        assert_eq!(e.code(), "InvalidTransition");
        let detail = e.detail().unwrap();
        assert_eq!(detail["current"], "inbox");
        assert_eq!(detail["allowed"][1], "dropped");
    }

    #[test]
    fn test_validation_failed_detail_lists_fields() {
        let e = VaultError::ValidationFailed {
            message: "decision is accepted".into(),
            fields: vec!["title".into()],
        };
        assert_eq!(e.detail().unwrap()["fields"][0], "title");
    }

    #[test]
    fn test_io_errors_wrap() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: VaultError = io.into();
        assert_eq!(e.code(), "IOError");
        assert!(!e.is_recoverable());
    }
}
