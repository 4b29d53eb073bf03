//! The content pipelines: the only write paths into the vault.
//!
//! Every mutation flows through [`create`] or [`update`]; there is no
//! side-channel insert. Both pipelines follow the same failure-atomicity
//! pattern: start a transaction, mutate file(s), mutate the index, commit.
//! When the index mutation fails, the file mutation is compensated (a newly
//! created file is deleted; an updated file is restored from the in-memory
//! snapshot taken before the write).

pub mod create;
pub mod update;

use std::path::Path;

use crate::errors::Result;

/// Per-invocation flags the core respects independent of any CLI surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpOptions {
    /// Disable the post-create reweave tail for this call.
    pub no_reweave: bool,
    /// Force synchronous event dispatch for this call.
    pub sync: bool,
}

/// Write a file atomically: write to a temp sibling, then rename over the
/// destination, so readers never observe a partial file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Undo a file mutation after an index failure.
pub(crate) enum FileCompensation {
    /// The file did not exist before; delete it.
    Remove(std::path::PathBuf),
    /// The file held this content before; restore it.
    Restore(std::path::PathBuf, String),
}

impl FileCompensation {
    pub(crate) fn apply(self) {
        match self {
            FileCompensation::Remove(path) => {
                let _ = std::fs::remove_file(path);
            }
            FileCompensation::Restore(path, content) => {
                let _ = write_atomic(&path, &content);
            }
        }
    }
}
