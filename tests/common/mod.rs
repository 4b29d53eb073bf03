//! Shared helpers for the integration suite.
#![allow(dead_code)]

use tempfile::TempDir;
use verdant::{ContentKind, CreateSpec, OpOptions, Vault};

/// Fresh vault in a scratch directory. The TempDir must outlive the vault.
pub fn init_vault() -> (TempDir, Vault) {
    let dir = tempfile::tempdir().unwrap();
    let vault = Vault::init(dir.path().join("vault"), "test-vault").unwrap();
    (dir, vault)
}

/// Synchronous events, reweave enabled.
pub fn sync_opts() -> OpOptions {
    OpOptions {
        no_reweave: false,
        sync: true,
    }
}

/// Synchronous events, reweave disabled; keeps link state deterministic.
pub fn quiet_opts() -> OpOptions {
    OpOptions {
        no_reweave: true,
        sync: true,
    }
}

pub fn note_spec(title: &str) -> CreateSpec {
    CreateSpec {
        title: title.to_string(),
        ..Default::default()
    }
}

/// Create a note with reweave disabled and return its ID.
pub fn quiet_note(vault: &Vault, title: &str) -> String {
    verdant::pipeline::create::create(vault, ContentKind::Note, note_spec(title), quiet_opts())
        .unwrap()
        .id
}

/// Sorted `(source, target)` pairs of every edge in the index.
pub fn edge_pairs(vault: &Vault) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = vault
        .store()
        .all_edges()
        .unwrap()
        .into_iter()
        .map(|e| (e.source_id, e.target_id))
        .collect();
    pairs.sort();
    pairs
}
