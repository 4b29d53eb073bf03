//! Verdant is a local-first knowledge engine: a directory of Markdown files
//! is the authoritative truth, and a derived SQLite index (relational
//! tables, FTS5 full-text, graph edges) is maintained over it. Content is
//! identified by stable opaque IDs, linked explicitly via frontmatter and
//! implicitly via `[[wikilinks]]`, and related items are discovered by the
//! multi-signal reweave engine. Sessions capture work episodes into
//! append-only JSONL logs with an atomic close-time enrichment pipeline,
//! and the integrity subsystem can check, fix, or rebuild the index from
//! the files alone.

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod extension;
pub mod frontmatter;
pub mod graph;
pub mod ident;
pub mod integrity;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod result;
pub mod reweave;
pub mod session;
pub mod store;
pub mod template;
pub mod vault;

pub use config::VaultConfig;
pub use errors::{Result, VaultError};
pub use ident::ContentKind;
pub use model::{ChangeSet, CreateSpec};
pub use pipeline::OpOptions;
pub use result::Envelope;
pub use vault::Vault;
