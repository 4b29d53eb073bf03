//! Stable content IDs and canonical on-disk paths.
//!
//! Every content item carries an opaque ID that never changes after creation.
//! Notes and references are content-addressed: the ID is derived from a
//! deterministic hash of the normalized title, so recreating the same title
//! yields the same ID and collisions are detectable. Tasks and logs use
//! sequential counters (`TASK-0001`, `LOG-0001`) allocated inside the create
//! transaction.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// The four built-in content kinds.
///
/// Extensions may register additional subtypes, but every item still belongs
/// to one of these kinds; the kind decides the ID scheme and the on-disk
/// space the file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Note,
    Reference,
    Task,
    Log,
}

impl ContentKind {
    /// Lowercase name as stored in frontmatter and the `nodes` table.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Note => "note",
            ContentKind::Reference => "reference",
            ContentKind::Task => "task",
            ContentKind::Log => "log",
        }
    }

    /// ID prefix for hash-addressed kinds, counter name for sequential kinds.
    pub const fn id_prefix(&self) -> &'static str {
        match self {
            ContentKind::Note => "note_",
            ContentKind::Reference => "ref_",
            ContentKind::Task => "TASK-",
            ContentKind::Log => "LOG-",
        }
    }

    /// Whether IDs for this kind come from the sequential counter table.
    pub const fn is_sequential(&self) -> bool {
        matches!(self, ContentKind::Task | ContentKind::Log)
    }

    /// Counter name used by [`crate::store::Store::next_counter`].
    pub const fn counter_name(&self) -> &'static str {
        match self {
            ContentKind::Task => "task",
            ContentKind::Log => "log",
            _ => "",
        }
    }

    /// Top-level space directory that owns this kind.
    pub const fn space(&self) -> &'static str {
        match self {
            ContentKind::Note | ContentKind::Reference => "notes",
            ContentKind::Task | ContentKind::Log => "ops",
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(ContentKind::Note),
            "reference" => Ok(ContentKind::Reference),
            "task" => Ok(ContentKind::Task),
            "log" => Ok(ContentKind::Log),
            _ => Err(format!("invalid content kind: {s}")),
        }
    }
}

/// Normalize a title for hashing: NFKC, lowercased, runs of whitespace
/// collapsed to single spaces, leading/trailing whitespace trimmed.
///
/// Two titles that normalize identically map to the same ID.
pub fn normalize_title(title: &str) -> String {
    let folded: String = title.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive the content-addressed ID for a note or reference title.
///
/// The ID is the kind prefix followed by the first 64 bits of the SHA-256
/// digest of the normalized title, hex-encoded.
pub fn title_id(kind: ContentKind, title: &str) -> String {
    debug_assert!(!kind.is_sequential());
    let digest = Sha256::digest(normalize_title(title).as_bytes());
    format!("{}{}", kind.id_prefix(), hex::encode(&digest[..8]))
}

/// Format a sequential ID from a counter value, zero-padded to 4 digits.
///
/// Values above 9999 widen naturally (`TASK-10000`).
pub fn sequential_id(kind: ContentKind, n: u64) -> String {
    debug_assert!(kind.is_sequential());
    format!("{}{:04}", kind.id_prefix(), n)
}

/// Recover the content kind from an ID, if the ID is well-formed.
pub fn kind_of_id(id: &str) -> Option<ContentKind> {
    for kind in [
        ContentKind::Note,
        ContentKind::Reference,
        ContentKind::Task,
        ContentKind::Log,
    ] {
        if let Some(rest) = id.strip_prefix(kind.id_prefix()) {
            let valid = if kind.is_sequential() {
                rest.len() >= 4 && rest.bytes().all(|b| b.is_ascii_digit())
            } else {
                rest.len() == 16 && rest.bytes().all(|b| b.is_ascii_hexdigit())
            };
            if valid {
                return Some(kind);
            }
        }
    }
    None
}

/// Parse the numeric suffix of a sequential ID (`TASK-0042` -> 42).
pub fn sequence_of_id(id: &str) -> Option<u64> {
    let kind = kind_of_id(id)?;
    if !kind.is_sequential() {
        return None;
    }
    id.strip_prefix(kind.id_prefix())?.parse().ok()
}

/// Sanitize a topic into a single path segment: lowercase, spaces to
/// hyphens, separators and parent references stripped.
pub fn topic_segment(topic: &str) -> String {
    topic
        .trim()
        .to_lowercase()
        .replace(['/', '\\'], "-")
        .replace("..", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Canonical vault-relative path for a content item.
///
/// Notes and references live under `notes/[<topic>/]<id>.md`; tasks under
/// `ops/tasks/<id>.md`; session logs under `ops/logs/<id>.jsonl`.
pub fn rel_path(kind: ContentKind, id: &str, topic: Option<&str>) -> PathBuf {
    match kind {
        ContentKind::Note | ContentKind::Reference => {
            let mut p = PathBuf::from("notes");
            if let Some(topic) = topic {
                let seg = topic_segment(topic);
                if !seg.is_empty() {
                    p.push(seg);
                }
            }
            p.push(format!("{id}.md"));
            p
        }
        ContentKind::Task => PathBuf::from("ops/tasks").join(format!("{id}.md")),
        ContentKind::Log => PathBuf::from("ops/logs").join(format!("{id}.jsonl")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Same title must always produce the same ID.
    #[test]
    fn test_title_id_is_deterministic() {
        let a = title_id(ContentKind::Note, "Rust ownership model");
        let b = title_id(ContentKind::Note, "Rust ownership model");
        assert_eq!(a, b);
        assert!(a.starts_with("note_"));
        assert_eq!(a.len(), "note_".len() + 16);
    }

    /// Case, compatibility forms, and whitespace do not change the ID.
    #[test]
    fn test_title_id_normalization() {
        let a = title_id(ContentKind::Note, "  Rust   Ownership\tModel ");
        let b = title_id(ContentKind::Note, "rust ownership model");
        assert_eq!(a, b);

        // NFKC folds the ligature "ﬁ" to "fi".
        let lig = title_id(ContentKind::Reference, "ﬁne grained");
        let plain = title_id(ContentKind::Reference, "fine grained");
        assert_eq!(lig, plain);
        assert!(lig.starts_with("ref_"));
    }

    #[test]
    fn test_sequential_ids_pad_and_widen() {
        assert_eq!(sequential_id(ContentKind::Task, 7), "TASK-0007");
        assert_eq!(sequential_id(ContentKind::Log, 123), "LOG-0123");
        assert_eq!(sequential_id(ContentKind::Task, 12345), "TASK-12345");
    }

    #[test]
    fn test_kind_of_id_round_trip() {
        let note = title_id(ContentKind::Note, "alpha");
        assert_eq!(kind_of_id(&note), Some(ContentKind::Note));
        assert_eq!(kind_of_id("TASK-0001"), Some(ContentKind::Task));
        assert_eq!(kind_of_id("LOG-0042"), Some(ContentKind::Log));
        assert_eq!(sequence_of_id("LOG-0042"), Some(42));
        assert_eq!(kind_of_id("note_zzzz"), None);
        assert_eq!(kind_of_id("TASK-12"), None);
        assert_eq!(kind_of_id("widget-7"), None);
    }

    #[test]
    fn test_rel_path_by_kind() {
        let note = title_id(ContentKind::Note, "alpha");
        assert_eq!(
            rel_path(ContentKind::Note, &note, Some("Systems Design")),
            PathBuf::from(format!("notes/systems-design/{note}.md"))
        );
        assert_eq!(
            rel_path(ContentKind::Note, &note, None),
            PathBuf::from(format!("notes/{note}.md"))
        );
        assert_eq!(
            rel_path(ContentKind::Task, "TASK-0001", None),
            PathBuf::from("ops/tasks/TASK-0001.md")
        );
        assert_eq!(
            rel_path(ContentKind::Log, "LOG-0001", None),
            PathBuf::from("ops/logs/LOG-0001.jsonl")
        );
    }

    /// Topic segments cannot escape the notes directory.
    #[test]
    fn test_topic_segment_is_path_safe() {
        assert_eq!(topic_segment("../../etc"), "--etc");
        assert_eq!(topic_segment("a/b"), "a-b");
        assert_eq!(topic_segment("  Deep  Work "), "deep-work");
    }
}
