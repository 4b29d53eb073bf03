//! The decision note subtype.
//!
//! Decisions have a strict lifecycle: `proposed -> accepted -> superseded`,
//! with `superseded` terminal. Once a decision reaches `accepted`, it
//! becomes immutable apart from a small allowlist of fields; any change
//! outside the allowlist fails with `ValidationFailed` and leaves state
//! untouched.

use crate::errors::{Result, VaultError};
use crate::frontmatter::Frontmatter;
use crate::ident::ContentKind;
use crate::store::NodeRecord;

use super::{ChangeSet, ContentModel, CreateSpec, validate_common};

/// Fields that stay editable after acceptance.
pub const ACCEPTED_ALLOWLIST: &[&str] = &[
    "status",
    "superseded_by",
    "modified",
    "tags",
    "aliases",
    "topic",
];

pub struct DecisionModel;

impl ContentModel for DecisionModel {
    fn name(&self) -> &str {
        "decision"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Note
    }

    fn initial_status(&self) -> &'static str {
        "proposed"
    }

    fn transitions_from(&self, current: &str) -> &'static [&'static str] {
        match current {
            "proposed" => &["accepted"],
            "accepted" => &["superseded"],
            _ => &[],
        }
    }

    fn template(&self) -> &str {
        "decision"
    }

    fn validate_create(&self, spec: &CreateSpec) -> Result<Vec<String>> {
        validate_common(spec)
    }

    fn validate_update(
        &self,
        node: &NodeRecord,
        _fm: &Frontmatter,
        changes: &ChangeSet,
    ) -> Result<Vec<String>> {
        if node.status == "accepted" || node.status == "superseded" {
            let disallowed: Vec<String> = changes
                .changed_fields()
                .into_iter()
                .filter(|f| !ACCEPTED_ALLOWLIST.contains(f))
                .map(String::from)
                .collect();
            if !disallowed.is_empty() {
                return Err(VaultError::ValidationFailed {
                    message: format!(
                        "decision `{}` is {}; disallowed: {:?}",
                        node.id, node.status, disallowed
                    ),
                    fields: disallowed,
                });
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::check_transition;
    use crate::store::NodeMetrics;
    use chrono::Utc;

    fn accepted_node() -> NodeRecord {
        NodeRecord {
            id: "note_00000000000000dd".into(),
            kind: ContentKind::Note,
            subtype: Some("decision".into()),
            title: "Use X".into(),
            status: "accepted".into(),
            maturity: None,
            topic: None,
            archived: false,
            priority: None,
            impact: None,
            effort: None,
            created: Utc::now(),
            modified: Utc::now(),
            superseded_by: None,
            rel_path: "notes/note_00000000000000dd.md".into(),
            metrics: NodeMetrics::default(),
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let model = DecisionModel;
        assert!(check_transition(&model, "d", "proposed", "accepted").is_ok());
        assert!(check_transition(&model, "d", "accepted", "superseded").is_ok());

        let err = check_transition(&model, "d", "proposed", "superseded").unwrap_err();
        let VaultError::InvalidTransition { allowed, .. } = err else {
            panic!("expected InvalidTransition");
        };
        assert_eq!(allowed, vec!["accepted"]);
        // Terminal state has no exits.
        assert!(check_transition(&model, "d", "superseded", "proposed").is_err());
    }

    #[test]
    fn test_accepted_rejects_title_change() {
        let model = DecisionModel;
        let node = accepted_node();
        let fm = Frontmatter::new(ContentKind::Note, &node.id, &node.title, node.created);
        let changes = ChangeSet {
            title: Some("Use Y".into()),
            ..Default::default()
        };
        let err = model.validate_update(&node, &fm, &changes).unwrap_err();
        let VaultError::ValidationFailed { fields, .. } = err else {
            panic!("expected ValidationFailed");
        };
        assert_eq!(fields, vec!["title"]);
    }

    #[test]
    fn test_accepted_allows_allowlisted_fields() {
        let model = DecisionModel;
        let node = accepted_node();
        let fm = Frontmatter::new(ContentKind::Note, &node.id, &node.title, node.created);
        let changes = ChangeSet {
            status: Some("superseded".into()),
            superseded_by: Some("note_00000000000000ee".into()),
            tags: Some(vec!["arch/decisions".into()]),
            topic: Some("architecture".into()),
            ..Default::default()
        };
        assert!(model.validate_update(&node, &fm, &changes).is_ok());
    }
}
