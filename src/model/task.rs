//! The task content model.
//!
//! Tasks move through `inbox -> active -> done`, with `blocked` as a detour
//! and `dropped` reachable from every live state. `done` and `dropped` are
//! terminal.

use crate::errors::Result;
use crate::frontmatter::Frontmatter;
use crate::ident::ContentKind;
use crate::store::NodeRecord;

use super::{ChangeSet, ContentModel, CreateSpec, validate_common};

pub struct TaskModel;

impl ContentModel for TaskModel {
    fn name(&self) -> &str {
        "task"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Task
    }

    fn initial_status(&self) -> &'static str {
        "inbox"
    }

    fn transitions_from(&self, current: &str) -> &'static [&'static str] {
        match current {
            "inbox" => &["active", "dropped"],
            "active" => &["blocked", "done", "dropped"],
            "blocked" => &["active", "dropped"],
            _ => &[],
        }
    }

    fn template(&self) -> &str {
        "task"
    }

    fn validate_create(&self, spec: &CreateSpec) -> Result<Vec<String>> {
        let mut warnings = validate_common(spec)?;
        if spec.priority.is_none() {
            warnings.push("task has no priority; work-queue scoring treats it as 0".to_string());
        }
        Ok(warnings)
    }

    fn validate_update(
        &self,
        _node: &NodeRecord,
        _fm: &Frontmatter,
        changes: &ChangeSet,
    ) -> Result<Vec<String>> {
        let mut bad = Vec::new();
        for (name, value) in [
            ("priority", changes.priority),
            ("impact", changes.impact),
            ("effort", changes.effort),
        ] {
            if let Some(v) = value {
                if !(1..=5).contains(&v) {
                    bad.push(name.to_string());
                }
            }
        }
        if !bad.is_empty() {
            return Err(crate::errors::VaultError::ValidationFailed {
                message: "task scoring fields must lie in 1..=5".into(),
                fields: bad,
            });
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VaultError;
    use crate::model::check_transition;

    #[test]
    fn test_transition_table() {
        let model = TaskModel;
        assert!(check_transition(&model, "TASK-0001", "inbox", "active").is_ok());
        assert!(check_transition(&model, "TASK-0001", "active", "blocked").is_ok());
        assert!(check_transition(&model, "TASK-0001", "blocked", "active").is_ok());
        assert!(check_transition(&model, "TASK-0001", "active", "done").is_ok());

        // inbox cannot jump straight to done.
        let err = check_transition(&model, "TASK-0001", "inbox", "done").unwrap_err();
        let VaultError::InvalidTransition { current, attempted, allowed, .. } = err else {
            panic!("expected InvalidTransition");
        };
        assert_eq!((current.as_str(), attempted.as_str()), ("inbox", "done"));
        assert_eq!(allowed, vec!["active", "dropped"]);

        // Terminal states stay terminal.
        assert!(check_transition(&model, "TASK-0001", "done", "active").is_err());
        assert!(check_transition(&model, "TASK-0001", "dropped", "inbox").is_err());
    }

    #[test]
    fn test_score_field_ranges() {
        let model = TaskModel;
        let node_changes = ChangeSet {
            effort: Some(7),
            ..Default::default()
        };
        let fm = Frontmatter::new(ContentKind::Task, "TASK-0001", "t", chrono::Utc::now());
        let node = crate::store::NodeRecord::from_frontmatter(&fm, "ops/tasks/TASK-0001.md", "inbox");
        assert!(model.validate_update(&node, &fm, &node_changes).is_err());
    }
}
