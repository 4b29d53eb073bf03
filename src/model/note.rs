//! The note content model, including the `knowledge` subtype.
//!
//! Note status is machine-computed from the outgoing-edge count and never
//! user-driven: zero edges is `draft`, one or two is `linked`, three or more
//! is `connected`. The pipelines recompute it after every write that can
//! change edges.

use crate::errors::Result;
use crate::frontmatter::{ExtraValue, Frontmatter};
use crate::ident::ContentKind;
use crate::store::NodeRecord;

use super::{ChangeSet, ContentModel, CreateSpec, validate_common};

/// Compute note status from the current outgoing-edge count.
pub fn status_for_degree(out_degree: usize) -> &'static str {
    match out_degree {
        0 => "draft",
        1..=2 => "linked",
        _ => "connected",
    }
}

/// Base note model and its `knowledge` variant.
pub struct NoteModel {
    subtype: Option<&'static str>,
}

impl NoteModel {
    pub fn base() -> Self {
        NoteModel { subtype: None }
    }

    /// Knowledge notes capture distilled understanding; they should carry a
    /// `key_points` list, checked advisorily.
    pub fn knowledge() -> Self {
        NoteModel {
            subtype: Some("knowledge"),
        }
    }
}

impl ContentModel for NoteModel {
    fn name(&self) -> &str {
        self.subtype.unwrap_or("note")
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Note
    }

    fn initial_status(&self) -> &'static str {
        "draft"
    }

    fn transitions_from(&self, _current: &str) -> &'static [&'static str] {
        // Status is computed, not transitioned.
        &[]
    }

    fn template(&self) -> &str {
        match self.subtype {
            Some("knowledge") => "knowledge",
            _ => "note",
        }
    }

    fn status_is_user_driven(&self) -> bool {
        false
    }

    fn validate_create(&self, spec: &CreateSpec) -> Result<Vec<String>> {
        let mut warnings = validate_common(spec)?;
        if self.subtype == Some("knowledge") && !spec_has_key_points(spec) {
            warnings.push("knowledge note has no key_points; consider adding them".to_string());
        }
        Ok(warnings)
    }

    fn validate_update(
        &self,
        _node: &NodeRecord,
        fm: &Frontmatter,
        changes: &ChangeSet,
    ) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        if self.subtype == Some("knowledge") {
            let touched = changes
                .extra
                .as_ref()
                .is_some_and(|e| e.contains_key("key_points"));
            let present = fm.extra.contains_key("key_points");
            if !present && !touched {
                warnings.push("knowledge note has no key_points".to_string());
            }
        }
        Ok(warnings)
    }
}

fn spec_has_key_points(spec: &CreateSpec) -> bool {
    // Key points arrive through the explicit body, not CreateSpec fields;
    // creation can only check the rendered body once templated. Treat an
    // explicit body mentioning them as satisfying the advisory.
    spec.body
        .as_deref()
        .is_some_and(|b| b.contains("Key points") || b.contains("key_points"))
}

/// Whether a frontmatter `key_points` entry holds at least `min` items.
pub fn key_points_at_least(fm: &Frontmatter, min: usize) -> bool {
    match fm.extra.get("key_points") {
        Some(ExtraValue::List(items)) => items.len() >= min,
        Some(ExtraValue::Scalar(s)) => !s.is_empty() && min <= 1,
        None => min == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_thresholds() {
        assert_eq!(status_for_degree(0), "draft");
        assert_eq!(status_for_degree(1), "linked");
        assert_eq!(status_for_degree(2), "linked");
        assert_eq!(status_for_degree(3), "connected");
        assert_eq!(status_for_degree(12), "connected");
    }

    #[test]
    fn test_knowledge_advisory_is_warning_not_error() {
        let model = NoteModel::knowledge();
        let spec = CreateSpec {
            title: "Distilled".into(),
            ..Default::default()
        };
        let warnings = model.validate_create(&spec).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("key_points"));
    }

    #[test]
    fn test_note_status_not_user_driven() {
        let model = NoteModel::base();
        assert!(!model.status_is_user_driven());
        assert!(model.transitions_from("draft").is_empty());
    }
}
