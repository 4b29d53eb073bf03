//! Content models: per-type validation, lifecycle state machines, and the
//! registry extensions add to.
//!
//! Every `(type, subtype)` pair resolves to one content model. A model has
//! four responsibilities: validate input at create, validate a change set at
//! update, name the template that produces the initial body, and declare its
//! status transition table. Models return hard failures as
//! `ValidationFailed`; advisory findings come back as warnings and never
//! block the write.
//!
//! The registry is a name-keyed map of model values behind a uniform trait;
//! no inheritance, no downcasting. Extensions extend the map at vault-open
//! time via the `register_content_models` hook.

pub mod decision;
pub mod log;
pub mod note;
pub mod reference;
pub mod task;

use std::collections::BTreeMap;

use crate::errors::{Result, VaultError};
use crate::frontmatter::{ExtraValue, Frontmatter};
use crate::ident::ContentKind;
use crate::store::NodeRecord;

/// Input to the create pipeline, before any validation.
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub subtype: Option<String>,
    pub title: String,
    pub tags: Vec<String>,
    pub topic: Option<String>,
    pub url: Option<String>,
    pub priority: Option<i64>,
    pub impact: Option<i64>,
    pub effort: Option<i64>,
    pub maturity: Option<String>,
    /// Session ID to record the creation against, when one is active.
    pub session: Option<String>,
    /// Optional explicit body; otherwise the model's template renders one.
    pub body: Option<String>,
    /// Cost attributed to the session log entry for this create.
    pub cost: Option<f64>,
}

/// A proposed update. Absent fields are untouched; `id`, `type`, and
/// `created` have no representation here and therefore can never change.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub title: Option<String>,
    pub status: Option<String>,
    pub maturity: Option<String>,
    pub topic: Option<String>,
    pub tags: Option<Vec<String>>,
    pub aliases: Option<Vec<String>>,
    pub url: Option<String>,
    pub priority: Option<i64>,
    pub impact: Option<i64>,
    pub effort: Option<i64>,
    pub archived: Option<bool>,
    pub superseded_by: Option<String>,
    pub body: Option<String>,
    /// Full replacement for the frontmatter link map.
    pub links: Option<BTreeMap<String, Vec<String>>>,
    /// Extension-owned keys to set or replace.
    pub extra: Option<BTreeMap<String, ExtraValue>>,
}

impl ChangeSet {
    /// Names of the fields this change set touches, in a stable order.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        if self.maturity.is_some() {
            fields.push("maturity");
        }
        if self.topic.is_some() {
            fields.push("topic");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.aliases.is_some() {
            fields.push("aliases");
        }
        if self.url.is_some() {
            fields.push("url");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.impact.is_some() {
            fields.push("impact");
        }
        if self.effort.is_some() {
            fields.push("effort");
        }
        if self.archived.is_some() {
            fields.push("archived");
        }
        if self.superseded_by.is_some() {
            fields.push("superseded_by");
        }
        if self.body.is_some() {
            fields.push("body");
        }
        if self.links.is_some() {
            fields.push("links");
        }
        if self.extra.is_some() {
            fields.push("extra");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

impl std::fmt::Debug for dyn ContentModel + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentModel").field("name", &self.name()).finish()
    }
}

/// Uniform interface every content model implements.
pub trait ContentModel: Send + Sync {
    /// Registry key: the subtype name, or the type name for the base model.
    fn name(&self) -> &str;

    fn kind(&self) -> ContentKind;

    /// Status assigned at creation.
    fn initial_status(&self) -> &'static str;

    /// Outgoing transitions from `current`. Terminal states return an empty
    /// list; unknown states too.
    fn transitions_from(&self, current: &str) -> &'static [&'static str];

    /// Template used to render the initial body.
    fn template(&self) -> &str {
        "note"
    }

    /// Validate a create request; returns advisory warnings.
    fn validate_create(&self, spec: &CreateSpec) -> Result<Vec<String>>;

    /// Validate a change set against the current node and file; returns
    /// advisory warnings.
    fn validate_update(
        &self,
        node: &NodeRecord,
        fm: &Frontmatter,
        changes: &ChangeSet,
    ) -> Result<Vec<String>>;

    /// Whether `status` is user-driven for this model. Note status is
    /// machine-computed from the outgoing-edge count and cannot be set.
    fn status_is_user_driven(&self) -> bool {
        true
    }
}

/// Check a user-driven status change against the model's transition table.
pub fn check_transition(model: &dyn ContentModel, id: &str, current: &str, attempted: &str) -> Result<()> {
    if current == attempted {
        return Ok(());
    }
    let allowed = model.transitions_from(current);
    if allowed.contains(&attempted) {
        return Ok(());
    }
    Err(VaultError::InvalidTransition {
        id: id.to_string(),
        current: current.to_string(),
        attempted: attempted.to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    })
}

/// Garden maturity progression: `seed -> budding -> evergreen`, terminal at
/// evergreen. Maturity is advisory and user-assigned; the only enforced
/// effect is body protection, applied by the pipelines.
pub const MATURITIES: &[&str] = &["seed", "budding", "evergreen"];

pub fn valid_maturity(value: &str) -> bool {
    MATURITIES.contains(&value)
}

/// The model registry: name-keyed map with `(kind, subtype)` resolution.
pub struct ModelRegistry {
    models: BTreeMap<String, Box<dyn ContentModel>>,
}

impl ModelRegistry {
    /// Registry with the built-in models.
    pub fn builtin() -> Self {
        let mut registry = ModelRegistry {
            models: BTreeMap::new(),
        };
        registry.register(Box::new(note::NoteModel::base()));
        registry.register(Box::new(note::NoteModel::knowledge()));
        registry.register(Box::new(decision::DecisionModel));
        registry.register(Box::new(reference::ReferenceModel::base()));
        registry.register(Box::new(reference::ReferenceModel::subtype("article")));
        registry.register(Box::new(reference::ReferenceModel::subtype("tool")));
        registry.register(Box::new(reference::ReferenceModel::subtype("spec")));
        registry.register(Box::new(task::TaskModel));
        registry.register(Box::new(log::LogModel));
        registry
    }

    /// Add or replace a model. Extensions call this through the
    /// `register_content_models` hook.
    pub fn register(&mut self, model: Box<dyn ContentModel>) {
        let key = registry_key(model.kind(), Some(model.name()));
        self.models.insert(key, model);
    }

    /// Resolve `(kind, subtype)` to a model: the subtype entry wins, the
    /// base type entry backs it, unknown subtypes fail with `UnknownType`.
    pub fn resolve(&self, kind: ContentKind, subtype: Option<&str>) -> Result<&dyn ContentModel> {
        if let Some(subtype) = subtype {
            return self
                .models
                .get(&registry_key(kind, Some(subtype)))
                .map(|m| m.as_ref())
                .ok_or_else(|| VaultError::UnknownType(format!("{kind}:{subtype}")));
        }
        self.models
            .get(&registry_key(kind, None))
            .map(|m| m.as_ref())
            .ok_or_else(|| VaultError::UnknownType(kind.to_string()))
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(|k| k.as_str()).collect()
    }
}

fn registry_key(kind: ContentKind, subtype: Option<&str>) -> String {
    match subtype {
        // The base model registers under its own kind name.
        Some(name) if name == kind.as_str() => kind.as_str().to_string(),
        Some(name) => format!("{}:{}", kind.as_str(), name),
        None => kind.as_str().to_string(),
    }
}

/// Validate shared scalar constraints used by several models.
pub(crate) fn validate_common(spec: &CreateSpec) -> Result<Vec<String>> {
    let mut bad_fields = Vec::new();
    if spec.title.trim().is_empty() {
        bad_fields.push("title".to_string());
    }
    for (name, value) in [
        ("priority", spec.priority),
        ("impact", spec.impact),
        ("effort", spec.effort),
    ] {
        if let Some(v) = value {
            if !(1..=5).contains(&v) {
                bad_fields.push(name.to_string());
            }
        }
    }
    if let Some(maturity) = &spec.maturity {
        if !valid_maturity(maturity) {
            bad_fields.push("maturity".to_string());
        }
    }
    if !bad_fields.is_empty() {
        return Err(VaultError::ValidationFailed {
            message: "invalid field values".into(),
            fields: bad_fields,
        });
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolution() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.resolve(ContentKind::Note, None).unwrap().name(), "note");
        assert_eq!(
            registry.resolve(ContentKind::Note, Some("decision")).unwrap().name(),
            "decision"
        );
        assert_eq!(
            registry.resolve(ContentKind::Reference, Some("article")).unwrap().name(),
            "article"
        );
        let err = registry.resolve(ContentKind::Note, Some("poem")).unwrap_err();
        assert_eq!(err.code(), "UnknownType");
    }

    #[test]
    fn test_change_set_field_names() {
        let mut changes = ChangeSet::default();
        assert!(changes.is_empty());
        changes.title = Some("New".into());
        changes.body = Some("text".into());
        assert_eq!(changes.changed_fields(), vec!["title", "body"]);
    }

    #[test]
    fn test_common_validation() {
        let mut spec = CreateSpec {
            title: "ok".into(),
            ..Default::default()
        };
        assert!(validate_common(&spec).is_ok());
        spec.title = "  ".into();
        spec.effort = Some(9);
        let err = validate_common(&spec).unwrap_err();
        let VaultError::ValidationFailed { fields, .. } = err else {
            panic!("expected ValidationFailed");
        };
        assert_eq!(fields, vec!["title".to_string(), "effort".to_string()]);
    }
}
