//! The reference content model (`article`, `tool`, `spec` subtypes).
//!
//! References are captured external sources. Lifecycle is two-state:
//! `captured -> annotated`, with `annotated` terminal.

use crate::errors::Result;
use crate::frontmatter::Frontmatter;
use crate::ident::ContentKind;
use crate::store::NodeRecord;

use super::{ChangeSet, ContentModel, CreateSpec, validate_common};

pub struct ReferenceModel {
    subtype: Option<&'static str>,
}

impl ReferenceModel {
    pub fn base() -> Self {
        ReferenceModel { subtype: None }
    }

    pub fn subtype(name: &'static str) -> Self {
        ReferenceModel {
            subtype: Some(name),
        }
    }
}

impl ContentModel for ReferenceModel {
    fn name(&self) -> &str {
        self.subtype.unwrap_or("reference")
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Reference
    }

    fn initial_status(&self) -> &'static str {
        "captured"
    }

    fn transitions_from(&self, current: &str) -> &'static [&'static str] {
        match current {
            "captured" => &["annotated"],
            _ => &[],
        }
    }

    fn template(&self) -> &str {
        "reference"
    }

    fn validate_create(&self, spec: &CreateSpec) -> Result<Vec<String>> {
        let mut warnings = validate_common(spec)?;
        if spec.url.is_none() {
            warnings.push("reference has no url".to_string());
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
        if fm.url.is_none() && changes.url.is_none() {
            warnings.push("reference has no url".to_string());
        }
        Ok(warnings)
    }
}
