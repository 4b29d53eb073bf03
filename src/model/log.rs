//! The session log content model.
//!
//! Logs are the only kind whose lifecycle can cycle: `open <-> closed`.
//! A closed session may be reopened, subject to the single-active-session
//! invariant enforced by the session subsystem.

use crate::errors::Result;
use crate::frontmatter::Frontmatter;
use crate::ident::ContentKind;
use crate::store::NodeRecord;

use super::{ChangeSet, ContentModel, CreateSpec, validate_common};

pub struct LogModel;

impl ContentModel for LogModel {
    fn name(&self) -> &str {
        "log"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Log
    }

    fn initial_status(&self) -> &'static str {
        "open"
    }

    fn transitions_from(&self, current: &str) -> &'static [&'static str] {
        match current {
            "open" => &["closed"],
            "closed" => &["open"],
            _ => &[],
        }
    }

    fn template(&self) -> &str {
        "log"
    }

    fn validate_create(&self, spec: &CreateSpec) -> Result<Vec<String>> {
        validate_common(spec)
    }

    fn validate_update(
        &self,
        _node: &NodeRecord,
        _fm: &Frontmatter,
        _changes: &ChangeSet,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
