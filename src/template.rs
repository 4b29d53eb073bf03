//! Template collaborator.
//!
//! The engine never formats bodies or self-documents itself; it hands a
//! template name and a context map to a collaborator implementing
//! [`TemplateEngine`]. The packaged default performs plain `{{key}}`
//! substitution over built-in templates, with a vault-local template
//! directory overriding any packaged entry of the same name.
//!
//! Render failures are infrastructure errors; callers in the pipelines
//! degrade them to warnings and fall back to an empty body.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{Result, VaultError};

/// Contract: `(template_name, context) -> rendered string`.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, context: &BTreeMap<String, String>) -> Result<String>;
}

const NOTE_TEMPLATE: &str = "## {{title}}\n\n";
const KNOWLEDGE_TEMPLATE: &str = "## {{title}}\n\n### Key points\n\n- \n\n### Details\n\n";
const DECISION_TEMPLATE: &str =
    "## {{title}}\n\n### Context\n\n### Decision\n\n### Consequences\n\n";
const REFERENCE_TEMPLATE: &str = "## {{title}}\n\nSource: {{url}}\n\n### Notes\n\n";
const TASK_TEMPLATE: &str = "## {{title}}\n\n### Outcome\n\n### Steps\n\n- [ ] \n";
const LOG_TEMPLATE: &str = "";
const IDENTITY_TEMPLATE: &str = "# {{vault_name}}\n\nThis vault belongs to its keeper. Content is\norganized into notes, references, tasks, and session logs; links between\nitems are maintained both by hand and by the reweave engine.\n";
const METHODOLOGY_TEMPLATE: &str = "# Methodology\n\nCapture first, connect later. New material enters as drafts; the reweave\nengine proposes connections, and garden maturity marks what has been\ndistilled. Sessions bracket work episodes ({{tone}} tone).\n";

/// Packaged templates plus an optional vault-local override directory.
pub struct DefaultTemplates {
    override_dir: Option<PathBuf>,
}

impl DefaultTemplates {
    pub fn packaged() -> Self {
        DefaultTemplates { override_dir: None }
    }

    /// Templates in `dir` (files named `<template>.md`) shadow the packaged
    /// set.
    pub fn with_override_dir(dir: PathBuf) -> Self {
        DefaultTemplates {
            override_dir: Some(dir),
        }
    }

    fn packaged_template(name: &str) -> Option<&'static str> {
        match name {
            "note" => Some(NOTE_TEMPLATE),
            "knowledge" => Some(KNOWLEDGE_TEMPLATE),
            "decision" => Some(DECISION_TEMPLATE),
            "reference" => Some(REFERENCE_TEMPLATE),
            "task" => Some(TASK_TEMPLATE),
            "log" => Some(LOG_TEMPLATE),
            "identity" => Some(IDENTITY_TEMPLATE),
            "methodology" => Some(METHODOLOGY_TEMPLATE),
            _ => None,
        }
    }

    fn source(&self, name: &str) -> Result<String> {
        if let Some(dir) = &self.override_dir {
            let candidate = dir.join(format!("{name}.md"));
            if candidate.is_file() {
                return Ok(std::fs::read_to_string(candidate)?);
            }
        }
        Self::packaged_template(name)
            .map(str::to_string)
            .ok_or_else(|| VaultError::NotFound(format!("template `{name}`")))
    }
}

impl TemplateEngine for DefaultTemplates {
    fn render(&self, template: &str, context: &BTreeMap<String, String>) -> Result<String> {
        let mut out = self.source(template)?;
        for (key, value) in context {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }
        // Unbound placeholders render empty rather than leaking braces.
        while let Some(start) = out.find("{{") {
            let Some(end) = out[start..].find("}}") else {
                break;
            };
            out.replace_range(start..start + end + 2, "");
        }
        Ok(out)
    }
}
