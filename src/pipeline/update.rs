//! The update pipeline.
//!
//! Four stages in one transaction: validate, apply, propagate, index.
//! Propagation is two-pass: note status is recomputed from the edge set the
//! index stage just produced, so status immediately reflects the new edges.
//!
//! `archive` and `supersede` are thin compositions over `update` with their
//! own event semantics.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::errors::{Result, VaultError};
use crate::extension::hooks;
use crate::frontmatter::{self, Frontmatter};
use crate::ident::{self, ContentKind};
use crate::model::{ChangeSet, check_transition, note};
use crate::result as telemetry;
use crate::session;
use crate::store::NodeRecord;
use crate::vault::Vault;

use super::{FileCompensation, OpOptions, write_atomic};

/// What `update` returns on success.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub id: String,
    pub path: String,
    pub fields_changed: Vec<String>,
    pub status: String,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Update one content item.
#[instrument(skip(vault, changes, options), fields(id = %id))]
pub fn update(vault: &Vault, id: &str, changes: ChangeSet, options: OpOptions) -> Result<UpdateOutcome> {
    let _span = telemetry::span("update");
    let mut compensations: Vec<FileCompensation> = Vec::new();
    let result = vault
        .store()
        .with_tx(|_| stage_update(vault, id, changes, &mut compensations));
    let (outcome, payload) = match result {
        Ok(pair) => pair,
        Err(err) => {
            for compensation in compensations {
                compensation.apply();
            }
            return Err(err);
        }
    };
    vault.events().dispatch(
        vault.store(),
        hooks::POST_UPDATE,
        payload,
        session::active_session(vault.store())?.map(|n| n.id).as_deref(),
        options.sync,
    )?;
    Ok(outcome)
}

/// Archive is an update setting `archived: true`, plus a `post_close` event.
pub fn archive(vault: &Vault, id: &str, summary: Option<&str>, options: OpOptions) -> Result<UpdateOutcome> {
    let changes = ChangeSet {
        archived: Some(true),
        ..Default::default()
    };
    let outcome = update(vault, id, changes, options)?;
    vault.events().dispatch(
        vault.store(),
        hooks::POST_CLOSE,
        serde_json::json!({
            "type": outcome_kind(vault, &outcome.id)?,
            "id": outcome.id,
            "path": outcome.path,
            "summary": summary,
        }),
        None,
        options.sync,
    )?;
    Ok(outcome)
}

/// Supersede `old_id` with `new_id` under the usual state-machine checks.
pub fn supersede(vault: &Vault, old_id: &str, new_id: &str, options: OpOptions) -> Result<UpdateOutcome> {
    if vault.store().fetch_node(new_id)?.is_none() {
        return Err(VaultError::NotFound(new_id.to_string()));
    }
    let changes = ChangeSet {
        status: Some("superseded".to_string()),
        superseded_by: Some(new_id.to_string()),
        ..Default::default()
    };
    update(vault, old_id, changes, options)
}

fn outcome_kind(vault: &Vault, id: &str) -> Result<String> {
    Ok(vault
        .store()
        .fetch_node(id)?
        .map(|n| n.kind.as_str().to_string())
        .unwrap_or_default())
}

fn stage_update(
    vault: &Vault,
    id: &str,
    mut changes: ChangeSet,
    compensations: &mut Vec<FileCompensation>,
) -> Result<(UpdateOutcome, serde_json::Value)> {
    let store = vault.store();
    let now = Utc::now();

    // Stage 1: validate.
    let node = store
        .fetch_node(id)?
        .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
    let model = vault.registry().resolve(node.kind, node.subtype.as_deref())?;
    let mut warnings = Vec::new();

    let abs = vault.root().join(&node.rel_path);
    let (mut fm, mut body) = if node.kind == ContentKind::Log {
        // Log files are JSONL; metadata changes touch the node row only.
        (synthetic_log_frontmatter(&node), String::new())
    } else {
        let text = std::fs::read_to_string(&abs)
            .map_err(|_| VaultError::FileNotFound(node.rel_path.clone()))?;
        frontmatter::parse_document(&text)?
    };
    let original_document = if node.kind == ContentKind::Log {
        None
    } else {
        Some(frontmatter::compose_document(&fm, &body))
    };

    // Garden body protection: the body is human domain once maturity is set.
    if changes.body.is_some() && fm.maturity.is_some() {
        warnings.push(format!(
            "`{id}` has maturity `{}`; body change dropped",
            fm.maturity.as_deref().unwrap_or_default()
        ));
        changes.body = None;
    }
    if changes.body.is_some() && node.kind == ContentKind::Log {
        warnings.push("session logs are append-only; body change dropped".to_string());
        changes.body = None;
    }

    // Note status is machine-computed; a user-supplied value is dropped.
    if let Some(attempted) = changes.status.clone() {
        if model.status_is_user_driven() {
            check_transition(model, id, &node.status, &attempted)?;
            if node.kind == ContentKind::Log && attempted == "open" {
                if let Some(open) = session::active_session(store)? {
                    if open.id != id {
                        return Err(VaultError::ActiveSessionExists(open.id));
                    }
                }
            }
        } else {
            warnings.push("note status is computed from links; ignored".to_string());
            changes.status = None;
        }
    }

    warnings.extend(model.validate_update(&node, &fm, &changes)?);

    if changes.is_empty() {
        return Err(VaultError::NoChanges(id.to_string()));
    }
    let fields_changed: Vec<String> = changes.changed_fields().iter().map(|s| s.to_string()).collect();

    // Stage 2: apply to the frontmatter value.
    let title_changed = changes.title.is_some();
    let body_changed = changes.body.is_some();
    let tags_changed = changes.tags.is_some();
    let links_changed = changes.links.is_some();
    let topic_changed = changes.topic.is_some();

    if let Some(title) = changes.title {
        fm.title = title;
    }
    if let Some(status) = &changes.status {
        fm.status = Some(status.clone());
    }
    if let Some(maturity) = changes.maturity {
        if !crate::model::valid_maturity(&maturity) {
            return Err(VaultError::ValidationFailed {
                message: format!("invalid maturity `{maturity}`"),
                fields: vec!["maturity".into()],
            });
        }
        fm.maturity = Some(maturity);
    }
    if let Some(topic) = changes.topic {
        fm.topic = (!topic.is_empty()).then_some(topic);
    }
    if let Some(tags) = changes.tags {
        fm.tags = tags;
    }
    if let Some(aliases) = changes.aliases {
        fm.aliases = aliases;
    }
    if let Some(url) = changes.url {
        fm.url = Some(url);
    }
    if changes.priority.is_some() {
        fm.priority = changes.priority;
    }
    if changes.impact.is_some() {
        fm.impact = changes.impact;
    }
    if changes.effort.is_some() {
        fm.effort = changes.effort;
    }
    if let Some(archived) = changes.archived {
        fm.archived = archived;
    }
    if let Some(superseded_by) = changes.superseded_by {
        fm.superseded_by = Some(superseded_by);
    }
    if let Some(links) = changes.links {
        fm.links = links;
    }
    if let Some(extra) = changes.extra {
        for (key, value) in extra {
            fm.extra.insert(key, value);
        }
    }
    if let Some(new_body) = changes.body {
        body = new_body;
    }
    fm.modified = now;

    // Topic moves relocate the file to its canonical path.
    let rel_path = if topic_changed && node.kind != ContentKind::Log {
        ident::rel_path(node.kind, id, fm.topic.as_deref())
            .to_string_lossy()
            .to_string()
    } else {
        node.rel_path.clone()
    };

    // Stage 4 (index) runs before the status pass so propagation observes
    // the new edge set.
    if title_changed || body_changed {
        store.upsert_fts(id, &fm.title, &body)?;
    }
    if tags_changed {
        store.index_tags(id, &fm.tags, now)?;
    }
    let degree = if links_changed || body_changed {
        store.index_links(id, &fm.link_targets(), &body, now)?
    } else {
        store.out_degree(id)?
    };

    // Stage 3: propagate. Second pass of the two-pass status recompute.
    let status = if node.kind == ContentKind::Note && !model.status_is_user_driven() {
        note::status_for_degree(degree).to_string()
    } else {
        fm.status.clone().unwrap_or_else(|| node.status.clone())
    };
    fm.status = Some(status.clone());

    // Persist the file, compensating on later index failure.
    if node.kind != ContentKind::Log {
        let new_abs = vault.root().join(&rel_path);
        if rel_path != node.rel_path {
            write_atomic(&new_abs, &frontmatter::compose_document(&fm, &body))?;
            compensations.push(FileCompensation::Remove(new_abs));
            std::fs::remove_file(&abs).ok();
            if let Some(original) = original_document {
                compensations.push(FileCompensation::Restore(abs.clone(), original));
            }
        } else {
            if let Some(original) = original_document {
                compensations.push(FileCompensation::Restore(abs.clone(), original));
            }
            write_atomic(&abs, &frontmatter::compose_document(&fm, &body))?;
        }
    }

    let mut updated = NodeRecord::from_frontmatter(&fm, &rel_path, &status);
    updated.metrics = node.metrics.clone();
    store.update_node(&updated)?;

    info!(id = %id, fields = ?fields_changed, status = %status, "content updated");
    let payload = serde_json::json!({
        "type": node.kind.as_str(),
        "id": id,
        "fields_changed": fields_changed,
        "path": rel_path,
    });
    Ok((
        UpdateOutcome {
            id: id.to_string(),
            path: rel_path,
            fields_changed,
            status,
            warnings,
        },
        payload,
    ))
}

/// Log nodes carry no Markdown frontmatter; synthesize one from the row so
/// the shared apply code can run.
fn synthetic_log_frontmatter(node: &NodeRecord) -> Frontmatter {
    let mut fm = Frontmatter::new(node.kind, &node.id, &node.title, node.created);
    fm.status = Some(node.status.clone());
    fm.topic = node.topic.clone();
    fm.archived = node.archived;
    fm.modified = node.modified;
    fm
}
