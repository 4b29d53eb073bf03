//! The create pipeline.
//!
//! Six stages, the first five under one transaction: validate, generate,
//! persist, index, dispatch, then an out-of-transaction reweave tail.
//! Reweave failures surface as warnings on the create result, never errors.
//!
//! Batch mode composes the same staging: all-or-nothing runs every item
//! under one transaction with compensating file deletion on failure;
//! partial mode gives each item its own transaction and reports `created`
//! and `errors` side by side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::errors::{Result, VaultError};
use crate::extension::hooks;
use crate::frontmatter::{self, Frontmatter};
use crate::ident::{self, ContentKind};
use crate::model::{CreateSpec, note};
use crate::result as telemetry;
use crate::session;
use crate::store::{NodeRecord, Store};
use crate::vault::Vault;

use super::{FileCompensation, OpOptions, write_atomic};

/// What `create` returns on success.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOutcome {
    pub id: String,
    pub path: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// One item of a batch create.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub kind: ContentKind,
    pub spec: CreateSpec,
}

/// Batch execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    #[default]
    AllOrNothing,
    Partial,
}

/// Per-item failure in a partial batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// Batch result: created items plus per-item errors (partial mode only).
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub created: Vec<CreateOutcome>,
    pub errors: Vec<BatchError>,
    pub partial: bool,
}

struct Staged {
    outcome: CreateOutcome,
    event_payload: serde_json::Value,
    session_id: Option<String>,
    /// JSONL record mirroring the session-table row, appended post-commit.
    session_record: Option<serde_json::Value>,
    reweave_eligible: bool,
}

/// Create one content item.
#[instrument(skip(vault, spec, options), fields(kind = %kind, title = %spec.title))]
pub fn create(
    vault: &Vault,
    kind: ContentKind,
    spec: CreateSpec,
    options: OpOptions,
) -> Result<CreateOutcome> {
    let _span = telemetry::span("create");
    let now = Utc::now();
    let mut compensations: Vec<FileCompensation> = Vec::new();
    let staged = {
        let result = vault
            .store()
            .with_tx(|store| stage_create(vault, store, kind, &spec, now, &mut compensations));
        match result {
            Ok(staged) => staged,
            Err(err) => {
                for compensation in compensations {
                    compensation.apply();
                }
                return Err(err);
            }
        }
    };
    finish_create(vault, staged, options)
}

/// Create a batch of items.
pub fn create_batch(
    vault: &Vault,
    items: Vec<BatchItem>,
    mode: BatchMode,
    options: OpOptions,
) -> Result<BatchOutcome> {
    match mode {
        BatchMode::AllOrNothing => {
            let now = Utc::now();
            let mut compensations: Vec<FileCompensation> = Vec::new();
            let result = vault.store().with_tx(|store| {
                let mut staged = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let s = stage_create(vault, store, item.kind, &item.spec, now, &mut compensations)
                        .map_err(|e| VaultError::BatchFailed {
                            index,
                            message: e.to_string(),
                        })?;
                    staged.push(s);
                }
                Ok(staged)
            });
            let staged = match result {
                Ok(staged) => staged,
                Err(err) => {
                    // Neither files nor rows survive a failed batch.
                    for compensation in compensations {
                        compensation.apply();
                    }
                    return Err(err);
                }
            };
            let mut created = Vec::new();
            for s in staged {
                created.push(finish_create(vault, s, options)?);
            }
            Ok(BatchOutcome {
                created,
                errors: Vec::new(),
                partial: false,
            })
        }
        BatchMode::Partial => {
            let mut created = Vec::new();
            let mut errors = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                match create(vault, item.kind, item.spec, options) {
                    Ok(outcome) => created.push(outcome),
                    Err(e) => errors.push(BatchError {
                        index,
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }),
                }
            }
            let partial = !errors.is_empty();
            Ok(BatchOutcome {
                created,
                errors,
                partial,
            })
        }
    }
}

/// Stages 1-4 under the caller's transaction.
fn stage_create(
    vault: &Vault,
    store: &Store,
    kind: ContentKind,
    spec: &CreateSpec,
    now: DateTime<Utc>,
    compensations: &mut Vec<FileCompensation>,
) -> Result<Staged> {
    // Stage 1: validate.
    let model = vault.registry().resolve(kind, spec.subtype.as_deref())?;
    let mut warnings = model.validate_create(spec)?;

    // Stage 2: generate the ID.
    let id = if kind.is_sequential() {
        let n = store.next_counter(kind.counter_name())?;
        ident::sequential_id(kind, n)
    } else {
        let id = ident::title_id(kind, &spec.title);
        if let Some(existing) = store.fetch_node(&id)? {
            return Err(VaultError::IdCollision {
                id,
                existing_title: existing.title,
            });
        }
        id
    };

    if kind == ContentKind::Log {
        // A log node is a session; at most one may be open.
        if let Some(open) = session::active_session(store)? {
            return Err(VaultError::ActiveSessionExists(open.id));
        }
    }

    // Stage 3: persist file and node row.
    let rel = ident::rel_path(kind, &id, spec.topic.as_deref());
    let rel_str = rel.to_string_lossy().to_string();
    let abs = vault.root().join(&rel);

    let mut fm = Frontmatter::new(kind, &id, &spec.title, now);
    fm.subtype = spec.subtype.clone();
    fm.status = Some(model.initial_status().to_string());
    fm.maturity = spec.maturity.clone();
    fm.topic = spec.topic.clone();
    fm.tags = spec.tags.clone();
    fm.url = spec.url.clone();
    fm.priority = spec.priority;
    fm.impact = spec.impact;
    fm.effort = spec.effort;
    fm.session = spec.session.clone();

    let (document, body) = if kind == ContentKind::Log {
        // Session logs are JSONL: the first record carries the metadata the
        // rebuild needs, and the file is append-only from here on.
        let start = session::start_record(&id, &spec.title, now);
        (format!("{start}\n"), String::new())
    } else {
        let body = match &spec.body {
            Some(body) => body.clone(),
            None => {
                let mut context = BTreeMap::new();
                context.insert("title".to_string(), spec.title.clone());
                if let Some(url) = &spec.url {
                    context.insert("url".to_string(), url.clone());
                }
                match vault.templates().render(model.template(), &context) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(template = model.template(), error = %e, "template render failed");
                        warnings.push(format!("template render failed: {e}"));
                        String::new()
                    }
                }
            }
        };
        (String::new(), body)
    };

    let mut node = NodeRecord::from_frontmatter(&fm, &rel_str, model.initial_status());
    store.insert_node(&node)?;

    // Stage 4: index.
    let degree = if kind == ContentKind::Log {
        store.upsert_fts(&id, &spec.title, "")?;
        store.index_tags(&id, &spec.tags, now)?;
        // Mirror the JSONL start record into the session table.
        store.append_session_row(
            &id,
            now,
            &format!("session started: {}", spec.title),
            false,
            None,
            Some("session_start"),
            &[],
            &serde_json::json!({}),
        )?;
        0
    } else {
        store.upsert_fts(&id, &spec.title, &body)?;
        store.index_tags(&id, &spec.tags, now)?;
        store.index_links(&id, &fm.link_targets(), &body, now)?
    };

    // Note status reflects the edges the body produced.
    if kind == ContentKind::Note && !model.status_is_user_driven() {
        let status = note::status_for_degree(degree);
        if status != node.status {
            fm.status = Some(status.to_string());
            node.status = status.to_string();
            store.update_node(&node)?;
        }
    }

    // The file lands after the row mutations so one compensation suffices.
    let rendered = if kind == ContentKind::Log {
        document
    } else {
        frontmatter::compose_document(&fm, &body)
    };
    write_atomic(&abs, &rendered)?;
    compensations.push(FileCompensation::Remove(abs));

    // Record the creation against the active session when asked to.
    let active = session::active_session(store)?.map(|n| n.id);
    let mut session_record = None;
    let session_id = match (&active, &spec.session) {
        (Some(active_id), Some(_)) if kind != ContentKind::Log => {
            let message = format!("created {kind} `{id}`");
            store.append_session_row(
                active_id,
                now,
                &message,
                false,
                spec.cost,
                Some("create"),
                &[id.clone()],
                &serde_json::json!({"kind": kind.as_str()}),
            )?;
            session_record = Some(serde_json::json!({
                "type": "entry",
                "session_id": active_id,
                "ts": crate::store::format_ts(now),
                "message": message,
                "pin": false,
                "cost": spec.cost,
                "detail": "create",
                "references": [id],
                "metadata": {"kind": kind.as_str()},
            }));
            Some(active_id.clone())
        }
        _ => active,
    };

    info!(id = %id, path = %rel_str, "content created");
    Ok(Staged {
        event_payload: serde_json::json!({
            "type": kind.as_str(),
            "id": id,
            "title": spec.title,
            "path": rel_str,
            "tags": spec.tags,
        }),
        session_id,
        session_record,
        reweave_eligible: matches!(kind, ContentKind::Note | ContentKind::Reference),
        outcome: CreateOutcome {
            id,
            path: rel_str,
            title: spec.title.clone(),
            kind,
            warnings,
        },
    })
}

/// Stages 5-6: dispatch the event, then run the reweave tail outside the
/// transaction.
fn finish_create(vault: &Vault, staged: Staged, options: OpOptions) -> Result<CreateOutcome> {
    let Staged {
        mut outcome,
        event_payload,
        session_id,
        session_record,
        reweave_eligible,
    } = staged;

    if let (Some(session_id), Some(record)) = (&session_id, &session_record) {
        session::append_record(vault, session_id, record)?;
    }

    vault.events().dispatch(
        vault.store(),
        hooks::POST_CREATE,
        event_payload,
        session_id.as_deref(),
        options.sync,
    )?;

    if reweave_eligible && !options.no_reweave && vault.config().reweave.enabled {
        match crate::reweave::reweave(vault, &outcome.id, crate::reweave::ReweaveOptions::default(), options)
        {
            Ok(report) => {
                if report.count > 0 {
                    info!(id = %outcome.id, links = report.count, "reweave connected new content");
                }
            }
            Err(e) => {
                warn!(id = %outcome.id, error = %e, "post-create reweave failed");
                outcome.warnings.push(format!("reweave failed: {e}"));
            }
        }
    }
    Ok(outcome)
}
