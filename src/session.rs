//! The session subsystem.
//!
//! A session is a work episode recorded as an append-only JSONL file under
//! `ops/logs/` plus a log node in the index. At most one session may be
//! open per vault. Closing a session runs a fixed enrichment pipeline:
//! cross-session reweave, orphan sweep, integrity scan, metric
//! materialization, and an event-WAL drain, each individually toggleable
//! through configuration.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::errors::{Result, VaultError};
use crate::extension::hooks;
use crate::ident::ContentKind;
use crate::model::CreateSpec;
use crate::pipeline::{OpOptions, create};
use crate::result as telemetry;
use crate::reweave::{self, ReweaveOptions};
use crate::store::{NodeFilter, NodeRecord, NodeSort, SessionRow, Store, format_ts};
use crate::vault::Vault;

/// The currently open session, if any.
pub fn active_session(store: &Store) -> Result<Option<NodeRecord>> {
    let filter = NodeFilter {
        kind: Some(ContentKind::Log),
        status: Some("open".to_string()),
        include_archived: true,
        ..Default::default()
    };
    Ok(store.select_nodes(&filter, NodeSort::Recency, 2)?.into_iter().next())
}

/// First JSONL record of a session file; carries everything rebuild needs.
pub fn start_record(session_id: &str, topic: &str, ts: DateTime<Utc>) -> String {
    serde_json::json!({
        "type": "session_start",
        "session_id": session_id,
        "topic": topic,
        "ts": format_ts(ts),
    })
    .to_string()
}

/// What `start` returns.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub session_id: String,
    pub path: String,
    pub topic: String,
}

/// Optional fields of a session log entry.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub pin: bool,
    pub cost: Option<f64>,
    pub detail: Option<String>,
    pub references: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Enrichment stats reported by `close`.
#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    pub session_id: String,
    pub reweave_count: usize,
    pub orphan_count: usize,
    pub integrity_issues: usize,
    pub metrics_nodes: usize,
    pub events_drained: usize,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Cost report for the active session.
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub session_id: String,
    pub total_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_budget: Option<bool>,
}

/// Start a session on `topic`. Fails with `ActiveSessionExists` when one is
/// already open.
#[instrument(skip(vault, options))]
pub fn start(vault: &Vault, topic: &str, options: OpOptions) -> Result<StartOutcome> {
    let spec = CreateSpec {
        title: topic.to_string(),
        topic: Some(topic.to_string()),
        ..Default::default()
    };
    let outcome = create::create(vault, ContentKind::Log, spec, options)?;
    vault.events().dispatch(
        vault.store(),
        hooks::POST_SESSION_START,
        serde_json::json!({"session_id": outcome.id}),
        Some(&outcome.id),
        options.sync,
    )?;
    info!(session = %outcome.id, topic, "session started");
    Ok(StartOutcome {
        session_id: outcome.id,
        path: outcome.path,
        topic: topic.to_string(),
    })
}

/// Append one entry to the active session, both to the JSONL file and the
/// mirrored table, in monotonic timestamp order.
pub fn log_entry(vault: &Vault, message: &str, opts: EntryOptions) -> Result<i64> {
    let store = vault.store();
    let session = active_session(store)?.ok_or(VaultError::NoActiveSession)?;
    let now = Utc::now();
    let record = serde_json::json!({
        "type": "entry",
        "session_id": session.id,
        "ts": format_ts(now),
        "message": message,
        "pin": opts.pin,
        "cost": opts.cost,
        "detail": opts.detail,
        "references": opts.references,
        "metadata": opts.metadata,
    });
    append_jsonl(vault, &session, &record)?;
    store.with_tx(|s| {
        s.append_session_row(
            &session.id,
            now,
            message,
            opts.pin,
            opts.cost,
            opts.detail.as_deref(),
            &opts.references,
            &opts.metadata,
        )
    })
}

/// Close the active session and run the enrichment pipeline.
#[instrument(skip(vault, options))]
pub fn close(vault: &Vault, summary: Option<&str>, options: OpOptions) -> Result<CloseOutcome> {
    let _span = telemetry::span("session.close");
    let store = vault.store();
    let session = active_session(store)?.ok_or(VaultError::NoActiveSession)?;
    let now = Utc::now();
    let mut warnings = Vec::new();

    // Step 1: close record and status flip.
    let record = serde_json::json!({
        "type": "session_close",
        "session_id": session.id,
        "ts": format_ts(now),
        "summary": summary,
    });
    append_jsonl(vault, &session, &record)?;
    store.with_tx(|s| {
        s.append_session_row(
            &session.id,
            now,
            &summary
                .map(|s| format!("session closed: {s}"))
                .unwrap_or_else(|| "session closed".to_string()),
            false,
            None,
            Some("session_close"),
            &[],
            &serde_json::json!({}),
        )?;
        let mut node = session.clone();
        node.status = "closed".to_string();
        node.modified = now;
        s.update_node(&node)
    })?;

    let touched = touched_nodes(store, &session)?;
    let config = vault.config();

    // Step 2: cross-session reweave.
    let mut reweave_count = 0usize;
    if config.session.close_reweave && config.reweave.enabled {
        let _span = telemetry::span("close.reweave");
        for id in &touched {
            match reweave::reweave(vault, id, ReweaveOptions::default(), options) {
                Ok(report) => reweave_count += report.count,
                Err(e) => warnings.push(format!("close reweave for `{id}` failed: {e}")),
            }
        }
    }

    // Step 3: orphan sweep with a lowered threshold.
    let mut orphan_count = 0usize;
    if config.session.close_orphan_sweep && config.reweave.enabled {
        let _span = telemetry::span("close.orphan_sweep");
        for id in &touched {
            if store.out_degree(id)? > 0 {
                continue;
            }
            let opts = ReweaveOptions {
                threshold: Some(config.session.orphan_reweave_threshold),
                ..Default::default()
            };
            match reweave::reweave(vault, id, opts, options) {
                Ok(report) => orphan_count += report.count,
                Err(e) => warnings.push(format!("orphan sweep for `{id}` failed: {e}")),
            }
        }
    }

    // Step 4: read-only integrity scan.
    let mut integrity_issues = 0usize;
    if config.session.close_integrity_check {
        let _span = telemetry::span("close.check");
        match crate::integrity::check(vault) {
            Ok(outcome) => integrity_issues = outcome.issues.len(),
            Err(e) => warnings.push(format!("close integrity check failed: {e}")),
        }
    }

    // Step 5: materialize graph metrics.
    let metrics_nodes = match vault.graph().materialize_metrics(store) {
        Ok(n) => n,
        Err(e) => {
            warnings.push(format!("metric materialization failed: {e}"));
            0
        }
    };

    // Step 6: drain the event WAL.
    let drained = match vault.events().drain(store) {
        Ok(stats) => stats.retried,
        Err(e) => {
            warnings.push(format!("event drain failed: {e}"));
            0
        }
    };

    let outcome = CloseOutcome {
        session_id: session.id.clone(),
        reweave_count,
        orphan_count,
        integrity_issues,
        metrics_nodes,
        events_drained: drained,
        warnings,
    };
    vault.events().dispatch(
        store,
        hooks::POST_SESSION_CLOSE,
        serde_json::json!({
            "session_id": session.id,
            "stats": {
                "reweave_count": outcome.reweave_count,
                "orphan_count": outcome.orphan_count,
                "integrity_issues": outcome.integrity_issues,
                "metrics_nodes": outcome.metrics_nodes,
            },
        }),
        Some(&session.id),
        options.sync,
    )?;
    // Settle the close event itself so no pending rows outlive the session.
    vault.events().drain(store)?;
    info!(session = %session.id, reweave_count, orphan_count, "session closed");
    Ok(outcome)
}

/// Reopen a closed session. The target must be `closed` and no other
/// session may be `open`.
pub fn reopen(vault: &Vault, id: &str, options: OpOptions) -> Result<StartOutcome> {
    let store = vault.store();
    let node = store
        .fetch_node(id)?
        .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
    if node.kind != ContentKind::Log {
        return Err(VaultError::UnknownType(format!("{id} is not a session log")));
    }
    if node.status == "open" {
        return Err(VaultError::AlreadyOpen(id.to_string()));
    }
    if let Some(open) = active_session(store)? {
        return Err(VaultError::ActiveSessionExists(open.id));
    }
    let now = Utc::now();
    let record = serde_json::json!({
        "type": "session_reopen",
        "session_id": id,
        "ts": format_ts(now),
    });
    append_jsonl(vault, &node, &record)?;
    store.with_tx(|s| {
        s.append_session_row(
            id,
            now,
            "session reopened",
            false,
            None,
            Some("session_reopen"),
            &[],
            &serde_json::json!({}),
        )?;
        let mut node = node.clone();
        node.status = "open".to_string();
        node.modified = now;
        s.update_node(&node)
    })?;
    vault.events().dispatch(
        store,
        hooks::POST_SESSION_START,
        serde_json::json!({"session_id": id}),
        Some(id),
        options.sync,
    )?;
    Ok(StartOutcome {
        session_id: id.to_string(),
        path: node.rel_path,
        topic: node.title,
    })
}

/// Sum of `cost` across the active session's rows. A report, not an error:
/// exceeding the budget still succeeds.
pub fn cost(vault: &Vault, report_budget: Option<f64>) -> Result<CostReport> {
    let store = vault.store();
    let session = active_session(store)?.ok_or(VaultError::NoActiveSession)?;
    let total_cost = store.session_cost(&session.id)?;
    Ok(match report_budget {
        Some(budget) => CostReport {
            session_id: session.id,
            total_cost,
            budget: Some(budget),
            remaining: Some(budget - total_cost),
            over_budget: Some(total_cost > budget),
        },
        None => CostReport {
            session_id: session.id,
            total_cost,
            budget: None,
            remaining: None,
            over_budget: None,
        },
    })
}

/// Session rows to read for context Layer 1: from the latest checkpoint
/// forward unless `ignore_checkpoints`.
pub fn layer_entries(rows: &[SessionRow], ignore_checkpoints: bool) -> &[SessionRow] {
    if ignore_checkpoints {
        return rows;
    }
    let checkpoint = rows
        .iter()
        .rposition(|row| row.metadata.get("checkpoint") == Some(&serde_json::Value::Bool(true)));
    match checkpoint {
        Some(i) => &rows[i..],
        None => rows,
    }
}

/// IDs of nodes created or modified during the session: the union of
/// session-row references and non-log nodes modified after session start.
fn touched_nodes(store: &Store, session: &NodeRecord) -> Result<Vec<String>> {
    let mut ids: BTreeSet<String> = BTreeSet::new();
    for row in store.session_rows(&session.id)? {
        for reference in row.references {
            ids.insert(reference);
        }
    }
    let filter = NodeFilter {
        since: Some(session.created),
        ..Default::default()
    };
    for node in store.select_nodes(&filter, NodeSort::Recency, 10_000)? {
        if matches!(node.kind, ContentKind::Note | ContentKind::Reference) {
            ids.insert(node.id);
        }
    }
    // Only reweave-eligible nodes that still exist.
    let mut out = Vec::new();
    for id in ids {
        if let Some(node) = store.fetch_node(&id)? {
            if matches!(node.kind, ContentKind::Note | ContentKind::Reference) && !node.archived {
                out.push(node.id);
            }
        }
    }
    Ok(out)
}

/// Append a record to a session's JSONL file by ID (pipeline tail use).
pub(crate) fn append_record(vault: &Vault, session_id: &str, record: &serde_json::Value) -> Result<()> {
    let rel = crate::ident::rel_path(ContentKind::Log, session_id, None);
    let path = vault.root().join(rel);
    append_line(&path, record)
}

fn append_jsonl(vault: &Vault, session: &NodeRecord, record: &serde_json::Value) -> Result<()> {
    let path = vault.root().join(&session.rel_path);
    append_line(&path, record)
}

fn append_line(path: &Path, record: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{record}")?;
    if let Err(e) = file.sync_data() {
        warn!(path = %path.display(), error = %e, "session log fsync failed");
    }
    Ok(())
}
