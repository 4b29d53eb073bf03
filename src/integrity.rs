//! The integrity subsystem: check, fix, rebuild, rollback.
//!
//! The scan is read-only and covers four categories: DB/file consistency,
//! schema integrity, graph health, and structural validation. Fixes always
//! run behind a fresh timestamped index backup. Body text is never modified
//! by any fix level; `rebuild` reconstructs the entire index from the files
//! alone, which is the ground truth.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::VaultConfig;
use crate::errors::{Result, VaultError};
use crate::frontmatter;
use crate::ident::{self, ContentKind};
use crate::model::note;
use crate::store::{NodeRecord, Store, parse_ts};
use crate::vault::Vault;

/// Issue severity. Errors drive `healthy = false`; warnings do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding from the scan.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    /// `consistency`, `schema`, `graph`, or `structure`.
    pub category: String,
    pub message: String,
    pub detail: serde_json::Value,
    /// Machine-readable suggested fix action, when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl Issue {
    fn error(category: &str, message: String, detail: serde_json::Value, fix: Option<&str>) -> Self {
        Issue {
            severity: Severity::Error,
            category: category.to_string(),
            message,
            detail,
            fix: fix.map(str::to_string),
        }
    }

    fn warning(category: &str, message: String, detail: serde_json::Value) -> Self {
        Issue {
            severity: Severity::Warning,
            category: category.to_string(),
            message,
            detail,
            fix: None,
        }
    }
}

/// Scan result with machine-readable health fields.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub healthy: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub issues: Vec<Issue>,
}

/// Fix aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixLevel {
    #[default]
    Safe,
    Aggressive,
}

/// Fix result.
#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub backup: String,
    pub actions: Vec<String>,
    pub fixed: usize,
}

/// Rebuild result.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildOutcome {
    pub nodes: usize,
    pub edges: usize,
    pub counters: BTreeMap<String, u64>,
    pub metrics_nodes: usize,
}

/// One content file on disk.
struct VaultFile {
    abs: PathBuf,
    rel: String,
    id: String,
    kind: ContentKind,
}

/// Run the four-category read-only scan.
#[instrument(skip(vault))]
pub fn check(vault: &Vault) -> Result<CheckOutcome> {
    let store = vault.store();
    let config = vault.config();
    let mut issues = Vec::new();
    let nodes = store.all_nodes()?;
    let by_id: HashMap<&str, &NodeRecord> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let files = scan_files(vault.root())?;

    // -- Category 1: DB/file consistency -----------------------------------
    for node in &nodes {
        if !vault.root().join(&node.rel_path).is_file() {
            issues.push(Issue::error(
                "consistency",
                format!("node `{}` has no file at {}", node.id, node.rel_path),
                serde_json::json!({"id": node.id, "path": node.rel_path}),
                Some("remove_node_row"),
            ));
        }
    }
    for file in &files {
        if !by_id.contains_key(file.id.as_str()) {
            issues.push(Issue::error(
                "consistency",
                format!("file `{}` has no node row", file.rel),
                serde_json::json!({"id": file.id, "path": file.rel}),
                Some("reindex_file"),
            ));
        }
    }
    let fts_ids = store.fts_ids()?;
    let fts_set: HashSet<&str> = fts_ids.iter().map(String::as_str).collect();
    for id in &fts_ids {
        if !by_id.contains_key(id.as_str()) {
            issues.push(Issue::error(
                "consistency",
                format!("full-text row `{id}` has no node"),
                serde_json::json!({"id": id}),
                Some("remove_fts_row"),
            ));
        }
    }
    for node in &nodes {
        if !fts_set.contains(node.id.as_str()) {
            issues.push(Issue::error(
                "consistency",
                format!("node `{}` is missing from the full-text index", node.id),
                serde_json::json!({"id": node.id}),
                Some("reattach_fts"),
            ));
        }
    }

    // -- Category 2: schema integrity ----------------------------------------
    for node in &nodes {
        match ident::kind_of_id(&node.id) {
            Some(kind) if kind == node.kind => {}
            _ => issues.push(Issue::error(
                "schema",
                format!("node `{}` has a malformed or mismatched ID", node.id),
                serde_json::json!({"id": node.id, "kind": node.kind.as_str()}),
                None,
            )),
        }
        if node.title.trim().is_empty() {
            issues.push(Issue::error(
                "schema",
                format!("node `{}` has an empty title", node.id),
                serde_json::json!({"id": node.id}),
                None,
            ));
        }
    }
    for edge in store.all_edges()? {
        if !by_id.contains_key(edge.source_id.as_str()) || !by_id.contains_key(edge.target_id.as_str())
        {
            issues.push(Issue::error(
                "schema",
                format!("orphaned edge {} -> {}", edge.source_id, edge.target_id),
                serde_json::json!({"source": edge.source_id, "target": edge.target_id}),
                Some("remove_edge"),
            ));
        }
    }

    // -- Category 3: graph health ---------------------------------------------
    if nodes.len() >= 5 {
        let (components, largest) = component_stats(store, &nodes)?;
        if components > 1 && largest * 2 < nodes.len() {
            issues.push(Issue::warning(
                "graph",
                format!("graph is fragmented: {components} components, largest holds {largest} of {} nodes", nodes.len()),
                serde_json::json!({"components": components, "largest": largest}),
            ));
        }
    }
    for node in &nodes {
        if let Some(target) = &node.superseded_by {
            if !by_id.contains_key(target.as_str()) {
                issues.push(Issue::error(
                    "graph",
                    format!("`{}` superseded by missing `{target}`", node.id),
                    serde_json::json!({"id": node.id, "superseded_by": target}),
                    None,
                ));
            }
        }
    }
    for node in &nodes {
        if supersession_cycle(&by_id, node) {
            issues.push(Issue::error(
                "graph",
                format!("cyclic supersession chain through `{}`", node.id),
                serde_json::json!({"id": node.id}),
                None,
            ));
        }
    }

    // -- Category 4: structural validation ------------------------------------
    let now = Utc::now();
    for file in &files {
        if file.kind == ContentKind::Log {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(&file.abs) else {
            continue;
        };
        let (fm, body) = match frontmatter::parse_document(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                issues.push(Issue::error(
                    "structure",
                    format!("file `{}` has malformed frontmatter: {e}", file.rel),
                    serde_json::json!({"path": file.rel}),
                    None,
                ));
                continue;
            }
        };
        if fm.id != file.id {
            issues.push(Issue::error(
                "structure",
                format!("file `{}` carries frontmatter id `{}`", file.rel, fm.id),
                serde_json::json!({"path": file.rel, "frontmatter_id": fm.id}),
                None,
            ));
        }
        if let Some(node) = by_id.get(file.id.as_str()) {
            if node.title != fm.title {
                issues.push(Issue::warning(
                    "structure",
                    format!("`{}` title differs between file and index", file.id),
                    serde_json::json!({"file": fm.title, "index": node.title}),
                ));
            }
        }
        for title in frontmatter::extract_wikilinks(&body) {
            if store.node_by_title(&title)?.is_none() {
                issues.push(Issue::warning(
                    "structure",
                    format!("`{}` links to unknown title `[[{title}]]`", file.id),
                    serde_json::json!({"id": file.id, "title": title}),
                ));
            }
        }
        let mut seen = HashSet::new();
        for tag in &fm.tags {
            if !seen.insert(tag) {
                issues.push(Issue::warning(
                    "structure",
                    format!("`{}` declares duplicate tag `{tag}`", file.id),
                    serde_json::json!({"id": file.id, "tag": tag}),
                ));
            }
        }
        // Garden advisories.
        match fm.maturity.as_deref() {
            Some("seed") => {
                let age_days = (now - fm.created).num_days();
                if age_days > config.garden.seed_age_warning_days {
                    issues.push(Issue::warning(
                        "structure",
                        format!("seed `{}` is {age_days} days old", file.id),
                        serde_json::json!({"id": file.id, "age_days": age_days}),
                    ));
                }
            }
            Some("evergreen") => {
                if !note::key_points_at_least(&fm, config.garden.evergreen_min_key_points) {
                    issues.push(Issue::warning(
                        "structure",
                        format!(
                            "evergreen `{}` has fewer than {} key points",
                            file.id, config.garden.evergreen_min_key_points
                        ),
                        serde_json::json!({"id": file.id}),
                    ));
                }
                let bidirectional = store
                    .outgoing_edges(&file.id)?
                    .iter()
                    .filter(|e| e.bidirectional)
                    .count();
                if bidirectional < config.garden.evergreen_min_bidirectional_links {
                    issues.push(Issue::warning(
                        "structure",
                        format!(
                            "evergreen `{}` has {bidirectional} bidirectional links, expected {}",
                            file.id, config.garden.evergreen_min_bidirectional_links
                        ),
                        serde_json::json!({"id": file.id, "bidirectional": bidirectional}),
                    ));
                }
            }
            _ => {}
        }
    }

    let error_count = issues.iter().filter(|i| i.severity == Severity::Error).count();
    let warning_count = issues.len() - error_count;
    Ok(CheckOutcome {
        healthy: error_count == 0,
        error_count,
        warning_count,
        issues,
    })
}

/// Apply fixes behind a fresh backup. Safe mode removes orphan rows,
/// reattaches missing FTS entries, and resyncs derived data from files.
/// Aggressive mode additionally reindexes all edges and canonicalizes
/// frontmatter key order. Body text is never modified.
#[instrument(skip(vault))]
pub fn fix(vault: &Vault, level: FixLevel) -> Result<FixOutcome> {
    let store = vault.store();
    let backup = create_backup(vault)?;
    prune_backups(&backup_dir(vault), vault.config())?;

    let mut actions = Vec::new();
    let files = scan_files(vault.root())?;
    let now = Utc::now();

    store.with_tx(|s| {
        // Remove node rows whose files are gone.
        for node in s.all_nodes()? {
            if !vault.root().join(&node.rel_path).is_file() {
                s.delete_node(&node.id)?;
                actions.push(format!("removed orphan row `{}`", node.id));
            }
        }
        // Remove FTS rows without nodes; reattach missing ones.
        let nodes: HashSet<String> = s.all_nodes()?.into_iter().map(|n| n.id).collect();
        for id in s.fts_ids()? {
            if !nodes.contains(&id) {
                s.delete_fts(&id)?;
                actions.push(format!("removed orphan full-text row `{id}`"));
            }
        }
        // Resync derived data from files.
        for file in &files {
            if file.kind == ContentKind::Log {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&file.abs) else {
                continue;
            };
            let Ok((fm, body)) = frontmatter::parse_document(&text) else {
                continue;
            };
            match s.fetch_node(&file.id)? {
                Some(existing) => {
                    let mut updated = NodeRecord::from_frontmatter(&fm, &file.rel, &existing.status);
                    updated.metrics = existing.metrics.clone();
                    if updated != existing {
                        s.update_node(&updated)?;
                        actions.push(format!("resynced `{}` from file", file.id));
                    }
                }
                None => {
                    let status = fm
                        .status
                        .clone()
                        .unwrap_or_else(|| "draft".to_string());
                    s.insert_node(&NodeRecord::from_frontmatter(&fm, &file.rel, &status))?;
                    actions.push(format!("reindexed file `{}`", file.rel));
                }
            }
            s.upsert_fts(&file.id, &fm.title, &body)?;
            s.index_tags(&file.id, &fm.tags, now)?;
            if level == FixLevel::Aggressive {
                s.index_links(&file.id, &fm.link_targets(), &body, now)?;
            }
        }
        Ok(())
    })?;

    if level == FixLevel::Aggressive {
        // Canonicalize frontmatter key order; the body is carried verbatim.
        for file in &files {
            if file.kind == ContentKind::Log {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&file.abs) else {
                continue;
            };
            let Ok((fm, body)) = frontmatter::parse_document(&text) else {
                continue;
            };
            let canonical = frontmatter::compose_document(&fm, &body);
            if canonical != text {
                crate::pipeline::write_atomic(&file.abs, &canonical)?;
                actions.push(format!("canonicalized frontmatter of `{}`", file.rel));
            }
        }
    }

    info!(backup = %backup.display(), fixed = actions.len(), "integrity fix applied");
    Ok(FixOutcome {
        backup: backup.display().to_string(),
        fixed: actions.len(),
        actions,
    })
}

/// Destructive reconstruction of the index from the files alone.
#[instrument(skip(vault))]
pub fn rebuild(vault: &Vault) -> Result<RebuildOutcome> {
    let store = vault.store();
    let files = scan_files(vault.root())?;
    let now = Utc::now();
    let mut counters: BTreeMap<String, u64> = BTreeMap::new();
    let mut nodes = 0usize;

    store.with_tx(|s| {
        s.clear_derived()?;

        // Pass 1: insert every node from its file.
        for file in &files {
            match file.kind {
                ContentKind::Log => {
                    rebuild_log(s, file)?;
                    nodes += 1;
                }
                _ => {
                    let text = std::fs::read_to_string(&file.abs)?;
                    let (fm, body) = match frontmatter::parse_document(&text) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!(path = %file.rel, error = %e, "skipping unparseable file");
                            continue;
                        }
                    };
                    let status = fm.status.clone().unwrap_or_else(|| "draft".to_string());
                    s.insert_node(&NodeRecord::from_frontmatter(&fm, &file.rel, &status))?;
                    s.upsert_fts(&fm.id, &fm.title, &body)?;
                    s.index_tags(&fm.id, &fm.tags, now)?;
                    nodes += 1;
                }
            }
            if let Some(seq) = ident::sequence_of_id(&file.id) {
                let name = file.kind.counter_name();
                let entry = counters.entry(name.to_string()).or_insert(0);
                *entry = (*entry).max(seq);
            }
        }

        // Pass 2: edges, now that every title resolves.
        for file in &files {
            if file.kind == ContentKind::Log {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&file.abs) else {
                continue;
            };
            let Ok((fm, body)) = frontmatter::parse_document(&text) else {
                continue;
            };
            let degree = s.index_links(&fm.id, &fm.link_targets(), &body, now)?;
            // Note status reflects the rebuilt edge set.
            if fm.kind == ContentKind::Note && fm.subtype.as_deref() != Some("decision") {
                if let Some(mut node) = s.fetch_node(&fm.id)? {
                    let status = note::status_for_degree(degree);
                    if node.status != status {
                        node.status = status.to_string();
                        s.update_node(&node)?;
                    }
                }
            }
        }

        // Sequential counters resume past the highest existing ID.
        for (name, value) in &counters {
            s.set_counter(name, *value)?;
        }
        Ok(())
    })?;

    let edges = store.all_edges()?.len();
    let metrics_nodes = vault.graph().materialize_metrics(store)?;
    info!(nodes, edges, "index rebuilt from files");
    Ok(RebuildOutcome {
        nodes,
        edges,
        counters,
        metrics_nodes,
    })
}

/// Parse a session JSONL file back into its node and mirrored rows.
fn rebuild_log(store: &Store, file: &VaultFile) -> Result<()> {
    let text = std::fs::read_to_string(&file.abs)?;
    let mut title = file.id.clone();
    let mut topic = None;
    let mut created = None;
    let mut status = "open";
    let mut rows = Vec::new();
    let mut last_ts = None;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(record) = serde_json::from_str::<serde_json::Value>(line) else {
            warn!(path = %file.rel, "skipping malformed session log line");
            continue;
        };
        let ts = record
            .get("ts")
            .and_then(|v| v.as_str())
            .and_then(|raw| parse_ts(raw).ok());
        last_ts = ts.or(last_ts);
        match record.get("type").and_then(|v| v.as_str()) {
            Some("session_start") => {
                if let Some(t) = record.get("topic").and_then(|v| v.as_str()) {
                    title = t.to_string();
                    topic = Some(t.to_string());
                }
                created = ts;
                status = "open";
            }
            Some("session_reopen") => status = "open",
            Some("session_close") => status = "closed",
            Some("entry") => rows.push(record),
            _ => {}
        }
    }
    let created = created.unwrap_or_else(Utc::now);
    let node = NodeRecord {
        id: file.id.clone(),
        kind: ContentKind::Log,
        subtype: None,
        title: title.clone(),
        status: status.to_string(),
        maturity: None,
        topic,
        archived: false,
        priority: None,
        impact: None,
        effort: None,
        created,
        modified: last_ts.unwrap_or(created),
        superseded_by: None,
        rel_path: file.rel.clone(),
        metrics: Default::default(),
    };
    store.insert_node(&node)?;
    store.upsert_fts(&file.id, &title, "")?;
    for record in rows {
        let references: Vec<String> = record
            .get("references")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        store.append_session_row(
            &file.id,
            record
                .get("ts")
                .and_then(|v| v.as_str())
                .and_then(|raw| parse_ts(raw).ok())
                .unwrap_or(created),
            record.get("message").and_then(|v| v.as_str()).unwrap_or(""),
            record.get("pin").and_then(|v| v.as_bool()).unwrap_or(false),
            record.get("cost").and_then(|v| v.as_f64()),
            record.get("detail").and_then(|v| v.as_str()),
            &references,
            record.get("metadata").unwrap_or(&serde_json::json!({})),
        )?;
    }
    Ok(())
}

/// Directory holding timestamped index backups.
pub fn backup_dir(vault: &Vault) -> PathBuf {
    vault.state_dir().join("backups")
}

/// Copy the index into a fresh timestamped backup file.
pub fn create_backup(vault: &Vault) -> Result<PathBuf> {
    let dir = backup_dir(vault);
    std::fs::create_dir_all(&dir)?;
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    let dest = dir.join(format!("{stamp}.db"));
    vault.store().backup_to(&dest)?;
    Ok(dest)
}

/// The newest backup on disk, or `NoBackups`.
pub fn latest_backup(dir: &Path) -> Result<PathBuf> {
    let mut backups: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "db"))
            .collect(),
        Err(_) => Vec::new(),
    };
    backups.sort();
    backups.pop().ok_or(VaultError::NoBackups)
}

/// Backup housekeeping per `check.backup_retention_days` and
/// `check.backup_max_count`.
pub fn prune_backups(dir: &Path, config: &VaultConfig) -> Result<usize> {
    let mut backups: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "db"))
            .collect(),
        Err(_) => return Ok(0),
    };
    backups.sort();
    let mut removed = 0;
    // Oldest beyond the count cap go first.
    while backups.len() > config.check.backup_max_count {
        let victim = backups.remove(0);
        std::fs::remove_file(&victim)?;
        removed += 1;
    }
    // Then anything older than the retention window.
    let cutoff = Utc::now() - chrono::Duration::days(config.check.backup_retention_days);
    let cutoff_name = format!("{}.db", cutoff.format("%Y%m%d%H%M%S%3f"));
    backups.retain(|path| {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        match name {
            Some(name) if name.as_str() < cutoff_name.as_str() => {
                if std::fs::remove_file(path).is_ok() {
                    removed += 1;
                }
                false
            }
            _ => true,
        }
    });
    Ok(removed)
}

/// Walk the vault for content files: `notes/**.md`, `ops/tasks/*.md`,
/// `ops/logs/*.jsonl`. Hidden files and the state directory are skipped.
fn scan_files(root: &Path) -> Result<Vec<VaultFile>> {
    let mut out = Vec::new();
    for space in ["notes", "ops/tasks", "ops/logs"] {
        let base = root.join(space);
        if !base.is_dir() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let ext = path.extension().unwrap_or_default().to_string_lossy();
            let expected_ext = if space == "ops/logs" { "jsonl" } else { "md" };
            if ext != expected_ext {
                continue;
            }
            let stem = path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            let Some(kind) = ident::kind_of_id(&stem) else {
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            out.push(VaultFile {
                abs: path.to_path_buf(),
                rel,
                id: stem,
                kind,
            });
        }
    }
    out.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(out)
}

fn component_stats(store: &Store, nodes: &[NodeRecord]) -> Result<(usize, usize)> {
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect();
    let mut parent: Vec<usize> = (0..nodes.len()).collect();
    fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    for edge in store.all_edges()? {
        if let (Some(&a), Some(&b)) = (index.get(edge.source_id.as_str()), index.get(edge.target_id.as_str())) {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                parent[ra] = rb;
            }
        }
    }
    let mut sizes: HashMap<usize, usize> = HashMap::new();
    for i in 0..nodes.len() {
        *sizes.entry(find(&mut parent, i)).or_insert(0) += 1;
    }
    let components = sizes.len();
    let largest = sizes.values().copied().max().unwrap_or(0);
    Ok((components, largest))
}

fn supersession_cycle(by_id: &HashMap<&str, &NodeRecord>, start: &NodeRecord) -> bool {
    let mut seen = HashSet::new();
    let mut current = start;
    while let Some(next_id) = &current.superseded_by {
        if !seen.insert(current.id.clone()) {
            return true;
        }
        match by_id.get(next_id.as_str()) {
            Some(next) => current = next,
            None => return false,
        }
        if current.id == start.id {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_backup_requires_backups() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(latest_backup(dir.path()), Err(VaultError::NoBackups)));
        std::fs::write(dir.path().join("20260101000000000.db"), b"old").unwrap();
        std::fs::write(dir.path().join("20260301000000000.db"), b"new").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let latest = latest_backup(dir.path()).unwrap();
        assert!(latest.to_string_lossy().contains("20260301000000000"));
    }

    #[test]
    fn test_prune_backups_caps_count() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("2026010100000{i}000.db")), b"x").unwrap();
        }
        let mut config = VaultConfig::default();
        config.check.backup_max_count = 2;
        config.check.backup_retention_days = 3650;
        let removed = prune_backups(dir.path(), &config).unwrap();
        assert_eq!(removed, 3);
        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(left.len(), 2);
    }
}
