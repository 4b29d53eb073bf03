//! The reweave engine: multi-signal link discovery.
//!
//! Given a target node, candidates are every non-archived node outside the
//! target's already-linked set. Each candidate is scored by a linear blend
//! of four signals, each normalized to `[0, 1]`:
//!
//! - lexical: BM25 of the target's tokenized title+body against the corpus
//! - tag overlap: Jaccard of the tag sets
//! - graph proximity: `1 / shortest_path_length` on the undirected graph
//! - topic match: exact, non-null topic equality
//!
//! Suggestions at or above the threshold become edges, frontmatter
//! `links.relates` entries and, for non-garden notes, body wikilinks in a
//! canonical section. Every applied change lands in the reweave audit log,
//! which `undo` replays in reverse. Undo never edits body prose.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::errors::{Result, VaultError};
use crate::extension::hooks;
use crate::frontmatter::{self, Frontmatter};
use crate::ident::ContentKind;
use crate::model::note;
use crate::pipeline::{FileCompensation, OpOptions, write_atomic};
use crate::result as telemetry;
use crate::store::{NodeRecord, Store};
use crate::vault::Vault;

/// Heading under which reweave appends body wikilinks.
const RELATED_HEADING: &str = "## Related";
/// Cap on query tokens fed to the lexical signal.
const MAX_QUERY_TOKENS: usize = 48;

/// Per-invocation reweave controls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReweaveOptions {
    /// Override for `reweave.min_score_threshold`.
    pub threshold: Option<f64>,
    /// Score and report, apply nothing.
    pub dry_run: bool,
    /// Re-score existing links and remove the weak ones instead of adding.
    pub prune: bool,
}

/// Per-signal score breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Signals {
    pub lexical: f64,
    pub tag_overlap: f64,
    pub graph_proximity: f64,
    pub topic: f64,
}

/// One scored candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
    pub score: f64,
    pub signals: Signals,
}

/// A link the engine applied or removed.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedItem {
    pub id: String,
    pub title: String,
    pub score: f64,
}

/// Reweave result for every mode. `dry_run` is always present so callers
/// can tell a no-op apply from a dry run, even at `count == 0`.
#[derive(Debug, Clone, Serialize)]
pub struct ReweaveReport {
    pub target_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connected: Vec<ConnectedItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pruned: Vec<ConnectedItem>,
    pub dry_run: bool,
    pub count: usize,
}

/// Undo target selection.
#[derive(Debug, Clone, Copy)]
pub enum UndoTarget {
    /// The most recent not-yet-undone batch.
    Latest,
    /// One explicit audit entry.
    Entry(i64),
}

/// Undo result.
#[derive(Debug, Clone, Serialize)]
pub struct UndoReport {
    pub batch_ts: String,
    pub reversed: usize,
}

/// Run reweave against one target. Mode is selected by `opts`.
#[instrument(skip(vault, opts, op_options), fields(id = %id))]
pub fn reweave(vault: &Vault, id: &str, opts: ReweaveOptions, op_options: OpOptions) -> Result<ReweaveReport> {
    let _span = telemetry::span("reweave");
    let store = vault.store();
    let target = store
        .fetch_node(id)?
        .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
    let threshold = opts
        .threshold
        .unwrap_or(vault.config().reweave.min_score_threshold);

    if opts.prune {
        return prune(vault, &target, threshold, op_options);
    }

    let scored = score_candidates(vault, &target, CandidateSet::Unlinked)?;
    let capacity = vault
        .config()
        .reweave
        .max_links_per_note
        .saturating_sub(store.out_degree(id)?);
    let accepted: Vec<Suggestion> = scored
        .into_iter()
        .filter(|s| s.score >= threshold)
        .take(capacity)
        .collect();

    if opts.dry_run {
        let count = accepted.len();
        return Ok(ReweaveReport {
            target_id: id.to_string(),
            connected: Vec::new(),
            suggestions: accepted,
            pruned: Vec::new(),
            dry_run: true,
            count,
        });
    }

    if accepted.is_empty() {
        return Ok(ReweaveReport {
            target_id: id.to_string(),
            connected: Vec::new(),
            suggestions: Vec::new(),
            pruned: Vec::new(),
            dry_run: false,
            count: 0,
        });
    }

    let batch_ts = crate::store::format_ts(Utc::now());
    let mut compensations: Vec<FileCompensation> = Vec::new();
    let connected = {
        let result = store.with_tx(|s| {
            apply_links(vault, s, &target, &accepted, &batch_ts, &mut compensations)
        });
        match result {
            Ok(connected) => connected,
            Err(err) => {
                for compensation in compensations {
                    compensation.apply();
                }
                return Err(err);
            }
        }
    };

    vault.events().dispatch(
        store,
        hooks::POST_REWEAVE,
        serde_json::json!({
            "source_id": id,
            "affected_ids": connected.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
            "links_added": connected.len(),
        }),
        None,
        op_options.sync,
    )?;

    info!(id = %id, added = connected.len(), "reweave applied");
    let count = connected.len();
    Ok(ReweaveReport {
        target_id: id.to_string(),
        connected,
        suggestions: Vec::new(),
        pruned: Vec::new(),
        dry_run: false,
        count,
    })
}

/// Reverse a batch of reweave actions. Body prose is left untouched; only
/// edges and frontmatter links are restored.
pub fn undo(vault: &Vault, target: UndoTarget) -> Result<UndoReport> {
    let store = vault.store();
    let entries = match target {
        UndoTarget::Latest => {
            let batch_ts = store
                .reweave_latest_batch()?
                .ok_or_else(|| VaultError::NoHistory("latest batch".to_string()))?;
            store.reweave_batch_entries(&batch_ts)?
        }
        UndoTarget::Entry(log_id) => {
            let entry = store
                .reweave_entry(log_id)?
                .filter(|e| !e.undone)
                .ok_or_else(|| VaultError::NoHistory(format!("log entry {log_id}")))?;
            vec![entry]
        }
    };
    if entries.is_empty() {
        return Err(VaultError::NoHistory("latest batch".to_string()));
    }
    let batch_ts = entries[0].batch_ts.clone();

    let mut compensations: Vec<FileCompensation> = Vec::new();
    let reversed = {
        let result = store.with_tx(|s| {
            let now = Utc::now();
            let mut touched: HashSet<String> = HashSet::new();
            for entry in &entries {
                match entry.action.as_str() {
                    "add" => {
                        s.delete_edge(&entry.source_id, &entry.target_id)?;
                    }
                    "prune" => {
                        s.insert_edge(&entry.source_id, &entry.target_id, "relates", now)?;
                    }
                    other => {
                        return Err(VaultError::InvalidFormat(format!(
                            "unknown reweave action `{other}` in log entry {}",
                            entry.id
                        )));
                    }
                }
                touched.insert(entry.source_id.clone());
                s.mark_reweave_undone(entry.id)?;
            }
            // Rewrite each touched source's frontmatter to mirror the
            // restored edge set.
            for source_id in &touched {
                let Some(node) = s.fetch_node(source_id)? else {
                    continue;
                };
                if node.kind == ContentKind::Log {
                    continue;
                }
                sync_frontmatter_links(vault, s, &node, &mut compensations)?;
            }
            Ok(entries.len())
        });
        match result {
            Ok(n) => n,
            Err(err) => {
                for compensation in compensations {
                    compensation.apply();
                }
                return Err(err);
            }
        }
    };
    info!(batch = %batch_ts, reversed, "reweave batch undone");
    Ok(UndoReport { batch_ts, reversed })
}

/// Result of an explicit unlink.
#[derive(Debug, Clone, Serialize)]
pub struct UnlinkReport {
    /// `(source, target)` pairs actually removed.
    pub removed: Vec<(String, String)>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Remove the link from `src` to `dst` (and the reverse when `both`):
/// edges, frontmatter entries, and body wikilinks on the source side.
/// Garden body protection applies with a warning when a source has
/// maturity set.
pub fn unlink(vault: &Vault, src: &str, dst: &str, both: bool, op_options: OpOptions) -> Result<UnlinkReport> {
    let _ = op_options;
    let store = vault.store();
    let src_node = store
        .fetch_node(src)?
        .ok_or_else(|| VaultError::NotFound(src.to_string()))?;
    let dst_node = store
        .fetch_node(dst)?
        .ok_or_else(|| VaultError::NotFound(dst.to_string()))?;

    let mut directions = vec![(src_node.clone(), dst_node.clone())];
    if both {
        directions.push((dst_node, src_node));
    }

    let mut compensations: Vec<FileCompensation> = Vec::new();
    let result = store.with_tx(|s| {
        let mut removed = Vec::new();
        let mut warnings = Vec::new();
        for (source, target) in &directions {
            if !s.delete_edge(&source.id, &target.id)? {
                continue;
            }
            removed.push((source.id.clone(), target.id.clone()));
            if source.kind == ContentKind::Log {
                continue;
            }
            let (mut fm, mut body, original) = load_document(vault, source)?;
            let kinds: Vec<String> = fm.links.keys().cloned().collect();
            for kind in kinds {
                fm.remove_link(&kind, &target.id);
            }
            if fm.maturity.is_some() {
                warnings.push(format!(
                    "`{}` has maturity set; body wikilink for `{}` left in place",
                    source.id, target.id
                ));
            } else {
                remove_wikilink(&mut body, &target.title);
            }
            finalize_document(vault, s, source, fm, body, original, &mut compensations)?;
        }
        if removed.is_empty() {
            return Err(VaultError::NoLink(src.to_string(), dst.to_string()));
        }
        Ok(UnlinkReport { removed, warnings })
    });
    match result {
        Ok(report) => Ok(report),
        Err(err) => {
            for compensation in compensations {
                compensation.apply();
            }
            Err(err)
        }
    }
}

enum CandidateSet {
    /// Everything not yet linked (add / dry-run modes).
    Unlinked,
    /// Exactly the currently linked set (prune mode).
    Linked,
}

/// Score candidates for a target, descending.
fn score_candidates(vault: &Vault, target: &NodeRecord, set: CandidateSet) -> Result<Vec<Suggestion>> {
    let store = vault.store();
    let linked: HashSet<String> = store
        .outgoing_edges(&target.id)?
        .into_iter()
        .map(|e| e.target_id)
        .collect();

    let candidates: Vec<NodeRecord> = store
        .all_nodes()?
        .into_iter()
        .filter(|n| n.id != target.id && !n.archived)
        .filter(|n| match set {
            CandidateSet::Unlinked => !linked.contains(&n.id),
            CandidateSet::Linked => linked.contains(&n.id),
        })
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Lexical: BM25 of the target's text against the corpus, normalized by
    // the best candidate score.
    let body = read_body(vault, target).unwrap_or_default();
    let query = query_tokens(&target.title, &body);
    let mut lexical: HashMap<String, f64> = HashMap::new();
    if !query.is_empty() {
        for (hit_id, score) in store.fts_search(&query, candidates.len() + 16, 0)? {
            if hit_id != target.id {
                lexical.insert(hit_id, score);
            }
        }
    }
    let lexical_max = lexical.values().cloned().fold(0.0_f64, f64::max);

    // Graph proximity: hop distance on the undirected view.
    let distances: HashMap<String, usize> = vault
        .graph()
        .related(store, &target.id, crate::graph::MAX_RELATED_DEPTH, usize::MAX)?
        .into_iter()
        .map(|hit| (hit.id, hit.distance))
        .collect();

    let tag_sets = store.tag_sets()?;
    let empty: Vec<String> = Vec::new();
    let target_tags: HashSet<&String> = tag_sets.get(&target.id).unwrap_or(&empty).iter().collect();

    let weights = &vault.config().reweave;
    let mut scored: Vec<Suggestion> = candidates
        .into_iter()
        .map(|candidate| {
            let lex = if lexical_max > 0.0 {
                lexical.get(&candidate.id).copied().unwrap_or(0.0) / lexical_max
            } else {
                0.0
            };
            let candidate_tags: HashSet<&String> =
                tag_sets.get(&candidate.id).unwrap_or(&empty).iter().collect();
            let overlap = jaccard(&target_tags, &candidate_tags);
            let proximity = distances
                .get(&candidate.id)
                .map(|&d| 1.0 / d as f64)
                .unwrap_or(0.0);
            let topic = match (&target.topic, &candidate.topic) {
                (Some(a), Some(b)) if a == b => 1.0,
                _ => 0.0,
            };
            let signals = Signals {
                lexical: lex,
                tag_overlap: overlap,
                graph_proximity: proximity,
                topic,
            };
            let score = weights.lexical_weight * lex
                + weights.tag_weight * overlap
                + weights.graph_weight * proximity
                + weights.topic_weight * topic;
            Suggestion {
                id: candidate.id,
                title: candidate.title,
                score,
                signals,
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    debug!(target = %target.id, candidates = scored.len(), "candidates scored");
    Ok(scored)
}

fn apply_links(
    vault: &Vault,
    store: &Store,
    target: &NodeRecord,
    accepted: &[Suggestion],
    batch_ts: &str,
    compensations: &mut Vec<FileCompensation>,
) -> Result<Vec<ConnectedItem>> {
    let now = Utc::now();
    let (mut fm, mut body, original) = load_document(vault, target)?;
    let garden = fm.maturity.is_some();

    let mut connected = Vec::new();
    for suggestion in accepted {
        store.insert_edge(&target.id, &suggestion.id, "relates", now)?;
        fm.add_link("relates", &suggestion.id);
        if !garden {
            append_wikilink(&mut body, &suggestion.title);
        }
        store.append_reweave(batch_ts, &target.id, &suggestion.id, "add", suggestion.score)?;
        connected.push(ConnectedItem {
            id: suggestion.id.clone(),
            title: suggestion.title.clone(),
            score: suggestion.score,
        });
    }

    finalize_document(vault, store, target, fm, body, original, compensations)?;
    Ok(connected)
}

fn prune(
    vault: &Vault,
    target: &NodeRecord,
    threshold: f64,
    op_options: OpOptions,
) -> Result<ReweaveReport> {
    let store = vault.store();
    let scored = score_candidates(vault, target, CandidateSet::Linked)?;
    // Only `relates` edges are prunable; structural links stay.
    let relates: HashSet<String> = store
        .outgoing_edges(&target.id)?
        .into_iter()
        .filter(|e| e.edge_type == "relates")
        .map(|e| e.target_id)
        .collect();
    let weak: Vec<Suggestion> = scored
        .into_iter()
        .filter(|s| s.score < threshold && relates.contains(&s.id))
        .collect();
    if weak.is_empty() {
        return Ok(ReweaveReport {
            target_id: target.id.clone(),
            connected: Vec::new(),
            suggestions: Vec::new(),
            pruned: Vec::new(),
            dry_run: false,
            count: 0,
        });
    }

    let batch_ts = crate::store::format_ts(Utc::now());
    let mut compensations: Vec<FileCompensation> = Vec::new();
    let pruned = {
        let result = store.with_tx(|s| {
            let (mut fm, mut body, original) = load_document(vault, target)?;
            let garden = fm.maturity.is_some();
            let mut pruned = Vec::new();
            for suggestion in &weak {
                s.delete_edge(&target.id, &suggestion.id)?;
                fm.remove_link("relates", &suggestion.id);
                if !garden {
                    remove_wikilink(&mut body, &suggestion.title);
                }
                s.append_reweave(&batch_ts, &target.id, &suggestion.id, "prune", suggestion.score)?;
                pruned.push(ConnectedItem {
                    id: suggestion.id.clone(),
                    title: suggestion.title.clone(),
                    score: suggestion.score,
                });
            }
            finalize_document(vault, s, target, fm, body, original, &mut compensations)?;
            Ok(pruned)
        });
        match result {
            Ok(pruned) => pruned,
            Err(err) => {
                for compensation in compensations {
                    compensation.apply();
                }
                return Err(err);
            }
        }
    };

    vault.events().dispatch(
        store,
        hooks::POST_REWEAVE,
        serde_json::json!({
            "source_id": target.id,
            "affected_ids": pruned.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
            "links_added": 0,
        }),
        None,
        op_options.sync,
    )?;

    info!(id = %target.id, pruned = pruned.len(), "reweave pruned weak links");
    let count = pruned.len();
    Ok(ReweaveReport {
        target_id: target.id.clone(),
        connected: Vec::new(),
        suggestions: Vec::new(),
        pruned,
        dry_run: false,
        count,
    })
}

/// Rewrite a node's frontmatter `links.relates` to mirror the current edge
/// set (undo path; body untouched).
fn sync_frontmatter_links(
    vault: &Vault,
    store: &Store,
    node: &NodeRecord,
    compensations: &mut Vec<FileCompensation>,
) -> Result<()> {
    let (mut fm, body, original) = load_document(vault, node)?;
    let relates: Vec<String> = store
        .outgoing_edges(&node.id)?
        .into_iter()
        .filter(|e| e.edge_type == "relates")
        .map(|e| e.target_id)
        .collect();
    if relates.is_empty() {
        fm.links.remove("relates");
    } else {
        fm.links.insert("relates".to_string(), relates);
    }
    finalize_document(vault, store, node, fm, body, original, compensations)
}

/// Persist a mutated document and bring the row, FTS and status along.
fn finalize_document(
    vault: &Vault,
    store: &Store,
    node: &NodeRecord,
    mut fm: Frontmatter,
    body: String,
    original: String,
    compensations: &mut Vec<FileCompensation>,
) -> Result<()> {
    let now = Utc::now();
    fm.modified = now;
    let degree = store.out_degree(&node.id)?;
    let model = vault.registry().resolve(node.kind, node.subtype.as_deref())?;
    let status = if node.kind == ContentKind::Note && !model.status_is_user_driven() {
        note::status_for_degree(degree).to_string()
    } else {
        node.status.clone()
    };
    fm.status = Some(status.clone());

    let abs = vault.root().join(&node.rel_path);
    compensations.push(FileCompensation::Restore(abs.clone(), original));
    write_atomic(&abs, &frontmatter::compose_document(&fm, &body))?;

    store.upsert_fts(&node.id, &fm.title, &body)?;
    let mut updated = NodeRecord::from_frontmatter(&fm, &node.rel_path, &status);
    updated.metrics = node.metrics.clone();
    store.update_node(&updated)?;
    Ok(())
}

fn load_document(vault: &Vault, node: &NodeRecord) -> Result<(Frontmatter, String, String)> {
    let abs = vault.root().join(&node.rel_path);
    let text = std::fs::read_to_string(&abs)
        .map_err(|_| VaultError::FileNotFound(node.rel_path.clone()))?;
    let (fm, body) = frontmatter::parse_document(&text)?;
    Ok((fm, body, text))
}

fn read_body(vault: &Vault, node: &NodeRecord) -> Option<String> {
    if node.kind == ContentKind::Log {
        return None;
    }
    let text = std::fs::read_to_string(vault.root().join(&node.rel_path)).ok()?;
    frontmatter::parse_document(&text).ok().map(|(_, body)| body)
}

/// Tokenize title+body for the lexical signal: alphanumeric tokens longer
/// than two characters, deduplicated, capped.
fn query_tokens(title: &str, body: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    for token in title.split_whitespace().chain(body.split_whitespace()) {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if cleaned.len() > 2 && !seen.contains(&cleaned) {
            seen.push(cleaned);
            if seen.len() == MAX_QUERY_TOKENS {
                break;
            }
        }
    }
    seen.join(" ")
}

fn jaccard(a: &HashSet<&String>, b: &HashSet<&String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Append `- [[Title]]` under the canonical related section, creating the
/// section when absent; duplicates are skipped.
fn append_wikilink(body: &mut String, title: &str) {
    let link = format!("[[{title}]]");
    if body.contains(&link) {
        return;
    }
    if !body.contains(RELATED_HEADING) {
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&format!("\n{RELATED_HEADING}\n"));
    }
    // Insert at the end of the related section (end of document by
    // construction).
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(&format!("- {link}\n"));
}

/// Drop the wikilink for `title`: list items vanish, inline tokens decay to
/// plain text.
fn remove_wikilink(body: &mut String, title: &str) {
    let list_item = format!("- [[{title}]]\n");
    if body.contains(&list_item) {
        *body = body.replacen(&list_item, "", 1);
    }
    let token = format!("[[{title}]]");
    if body.contains(&token) {
        *body = body.replace(&token, title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_tokens_dedup_and_cap() {
        let q = query_tokens("Rust Ownership", "ownership moves; the borrow checker");
        assert_eq!(q, "rust ownership moves the borrow checker");
    }

    #[test]
    fn test_jaccard() {
        let a_owned = vec!["x/y".to_string(), "z".to_string()];
        let b_owned = vec!["x/y".to_string()];
        let a: HashSet<&String> = a_owned.iter().collect();
        let b: HashSet<&String> = b_owned.iter().collect();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-12);
        let empty: HashSet<&String> = HashSet::new();
        assert_eq!(jaccard(&empty, &empty), 0.0);
    }

    #[test]
    fn test_wikilink_section_roundtrip() {
        let mut body = String::from("Prose paragraph.\n");
        append_wikilink(&mut body, "Alpha");
        append_wikilink(&mut body, "Beta");
        append_wikilink(&mut body, "Alpha"); // duplicate skipped
        assert_eq!(body.matches("[[Alpha]]").count(), 1);
        assert!(body.contains(RELATED_HEADING));

        remove_wikilink(&mut body, "Alpha");
        assert!(!body.contains("[[Alpha]]"));
        assert!(body.contains("[[Beta]]"));

        // Inline tokens decay to plain text.
        let mut inline = String::from("See [[Gamma]] for details.\n");
        remove_wikilink(&mut inline, "Gamma");
        assert_eq!(inline, "See Gamma for details.\n");
    }
}
