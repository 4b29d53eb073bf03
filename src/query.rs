//! The query engine: ranked search, retrieval, listing, and work scoring.
//!
//! Search composes BM25 full-text results with one of five ranking modes.
//! Semantic ranking is a capability: when no semantic index is registered,
//! semantic and hybrid modes fall back to BM25 with a warning and the call
//! still succeeds.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use crate::errors::{Result, VaultError};
use crate::ident::ContentKind;
use crate::store::{EdgeRecord, NodeFilter, NodeRecord, NodeSort, Store};
use crate::vault::Vault;

/// Capability contract for optional semantic-vector search.
pub trait SemanticIndex: Send + Sync {
    /// Return `(id, similarity)` pairs for the query, best first.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<(String, f64)>>;
}

/// Ranking mode for `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankBy {
    #[default]
    Relevance,
    Recency,
    Graph,
    Semantic,
    Hybrid,
}

impl std::str::FromStr for RankBy {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "relevance" => Ok(RankBy::Relevance),
            "recency" => Ok(RankBy::Recency),
            "graph" => Ok(RankBy::Graph),
            "semantic" => Ok(RankBy::Semantic),
            "hybrid" => Ok(RankBy::Hybrid),
            other => Err(VaultError::InvalidFormat(format!("unknown rank mode `{other}`"))),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub score: f64,
    pub path: String,
}

/// Search result set plus advisory warnings.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Full document retrieval: row, body, and both edge directions.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    #[serde(flatten)]
    pub node: NodeRecord,
    pub body: String,
    pub tags: Vec<String>,
    pub outgoing: Vec<EdgeRecord>,
    pub backlinks: Vec<EdgeRecord>,
}

/// One scored work-queue item.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: Option<i64>,
    pub impact: Option<i64>,
    pub effort: Option<i64>,
    pub score: f64,
}

/// Partitioned material for decision making.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionSupport {
    pub proposed: Vec<NodeRecord>,
    pub accepted: Vec<NodeRecord>,
    pub notes: Vec<NodeRecord>,
    pub references: Vec<NodeRecord>,
}

/// Ranked full-text search with composable filters.
#[instrument(skip(vault, filter), fields(rank = ?rank_by))]
pub fn search(
    vault: &Vault,
    query: &str,
    rank_by: RankBy,
    filter: &NodeFilter,
    limit: usize,
) -> Result<SearchOutcome> {
    let store = vault.store();
    if query.trim().is_empty() {
        return Err(VaultError::EmptyQuery);
    }
    let mut warnings = Vec::new();

    // Over-fetch so post-filtering still fills the page.
    let raw = store.fts_search(query, limit.saturating_mul(4).max(32), 0)?;
    let mut hits: Vec<(NodeRecord, f64)> = Vec::new();
    for (id, bm25) in raw {
        let Some(node) = store.fetch_node(&id)? else {
            continue;
        };
        if filter_matches(store, &node, filter)? {
            hits.push((node, bm25));
        }
    }

    let mode = effective_mode(vault, rank_by, &mut warnings);
    let scored: Vec<(NodeRecord, f64)> = match mode {
        RankBy::Relevance => hits,
        RankBy::Recency => {
            let half_life = vault.config().search.half_life_days;
            let now = Utc::now();
            hits.into_iter()
                .map(|(node, bm25)| {
                    let age_days =
                        (now - node.modified).num_seconds().max(0) as f64 / 86_400.0;
                    let decay = (-(std::f64::consts::LN_2) * age_days / half_life).exp();
                    (node, bm25 * decay)
                })
                .collect()
        }
        RankBy::Graph => {
            let any_rank = hits
                .iter()
                .any(|(node, _)| node.metrics.pagerank.unwrap_or(0.0) > 0.0);
            if !any_rank {
                warnings.push(
                    "graph metrics have not been materialized; returning BM25 order".to_string(),
                );
                hits
            } else {
                hits.into_iter()
                    .map(|(node, bm25)| {
                        let pr = node.metrics.pagerank.unwrap_or(0.0);
                        (node, bm25 * (1.0 + pr))
                    })
                    .collect()
            }
        }
        RankBy::Semantic => {
            let semantic = vault.semantic().expect("checked by effective_mode");
            let sem_scores: HashMap<String, f64> = semantic
                .search(query, limit.saturating_mul(4).max(32))?
                .into_iter()
                .collect();
            hits.into_iter()
                .map(|(node, _)| {
                    let s = sem_scores.get(&node.id).copied().unwrap_or(0.0);
                    (node, s)
                })
                .collect()
        }
        RankBy::Hybrid => {
            let semantic = vault.semantic().expect("checked by effective_mode");
            let sem_scores: HashMap<String, f64> = semantic
                .search(query, limit.saturating_mul(4).max(32))?
                .into_iter()
                .collect();
            let weight = vault.config().search.semantic_weight;
            let bm_norm = min_max(hits.iter().map(|(_, s)| *s));
            let sem_norm = min_max(sem_scores.values().copied());
            hits.into_iter()
                .map(|(node, bm25)| {
                    let b = bm_norm.normalize(bm25);
                    let s = sem_norm.normalize(sem_scores.get(&node.id).copied().unwrap_or(0.0));
                    (node, (1.0 - weight) * b + weight * s)
                })
                .collect()
        }
    };

    let mut results: Vec<SearchHit> = scored
        .into_iter()
        .map(|(node, score)| SearchHit {
            id: node.id,
            title: node.title,
            kind: node.kind,
            score,
            path: node.rel_path,
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    Ok(SearchOutcome { results, warnings })
}

/// Fetch a document: row plus body read from disk plus both edge sets.
pub fn get(vault: &Vault, id: &str) -> Result<Document> {
    let store = vault.store();
    let node = store
        .fetch_node(id)?
        .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
    let abs = vault.root().join(&node.rel_path);
    let body = if node.kind == ContentKind::Log {
        std::fs::read_to_string(&abs).unwrap_or_default()
    } else {
        let text = std::fs::read_to_string(&abs)
            .map_err(|_| VaultError::FileNotFound(node.rel_path.clone()))?;
        crate::frontmatter::parse_document(&text)?.1
    };
    Ok(Document {
        tags: store.tags_of(id)?,
        outgoing: store.outgoing_edges(id)?,
        backlinks: store.incoming_edges(id)?,
        node,
        body,
    })
}

/// Filtered, sorted listing. `limit = 0` is an empty result, not an error.
pub fn list(vault: &Vault, filter: &NodeFilter, sort: NodeSort, limit: usize) -> Result<Vec<NodeRecord>> {
    vault.store().select_nodes(filter, sort, limit)
}

/// Actionable tasks scored by `priority*2 + impact*1.5 + (4 - effort)`,
/// descending. Unset priority and impact score 0; unset effort scores as 4.
pub fn work_queue(vault: &Vault, space: Option<&str>) -> Result<Vec<WorkItem>> {
    let store = vault.store();
    let mut items = Vec::new();
    for status in ["inbox", "active", "blocked"] {
        let filter = NodeFilter {
            kind: Some(ContentKind::Task),
            status: Some(status.to_string()),
            space: space.map(str::to_string),
            ..Default::default()
        };
        for node in store.select_nodes(&filter, NodeSort::Priority, 10_000)? {
            let score = node.priority.unwrap_or(0) as f64 * 2.0
                + node.impact.unwrap_or(0) as f64 * 1.5
                + (4.0 - node.effort.unwrap_or(4) as f64);
            items.push(WorkItem {
                id: node.id,
                title: node.title,
                status: node.status,
                priority: node.priority,
                impact: node.impact,
                effort: node.effort,
                score,
            });
        }
    }
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(items)
}

/// Decisions in play plus the supporting notes and references.
pub fn decision_support(vault: &Vault, topic: Option<&str>, space: Option<&str>) -> Result<DecisionSupport> {
    let store = vault.store();
    let base = NodeFilter {
        topic: topic.map(str::to_string),
        space: space.map(str::to_string),
        ..Default::default()
    };
    let decisions = store.select_nodes(
        &NodeFilter {
            kind: Some(ContentKind::Note),
            subtype: Some("decision".to_string()),
            ..base.clone()
        },
        NodeSort::Recency,
        1_000,
    )?;
    let (proposed, accepted): (Vec<_>, Vec<_>) = decisions
        .into_iter()
        .filter(|d| d.status == "proposed" || d.status == "accepted")
        .partition(|d| d.status == "proposed");
    let notes = store
        .select_nodes(
            &NodeFilter {
                kind: Some(ContentKind::Note),
                ..base.clone()
            },
            NodeSort::Recency,
            1_000,
        )?
        .into_iter()
        .filter(|n| n.subtype.as_deref() != Some("decision"))
        .collect();
    let references = store.select_nodes(
        &NodeFilter {
            kind: Some(ContentKind::Reference),
            ..base
        },
        NodeSort::Recency,
        1_000,
    )?;
    Ok(DecisionSupport {
        proposed,
        accepted,
        notes,
        references,
    })
}

/// Degrade semantic modes to BM25 when no capability is registered.
fn effective_mode(vault: &Vault, requested: RankBy, warnings: &mut Vec<String>) -> RankBy {
    match requested {
        RankBy::Semantic | RankBy::Hybrid if vault.semantic().is_none() => {
            warnings.push(
                "semantic search is not configured; falling back to relevance ranking".to_string(),
            );
            RankBy::Relevance
        }
        other => other,
    }
}

/// In-memory filter predicate matching `Store::select_nodes` semantics.
fn filter_matches(store: &Store, node: &NodeRecord, filter: &NodeFilter) -> Result<bool> {
    if !filter.include_archived && node.archived {
        return Ok(false);
    }
    if let Some(kind) = filter.kind {
        if node.kind != kind {
            return Ok(false);
        }
    }
    if let Some(subtype) = &filter.subtype {
        if node.subtype.as_deref() != Some(subtype.as_str()) {
            return Ok(false);
        }
    }
    if let Some(status) = &filter.status {
        if &node.status != status {
            return Ok(false);
        }
    }
    if let Some(topic) = &filter.topic {
        if node.topic.as_deref() != Some(topic.as_str()) {
            return Ok(false);
        }
    }
    if let Some(maturity) = &filter.maturity {
        if node.maturity.as_deref() != Some(maturity.as_str()) {
            return Ok(false);
        }
    }
    if let Some(space) = &filter.space {
        if node.kind.space() != space {
            return Ok(false);
        }
    }
    if let Some(since) = filter.since {
        if node.modified < since {
            return Ok(false);
        }
    }
    if let Some(tag) = &filter.tag {
        if !store.tags_of(&node.id)?.iter().any(|t| t == tag) {
            return Ok(false);
        }
    }
    if let Some(ids) = &filter.ids {
        if !ids.contains(&node.id) {
            return Ok(false);
        }
    }
    Ok(true)
}

struct MinMax {
    min: f64,
    max: f64,
}

impl MinMax {
    fn normalize(&self, value: f64) -> f64 {
        if self.max - self.min < f64::EPSILON {
            if self.max > 0.0 { 1.0 } else { 0.0 }
        } else {
            (value - self.min) / (self.max - self.min)
        }
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> MinMax {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut any = false;
    for v in values {
        any = true;
        min = min.min(v);
        max = max.max(v);
    }
    if !any {
        return MinMax { min: 0.0, max: 0.0 };
    }
    MinMax { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_by_parses() {
        assert_eq!("relevance".parse::<RankBy>().unwrap(), RankBy::Relevance);
        assert_eq!("hybrid".parse::<RankBy>().unwrap(), RankBy::Hybrid);
        assert!("cosine".parse::<RankBy>().is_err());
    }

    #[test]
    fn test_min_max_normalization() {
        let mm = min_max([2.0, 4.0, 6.0].into_iter());
        assert_eq!(mm.normalize(2.0), 0.0);
        assert_eq!(mm.normalize(6.0), 1.0);
        assert_eq!(mm.normalize(4.0), 0.5);

        // Degenerate range collapses to a constant.
        let flat = min_max([3.0, 3.0].into_iter());
        assert_eq!(flat.normalize(3.0), 1.0);
    }
}
