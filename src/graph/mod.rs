//! The graph engine.
//!
//! A lazily built in-memory adjacency over the `edges` table, invalidated by
//! every store commit and rebuilt on the next read. All nodes appear in the
//! snapshot, including isolated ones, so path and community queries can
//! answer for them.
//!
//! Directionality follows the majority reading of the source material:
//! betweenness (`bridges`) runs on the directed graph, constraint (`gaps`)
//! and shortest paths on the undirected view.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, VaultError};
use crate::store::{NodeMetrics, Store};

/// Maximum BFS depth `related` will honor.
pub const MAX_RELATED_DEPTH: usize = 5;

/// A scored neighbor from spreading activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedHit {
    pub id: String,
    pub score: f64,
    pub distance: usize,
}

/// A centrality-ranked node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: String,
    pub score: f64,
}

/// One detected community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub community_id: usize,
    pub size: usize,
    pub members: Vec<String>,
}

/// Undirected shortest path between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    pub length: usize,
    pub steps: Vec<String>,
}

struct Snapshot {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    generation: u64,
}

impl Snapshot {
    fn build(store: &Store) -> Result<Self> {
        let generation = store.generation();
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for node in store.all_nodes()? {
            let ix = graph.add_node(node.id.clone());
            index.insert(node.id, ix);
        }
        for edge in store.all_edges()? {
            if let (Some(&s), Some(&t)) = (index.get(&edge.source_id), index.get(&edge.target_id)) {
                graph.add_edge(s, t, ());
            }
        }
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            generation,
            "graph snapshot rebuilt"
        );
        Ok(Snapshot {
            graph,
            index,
            generation,
        })
    }

    fn undirected_neighbors(&self, ix: NodeIndex) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_undirected(ix).collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Read-mostly graph facade over the store.
pub struct GraphEngine {
    cache: Mutex<Option<Snapshot>>,
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEngine {
    pub fn new() -> Self {
        GraphEngine {
            cache: Mutex::new(None),
        }
    }

    fn with_snapshot<T>(&self, store: &Store, f: impl FnOnce(&Snapshot) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock().expect("graph cache poisoned");
        let stale = cache
            .as_ref()
            .map(|snap| snap.generation != store.generation())
            .unwrap_or(true);
        if stale {
            *cache = Some(Snapshot::build(store)?);
        }
        f(cache.as_ref().expect("snapshot present"))
    }

    /// Spreading activation: BFS on the undirected view, score `0.5^k` at
    /// hop `k`; multiple paths keep the best (shortest-hop) score.
    pub fn related(&self, store: &Store, id: &str, depth: usize, top: usize) -> Result<Vec<RelatedHit>> {
        let depth = depth.clamp(1, MAX_RELATED_DEPTH);
        self.with_snapshot(store, |snap| {
            let &start = snap
                .index
                .get(id)
                .ok_or_else(|| VaultError::NotFound(id.to_string()))?;
            let mut dist: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
            let mut queue = VecDeque::from([start]);
            let mut hits = Vec::new();
            while let Some(current) = queue.pop_front() {
                let d = dist[&current];
                if d == depth {
                    continue;
                }
                for next in snap.undirected_neighbors(current) {
                    if dist.contains_key(&next) {
                        continue;
                    }
                    dist.insert(next, d + 1);
                    queue.push_back(next);
                    hits.push(RelatedHit {
                        id: snap.graph[next].clone(),
                        score: 0.5_f64.powi((d + 1) as i32),
                        distance: d + 1,
                    });
                }
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            hits.truncate(top);
            Ok(hits)
        })
    }

    /// Directed PageRank, damping 0.85.
    pub fn rank(&self, store: &Store, top: usize) -> Result<Vec<RankedNode>> {
        self.with_snapshot(store, |snap| {
            let scores = pagerank(&snap.graph);
            let mut ranked: Vec<RankedNode> = snap
                .graph
                .node_indices()
                .map(|ix| RankedNode {
                    id: snap.graph[ix].clone(),
                    score: scores[ix.index()],
                })
                .collect();
            ranked.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            ranked.truncate(top);
            Ok(ranked)
        })
    }

    /// Community detection via weighted label propagation (the Louvain-family
    /// fallback; callers attach the backend warning). An edgeless graph
    /// yields one community per node.
    pub fn themes(&self, store: &Store) -> Result<Vec<Community>> {
        self.with_snapshot(store, |snap| Ok(communities(snap)))
    }

    /// Undirected shortest path. `src == dst` is a zero-length path.
    pub fn path(&self, store: &Store, src: &str, dst: &str) -> Result<PathResult> {
        self.with_snapshot(store, |snap| {
            let &start = snap
                .index
                .get(src)
                .ok_or_else(|| VaultError::NotFound(src.to_string()))?;
            let &goal = snap
                .index
                .get(dst)
                .ok_or_else(|| VaultError::NotFound(dst.to_string()))?;
            if start == goal {
                return Ok(PathResult {
                    length: 0,
                    steps: vec![src.to_string()],
                });
            }
            let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
            let mut queue = VecDeque::from([start]);
            let mut found = false;
            'bfs: while let Some(current) = queue.pop_front() {
                for next in snap.undirected_neighbors(current) {
                    if next == start || prev.contains_key(&next) {
                        continue;
                    }
                    prev.insert(next, current);
                    if next == goal {
                        found = true;
                        break 'bfs;
                    }
                    queue.push_back(next);
                }
            }
            if !found {
                return Err(VaultError::NoPath(src.to_string(), dst.to_string()));
            }
            let mut steps = vec![snap.graph[goal].clone()];
            let mut cursor = goal;
            while let Some(&back) = prev.get(&cursor) {
                steps.push(snap.graph[back].clone());
                cursor = back;
            }
            steps.reverse();
            Ok(PathResult {
                length: steps.len() - 1,
                steps,
            })
        })
    }

    /// Burt constraint on the undirected view; non-finite values and nodes
    /// of degree <= 1 are filtered. Low constraint marks structural gaps.
    pub fn gaps(&self, store: &Store, top: usize) -> Result<Vec<RankedNode>> {
        self.with_snapshot(store, |snap| {
            let mut ranked: Vec<RankedNode> = snap
                .graph
                .node_indices()
                .filter_map(|ix| {
                    let neighbors = snap.undirected_neighbors(ix);
                    if neighbors.len() <= 1 {
                        return None;
                    }
                    let score = constraint(snap, ix, &neighbors);
                    score.is_finite().then(|| RankedNode {
                        id: snap.graph[ix].clone(),
                        score,
                    })
                })
                .collect();
            // Lowest constraint first: these nodes bridge otherwise
            // disconnected contacts.
            ranked.sort_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            ranked.truncate(top);
            Ok(ranked)
        })
    }

    /// Directed betweenness centrality (Brandes).
    pub fn bridges(&self, store: &Store, top: usize) -> Result<Vec<RankedNode>> {
        self.with_snapshot(store, |snap| {
            let scores = betweenness(&snap.graph);
            let mut ranked: Vec<RankedNode> = snap
                .graph
                .node_indices()
                .map(|ix| RankedNode {
                    id: snap.graph[ix].clone(),
                    score: scores[ix.index()],
                })
                .filter(|r| r.score > 0.0)
                .collect();
            ranked.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            ranked.truncate(top);
            Ok(ranked)
        })
    }

    /// Compute and persist pagerank, in/out degree, betweenness and
    /// community id for every node, and flag bidirectional edges. Runs in
    /// its own transaction; returns the node count touched.
    pub fn materialize_metrics(&self, store: &Store) -> Result<usize> {
        let metrics = self.with_snapshot(store, |snap| {
            let pr = pagerank(&snap.graph);
            let bt = betweenness(&snap.graph);
            let comms = communities(snap);
            let mut cluster_of: HashMap<&str, i64> = HashMap::new();
            for community in &comms {
                for member in &community.members {
                    cluster_of.insert(member.as_str(), community.community_id as i64);
                }
            }
            let mut out = Vec::with_capacity(snap.graph.node_count());
            for ix in snap.graph.node_indices() {
                let id = snap.graph[ix].clone();
                let metrics = NodeMetrics {
                    pagerank: Some(pr[ix.index()]),
                    degree_in: Some(
                        snap.graph
                            .neighbors_directed(ix, Direction::Incoming)
                            .count() as i64,
                    ),
                    degree_out: Some(
                        snap.graph
                            .neighbors_directed(ix, Direction::Outgoing)
                            .count() as i64,
                    ),
                    betweenness: Some(bt[ix.index()]),
                    cluster_id: cluster_of.get(id.as_str()).copied(),
                };
                out.push((id, metrics));
            }
            Ok(out)
        })?;
        let count = metrics.len();
        store.with_tx(|s| {
            for (id, m) in &metrics {
                s.update_metrics(id, m)?;
            }
            s.flag_bidirectional_edges()?;
            Ok(())
        })?;
        Ok(count)
    }
}

/// Standard power-iteration PageRank over the directed graph.
fn pagerank(graph: &DiGraph<String, ()>) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    const DAMPING: f64 = 0.85;
    const EPSILON: f64 = 1e-10;
    const MAX_ITER: usize = 100;

    let out_degree: Vec<usize> = graph
        .node_indices()
        .map(|ix| graph.neighbors_directed(ix, Direction::Outgoing).count())
        .collect();
    let mut rank = vec![1.0 / n as f64; n];
    for _ in 0..MAX_ITER {
        let mut next = vec![(1.0 - DAMPING) / n as f64; n];
        let mut dangling = 0.0;
        for ix in graph.node_indices() {
            let i = ix.index();
            if out_degree[i] == 0 {
                dangling += rank[i];
                continue;
            }
            let share = DAMPING * rank[i] / out_degree[i] as f64;
            for t in graph.neighbors_directed(ix, Direction::Outgoing) {
                next[t.index()] += share;
            }
        }
        // Dangling mass is spread uniformly.
        let spread = DAMPING * dangling / n as f64;
        for value in &mut next {
            *value += spread;
        }
        let delta: f64 = rank
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .sum();
        rank = next;
        if delta < EPSILON {
            break;
        }
    }
    rank
}

/// Brandes betweenness centrality on the directed graph.
fn betweenness(graph: &DiGraph<String, ()>) -> Vec<f64> {
    let n = graph.node_count();
    let mut centrality = vec![0.0; n];
    for source in graph.node_indices() {
        let mut stack = Vec::new();
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut dist = vec![-1_i64; n];
        sigma[source.index()] = 1.0;
        dist[source.index()] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for w in graph.neighbors_directed(v, Direction::Outgoing) {
                if dist[w.index()] < 0 {
                    dist[w.index()] = dist[v.index()] + 1;
                    queue.push_back(w);
                }
                if dist[w.index()] == dist[v.index()] + 1 {
                    sigma[w.index()] += sigma[v.index()];
                    preds[w.index()].push(v.index());
                }
            }
        }
        let mut delta = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w.index()] {
                delta[v] += sigma[v] / sigma[w.index()] * (1.0 + delta[w.index()]);
            }
            if w != source {
                centrality[w.index()] += delta[w.index()];
            }
        }
    }
    centrality
}

/// Burt constraint for one node over its undirected neighborhood.
fn constraint(snap: &Snapshot, i: NodeIndex, neighbors: &[NodeIndex]) -> f64 {
    let p = 1.0 / neighbors.len() as f64;
    let mut total = 0.0;
    for &j in neighbors {
        let mut indirect = 0.0;
        for &q in neighbors {
            if q == j {
                continue;
            }
            let q_neighbors = snap.undirected_neighbors(q);
            if q_neighbors.contains(&j) {
                indirect += p * (1.0 / q_neighbors.len() as f64);
            }
        }
        let term = p + indirect;
        total += term * term;
    }
    total
}

/// Deterministic label propagation; labels start as node indices, nodes are
/// visited in stable order, ties resolve to the smallest label.
fn communities(snap: &Snapshot) -> Vec<Community> {
    let n = snap.graph.node_count();
    let mut labels: Vec<usize> = (0..n).collect();
    let mut order: Vec<NodeIndex> = snap.graph.node_indices().collect();
    order.sort_by(|a, b| snap.graph[*a].cmp(&snap.graph[*b]));

    for _ in 0..32 {
        let mut changed = false;
        for &ix in &order {
            let neighbors = snap.undirected_neighbors(ix);
            if neighbors.is_empty() {
                continue;
            }
            let mut counts: HashMap<usize, usize> = HashMap::new();
            for nb in &neighbors {
                *counts.entry(labels[nb.index()]).or_insert(0) += 1;
            }
            let best = counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(label, _)| label)
                .unwrap();
            if labels[ix.index()] != best {
                labels[ix.index()] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
    for ix in snap.graph.node_indices() {
        groups
            .entry(labels[ix.index()])
            .or_default()
            .push(snap.graph[ix].clone());
    }
    let mut communities: Vec<Community> = groups
        .into_values()
        .map(|mut members| {
            members.sort();
            Community {
                community_id: 0,
                size: members.len(),
                members,
            }
        })
        .collect();
    communities.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.members.cmp(&b.members)));
    for (i, community) in communities.iter_mut().enumerate() {
        community.community_id = i;
    }
    communities
}
