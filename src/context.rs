//! Context assembly: token-budgeted payloads for an external agent.
//!
//! Five layers, cheapest-to-drop last: Layer 0 (identity + methodology) and
//! Layer 1 (active session, recent decisions, work queue) always ship;
//! Layers 2-4 (topic matches, graph-adjacent material, background) are
//! budget-bound and stop filling once the budget is spent. Token counts are
//! estimated at four characters per token.

use serde::Serialize;
use tracing::instrument;

use crate::errors::Result;
use crate::ident::ContentKind;
use crate::query;
use crate::session;
use crate::store::{NodeFilter, NodeSort};
use crate::vault::Vault;

/// Request parameters for `assemble`.
#[derive(Debug, Clone, Default)]
pub struct ContextRequest {
    pub topic: Option<String>,
    /// Token budget; defaults to `agent.context.default_budget`.
    pub budget: Option<usize>,
    /// Read Layer-1 log entries from the file start instead of the latest
    /// checkpoint.
    pub ignore_checkpoints: bool,
}

/// One assembled layer.
#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    pub layer: u8,
    pub name: String,
    pub tokens: usize,
    pub content: String,
}

/// Budget pressure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pressure {
    /// More than 15% of the budget remains.
    Normal,
    /// Between 0 and 15% remains.
    Caution,
    /// The budget was exceeded.
    Exceeded,
}

/// The assembled payload.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPayload {
    pub layers: Vec<Layer>,
    pub total_tokens: usize,
    pub budget: usize,
    pub remaining: i64,
    pub pressure: Pressure,
}

/// Rough token estimate: four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Assemble a context payload.
#[instrument(skip(vault, req))]
pub fn assemble(vault: &Vault, req: &ContextRequest) -> Result<ContextPayload> {
    let store = vault.store();
    let config = vault.config();
    let budget = req.budget.unwrap_or(config.agent.context.default_budget);
    let mut layers = Vec::new();
    let mut total = 0usize;

    // Layer 0: identity + methodology, always present.
    let mut l0 = String::new();
    for name in ["identity", "methodology"] {
        let path = vault.root().join("self").join(format!("{name}.md"));
        if let Ok(text) = std::fs::read_to_string(&path) {
            l0.push_str(&text);
            l0.push('\n');
        }
    }
    total += push_layer(&mut layers, 0, "identity", l0);

    // Layer 1: active session, recent decisions, work queue. Always present.
    let mut l1 = String::new();
    let active = session::active_session(store)?;
    if let Some(active) = &active {
        l1.push_str(&format!("# Active session: {} ({})\n", active.title, active.id));
        let rows = store.session_rows(&active.id)?;
        for row in session::layer_entries(&rows, req.ignore_checkpoints) {
            l1.push_str(&format!("- {}\n", row.message));
        }
    } else {
        l1.push_str("# No active session\n");
    }
    let decisions = store.select_nodes(
        &NodeFilter {
            kind: Some(ContentKind::Note),
            subtype: Some("decision".to_string()),
            ..Default::default()
        },
        NodeSort::Recency,
        5,
    )?;
    if !decisions.is_empty() {
        l1.push_str("\n# Recent decisions\n");
        for d in &decisions {
            l1.push_str(&format!("- [{}] {} ({})\n", d.status, d.title, d.id));
        }
    }
    let queue = query::work_queue(vault, None)?;
    if !queue.is_empty() {
        l1.push_str("\n# Work queue\n");
        for item in queue.iter().take(5) {
            l1.push_str(&format!("- [{}] {} ({:.1})\n", item.status, item.title, item.score));
        }
    }
    total += push_layer(&mut layers, 1, "session", l1);

    // Layer 2: topic-matched notes, references, decisions. Budget-bound.
    let topic = req
        .topic
        .clone()
        .or_else(|| active.as_ref().and_then(|a| a.topic.clone()));
    if let Some(topic) = &topic {
        let mut l2 = String::new();
        let mut l2_ids = Vec::new();
        let matches = store.select_nodes(
            &NodeFilter {
                topic: Some(topic.clone()),
                space: Some("notes".to_string()),
                ..Default::default()
            },
            NodeSort::Recency,
            config.agent.context.layer_2_max_notes,
        )?;
        for node in matches {
            let body = read_excerpt(vault, &node.rel_path, 400);
            let section = format!("## {} ({})\n{}\n", node.title, node.id, body);
            if total + estimate_tokens(&l2) + estimate_tokens(&section) > budget {
                break;
            }
            l2.push_str(&section);
            l2_ids.push(node.id.clone());
        }
        total += push_layer(&mut layers, 2, "topic", l2);

        // Layer 3: graph-adjacent to Layer 2. Budget-bound, titles only.
        let mut l3 = String::new();
        let hops = config.agent.context.layer_3_max_hops.max(1);
        for id in &l2_ids {
            for hit in vault.graph().related(store, id, hops, 5)? {
                if l2_ids.contains(&hit.id) {
                    continue;
                }
                if let Some(node) = store.fetch_node(&hit.id)? {
                    let line = format!("- {} ({}, {:.2})\n", node.title, node.id, hit.score);
                    if total + estimate_tokens(&l3) + estimate_tokens(&line) > budget {
                        break;
                    }
                    if !l3.contains(&node.id) {
                        l3.push_str(&line);
                    }
                }
            }
        }
        total += push_layer(&mut layers, 3, "adjacent", l3);
    }

    // Layer 4: background. Budget-bound.
    let mut l4 = String::new();
    let recent = store.select_nodes(&NodeFilter::default(), NodeSort::Recency, 5)?;
    for node in recent {
        let line = format!("- {} ({}, {})\n", node.title, node.id, node.status);
        if total + estimate_tokens(&l4) + estimate_tokens(&line) > budget {
            break;
        }
        l4.push_str(&line);
    }
    if let Ok(gaps) = vault.graph().gaps(store, 3) {
        for gap in gaps {
            let line = format!("- structural gap at {} ({:.3})\n", gap.id, gap.score);
            if total + estimate_tokens(&l4) + estimate_tokens(&line) > budget {
                break;
            }
            l4.push_str(&line);
        }
    }
    total += push_layer(&mut layers, 4, "background", l4);

    let remaining = budget as i64 - total as i64;
    let pressure = if remaining < 0 {
        Pressure::Exceeded
    } else if (remaining as f64) / (budget.max(1) as f64) <= 0.15 {
        Pressure::Caution
    } else {
        Pressure::Normal
    };
    Ok(ContextPayload {
        layers,
        total_tokens: total,
        budget,
        remaining,
        pressure,
    })
}

fn push_layer(layers: &mut Vec<Layer>, number: u8, name: &str, content: String) -> usize {
    let tokens = estimate_tokens(&content);
    layers.push(Layer {
        layer: number,
        name: name.to_string(),
        tokens,
        content,
    });
    tokens
}

fn read_excerpt(vault: &Vault, rel_path: &str, max_chars: usize) -> String {
    let Ok(text) = std::fs::read_to_string(vault.root().join(rel_path)) else {
        return String::new();
    };
    let body = crate::frontmatter::parse_document(&text)
        .map(|(_, body)| body)
        .unwrap_or(text);
    body.chars().take(max_chars).collect()
}
