//! The derived index store.
//!
//! One SQLite database per vault holds everything the engine derives from
//! the Markdown files: node rows, the FTS5 full-text index, graph edges, the
//! tag registry, sequential counters, the reweave audit log, the event WAL,
//! and mirrored session-log rows. Files are authoritative; any state here
//! must be reproducible from them via `rebuild`.
//!
//! Writers run under a single transaction per public operation
//! ([`Store::with_tx`]); the transaction commits on success and rolls back
//! when the closure errors. Readers share the connection without locking.
//! Every commit bumps a generation counter that invalidates the graph
//! engine's cached adjacency snapshot.

pub mod schema;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, VaultError};
use crate::frontmatter::{self, Frontmatter};
use crate::ident::ContentKind;

/// Materialized graph metrics on a node row; `None` until
/// `materialize_metrics` has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub pagerank: Option<f64>,
    pub degree_in: Option<i64>,
    pub degree_out: Option<i64>,
    pub betweenness: Option<f64>,
    pub cluster_id: Option<i64>,
}

/// One row of the `nodes` table: the derived record for a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub kind: ContentKind,
    pub subtype: Option<String>,
    pub title: String,
    pub status: String,
    pub maturity: Option<String>,
    pub topic: Option<String>,
    pub archived: bool,
    pub priority: Option<i64>,
    pub impact: Option<i64>,
    pub effort: Option<i64>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub superseded_by: Option<String>,
    /// Vault-relative path of the owning file.
    pub rel_path: String,
    #[serde(flatten)]
    pub metrics: NodeMetrics,
}

impl NodeRecord {
    /// Build a node row from parsed frontmatter and its file location.
    pub fn from_frontmatter(fm: &Frontmatter, rel_path: &str, status: &str) -> Self {
        NodeRecord {
            id: fm.id.clone(),
            kind: fm.kind,
            subtype: fm.subtype.clone(),
            title: fm.title.clone(),
            status: status.to_string(),
            maturity: fm.maturity.clone(),
            topic: fm.topic.clone(),
            archived: fm.archived,
            priority: fm.priority,
            impact: fm.impact,
            effort: fm.effort,
            created: fm.created,
            modified: fm.modified,
            superseded_by: fm.superseded_by.clone(),
            rel_path: rel_path.to_string(),
            metrics: NodeMetrics::default(),
        }
    }
}

/// One directed edge row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    pub created: DateTime<Utc>,
    pub bidirectional: bool,
}

/// One reweave audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReweaveLogRow {
    pub id: i64,
    pub batch_ts: String,
    pub source_id: String,
    pub target_id: String,
    /// `add` or `prune`.
    pub action: String,
    pub score: f64,
    pub undone: bool,
}

/// One event-WAL row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRow {
    pub id: String,
    pub hook: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retries: i64,
    pub error: Option<String>,
    pub session_id: Option<String>,
    pub created: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

/// One mirrored session-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub entry_id: i64,
    pub session_id: String,
    pub ts: DateTime<Utc>,
    pub message: String,
    pub pin: bool,
    pub cost: Option<f64>,
    pub detail: Option<String>,
    pub references: Vec<String>,
    pub metadata: serde_json::Value,
}

/// One tag-registry row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRow {
    pub name: String,
    pub domain: Option<String>,
    pub scope: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// Composable node filter, ANDed field by field.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub kind: Option<ContentKind>,
    pub subtype: Option<String>,
    pub status: Option<String>,
    pub tag: Option<String>,
    pub topic: Option<String>,
    pub maturity: Option<String>,
    /// `notes` or `ops`.
    pub space: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub include_archived: bool,
    /// Restrict to an explicit ID set.
    pub ids: Option<Vec<String>>,
}

/// Sort order for `select_nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeSort {
    #[default]
    Recency,
    Title,
    Kind,
    Priority,
}

/// Serialize a timestamp the way every table stores it.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VaultError::InvalidFormat(format!("bad stored timestamp `{raw}`: {e}")))
}

/// Quote a user query for FTS5: each token is double-quoted (neutralizing
/// operator characters) and tokens are OR-joined.
pub fn fts_quote(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// The index store. Exclusive owner of all derived state.
pub struct Store {
    conn: Connection,
    generation: Cell<u64>,
    in_tx: Cell<bool>,
}

impl Store {
    /// Open or create the index at `path`: enable write-ahead logging and
    /// foreign keys, then apply pending schema migrations up to head.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::bootstrap(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Store {
            conn,
            generation: Cell::new(0),
            in_tx: Cell::new(false),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute("CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)", [])?;
        let current: i64 = self
            .meta_get("schema_version")?
            .map(|v| v.parse().unwrap_or(0))
            .unwrap_or(0);
        for &(version, statements) in schema::MIGRATIONS {
            if version <= current {
                continue;
            }
            debug!(version, "applying schema migration");
            for stmt in statements {
                self.conn.execute(stmt, []).map_err(|e| VaultError::MigrationFailed {
                    version,
                    message: e.to_string(),
                })?;
            }
            self.meta_set("schema_version", &version.to_string())
                .map_err(|e| VaultError::StampFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Monotonic commit counter; the graph snapshot caches against it.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Run `f` under one write transaction: commit on success, roll back on
    /// error. All writes belonging to a single public operation must go
    /// through one `with_tx` call.
    /// Nested calls join the enclosing transaction rather than opening a
    /// second one.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Store) -> Result<T>) -> Result<T> {
        if self.in_tx.get() {
            return f(self);
        }
        let tx = self.conn.unchecked_transaction()?;
        self.in_tx.set(true);
        let outcome = f(self);
        self.in_tx.set(false);
        match outcome {
            Ok(value) => {
                tx.commit()?;
                self.generation.set(self.generation.get() + 1);
                Ok(value)
            }
            Err(err) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                Err(err)
            }
        }
    }

    // -- meta ---------------------------------------------------------------

    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    // -- nodes --------------------------------------------------------------

    pub fn insert_node(&self, node: &NodeRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO nodes (id, kind, subtype, title, status, maturity, topic, archived,
                                priority, impact, effort, created, modified, superseded_by, rel_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                node.id,
                node.kind.as_str(),
                node.subtype,
                node.title,
                node.status,
                node.maturity,
                node.topic,
                node.archived as i64,
                node.priority,
                node.impact,
                node.effort,
                format_ts(node.created),
                format_ts(node.modified),
                node.superseded_by,
                node.rel_path,
            ],
        )?;
        Ok(())
    }

    /// Rewrite every mutable column of a node row. `id`, `kind`, `created`
    /// are deliberately not in the SET list.
    pub fn update_node(&self, node: &NodeRecord) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE nodes SET subtype = ?2, title = ?3, status = ?4, maturity = ?5, topic = ?6,
                              archived = ?7, priority = ?8, impact = ?9, effort = ?10,
                              modified = ?11, superseded_by = ?12, rel_path = ?13
             WHERE id = ?1",
            params![
                node.id,
                node.subtype,
                node.title,
                node.status,
                node.maturity,
                node.topic,
                node.archived as i64,
                node.priority,
                node.impact,
                node.effort,
                format_ts(node.modified),
                node.superseded_by,
                node.rel_path,
            ],
        )?;
        if changed == 0 {
            return Err(VaultError::NotFound(node.id.clone()));
        }
        Ok(())
    }

    /// Delete a node row; edges and tag memberships cascade, the FTS row is
    /// removed explicitly.
    pub fn delete_node(&self, id: &str) -> Result<()> {
        self.delete_fts(id)?;
        self.conn.execute("DELETE FROM nodes WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn fetch_node(&self, id: &str) -> Result<Option<NodeRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                [id],
                map_node,
            )
            .optional()?)
    }

    /// Resolve a title to a node ID by exact match.
    pub fn node_by_title(&self, title: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT id FROM nodes WHERE title = ?1 LIMIT 1", [title], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn all_nodes(&self) -> Result<Vec<NodeRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"))?;
        let rows = stmt.query_map([], map_node)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn node_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?)
    }

    /// Filtered, sorted node selection. `limit = 0` returns an empty list.
    pub fn select_nodes(&self, filter: &NodeFilter, sort: NodeSort, limit: usize) -> Result<Vec<NodeRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (where_sql, params) = filter_clause(filter);
        let order = match sort {
            NodeSort::Recency => "modified DESC",
            NodeSort::Title => "title ASC",
            NodeSort::Kind => "kind ASC, title ASC",
            NodeSort::Priority => "COALESCE(priority, 0) DESC, modified DESC",
        };
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes{where_sql} ORDER BY {order} LIMIT {limit}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map_node)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Persist materialized metrics for one node.
    pub fn update_metrics(&self, id: &str, metrics: &NodeMetrics) -> Result<()> {
        self.conn.execute(
            "UPDATE nodes SET pagerank = ?2, degree_in = ?3, degree_out = ?4,
                              betweenness = ?5, cluster_id = ?6
             WHERE id = ?1",
            params![
                id,
                metrics.pagerank,
                metrics.degree_in,
                metrics.degree_out,
                metrics.betweenness,
                metrics.cluster_id,
            ],
        )?;
        Ok(())
    }

    /// Distinct topics with node counts, most populous first.
    pub fn topics(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT topic, COUNT(*) FROM nodes
             WHERE topic IS NOT NULL AND archived = 0
             GROUP BY topic ORDER BY COUNT(*) DESC, topic ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -- full-text ----------------------------------------------------------

    pub fn upsert_fts(&self, id: &str, title: &str, body: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM nodes_fts WHERE id = ?1", [id])?;
        self.conn.execute(
            "INSERT INTO nodes_fts (id, title, body) VALUES (?1, ?2, ?3)",
            params![id, title, body],
        )?;
        Ok(())
    }

    pub fn delete_fts(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM nodes_fts WHERE id = ?1", [id])?;
        Ok(())
    }

    /// BM25-ranked full-text search. Scores are positive (higher is more
    /// relevant). Empty queries fail with `EmptyQuery`.
    pub fn fts_search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<(String, f64)>> {
        if query.trim().is_empty() {
            return Err(VaultError::EmptyQuery);
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, bm25(nodes_fts) FROM nodes_fts
             WHERE nodes_fts MATCH ?1 ORDER BY bm25(nodes_fts) LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![fts_quote(query), limit as i64, offset as i64],
            |row| {
                let id: String = row.get(0)?;
                let raw: f64 = row.get(1)?;
                Ok((id, -raw))
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// All IDs present in the FTS index (integrity scanning).
    pub fn fts_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM nodes_fts")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -- tags ---------------------------------------------------------------

    /// Replace a node's tag set and keep the registry's first-seen times.
    pub fn index_tags(&self, id: &str, tags: &[String], now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute("DELETE FROM node_tags WHERE node_id = ?1", [id])?;
        for tag in tags {
            let (domain, scope) = split_tag(tag);
            self.conn.execute(
                "INSERT OR IGNORE INTO tags (name, domain, scope, first_seen) VALUES (?1, ?2, ?3, ?4)",
                params![tag, domain, scope, format_ts(now)],
            )?;
            self.conn.execute(
                "INSERT OR IGNORE INTO node_tags (node_id, tag) VALUES (?1, ?2)",
                params![id, tag],
            )?;
        }
        Ok(())
    }

    pub fn tags_of(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM node_tags WHERE node_id = ?1 ORDER BY tag")?;
        let rows = stmt.query_map([id], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn all_tags(&self) -> Result<Vec<TagRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, domain, scope, first_seen FROM tags ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, domain, scope, first_seen) = row?;
            out.push(TagRow {
                name,
                domain,
                scope,
                first_seen: parse_ts(&first_seen)?,
            });
        }
        Ok(out)
    }

    /// Tag sets for every node at once (reweave scoring).
    pub fn tag_sets(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT node_id, tag FROM node_tags ORDER BY node_id, tag")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (node_id, tag) = row?;
            out.entry(node_id).or_default().push(tag);
        }
        Ok(out)
    }

    // -- edges --------------------------------------------------------------

    /// Recompute a node's outgoing edges from frontmatter links plus body
    /// wikilinks. Prior outgoing edges are dropped; wikilinks that resolve
    /// to no title are skipped silently. Returns the new out-degree.
    pub fn index_links(
        &self,
        id: &str,
        fm_links: &[(String, String)],
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.delete_outgoing_edges(id)?;
        let mut inserted = 0usize;
        let mut seen: Vec<(String, String)> = Vec::new();
        for (edge_type, target) in fm_links {
            if target == id || !self.node_exists(target)? {
                continue;
            }
            let key = (edge_type.clone(), target.clone());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            self.insert_edge(id, target, edge_type, now)?;
            inserted += 1;
        }
        for title in frontmatter::extract_wikilinks(body) {
            let Some(target) = self.node_by_title(&title)? else {
                continue; // Unresolved wikilinks are dropped.
            };
            if target == id {
                continue;
            }
            let key = ("relates".to_string(), target.clone());
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            self.insert_edge(id, &target, "relates", now)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub fn insert_edge(&self, source: &str, target: &str, edge_type: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO edges (source_id, target_id, edge_type, created) VALUES (?1, ?2, ?3, ?4)",
            params![source, target, edge_type, format_ts(now)],
        )?;
        Ok(())
    }

    /// Remove one edge regardless of type; returns whether anything went.
    pub fn delete_edge(&self, source: &str, target: &str) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2",
            [source, target],
        )?;
        Ok(n > 0)
    }

    pub fn delete_outgoing_edges(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM edges WHERE source_id = ?1", [id])?;
        Ok(())
    }

    pub fn outgoing_edges(&self, id: &str) -> Result<Vec<EdgeRecord>> {
        self.edge_query("SELECT source_id, target_id, edge_type, created, bidirectional FROM edges WHERE source_id = ?1 ORDER BY target_id", Some(id))
    }

    pub fn incoming_edges(&self, id: &str) -> Result<Vec<EdgeRecord>> {
        self.edge_query("SELECT source_id, target_id, edge_type, created, bidirectional FROM edges WHERE target_id = ?1 ORDER BY source_id", Some(id))
    }

    pub fn all_edges(&self) -> Result<Vec<EdgeRecord>> {
        self.edge_query(
            "SELECT source_id, target_id, edge_type, created, bidirectional FROM edges ORDER BY source_id, target_id",
            None,
        )
    }

    fn edge_query(&self, sql: &str, param: Option<&str>) -> Result<Vec<EdgeRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        };
        let rows = match param {
            Some(p) => stmt.query_map([p], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };
        let mut out = Vec::new();
        for (source_id, target_id, edge_type, created, bidirectional) in rows {
            out.push(EdgeRecord {
                source_id,
                target_id,
                edge_type,
                created: parse_ts(&created)?,
                bidirectional: bidirectional != 0,
            });
        }
        Ok(out)
    }

    pub fn out_degree(&self, id: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges WHERE source_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Flag edges whose reverse edge also exists.
    pub fn flag_bidirectional_edges(&self) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE edges SET bidirectional = CASE WHEN EXISTS (
                 SELECT 1 FROM edges AS r
                 WHERE r.source_id = edges.target_id AND r.target_id = edges.source_id
             ) THEN 1 ELSE 0 END",
            [],
        )?;
        Ok(n)
    }

    fn node_exists(&self, id: &str) -> Result<bool> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes WHERE id = ?1", [id], |row| row.get(0))?;
        Ok(n > 0)
    }

    // -- counters -----------------------------------------------------------

    /// Atomic increment under the active transaction; returns the new value.
    pub fn next_counter(&self, name: &str) -> Result<u64> {
        self.conn.execute(
            "INSERT INTO counters (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            [name],
        )?;
        let value: i64 = self.conn.query_row(
            "SELECT value FROM counters WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }

    pub fn counter_value(&self, name: &str) -> Result<u64> {
        let value: Option<i64> = self
            .conn
            .query_row("SELECT value FROM counters WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;
        Ok(value.unwrap_or(0) as u64)
    }

    /// Overwrite a counter (rebuild recalculates from the max on-disk ID).
    pub fn set_counter(&self, name: &str, value: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO counters (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value as i64],
        )?;
        Ok(())
    }

    // -- reweave log ---------------------------------------------------------

    pub fn append_reweave(
        &self,
        batch_ts: &str,
        source_id: &str,
        target_id: &str,
        action: &str,
        score: f64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO reweave_log (batch_ts, source_id, target_id, action, score) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![batch_ts, source_id, target_id, action, score],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent batch timestamp with entries not yet undone.
    pub fn reweave_latest_batch(&self) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT batch_ts FROM reweave_log WHERE undone = 0 ORDER BY batch_ts DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn reweave_batch_entries(&self, batch_ts: &str) -> Result<Vec<ReweaveLogRow>> {
        self.reweave_query(
            "SELECT id, batch_ts, source_id, target_id, action, score, undone
             FROM reweave_log WHERE batch_ts = ?1 AND undone = 0 ORDER BY id",
            Some(batch_ts),
        )
    }

    pub fn reweave_entry(&self, log_id: i64) -> Result<Option<ReweaveLogRow>> {
        let mut rows = self.reweave_query(
            &format!(
                "SELECT id, batch_ts, source_id, target_id, action, score, undone
                 FROM reweave_log WHERE id = {log_id}"
            ),
            None,
        )?;
        Ok(rows.pop())
    }

    pub fn reweave_entries_for(&self, source_id: &str) -> Result<Vec<ReweaveLogRow>> {
        self.reweave_query(
            "SELECT id, batch_ts, source_id, target_id, action, score, undone
             FROM reweave_log WHERE source_id = ?1 ORDER BY id",
            Some(source_id),
        )
    }

    fn reweave_query(&self, sql: &str, param: Option<&str>) -> Result<Vec<ReweaveLogRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok(ReweaveLogRow {
                id: row.get(0)?,
                batch_ts: row.get(1)?,
                source_id: row.get(2)?,
                target_id: row.get(3)?,
                action: row.get(4)?,
                score: row.get(5)?,
                undone: row.get::<_, i64>(6)? != 0,
            })
        };
        let rows = match param {
            Some(p) => stmt.query_map([p], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(rows)
    }

    pub fn mark_reweave_undone(&self, log_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE reweave_log SET undone = 1 WHERE id = ?1",
            [log_id],
        )?;
        Ok(())
    }

    // -- event WAL ------------------------------------------------------------

    pub fn wal_append(
        &self,
        id: &str,
        hook: &str,
        payload: &serde_json::Value,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO event_wal (id, hook, payload, status, session_id, created)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![id, hook, payload.to_string(), session_id, format_ts(now)],
        )?;
        Ok(())
    }

    pub fn wal_mark_completed(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE event_wal SET status = 'completed', error = NULL, completed = ?2 WHERE id = ?1",
            params![id, format_ts(now)],
        )?;
        Ok(())
    }

    /// Record a failed attempt; flips to `dead_letter` once retries reach
    /// the budget.
    pub fn wal_mark_failed(&self, id: &str, error: &str, max_retries: i64) -> Result<String> {
        self.conn.execute(
            "UPDATE event_wal
             SET retries = retries + 1,
                 error = ?2,
                 status = CASE WHEN retries + 1 >= ?3 THEN 'dead_letter' ELSE 'failed' END
             WHERE id = ?1",
            params![id, error, max_retries],
        )?;
        let status: String = self.conn.query_row(
            "SELECT status FROM event_wal WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(status)
    }

    pub fn wal_fetch(&self, id: &str) -> Result<Option<WalRow>> {
        let mut rows = self.wal_query(
            "SELECT id, hook, payload, status, retries, error, session_id, created, completed
             FROM event_wal WHERE id = ?1",
            Some(id),
        )?;
        Ok(rows.pop())
    }

    /// Entries drain() must progress: pending or failed, oldest first.
    pub fn wal_unsettled(&self) -> Result<Vec<WalRow>> {
        self.wal_query(
            "SELECT id, hook, payload, status, retries, error, session_id, created, completed
             FROM event_wal WHERE status IN ('pending', 'failed') ORDER BY created",
            None,
        )
    }

    pub fn wal_unsettled_for_session(&self, session_id: &str) -> Result<Vec<WalRow>> {
        self.wal_query(
            "SELECT id, hook, payload, status, retries, error, session_id, created, completed
             FROM event_wal WHERE status IN ('pending', 'failed') AND session_id = ?1 ORDER BY created",
            Some(session_id),
        )
    }

    fn wal_query(&self, sql: &str, param: Option<&str>) -> Result<Vec<WalRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        };
        let rows = match param {
            Some(p) => stmt.query_map([p], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], map)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };
        let mut out = Vec::new();
        for (id, hook, payload, status, retries, error, session_id, created, completed) in rows {
            out.push(WalRow {
                id,
                hook,
                payload: serde_json::from_str(&payload)
                    .map_err(|e| VaultError::InvalidFormat(format!("bad WAL payload: {e}")))?,
                status,
                retries,
                error,
                session_id,
                created: parse_ts(&created)?,
                completed: completed.as_deref().map(parse_ts).transpose()?,
            });
        }
        Ok(out)
    }

    // -- session log rows ------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn append_session_row(
        &self,
        session_id: &str,
        ts: DateTime<Utc>,
        message: &str,
        pin: bool,
        cost: Option<f64>,
        detail: Option<&str>,
        references: &[String],
        metadata: &serde_json::Value,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO session_log (session_id, ts, message, pin, cost, detail, refs, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session_id,
                format_ts(ts),
                message,
                pin as i64,
                cost,
                detail,
                serde_json::to_string(references).unwrap_or_else(|_| "[]".into()),
                metadata.to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn session_rows(&self, session_id: &str) -> Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, session_id, ts, message, pin, cost, detail, refs, metadata
             FROM session_log WHERE session_id = ?1 ORDER BY entry_id",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (entry_id, session_id, ts, message, pin, cost, detail, refs, metadata) = row?;
            out.push(SessionRow {
                entry_id,
                session_id,
                ts: parse_ts(&ts)?,
                message,
                pin: pin != 0,
                cost,
                detail,
                references: serde_json::from_str(&refs).unwrap_or_default(),
                metadata: serde_json::from_str(&metadata)
                    .unwrap_or(serde_json::Value::Object(Default::default())),
            });
        }
        Ok(out)
    }

    /// Sum of `cost` across a session's rows.
    pub fn session_cost(&self, session_id: &str) -> Result<f64> {
        let total: Option<f64> = self.conn.query_row(
            "SELECT SUM(cost) FROM session_log WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }

    // -- maintenance -----------------------------------------------------------

    /// Copy the whole index into `dest` (timestamped backup).
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.conn
            .execute("VACUUM INTO ?1", [dest.to_string_lossy().as_ref()])
            .map_err(|e| VaultError::BackupFailed(e.to_string()))?;
        Ok(())
    }

    /// Drop all derived rows ahead of a rebuild. Counters and the event WAL
    /// survive; everything else is reconstructed from files.
    pub fn clear_derived(&self) -> Result<()> {
        for table in ["edges", "node_tags", "tags", "reweave_log", "session_log", "nodes"] {
            self.conn.execute(&format!("DELETE FROM {table}"), [])?;
        }
        self.conn.execute("DELETE FROM nodes_fts", [])?;
        Ok(())
    }
}

const NODE_COLUMNS: &str = "id, kind, subtype, title, status, maturity, topic, archived, \
                            priority, impact, effort, created, modified, superseded_by, rel_path, \
                            pagerank, degree_in, degree_out, betweenness, cluster_id";

fn map_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    let kind_raw: String = row.get(1)?;
    let created_raw: String = row.get(11)?;
    let modified_raw: String = row.get(12)?;
    let invalid = |msg: String| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            msg.into(),
        )
    };
    Ok(NodeRecord {
        id: row.get(0)?,
        kind: kind_raw.parse().map_err(invalid)?,
        subtype: row.get(2)?,
        title: row.get(3)?,
        status: row.get(4)?,
        maturity: row.get(5)?,
        topic: row.get(6)?,
        archived: row.get::<_, i64>(7)? != 0,
        priority: row.get(8)?,
        impact: row.get(9)?,
        effort: row.get(10)?,
        created: DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid(e.to_string()))?,
        modified: DateTime::parse_from_rfc3339(&modified_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid(e.to_string()))?,
        superseded_by: row.get(13)?,
        rel_path: row.get(14)?,
        metrics: NodeMetrics {
            pagerank: row.get(15)?,
            degree_in: row.get(16)?,
            degree_out: row.get(17)?,
            betweenness: row.get(18)?,
            cluster_id: row.get(19)?,
        },
    })
}

/// Split `domain/scope` tags; plain tags carry no scope.
fn split_tag(tag: &str) -> (Option<String>, Option<String>) {
    match tag.split_once('/') {
        Some((domain, scope)) => (Some(domain.to_string()), Some(scope.to_string())),
        None => (Some(tag.to_string()), None),
    }
}

fn bind_clause(clauses: &mut Vec<String>, params: &mut Vec<String>, clause: &str, value: String) {
    params.push(value);
    clauses.push(clause.replace("?N", &format!("?{}", params.len())));
}

fn filter_clause(filter: &NodeFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(kind) = filter.kind {
        bind_clause(&mut clauses, &mut params, "kind = ?N", kind.as_str().to_string());
    }
    if let Some(subtype) = &filter.subtype {
        bind_clause(&mut clauses, &mut params, "subtype = ?N", subtype.clone());
    }
    if let Some(status) = &filter.status {
        bind_clause(&mut clauses, &mut params, "status = ?N", status.clone());
    }
    if let Some(topic) = &filter.topic {
        bind_clause(&mut clauses, &mut params, "topic = ?N", topic.clone());
    }
    if let Some(maturity) = &filter.maturity {
        bind_clause(&mut clauses, &mut params, "maturity = ?N", maturity.clone());
    }
    if let Some(tag) = &filter.tag {
        bind_clause(
            &mut clauses,
            &mut params,
            "id IN (SELECT node_id FROM node_tags WHERE tag = ?N)",
            tag.clone(),
        );
    }
    if let Some(space) = &filter.space {
        match space.as_str() {
            "notes" => clauses.push("kind IN ('note', 'reference')".to_string()),
            "ops" => clauses.push("kind IN ('task', 'log')".to_string()),
            other => bind_clause(&mut clauses, &mut params, "kind = ?N", other.to_string()),
        }
    }
    if let Some(since) = filter.since {
        bind_clause(&mut clauses, &mut params, "modified >= ?N", format_ts(since));
    }
    if !filter.include_archived {
        clauses.push("archived = 0".to_string());
    }
    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            clauses.push("1 = 0".to_string());
        } else {
            let mut placeholders = Vec::new();
            for id in ids {
                params.push(id.clone());
                placeholders.push(format!("?{}", params.len()));
            }
            clauses.push(format!("id IN ({})", placeholders.join(", ")));
        }
    }
    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 10, 0, 0).unwrap()
    }

    fn node(id: &str, title: &str) -> NodeRecord {
        NodeRecord {
            id: id.into(),
            kind: ContentKind::Note,
            subtype: None,
            title: title.into(),
            status: "draft".into(),
            maturity: None,
            topic: None,
            archived: false,
            priority: None,
            impact: None,
            effort: None,
            created: now(),
            modified: now(),
            superseded_by: None,
            rel_path: format!("notes/{id}.md"),
            metrics: NodeMetrics::default(),
        }
    }

    #[test]
    fn test_node_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let n = node("note_0000000000000001", "Alpha");
        store.with_tx(|s| s.insert_node(&n)).unwrap();
        let fetched = store.fetch_node("note_0000000000000001").unwrap().unwrap();
        assert_eq!(fetched, n);
        assert_eq!(store.node_by_title("Alpha").unwrap().unwrap(), n.id);
        assert!(store.fetch_node("note_ffffffffffffffff").unwrap().is_none());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.with_tx(|s| {
            s.insert_node(&node("note_0000000000000002", "Beta"))?;
            Err(VaultError::EmptyQuery)
        });
        assert!(result.is_err());
        assert!(store.fetch_node("note_0000000000000002").unwrap().is_none());
        // A successful transaction bumps the generation.
        let before = store.generation();
        store
            .with_tx(|s| s.insert_node(&node("note_0000000000000003", "Gamma")))
            .unwrap();
        assert_eq!(store.generation(), before + 1);
    }

    #[test]
    fn test_fts_search_and_empty_query() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                for (id, title, body) in [
                    ("note_0000000000000010", "Rust ownership", "borrow checker moves values"),
                    ("note_0000000000000011", "Gardening", "tomatoes and beans"),
                ] {
                    s.insert_node(&node(id, title))?;
                    s.upsert_fts(id, title, body)?;
                }
                Ok(())
            })
            .unwrap();
        let hits = store.fts_search("borrow", 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "note_0000000000000010");
        assert!(hits[0].1 > 0.0);

        assert!(matches!(
            store.fts_search("   ", 10, 0),
            Err(VaultError::EmptyQuery)
        ));

        // Operator characters are neutralized by quoting.
        assert!(store.fts_search("borrow AND (", 10, 0).is_ok());
    }

    #[test]
    fn test_index_links_from_frontmatter_and_wikilinks() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                s.insert_node(&node("note_00000000000000aa", "Source"))?;
                s.insert_node(&node("note_00000000000000bb", "Target One"))?;
                s.insert_node(&node("note_00000000000000cc", "Target Two"))?;
                Ok(())
            })
            .unwrap();
        let n = store
            .with_tx(|s| {
                s.index_links(
                    "note_00000000000000aa",
                    &[("relates".into(), "note_00000000000000bb".into())],
                    "Body mentions [[Target Two]] and [[Nowhere]].",
                    now(),
                )
            })
            .unwrap();
        assert_eq!(n, 2);
        let out = store.outgoing_edges("note_00000000000000aa").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(store.out_degree("note_00000000000000aa").unwrap(), 2);

        // Reindex replaces, never accumulates.
        let n = store
            .with_tx(|s| s.index_links("note_00000000000000aa", &[], "", now()))
            .unwrap();
        assert_eq!(n, 0);
        assert!(store.outgoing_edges("note_00000000000000aa").unwrap().is_empty());
    }

    #[test]
    fn test_edges_cascade_on_node_delete() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                s.insert_node(&node("note_00000000000000d1", "D1"))?;
                s.insert_node(&node("note_00000000000000d2", "D2"))?;
                s.insert_edge("note_00000000000000d1", "note_00000000000000d2", "relates", now())?;
                Ok(())
            })
            .unwrap();
        store
            .with_tx(|s| s.delete_node("note_00000000000000d2"))
            .unwrap();
        assert!(store.all_edges().unwrap().is_empty());
    }

    #[test]
    fn test_counters_are_monotonic() {
        let store = Store::open_in_memory().unwrap();
        let a = store.with_tx(|s| s.next_counter("task")).unwrap();
        let b = store.with_tx(|s| s.next_counter("task")).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.counter_value("task").unwrap(), 2);
        assert_eq!(store.counter_value("log").unwrap(), 0);
    }

    #[test]
    fn test_tag_registry_keeps_first_seen() {
        let store = Store::open_in_memory().unwrap();
        let later = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        store
            .with_tx(|s| {
                s.insert_node(&node("note_00000000000000e1", "Tagged"))?;
                s.index_tags("note_00000000000000e1", &["rust/async".into()], now())?;
                s.index_tags(
                    "note_00000000000000e1",
                    &["rust/async".into(), "plain".into()],
                    later,
                )?;
                Ok(())
            })
            .unwrap();
        let tags = store.all_tags().unwrap();
        assert_eq!(tags.len(), 2);
        let rust = tags.iter().find(|t| t.name == "rust/async").unwrap();
        assert_eq!(rust.domain.as_deref(), Some("rust"));
        assert_eq!(rust.scope.as_deref(), Some("async"));
        assert_eq!(rust.first_seen, now());
        assert_eq!(
            store.tags_of("note_00000000000000e1").unwrap(),
            vec!["plain", "rust/async"]
        );
    }

    #[test]
    fn test_wal_retry_flow() {
        let store = Store::open_in_memory().unwrap();
        let payload = serde_json::json!({"id": "note_1"});
        store
            .with_tx(|s| s.wal_append("evt-1", "post_create", &payload, None, now()))
            .unwrap();
        assert_eq!(store.wal_unsettled().unwrap().len(), 1);

        let status = store.wal_mark_failed("evt-1", "boom", 3).unwrap();
        assert_eq!(status, "failed");
        let status = store.wal_mark_failed("evt-1", "boom", 3).unwrap();
        assert_eq!(status, "failed");
        let status = store.wal_mark_failed("evt-1", "boom", 3).unwrap();
        assert_eq!(status, "dead_letter");
        assert!(store.wal_unsettled().unwrap().is_empty());

        store
            .with_tx(|s| s.wal_append("evt-2", "post_update", &payload, Some("LOG-0001"), now()))
            .unwrap();
        store.wal_mark_completed("evt-2", now()).unwrap();
        let row = store.wal_fetch("evt-2").unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.completed.is_some());
    }

    #[test]
    fn test_select_nodes_filters_compose() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                let mut a = node("note_00000000000000f1", "Filtered");
                a.topic = Some("rust".into());
                a.status = "linked".into();
                s.insert_node(&a)?;
                let mut b = node("note_00000000000000f2", "Archived");
                b.archived = true;
                s.insert_node(&b)?;
                let mut t = node("TASK-0001", "A task");
                t.kind = ContentKind::Task;
                t.status = "inbox".into();
                t.rel_path = "ops/tasks/TASK-0001.md".into();
                s.insert_node(&t)?;
                Ok(())
            })
            .unwrap();

        let mut filter = NodeFilter {
            topic: Some("rust".into()),
            status: Some("linked".into()),
            ..Default::default()
        };
        let hits = store.select_nodes(&filter, NodeSort::Recency, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "note_00000000000000f1");

        // Archived rows are hidden unless asked for.
        filter = NodeFilter::default();
        assert_eq!(store.select_nodes(&filter, NodeSort::Title, 10).unwrap().len(), 2);
        filter.include_archived = true;
        assert_eq!(store.select_nodes(&filter, NodeSort::Title, 10).unwrap().len(), 3);

        // Space filter.
        filter = NodeFilter {
            space: Some("ops".into()),
            ..Default::default()
        };
        let ops = store.select_nodes(&filter, NodeSort::Recency, 10).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, "TASK-0001");

        // limit = 0 is an empty result, not an error.
        assert!(store
            .select_nodes(&NodeFilter::default(), NodeSort::Recency, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_session_rows_and_cost() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                s.append_session_row(
                    "LOG-0001",
                    now(),
                    "started",
                    false,
                    Some(0.25),
                    None,
                    &[],
                    &serde_json::json!({}),
                )?;
                s.append_session_row(
                    "LOG-0001",
                    now(),
                    "created note",
                    true,
                    Some(1.5),
                    Some("create"),
                    &["note_00000000000000aa".to_string()],
                    &serde_json::json!({"kind": "note"}),
                )?;
                Ok(())
            })
            .unwrap();
        let rows = store.session_rows("LOG-0001").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].pin);
        assert_eq!(rows[1].references, vec!["note_00000000000000aa"]);
        assert!((store.session_cost("LOG-0001").unwrap() - 1.75).abs() < 1e-9);
    }

    #[test]
    fn test_reweave_log_batches() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                s.append_reweave("b1", "note_a", "note_b", "add", 0.8)?;
                s.append_reweave("b2", "note_a", "note_c", "prune", 0.3)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.reweave_latest_batch().unwrap().unwrap(), "b2");
        let entries = store.reweave_batch_entries("b2").unwrap();
        assert_eq!(entries.len(), 1);
        store.with_tx(|s| s.mark_reweave_undone(entries[0].id)).unwrap();
        assert_eq!(store.reweave_latest_batch().unwrap().unwrap(), "b1");
    }

    #[test]
    fn test_clear_derived_preserves_counters() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|s| {
                s.insert_node(&node("note_00000000000000a9", "Gone"))?;
                s.next_counter("task")?;
                Ok(())
            })
            .unwrap();
        store.with_tx(|s| s.clear_derived()).unwrap();
        assert_eq!(store.node_count().unwrap(), 0);
        assert_eq!(store.counter_value("task").unwrap(), 1);
    }
}
