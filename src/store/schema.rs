//! DDL statements and migrations for the index database.
//!
//! The index is derived state: every table here must be reconstructible from
//! the Markdown files alone. Timestamps are stored as RFC 3339 TEXT (SQLite
//! has no native datetime type), booleans as INTEGER 0/1, and JSON payloads
//! as TEXT.

/// Current schema version. Bumped whenever DDL or migrations change.
pub const SCHEMA_VERSION: i64 = 1;

/// Core DDL executed when opening a vault at version 0.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Engine metadata -----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Nodes: one row per content item ------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        id            TEXT PRIMARY KEY,
        kind          TEXT NOT NULL,
        subtype       TEXT,
        title         TEXT NOT NULL,
        status        TEXT NOT NULL,
        maturity      TEXT,
        topic         TEXT,
        archived      INTEGER NOT NULL DEFAULT 0,
        priority      INTEGER,
        impact        INTEGER,
        effort        INTEGER,
        created       TEXT NOT NULL,
        modified      TEXT NOT NULL,
        superseded_by TEXT,
        rel_path      TEXT NOT NULL,
        -- Materialized graph metrics; NULL until materialize_metrics runs.
        pagerank      REAL,
        degree_in     INTEGER,
        degree_out    INTEGER,
        betweenness   REAL,
        cluster_id    INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_topic ON nodes(topic)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_title ON nodes(title)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_modified ON nodes(modified)",
    // -- Edges: directed relations derived from frontmatter + wikilinks -----
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        source_id     TEXT NOT NULL,
        target_id     TEXT NOT NULL,
        edge_type     TEXT NOT NULL DEFAULT 'relates',
        created       TEXT NOT NULL,
        bidirectional INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (source_id, target_id, edge_type),
        FOREIGN KEY (source_id) REFERENCES nodes(id) ON DELETE CASCADE,
        FOREIGN KEY (target_id) REFERENCES nodes(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id)",
    // -- Tag registry and memberships ----------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS tags (
        name       TEXT PRIMARY KEY,
        domain     TEXT,
        scope      TEXT,
        first_seen TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS node_tags (
        node_id TEXT NOT NULL,
        tag     TEXT NOT NULL,
        PRIMARY KEY (node_id, tag),
        FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_node_tags_tag ON node_tags(tag)",
    // -- Sequential ID counters ----------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS counters (
        name  TEXT PRIMARY KEY,
        value INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // -- Reweave audit log ----------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS reweave_log (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_ts  TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        action    TEXT NOT NULL,
        score     REAL NOT NULL,
        undone    INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reweave_batch ON reweave_log(batch_ts)",
    // -- Event write-ahead log ------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS event_wal (
        id         TEXT PRIMARY KEY,
        hook       TEXT NOT NULL,
        payload    TEXT NOT NULL,
        status     TEXT NOT NULL DEFAULT 'pending',
        retries    INTEGER NOT NULL DEFAULT 0,
        error      TEXT,
        session_id TEXT,
        created    TEXT NOT NULL,
        completed  TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_event_wal_status ON event_wal(status)",
    // -- Session log rows (mirror of the JSONL files) -------------------------
    r#"
    CREATE TABLE IF NOT EXISTS session_log (
        entry_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        ts         TEXT NOT NULL,
        message    TEXT NOT NULL,
        pin        INTEGER NOT NULL DEFAULT 0,
        cost       REAL,
        detail     TEXT,
        refs       TEXT NOT NULL DEFAULT '[]',
        metadata   TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_session_log_session ON session_log(session_id)",
    // -- Full-text index over title + body ------------------------------------
    "CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(id UNINDEXED, title, body)",
];

/// Pending migrations keyed by target version. Version 1 is the base DDL;
/// later entries append `ALTER`/`CREATE` statements only (files stay
/// authoritative, so destructive migrations are never required).
pub const MIGRATIONS: &[(i64, &[&str])] = &[(1, SCHEMA_STATEMENTS)];
