//! Session, crash-recovery, and files-are-truth scenarios.

mod common;

use common::{init_vault, note_spec, quiet_opts, sync_opts};
use verdant::context::ContextRequest;
use verdant::model::ChangeSet;
use verdant::pipeline::create;
use verdant::pipeline::update;
use verdant::session::{self, EntryOptions};
use verdant::{ContentKind, CreateSpec, Vault};

fn topical_spec(title: &str, session_id: &str) -> CreateSpec {
    CreateSpec {
        title: title.to_string(),
        topic: Some("looms".to_string()),
        tags: vec!["craft/weaving".to_string()],
        body: Some("Warp and weft cross under tension on the loom.\n".to_string()),
        session: Some(session_id.to_string()),
        cost: Some(0.25),
        ..Default::default()
    }
}

/// S4: close runs the enrichment pipeline and drains the WAL.
#[test]
fn session_close_enrichment() {
    let (_dir, vault) = init_vault();
    let start = session::start(&vault, "loom research", sync_opts()).unwrap();
    assert_eq!(start.session_id, "LOG-0001");

    let m = create::create(
        &vault,
        ContentKind::Note,
        topical_spec("Warp tension", &start.session_id),
        quiet_opts(),
    )
    .unwrap()
    .id;
    let n = create::create(
        &vault,
        ContentKind::Note,
        topical_spec("Weft insertion", &start.session_id),
        quiet_opts(),
    )
    .unwrap()
    .id;

    session::log_entry(
        &vault,
        "comparing shuttle designs",
        EntryOptions {
            pin: true,
            cost: Some(0.5),
            ..Default::default()
        },
    )
    .unwrap();

    let outcome = session::close(&vault, Some("looms mapped"), sync_opts()).unwrap();
    assert_eq!(outcome.session_id, start.session_id);
    assert!(outcome.metrics_nodes >= 3);
    // Enrichment counters are reported, never negative by type; the reweave
    // and orphan passes had shared-topic material to work with.
    assert!(outcome.reweave_count + outcome.orphan_count > 0);

    // The JSONL file holds start, per-create, custom, and close records in
    // order.
    let text = std::fs::read_to_string(vault.root().join(&start.path)).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines[0]["type"], "session_start");
    assert_eq!(lines.last().unwrap()["type"], "session_close");
    let entry_count = lines.iter().filter(|l| l["type"] == "entry").count();
    assert_eq!(entry_count, 3); // two creates + one explicit entry

    // Graph metrics materialized.
    let node = vault.store().fetch_node(&m).unwrap().unwrap();
    assert!(node.metrics.pagerank.is_some());

    // The WAL is fully drained: nothing pending or failed.
    assert!(vault.store().wal_unsettled().unwrap().is_empty());

    // The session node is closed; a new session can start.
    assert_eq!(
        vault.store().fetch_node(&start.session_id).unwrap().unwrap().status,
        "closed"
    );
    assert!(session::active_session(vault.store()).unwrap().is_none());
    let _ = n;
}

/// Single-active-session invariant, reopen semantics, and cost reporting.
#[test]
fn session_invariants_and_cost() {
    let (_dir, vault) = init_vault();
    let first = session::start(&vault, "first", sync_opts()).unwrap();

    // A second session cannot open.
    let err = session::start(&vault, "second", sync_opts()).unwrap_err();
    assert_eq!(err.code(), "ActiveSessionExists");

    session::log_entry(
        &vault,
        "spent some budget",
        EntryOptions {
            cost: Some(1.5),
            ..Default::default()
        },
    )
    .unwrap();

    // Cost is a report, not a gate: over budget still succeeds.
    let report = session::cost(&vault, Some(1.0)).unwrap();
    assert!(report.total_cost >= 1.5);
    assert_eq!(report.over_budget, Some(true));
    let report = session::cost(&vault, None).unwrap();
    assert!(report.budget.is_none());

    session::close(&vault, None, sync_opts()).unwrap();
    assert_eq!(session::cost(&vault, None).unwrap_err().code(), "NoActiveSession");

    // Reopen flips the log back to open; uniquely, logs can cycle.
    let reopened = session::reopen(&vault, &first.session_id, sync_opts()).unwrap();
    assert_eq!(reopened.session_id, first.session_id);
    let err = session::reopen(&vault, &first.session_id, sync_opts()).unwrap_err();
    assert_eq!(err.code(), "AlreadyOpen");
    session::close(&vault, None, sync_opts()).unwrap();

    // At most one open log node ever existed.
    let open_logs = vault
        .store()
        .all_nodes()
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == ContentKind::Log && n.status == "open")
        .count();
    assert_eq!(open_logs, 0);
}

/// Context assembly: layered payload with budget accounting.
#[test]
fn context_assembly() {
    let (_dir, vault) = init_vault();
    let start = session::start(&vault, "looms", sync_opts()).unwrap();
    create::create(
        &vault,
        ContentKind::Note,
        topical_spec("Warp tension", &start.session_id),
        quiet_opts(),
    )
    .unwrap();
    session::log_entry(&vault, "before checkpoint", EntryOptions::default()).unwrap();
    session::log_entry(
        &vault,
        "checkpoint reached",
        EntryOptions {
            metadata: serde_json::json!({"checkpoint": true}),
            ..Default::default()
        },
    )
    .unwrap();
    session::log_entry(&vault, "after checkpoint", EntryOptions::default()).unwrap();

    let payload = verdant::context::assemble(
        &vault,
        &ContextRequest {
            topic: Some("looms".to_string()),
            budget: Some(4000),
            ignore_checkpoints: false,
        },
    )
    .unwrap();
    assert_eq!(payload.budget, 4000);
    assert!(payload.total_tokens > 0);
    assert_eq!(payload.layers[0].layer, 0);
    let session_layer = &payload.layers[1];
    assert!(session_layer.content.contains("after checkpoint"));
    assert!(!session_layer.content.contains("before checkpoint"));
    let topic_layer = payload.layers.iter().find(|l| l.name == "topic").unwrap();
    assert!(topic_layer.content.contains("Warp tension"));

    // Ignoring checkpoints surfaces the whole log.
    let full = verdant::context::assemble(
        &vault,
        &ContextRequest {
            topic: None,
            budget: None,
            ignore_checkpoints: true,
        },
    )
    .unwrap();
    assert!(full.layers[1].content.contains("before checkpoint"));

    // A tiny budget reports pressure.
    let tight = verdant::context::assemble(
        &vault,
        &ContextRequest {
            topic: Some("looms".to_string()),
            budget: Some(10),
            ignore_checkpoints: false,
        },
    )
    .unwrap();
    assert_eq!(tight.pressure, verdant::context::Pressure::Exceeded);
}

/// S5: a WAL row stranded by a crash is observable after reopen and is
/// progressed by drain.
#[test]
fn crash_recovery_equivalence() {
    let (dir, vault) = init_vault();
    let root = vault.root().to_path_buf();
    create::create(&vault, ContentKind::Note, note_spec("Survivor"), quiet_opts()).unwrap();

    // Simulate a crash between index commit and hook completion: the WAL
    // row exists, pending, and no dispatcher ever ran.
    vault
        .store()
        .with_tx(|s| {
            s.wal_append(
                "crash-evt",
                "post_create",
                &serde_json::json!({"id": "note_x", "title": "Survivor"}),
                None,
                chrono::Utc::now(),
            )
        })
        .unwrap();
    drop(vault);

    // Restart.
    let vault = Vault::open(&root).unwrap();
    let rows = vault.store().wal_unsettled().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "pending");

    // The index itself is healthy.
    let env = vault.check();
    assert!(env.ok);
    assert_eq!(env.data.as_ref().unwrap()["healthy"], true);

    // Drain progresses the stranded entry to a terminal status.
    let env = vault.drain_events();
    assert!(env.ok);
    let row = vault.store().wal_fetch("crash-evt").unwrap().unwrap();
    assert!(row.status == "completed" || row.status == "dead_letter");
    drop(dir);
}

/// S6: rebuild from files reproduces the index; bodies are byte-identical.
#[test]
fn files_are_truth_round_trip() {
    let (_dir, vault) = init_vault();

    // One of every kind, including a supersession pair and a garden seed.
    let knowledge = create::create(
        &vault,
        ContentKind::Note,
        CreateSpec {
            subtype: Some("knowledge".into()),
            body: Some("## Distilled\n\nKey points live here.\n".into()),
            ..note_spec("Distilled insight")
        },
        quiet_opts(),
    )
    .unwrap()
    .id;
    let d1 = create::create(
        &vault,
        ContentKind::Note,
        CreateSpec {
            subtype: Some("decision".into()),
            ..note_spec("Choose sqlite")
        },
        quiet_opts(),
    )
    .unwrap()
    .id;
    update::update(
        &vault,
        &d1,
        ChangeSet {
            status: Some("accepted".into()),
            ..Default::default()
        },
        quiet_opts(),
    )
    .unwrap();
    let d2 = create::create(
        &vault,
        ContentKind::Note,
        CreateSpec {
            subtype: Some("decision".into()),
            ..note_spec("Choose postgres")
        },
        quiet_opts(),
    )
    .unwrap()
    .id;
    update::supersede(&vault, &d1, &d2, quiet_opts()).unwrap();
    create::create(
        &vault,
        ContentKind::Reference,
        CreateSpec {
            subtype: Some("article".into()),
            url: Some("https://example.test/paper".into()),
            ..note_spec("The Paper")
        },
        quiet_opts(),
    )
    .unwrap();
    create::create(
        &vault,
        ContentKind::Task,
        CreateSpec {
            priority: Some(2),
            ..note_spec("Wire it up")
        },
        quiet_opts(),
    )
    .unwrap();
    let seed = create::create(
        &vault,
        ContentKind::Note,
        CreateSpec {
            maturity: Some("seed".into()),
            body: Some("A seed referencing [[Distilled insight]].\n".to_string()),
            ..note_spec("Young idea")
        },
        quiet_opts(),
    )
    .unwrap()
    .id;
    let start = session::start(&vault, "capture", sync_opts()).unwrap();
    session::log_entry(&vault, "captured a batch", EntryOptions::default()).unwrap();
    session::close(&vault, Some("done"), sync_opts()).unwrap();

    // Snapshot the pre-corruption derived state.
    let nodes_before: Vec<_> = vault
        .store()
        .all_nodes()
        .unwrap()
        .into_iter()
        .map(|n| (n.id.clone(), n.kind, n.status.clone(), n.title.clone()))
        .collect();
    let edges_before = common::edge_pairs(&vault);
    let bodies_before: Vec<(String, String)> = nodes_before
        .iter()
        .filter(|(_, kind, _, _)| *kind != ContentKind::Log)
        .map(|(id, _, _, _)| (id.clone(), verdant::query::get(&vault, id).unwrap().body))
        .collect();
    assert!(edges_before.contains(&(seed.clone(), knowledge.clone())));

    // Corrupt the index by truncating the derived tables.
    vault.store().with_tx(|s| s.clear_derived()).unwrap();
    assert_eq!(vault.store().node_count().unwrap(), 0);

    // Rebuild from files.
    let env = vault.rebuild();
    assert!(env.ok, "rebuild failed: {:?}", env.error);
    let data = env.data.unwrap();
    assert_eq!(data["nodes"].as_u64().unwrap() as usize, nodes_before.len());
    assert_eq!(data["counters"]["task"], 1);
    assert_eq!(data["counters"]["log"], 1);

    // Same nodes, same statuses, same edges.
    let nodes_after: Vec<_> = vault
        .store()
        .all_nodes()
        .unwrap()
        .into_iter()
        .map(|n| (n.id.clone(), n.kind, n.status.clone(), n.title.clone()))
        .collect();
    assert_eq!(nodes_before, nodes_after);
    assert_eq!(edges_before, common::edge_pairs(&vault));

    // Healthy, and bodies read back byte-identical.
    let env = vault.check();
    assert_eq!(env.data.as_ref().unwrap()["healthy"], true);
    for (id, body) in bodies_before {
        assert_eq!(verdant::query::get(&vault, &id).unwrap().body, body);
    }

    // Counters resume past the rebuilt maximum.
    let next_task = create::create(&vault, ContentKind::Task, note_spec("Next task"), quiet_opts())
        .unwrap()
        .id;
    assert_eq!(next_task, "TASK-0002");
    let _ = start;
}

/// Search ranking modes and the semantic fallback warning.
#[test]
fn search_modes_and_semantic_fallback() {
    let (_dir, vault) = init_vault();
    create::create(
        &vault,
        ContentKind::Note,
        CreateSpec {
            body: Some("The borrow checker enforces aliasing rules.\n".into()),
            ..note_spec("Rust ownership")
        },
        quiet_opts(),
    )
    .unwrap();
    create::create(
        &vault,
        ContentKind::Note,
        CreateSpec {
            body: Some("Tomatoes need staking.\n".into()),
            ..note_spec("Garden beds")
        },
        quiet_opts(),
    )
    .unwrap();

    let hits = verdant::query::search(
        &vault,
        "borrow checker",
        verdant::query::RankBy::Relevance,
        &verdant::store::NodeFilter::default(),
        10,
    )
    .unwrap();
    assert_eq!(hits.results.len(), 1);
    assert_eq!(hits.results[0].title, "Rust ownership");

    // Semantic without a capability: success, warning, relevance order.
    let hits = verdant::query::search(
        &vault,
        "borrow checker",
        verdant::query::RankBy::Semantic,
        &verdant::store::NodeFilter::default(),
        10,
    )
    .unwrap();
    assert_eq!(hits.results.len(), 1);
    assert!(hits.warnings.iter().any(|w| w.contains("semantic")));

    // Graph mode before materialization warns and still returns results.
    let hits = verdant::query::search(
        &vault,
        "borrow checker",
        verdant::query::RankBy::Graph,
        &verdant::store::NodeFilter::default(),
        10,
    )
    .unwrap();
    assert!(hits.warnings.iter().any(|w| w.contains("materialized")));
}
