//! Content lifecycle scenarios: note status transitions, decision
//! immutability, garden body protection, batch atomicity, and the boundary
//! behaviors of the query surface.

mod common;

use std::collections::BTreeMap;

use common::{edge_pairs, init_vault, note_spec, quiet_note, quiet_opts};
use verdant::model::ChangeSet;
use verdant::pipeline::create::{self, BatchItem, BatchMode};
use verdant::pipeline::update;
use verdant::store::{NodeFilter, NodeSort};
use verdant::{ContentKind, CreateSpec, VaultError};

fn links_to(ids: &[&str]) -> ChangeSet {
    let mut links = BTreeMap::new();
    links.insert(
        "relates".to_string(),
        ids.iter().map(|s| s.to_string()).collect(),
    );
    ChangeSet {
        links: Some(links),
        ..Default::default()
    }
}

/// S1: note status follows the outgoing-edge count through every update.
#[test]
fn linked_note_transitions() {
    let (_dir, vault) = init_vault();
    let a = quiet_note(&vault, "Note A");
    let b = quiet_note(&vault, "Note B");
    let c = quiet_note(&vault, "Note C");
    let d = quiet_note(&vault, "Note D");

    for id in [&a, &b, &c, &d] {
        assert_eq!(vault.store().fetch_node(id).unwrap().unwrap().status, "draft");
    }

    let outcome = update::update(&vault, &a, links_to(&[&b]), quiet_opts()).unwrap();
    assert_eq!(outcome.status, "linked");

    let outcome = update::update(&vault, &a, links_to(&[&b, &c, &d]), quiet_opts()).unwrap();
    assert_eq!(outcome.status, "connected");
    assert_eq!(vault.store().out_degree(&a).unwrap(), 3);

    let outcome = update::update(&vault, &a, links_to(&[&b]), quiet_opts()).unwrap();
    assert_eq!(outcome.status, "linked");

    // The file agrees with the index.
    let node = vault.store().fetch_node(&a).unwrap().unwrap();
    let text = std::fs::read_to_string(vault.root().join(&node.rel_path)).unwrap();
    assert!(text.contains("status: linked"));
}

/// S2: decision lifecycle enforcement and post-acceptance immutability.
#[test]
fn decision_lifecycle_enforcement() {
    let (_dir, vault) = init_vault();
    let spec = CreateSpec {
        subtype: Some("decision".into()),
        ..note_spec("Use X")
    };
    let d = create::create(&vault, ContentKind::Note, spec, quiet_opts()).unwrap().id;
    assert_eq!(vault.store().fetch_node(&d).unwrap().unwrap().status, "proposed");

    // proposed -> accepted is legal.
    let changes = ChangeSet {
        status: Some("accepted".into()),
        ..Default::default()
    };
    update::update(&vault, &d, changes, quiet_opts()).unwrap();

    // Title is frozen after acceptance, and the failed update changes nothing.
    let changes = ChangeSet {
        title: Some("Use Y".into()),
        ..Default::default()
    };
    let err = update::update(&vault, &d, changes, quiet_opts()).unwrap_err();
    assert_eq!(err.code(), "ValidationFailed");
    let detail = err.detail().unwrap();
    assert_eq!(detail["fields"][0], "title");
    let node = vault.store().fetch_node(&d).unwrap().unwrap();
    assert_eq!(node.title, "Use X");
    assert_eq!(node.status, "accepted");

    // Allowlisted fields stay editable.
    let changes = ChangeSet {
        tags: Some(vec!["a/b".into()]),
        ..Default::default()
    };
    update::update(&vault, &d, changes, quiet_opts()).unwrap();
    assert_eq!(vault.store().tags_of(&d).unwrap(), vec!["a/b"]);

    // Supersede through the state machine.
    let spec = CreateSpec {
        subtype: Some("decision".into()),
        ..note_spec("Use Y instead")
    };
    let d2 = create::create(&vault, ContentKind::Note, spec, quiet_opts()).unwrap().id;
    update::supersede(&vault, &d, &d2, quiet_opts()).unwrap();
    let node = vault.store().fetch_node(&d).unwrap().unwrap();
    assert_eq!(node.status, "superseded");
    assert_eq!(node.superseded_by.as_deref(), Some(d2.as_str()));

    // Terminal: no way back.
    let changes = ChangeSet {
        status: Some("proposed".into()),
        ..Default::default()
    };
    let err = update::update(&vault, &d, changes, quiet_opts()).unwrap_err();
    assert_eq!(err.code(), "InvalidTransition");
}

/// Decision initial status is always `proposed`; a collision on the same
/// title is detected.
#[test]
fn id_collision_detection() {
    let (_dir, vault) = init_vault();
    quiet_note(&vault, "Unique Title");
    let err = create::create(
        &vault,
        ContentKind::Note,
        note_spec("unique   TITLE"),
        quiet_opts(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "IdCollision");
}

/// Garden body protection: the body is never rewritten once maturity is set.
#[test]
fn garden_body_protection() {
    let (_dir, vault) = init_vault();
    let spec = CreateSpec {
        maturity: Some("seed".into()),
        body: Some("Original prose.\n".into()),
        ..note_spec("Tended Note")
    };
    let id = create::create(&vault, ContentKind::Note, spec, quiet_opts()).unwrap().id;

    // Body plus another field: the body is dropped with a warning, the rest
    // applies.
    let changes = ChangeSet {
        body: Some("Machine rewrite.\n".into()),
        tags: Some(vec!["garden/kept".into()]),
        ..Default::default()
    };
    let outcome = update::update(&vault, &id, changes, quiet_opts()).unwrap();
    assert!(outcome.warnings.iter().any(|w| w.contains("body change dropped")));
    assert_eq!(outcome.fields_changed, vec!["tags"]);

    let node = vault.store().fetch_node(&id).unwrap().unwrap();
    let text = std::fs::read_to_string(vault.root().join(&node.rel_path)).unwrap();
    assert!(text.contains("Original prose."));
    assert!(!text.contains("Machine rewrite."));

    // Body-only updates collapse to an empty change set.
    let changes = ChangeSet {
        body: Some("Another rewrite.\n".into()),
        ..Default::default()
    };
    let err = update::update(&vault, &id, changes, quiet_opts()).unwrap_err();
    assert_eq!(err.code(), "NoChanges");
}

/// Batch atomicity: an all-or-nothing batch leaves no trace of any item
/// when one fails.
#[test]
fn batch_all_or_nothing_compensates() {
    let (_dir, vault) = init_vault();
    let items = vec![
        BatchItem {
            kind: ContentKind::Note,
            spec: note_spec("Batch One"),
        },
        BatchItem {
            kind: ContentKind::Note,
            spec: note_spec("   "),
        },
    ];
    let err = create::create_batch(&vault, items, BatchMode::AllOrNothing, quiet_opts()).unwrap_err();
    let VaultError::BatchFailed { index, .. } = &err else {
        panic!("expected BatchFailed, got {err:?}");
    };
    assert_eq!(*index, 1);

    // Neither file nor row nor edges exist for the first item.
    assert_eq!(vault.store().node_count().unwrap(), 0);
    assert!(edge_pairs(&vault).is_empty());
    let notes_dir = vault.root().join("notes");
    let leftovers: Vec<_> = std::fs::read_dir(&notes_dir).unwrap().flatten().collect();
    assert!(leftovers.is_empty(), "files leaked: {leftovers:?}");

    // Partial mode reports both sides and succeeds.
    let items = vec![
        BatchItem {
            kind: ContentKind::Note,
            spec: note_spec("Partial One"),
        },
        BatchItem {
            kind: ContentKind::Note,
            spec: note_spec(""),
        },
    ];
    let outcome = create::create_batch(&vault, items, BatchMode::Partial, quiet_opts()).unwrap();
    assert!(outcome.partial);
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].index, 1);
    assert_eq!(vault.store().node_count().unwrap(), 1);
}

/// Task state machine detours and terminal states.
#[test]
fn task_transitions() {
    let (_dir, vault) = init_vault();
    let spec = CreateSpec {
        priority: Some(3),
        impact: Some(2),
        effort: Some(1),
        ..note_spec("Ship the feature")
    };
    let id = create::create(&vault, ContentKind::Task, spec, quiet_opts()).unwrap().id;
    assert_eq!(id, "TASK-0001");
    assert_eq!(vault.store().fetch_node(&id).unwrap().unwrap().status, "inbox");

    for (to, ok) in [("done", false), ("active", true), ("blocked", true), ("active", true), ("done", true)] {
        let changes = ChangeSet {
            status: Some(to.into()),
            ..Default::default()
        };
        let result = update::update(&vault, &id, changes, quiet_opts());
        assert_eq!(result.is_ok(), ok, "transition to {to}");
    }
    // done is terminal.
    let changes = ChangeSet {
        status: Some("active".into()),
        ..Default::default()
    };
    assert_eq!(
        update::update(&vault, &id, changes, quiet_opts()).unwrap_err().code(),
        "InvalidTransition"
    );
}

/// Boundary behaviors promised by the public surface.
#[test]
fn boundary_behaviors() {
    let (_dir, vault) = init_vault();

    // rank on the empty graph.
    let env = vault.rank(10);
    assert!(env.ok);
    assert_eq!(env.data.unwrap()["count"], 0);

    let a = quiet_note(&vault, "Isolated Alpha");
    let b = quiet_note(&vault, "Isolated Beta");
    quiet_note(&vault, "Isolated Gamma");

    // Empty query is an error with a stable code.
    let env = vault.search("", verdant::query::RankBy::Relevance, &NodeFilter::default(), 10);
    assert!(!env.ok);
    assert_eq!(env.error_code(), Some("EmptyQuery"));

    // limit = 0 lists nothing, successfully.
    let env = vault.list(&NodeFilter::default(), NodeSort::Recency, 0);
    assert!(env.ok);
    assert_eq!(env.data.unwrap().as_array().unwrap().len(), 0);

    // related on an isolated node is empty, not an error.
    let env = vault.related(&a, 3, 10);
    assert!(env.ok);
    assert_eq!(env.data.unwrap()["count"], 0);

    // path to self is a zero-length path.
    let env = vault.path(&a, &a);
    assert!(env.ok);
    let data = env.data.unwrap();
    assert_eq!(data["length"], 0);
    assert_eq!(data["steps"][0], a.as_str());

    // Disconnected endpoints are NoPath, not a crash.
    let env = vault.path(&a, &b);
    assert_eq!(env.error_code(), Some("NoPath"));

    // themes on an edgeless graph: one community per node.
    let env = vault.themes();
    assert!(env.ok);
    assert!(env.warnings.iter().any(|w| w.contains("Louvain")));
    let communities = env.data.unwrap();
    assert_eq!(communities.as_array().unwrap().len(), 3);
}

/// The work queue scores and orders actionable tasks.
#[test]
fn work_queue_scoring() {
    let (_dir, vault) = init_vault();
    for (title, priority, impact, effort) in [
        ("Low value chore", Some(1), Some(1), Some(4)),
        ("High leverage move", Some(4), Some(4), Some(1)),
        ("Middling errand", Some(2), Some(2), Some(2)),
    ] {
        let spec = CreateSpec {
            priority,
            impact,
            effort,
            ..note_spec(title)
        };
        create::create(&vault, ContentKind::Task, spec, quiet_opts()).unwrap();
    }
    let queue = verdant::query::work_queue(&vault, None).unwrap();
    assert_eq!(queue.len(), 3);
    assert_eq!(queue[0].title, "High leverage move");
    // 4*2 + 4*1.5 + (4-1) = 17
    assert!((queue[0].score - 17.0).abs() < 1e-9);
    assert_eq!(queue[2].title, "Low value chore");

    // Done tasks drop out of the queue.
    let done = &queue[0].id;
    for status in ["active", "done"] {
        let changes = ChangeSet {
            status: Some(status.into()),
            ..Default::default()
        };
        update::update(&vault, done, changes, quiet_opts()).unwrap();
    }
    assert_eq!(verdant::query::work_queue(&vault, None).unwrap().len(), 2);
}

/// Envelope contract: success and failure shapes.
#[test]
fn envelope_contract() {
    let (_dir, vault) = init_vault();
    let env = vault.create(ContentKind::Note, note_spec("Enveloped"), quiet_opts());
    assert!(env.ok);
    assert_eq!(env.op, "create");
    assert!(env.error.is_none());
    let data = env.data.unwrap();
    assert!(data["id"].as_str().unwrap().starts_with("note_"));
    assert!(data["path"].as_str().unwrap().starts_with("notes/"));

    let env = vault.get("note_0000000000000000");
    assert!(!env.ok);
    let error = env.error.unwrap();
    assert_eq!(error.code, "NotFound");
    assert!(error.message.contains("note_0000000000000000"));
}
