//! Reweave scenarios: inline add at create, dry-run determinism, prune, and
//! audit-log undo symmetry.

mod common;

use std::thread::sleep;
use std::time::Duration;

use common::{edge_pairs, init_vault, quiet_opts, sync_opts};
use verdant::pipeline::create;
use verdant::reweave::{self, ReweaveOptions, UndoTarget};
use verdant::{ContentKind, CreateSpec};

fn mesh_spec(title: &str) -> CreateSpec {
    CreateSpec {
        title: title.to_string(),
        tags: vec!["x/y".to_string()],
        topic: Some("mesh".to_string()),
        body: Some("Alpha beta gamma delta weaving threads together.\n".to_string()),
        ..Default::default()
    }
}

fn seed_mesh(vault: &verdant::Vault) -> Vec<String> {
    ["Mesh note one", "Mesh note two", "Mesh note three", "Mesh note four", "Mesh note five"]
        .iter()
        .map(|title| {
            create::create(vault, ContentKind::Note, mesh_spec(title), quiet_opts())
                .unwrap()
                .id
        })
        .collect()
}

/// S3: inline reweave at create adds edges, prune removes them, undo
/// restores them, and every step is audited.
#[test]
fn reweave_add_prune_undo() {
    let (_dir, vault) = init_vault();
    let seeded = seed_mesh(&vault);
    sleep(Duration::from_millis(3));

    // The sixth note reweaves inline: shared tag, topic, and vocabulary put
    // every sibling above the default threshold.
    let n = create::create(&vault, ContentKind::Note, mesh_spec("Mesh note six"), sync_opts())
        .unwrap()
        .id;
    let connected = vault.store().out_degree(&n).unwrap();
    assert_eq!(connected, seeded.len());
    assert_eq!(vault.store().fetch_node(&n).unwrap().unwrap().status, "connected");

    // Audit log holds one `add` row per applied link.
    let adds = vault.store().reweave_entries_for(&n).unwrap();
    assert_eq!(adds.len(), connected);
    assert!(adds.iter().all(|e| e.action == "add" && !e.undone));

    // Frontmatter and body both carry the new links.
    let node = vault.store().fetch_node(&n).unwrap().unwrap();
    let text = std::fs::read_to_string(vault.root().join(&node.rel_path)).unwrap();
    assert!(text.contains("links:"));
    assert!(text.contains("[[Mesh note one]]"));

    let before_prune = edge_pairs(&vault);
    sleep(Duration::from_millis(3));

    // Prune with the threshold raised above any observable score.
    let opts = ReweaveOptions {
        threshold: Some(1.01),
        prune: true,
        ..Default::default()
    };
    let report = reweave::reweave(&vault, &n, opts, sync_opts()).unwrap();
    assert_eq!(report.pruned.len(), connected);
    assert_eq!(vault.store().out_degree(&n).unwrap(), 0);
    assert_eq!(vault.store().fetch_node(&n).unwrap().unwrap().status, "draft");
    let entries = vault.store().reweave_entries_for(&n).unwrap();
    assert_eq!(entries.iter().filter(|e| e.action == "prune").count(), connected);
    sleep(Duration::from_millis(3));

    // Undo the latest batch (the prune): edges come back, entries flip.
    let undo = reweave::undo(&vault, UndoTarget::Latest).unwrap();
    assert_eq!(undo.reversed, connected);
    assert_eq!(edge_pairs(&vault), before_prune);
    assert_eq!(vault.store().fetch_node(&n).unwrap().unwrap().status, "connected");
    let entries = vault.store().reweave_entries_for(&n).unwrap();
    assert!(entries.iter().filter(|e| e.action == "prune").all(|e| e.undone));

    // Undoing again reverses the original add batch.
    let undo = reweave::undo(&vault, UndoTarget::Latest).unwrap();
    assert_eq!(undo.reversed, connected);
    assert_eq!(vault.store().out_degree(&n).unwrap(), 0);

    // Nothing left to undo.
    let err = reweave::undo(&vault, UndoTarget::Latest).unwrap_err();
    assert_eq!(err.code(), "NoHistory");
}

/// Dry-run is pure: identical vault state yields identical suggestions,
/// and no writes happen.
#[test]
fn dry_run_is_deterministic_and_pure() {
    let (_dir, vault) = init_vault();
    seed_mesh(&vault);
    let n = create::create(&vault, ContentKind::Note, mesh_spec("Mesh probe"), quiet_opts())
        .unwrap()
        .id;

    let opts = ReweaveOptions {
        dry_run: true,
        ..Default::default()
    };
    let first = reweave::reweave(&vault, &n, opts, quiet_opts()).unwrap();
    let second = reweave::reweave(&vault, &n, opts, quiet_opts()).unwrap();

    assert!(first.dry_run && second.dry_run);
    assert_eq!(first.count, second.count);
    let ids: Vec<_> = first.suggestions.iter().map(|s| &s.id).collect();
    let ids2: Vec<_> = second.suggestions.iter().map(|s| &s.id).collect();
    assert_eq!(ids, ids2);
    for (a, b) in first.suggestions.iter().zip(&second.suggestions) {
        assert!((a.score - b.score).abs() < 1e-9);
        // The per-signal breakdown is present in dry-run output.
        assert!(a.signals.tag_overlap > 0.9);
        assert!((a.signals.topic - 1.0).abs() < 1e-9);
    }

    // No edges, no audit entries, no file changes.
    assert_eq!(vault.store().out_degree(&n).unwrap(), 0);
    assert!(vault.store().reweave_entries_for(&n).unwrap().is_empty());

    // The dry_run flag is present even when nothing clears the threshold.
    let opts = ReweaveOptions {
        dry_run: true,
        threshold: Some(1.01),
        ..Default::default()
    };
    let empty = reweave::reweave(&vault, &n, opts, quiet_opts()).unwrap();
    assert!(empty.dry_run);
    assert_eq!(empty.count, 0);
}

/// Garden notes accept frontmatter links but never body wikilinks.
#[test]
fn reweave_respects_garden_bodies() {
    let (_dir, vault) = init_vault();
    seed_mesh(&vault);
    let spec = CreateSpec {
        maturity: Some("evergreen".to_string()),
        ..mesh_spec("Mesh evergreen")
    };
    let n = create::create(&vault, ContentKind::Note, spec, sync_opts()).unwrap().id;
    assert!(vault.store().out_degree(&n).unwrap() > 0);

    let node = vault.store().fetch_node(&n).unwrap().unwrap();
    let text = std::fs::read_to_string(vault.root().join(&node.rel_path)).unwrap();
    // Frontmatter carries the links; the body has no appended wikilinks.
    assert!(text.contains("links:"));
    assert!(!text.contains("## Related"));
}

/// Unlink removes the edge, the frontmatter entry, and the body wikilink.
#[test]
fn unlink_cleans_all_three_representations() {
    let (_dir, vault) = init_vault();
    seed_mesh(&vault);
    let n = create::create(&vault, ContentKind::Note, mesh_spec("Mesh hub"), sync_opts())
        .unwrap()
        .id;
    let targets: Vec<String> = vault
        .store()
        .outgoing_edges(&n)
        .unwrap()
        .into_iter()
        .map(|e| e.target_id)
        .collect();
    assert!(!targets.is_empty());
    let victim = &targets[0];
    let victim_title = vault.store().fetch_node(victim).unwrap().unwrap().title;

    let report = verdant::reweave::unlink(&vault, &n, victim, false, quiet_opts()).unwrap();
    assert_eq!(report.removed, vec![(n.clone(), victim.clone())]);

    let node = vault.store().fetch_node(&n).unwrap().unwrap();
    let text = std::fs::read_to_string(vault.root().join(&node.rel_path)).unwrap();
    assert!(!text.contains(&format!("[[{victim_title}]]")));
    assert!(!text.contains(victim.as_str()));
    assert!(vault
        .store()
        .outgoing_edges(&n)
        .unwrap()
        .iter()
        .all(|e| &e.target_id != victim));

    // A second unlink of the same pair reports NoLink.
    let err = verdant::reweave::unlink(&vault, &n, victim, false, quiet_opts()).unwrap_err();
    assert_eq!(err.code(), "NoLink");
}
