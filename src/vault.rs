//! The vault: construction, wiring, and the public operation surface.
//!
//! A [`Vault`] owns the root directory, the frozen configuration, the index
//! store, the model registry, the graph engine, and the event bus. Every
//! public operation returns the uniform result envelope; the typed entry
//! points in the pipeline, reweave, query, session, and integrity modules
//! remain available to embedders who want structured values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::config::{CONFIG_FILE, INDEX_DB, STATE_DIR, VaultConfig};
use crate::context::{self, ContextRequest};
use crate::errors::{Result, VaultError};
use crate::events::EventBus;
use crate::extension::{Extension, ExtensionHost, hooks};
use crate::graph::GraphEngine;
use crate::ident::ContentKind;
use crate::integrity::{self, FixLevel};
use crate::model::{ChangeSet, CreateSpec, ModelRegistry};
use crate::pipeline::{OpOptions, create, update};
use crate::query::{self, RankBy, SemanticIndex};
use crate::result::{self as telemetry, Envelope};
use crate::reweave::{self, ReweaveOptions, UndoTarget};
use crate::session::{self, EntryOptions};
use crate::store::{NodeFilter, NodeSort, Store};
use crate::template::{DefaultTemplates, TemplateEngine};

/// Warning attached to `themes` results while the preferred community
/// backend is unavailable.
const LOUVAIN_WARNING: &str =
    "community detection ran the Louvain-family label-propagation fallback; Leiden is unavailable";

pub struct Vault {
    root: PathBuf,
    config: VaultConfig,
    store: Store,
    registry: ModelRegistry,
    graph: GraphEngine,
    events: EventBus,
    templates: Box<dyn TemplateEngine>,
    semantic: Option<Box<dyn SemanticIndex>>,
    /// Warnings gathered at open time (plugin discovery etc.), attached to
    /// the first envelope produced.
    open_warnings: Vec<String>,
}

impl Vault {
    /// Create a new vault at `root`: directory skeleton, starter config,
    /// self-documents, and an empty index. Fails with `VaultExists` when a
    /// configuration is already present.
    #[instrument(skip(root), fields(root = %root.as_ref().display()))]
    pub fn init(root: impl AsRef<Path>, name: &str) -> Result<Vault> {
        let root = root.as_ref().to_path_buf();
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(VaultError::VaultExists(root.display().to_string()));
        }
        for dir in ["notes", "ops/tasks", "ops/logs", "self"] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        for dir in ["backups", "plugins", "templates"] {
            std::fs::create_dir_all(root.join(STATE_DIR).join(dir))?;
        }
        let mut config = VaultConfig::default();
        config.vault.name = name.to_string();
        crate::pipeline::write_atomic(&config_path, &config.to_toml())?;

        let vault = Self::open_with(&root, Vec::new(), None)?;
        vault.render_self_documents()?;
        vault.events.dispatch(
            &vault.store,
            hooks::POST_INIT,
            serde_json::json!({
                "vault_name": vault.config.vault.name,
                "client": vault.config.vault.client,
                "tone": format!("{:?}", vault.config.agent.tone).to_lowercase(),
            }),
            None,
            true,
        )?;
        info!(name, "vault initialized");
        Ok(vault)
    }

    /// Open an existing vault with no extensions.
    pub fn open(root: impl AsRef<Path>) -> Result<Vault> {
        Self::open_with(root, Vec::new(), None)
    }

    /// Open an existing vault, registering extensions and an optional
    /// semantic capability. Extension content models merge into the
    /// registry; discovery failures become warnings, never errors.
    pub fn open_with(
        root: impl AsRef<Path>,
        extensions: Vec<Arc<dyn Extension>>,
        semantic: Option<Box<dyn SemanticIndex>>,
    ) -> Result<Vault> {
        let root = root.as_ref().to_path_buf();
        let config = VaultConfig::load(&root)?;
        let db_path = root.join(STATE_DIR).join(INDEX_DB);
        let store = Store::open(&db_path)?;

        let mut host = ExtensionHost::new();
        for extension in extensions {
            host.register(extension);
        }
        let mut registry = ModelRegistry::builtin();
        for model in host.content_models() {
            registry.register(model);
        }
        let open_warnings = host.discover_local(&root.join(STATE_DIR).join("plugins"));

        let template_dir = root.join(STATE_DIR).join("templates");
        let templates: Box<dyn TemplateEngine> = if template_dir.is_dir() {
            Box::new(DefaultTemplates::with_override_dir(template_dir))
        } else {
            Box::new(DefaultTemplates::packaged())
        };

        Ok(Vault {
            events: EventBus::new(host, Some(db_path)),
            root,
            config,
            store,
            registry,
            graph: GraphEngine::new(),
            templates,
            semantic,
            open_warnings,
        })
    }

    // -- wiring accessors ----------------------------------------------------

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub(crate) fn graph(&self) -> &GraphEngine {
        &self.graph
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn templates(&self) -> &dyn TemplateEngine {
        self.templates.as_ref()
    }

    pub(crate) fn semantic(&self) -> Option<&dyn SemanticIndex> {
        self.semantic.as_deref()
    }

    /// Warnings gathered while opening the vault.
    pub fn open_warnings(&self) -> &[String] {
        &self.open_warnings
    }

    fn render_self_documents(&self) -> Result<()> {
        let mut ctx = BTreeMap::new();
        ctx.insert("vault_name".to_string(), self.config.vault.name.clone());
        ctx.insert(
            "tone".to_string(),
            format!("{:?}", self.config.agent.tone).to_lowercase(),
        );
        for name in ["identity", "methodology"] {
            let rendered = self.templates.render(name, &ctx)?;
            crate::pipeline::write_atomic(&self.root.join("self").join(format!("{name}.md")), &rendered)?;
        }
        Ok(())
    }

    // -- content operations --------------------------------------------------

    pub fn create(&self, kind: ContentKind, spec: CreateSpec, options: OpOptions) -> Envelope {
        wrap("create", create::create(self, kind, spec, options).map(|o| {
            let warnings = o.warnings.clone();
            (o, warnings)
        }))
    }

    pub fn create_batch(
        &self,
        items: Vec<create::BatchItem>,
        mode: create::BatchMode,
        options: OpOptions,
    ) -> Envelope {
        wrap(
            "create.batch",
            create::create_batch(self, items, mode, options).map(|o| {
                let warnings = if o.partial {
                    vec![format!("{} of {} items failed", o.errors.len(), o.errors.len() + o.created.len())]
                } else {
                    Vec::new()
                };
                (o, warnings)
            }),
        )
    }

    pub fn update(&self, id: &str, changes: ChangeSet, options: OpOptions) -> Envelope {
        wrap("update", update::update(self, id, changes, options).map(|o| {
            let warnings = o.warnings.clone();
            (o, warnings)
        }))
    }

    pub fn archive(&self, id: &str, summary: Option<&str>, options: OpOptions) -> Envelope {
        wrap("close", update::archive(self, id, summary, options).map(|o| {
            let warnings = o.warnings.clone();
            (o, warnings)
        }))
    }

    pub fn supersede(&self, old_id: &str, new_id: &str, options: OpOptions) -> Envelope {
        wrap(
            "supersede",
            update::supersede(self, old_id, new_id, options).map(|o| {
                let warnings = o.warnings.clone();
                (o, warnings)
            }),
        )
    }

    pub fn reweave(&self, id: &str, opts: ReweaveOptions, options: OpOptions) -> Envelope {
        wrap("reweave", reweave::reweave(self, id, opts, options).map(|o| (o, Vec::new())))
    }

    pub fn reweave_undo(&self, target: UndoTarget) -> Envelope {
        wrap("reweave.undo", reweave::undo(self, target).map(|o| (o, Vec::new())))
    }

    pub fn unlink(&self, src: &str, dst: &str, both: bool, options: OpOptions) -> Envelope {
        wrap("unlink", reweave::unlink(self, src, dst, both, options).map(|o| {
            let warnings = o.warnings.clone();
            (o, warnings)
        }))
    }

    // -- queries ---------------------------------------------------------------

    pub fn search(&self, query_text: &str, rank_by: RankBy, filter: &NodeFilter, limit: usize) -> Envelope {
        wrap(
            "search",
            query::search(self, query_text, rank_by, filter, limit).map(|o| {
                let warnings = o.warnings.clone();
                (o, warnings)
            }),
        )
    }

    pub fn get(&self, id: &str) -> Envelope {
        wrap("get", query::get(self, id).map(|o| (o, Vec::new())))
    }

    pub fn list(&self, filter: &NodeFilter, sort: NodeSort, limit: usize) -> Envelope {
        wrap("list", query::list(self, filter, sort, limit).map(|o| (o, Vec::new())))
    }

    pub fn work_queue(&self, space: Option<&str>) -> Envelope {
        wrap("work_queue", query::work_queue(self, space).map(|o| (o, Vec::new())))
    }

    pub fn decision_support(&self, topic: Option<&str>, space: Option<&str>) -> Envelope {
        wrap(
            "decision_support",
            query::decision_support(self, topic, space).map(|o| (o, Vec::new())),
        )
    }

    pub fn topics(&self) -> Envelope {
        wrap("topics", self.store.topics().map(|o| (o, Vec::new())))
    }

    // -- graph ----------------------------------------------------------------

    pub fn related(&self, id: &str, depth: usize, top: usize) -> Envelope {
        wrap(
            "related",
            self.graph.related(&self.store, id, depth, top).map(|hits| {
                let count = hits.len();
                (serde_json::json!({"related": hits, "count": count}), Vec::new())
            }),
        )
    }

    pub fn rank(&self, top: usize) -> Envelope {
        wrap(
            "rank",
            self.graph.rank(&self.store, top).map(|ranked| {
                let count = ranked.len();
                (serde_json::json!({"ranked": ranked, "count": count}), Vec::new())
            }),
        )
    }

    pub fn themes(&self) -> Envelope {
        wrap(
            "themes",
            self.graph
                .themes(&self.store)
                .map(|communities| (communities, vec![LOUVAIN_WARNING.to_string()])),
        )
    }

    pub fn path(&self, src: &str, dst: &str) -> Envelope {
        wrap("path", self.graph.path(&self.store, src, dst).map(|o| (o, Vec::new())))
    }

    pub fn gaps(&self, top: usize) -> Envelope {
        wrap("gaps", self.graph.gaps(&self.store, top).map(|o| (o, Vec::new())))
    }

    pub fn bridges(&self, top: usize) -> Envelope {
        wrap("bridges", self.graph.bridges(&self.store, top).map(|o| (o, Vec::new())))
    }

    pub fn materialize_metrics(&self) -> Envelope {
        wrap(
            "materialize",
            self.graph
                .materialize_metrics(&self.store)
                .map(|count| (serde_json::json!({"nodes": count}), Vec::new())),
        )
    }

    // -- sessions --------------------------------------------------------------

    pub fn session_start(&self, topic: &str, options: OpOptions) -> Envelope {
        wrap("session.start", session::start(self, topic, options).map(|o| (o, Vec::new())))
    }

    pub fn session_log(&self, message: &str, opts: EntryOptions) -> Envelope {
        wrap(
            "session.log",
            session::log_entry(self, message, opts)
                .map(|entry_id| (serde_json::json!({"entry_id": entry_id}), Vec::new())),
        )
    }

    pub fn session_close(&self, summary: Option<&str>, options: OpOptions) -> Envelope {
        wrap("session.close", session::close(self, summary, options).map(|o| {
            let warnings = o.warnings.clone();
            (o, warnings)
        }))
    }

    pub fn session_reopen(&self, id: &str, options: OpOptions) -> Envelope {
        wrap("session.reopen", session::reopen(self, id, options).map(|o| (o, Vec::new())))
    }

    pub fn session_cost(&self, report_budget: Option<f64>) -> Envelope {
        wrap("session.cost", session::cost(self, report_budget).map(|o| (o, Vec::new())))
    }

    pub fn agent_context(&self, request: &ContextRequest) -> Envelope {
        wrap("context", context::assemble(self, request).map(|o| (o, Vec::new())))
    }

    // -- integrity -------------------------------------------------------------

    pub fn check(&self) -> Envelope {
        let outcome = integrity::check(self);
        if let Ok(check) = &outcome {
            let _ = self.events.dispatch(
                &self.store,
                hooks::POST_CHECK,
                serde_json::json!({
                    "issues_found": check.issues.len(),
                    "issues_fixed": 0,
                }),
                None,
                true,
            );
        }
        wrap("check", outcome.map(|o| (o, Vec::new())))
    }

    pub fn fix(&self, level: FixLevel) -> Envelope {
        let outcome = integrity::fix(self, level);
        if let Ok(fix) = &outcome {
            let _ = self.events.dispatch(
                &self.store,
                hooks::POST_CHECK,
                serde_json::json!({
                    "issues_found": 0,
                    "issues_fixed": fix.fixed,
                }),
                None,
                true,
            );
        }
        wrap("fix", outcome.map(|o| (o, Vec::new())))
    }

    pub fn rebuild(&self) -> Envelope {
        wrap("rebuild", integrity::rebuild(self).map(|o| (o, Vec::new())))
    }

    /// Replace the index with the latest backup and reopen it.
    pub fn rollback(&mut self) -> Envelope {
        wrap("rollback", self.rollback_inner().map(|path| {
            (serde_json::json!({"restored_from": path}), Vec::new())
        }))
    }

    fn rollback_inner(&mut self) -> Result<String> {
        let backup = integrity::latest_backup(&integrity::backup_dir(self))?;
        let db_path = self.state_dir().join(INDEX_DB);
        // The live connection must close before the file is swapped.
        let placeholder = Store::open_in_memory()?;
        drop(std::mem::replace(&mut self.store, placeholder));
        for suffix in ["-wal", "-shm"] {
            let sidecar = db_path.with_file_name(format!("{INDEX_DB}{suffix}"));
            let _ = std::fs::remove_file(sidecar);
        }
        std::fs::copy(&backup, &db_path)?;
        self.store = Store::open(&db_path)?;
        info!(backup = %backup.display(), "index rolled back");
        Ok(backup.display().to_string())
    }

    /// Block until every enqueued event is `completed` or `dead_letter`.
    pub fn drain_events(&self) -> Envelope {
        wrap(
            "drain",
            self.events.drain(&self.store).map(|stats| {
                (
                    serde_json::json!({
                        "retried": stats.retried,
                        "completed": stats.completed,
                        "dead_lettered": stats.dead_lettered,
                    }),
                    Vec::new(),
                )
            }),
        )
    }

    /// Enable or disable telemetry span collection for subsequent
    /// operations on this thread.
    pub fn set_telemetry(&self, enabled: bool) {
        telemetry::set_telemetry_enabled(enabled);
    }
}

/// Build the uniform envelope from a typed outcome plus warnings, attaching
/// any telemetry tree the operation produced.
fn wrap<T: Serialize>(op: &str, outcome: Result<(T, Vec<String>)>) -> Envelope {
    let envelope = match outcome {
        Ok((data, warnings)) => match serde_json::to_value(&data) {
            Ok(value) => Envelope::success(op, value).with_warnings(warnings),
            Err(e) => Envelope::failure(op, &VaultError::InvalidFormat(format!("serialization: {e}"))),
        },
        Err(err) => Envelope::failure(op, &err),
    };
    envelope.with_telemetry(telemetry::take_telemetry())
}
