//! Extension contract: lifecycle hooks and custom content models.
//!
//! An extension registers for one or more hook names and may contribute
//! content models. Registration happens at vault-open time; the event bus
//! invokes hook implementations asynchronously through the WAL. Failures in
//! discovery or invocation produce warnings, never errors, and hook panics
//! are caught at the dispatch boundary.

use std::path::Path;
use std::sync::Arc;

use crate::model::ContentModel;

/// Hook names dispatched by the engine.
pub mod hooks {
    pub const POST_INIT: &str = "post_init";
    pub const POST_CREATE: &str = "post_create";
    pub const POST_UPDATE: &str = "post_update";
    pub const POST_CLOSE: &str = "post_close";
    pub const POST_REWEAVE: &str = "post_reweave";
    pub const POST_SESSION_START: &str = "post_session_start";
    pub const POST_SESSION_CLOSE: &str = "post_session_close";
    pub const POST_CHECK: &str = "post_check";

    pub const ALL: &[&str] = &[
        POST_INIT,
        POST_CREATE,
        POST_UPDATE,
        POST_CLOSE,
        POST_REWEAVE,
        POST_SESSION_START,
        POST_SESSION_CLOSE,
        POST_CHECK,
    ];
}

/// One extension implementation.
///
/// `invoke` runs on an event-bus worker thread; implementations must be
/// `Send + Sync` and should treat the payload as read-only. Returning an
/// error (or panicking) marks the WAL entry failed and schedules a retry;
/// it never reaches the caller of the originating operation.
pub trait Extension: Send + Sync {
    /// Implementation name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Hook names this extension subscribes to.
    fn subscribed_hooks(&self) -> Vec<&'static str>;

    /// Handle one hook dispatch.
    fn invoke(&self, hook: &str, payload: &serde_json::Value) -> Result<(), String>;

    /// Content models contributed by this extension, merged into the
    /// registry at vault-open time.
    fn content_models(&self) -> Vec<Box<dyn ContentModel>> {
        Vec::new()
    }
}

/// The set of registered extensions, shared with the event-bus workers.
#[derive(Clone, Default)]
pub struct ExtensionHost {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Extensions subscribed to `hook`.
    pub fn subscribers(&self, hook: &str) -> Vec<Arc<dyn Extension>> {
        self.extensions
            .iter()
            .filter(|e| e.subscribed_hooks().contains(&hook))
            .cloned()
            .collect()
    }

    /// All contributed content models.
    pub fn content_models(&self) -> Vec<Box<dyn ContentModel>> {
        self.extensions
            .iter()
            .flat_map(|e| e.content_models())
            .collect()
    }

    /// Scan the vault-local plugins directory. In-process extensions are
    /// registered programmatically; files found here cannot be loaded by
    /// this build and are surfaced as warnings so the operator knows they
    /// were skipped. Discovery failures are warnings too, never errors.
    pub fn discover_local(&self, plugins_dir: &Path) -> Vec<String> {
        let mut warnings = Vec::new();
        let entries = match std::fs::read_dir(plugins_dir) {
            Ok(entries) => entries,
            Err(_) => return warnings, // No plugins directory, nothing to do.
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                warnings.push(format!(
                    "plugin file `{}` found but no loader is available; skipped",
                    path.display()
                ));
            }
        }
        warnings
    }
}
