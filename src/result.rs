//! Public result contract and operation telemetry.
//!
//! Every public operation returns the same envelope: `{ok, op, data,
//! warnings, error, meta}`. The envelope is the sole surface observed by
//! CLIs, remote adapters, and extensions; error codes inside it are stable.
//!
//! Telemetry is a traced-scope primitive: when enabled, scopes opened during
//! an operation accrue into a span tree under a thread-local current-span
//! pointer, and the finished tree is attached to `meta.telemetry`. Envelopes
//! are immutable; attaching metadata produces a new value.

use std::cell::RefCell;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::VaultError;

/// Machine-readable error body carried by failed envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Stable code from the error taxonomy.
    pub code: String,
    /// Human message naming the offending ids and values.
    pub message: String,
    /// Structured context, e.g. `{current, attempted, allowed}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// One node of the hierarchical telemetry tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanNode {
    pub name: String,
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SpanNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub annotations: serde_json::Map<String, serde_json::Value>,
}

/// Optional envelope metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<SpanNode>,
}

/// The uniform result envelope returned by every public operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    /// Stable operation identifier (`create`, `search`, `session.close`, ...).
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub warnings: Vec<String>,
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl Envelope {
    /// Successful envelope with op-specific data.
    pub fn success(op: &str, data: serde_json::Value) -> Self {
        Envelope {
            ok: true,
            op: op.to_string(),
            data: Some(data),
            warnings: Vec::new(),
            error: None,
            meta: None,
        }
    }

    /// Failed envelope carrying the error's stable code and detail.
    pub fn failure(op: &str, err: &VaultError) -> Self {
        Envelope {
            ok: false,
            op: op.to_string(),
            data: None,
            warnings: Vec::new(),
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
                detail: err.detail(),
            }),
            meta: None,
        }
    }

    /// New envelope with the given warnings appended.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// New envelope with a telemetry tree attached under `meta`.
    pub fn with_telemetry(mut self, telemetry: Option<SpanNode>) -> Self {
        if let Some(tree) = telemetry {
            let meta = self.meta.get_or_insert_with(Meta::default);
            meta.telemetry = Some(tree);
        }
        self
    }

    /// Error code if this envelope failed.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

struct Frame {
    node: SpanNode,
    started: Instant,
}

thread_local! {
    /// Telemetry is off unless an operation entry point switches it on; the
    /// flag and span stack are thread-local so concurrent readers cannot
    /// interleave their trees.
    static TELEMETRY_ENABLED: RefCell<bool> = const { RefCell::new(false) };
    static SPAN_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static FINISHED_ROOT: RefCell<Option<SpanNode>> = const { RefCell::new(None) };
}

/// Enable or disable telemetry collection on this thread.
pub fn set_telemetry_enabled(enabled: bool) {
    TELEMETRY_ENABLED.with(|flag| *flag.borrow_mut() = enabled);
    if !enabled {
        SPAN_STACK.with(|stack| stack.borrow_mut().clear());
        FINISHED_ROOT.with(|root| root.borrow_mut().take());
    }
}

/// Whether telemetry is currently collected on this thread.
pub fn telemetry_enabled() -> bool {
    TELEMETRY_ENABLED.with(|flag| *flag.borrow())
}

/// Open a traced scope. The returned guard closes the span on drop; when
/// telemetry is disabled this is a no-op.
pub fn span(name: &str) -> SpanGuard {
    if !telemetry_enabled() {
        return SpanGuard { active: false };
    }
    SPAN_STACK.with(|stack| {
        stack.borrow_mut().push(Frame {
            node: SpanNode {
                name: name.to_string(),
                duration_ms: 0.0,
                children: Vec::new(),
                tokens: None,
                cost: None,
                annotations: serde_json::Map::new(),
            },
            started: Instant::now(),
        });
    });
    SpanGuard { active: true }
}

/// Annotate the innermost open span. Ignored when telemetry is off or no
/// span is open.
pub fn annotate(key: &str, value: serde_json::Value) {
    if !telemetry_enabled() {
        return;
    }
    SPAN_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            frame.node.annotations.insert(key.to_string(), value);
        }
    });
}

/// Take the most recently finished root span tree, if any.
pub fn take_telemetry() -> Option<SpanNode> {
    FINISHED_ROOT.with(|root| root.borrow_mut().take())
}

/// Guard closing a traced scope on drop.
pub struct SpanGuard {
    active: bool,
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        SPAN_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.pop() else { return };
            let mut node = frame.node;
            node.duration_ms = frame.started.elapsed().as_secs_f64() * 1000.0;
            match stack.last_mut() {
                Some(parent) => parent.node.children.push(node),
                None => FINISHED_ROOT.with(|root| *root.borrow_mut() = Some(node)),
            }
        });
    }
}
