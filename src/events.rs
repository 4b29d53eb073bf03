//! The event bus: durable, write-ahead-logged hook dispatch.
//!
//! Every dispatch first appends a pending row to the event WAL (its own
//! small transaction, strictly after the originating operation committed),
//! then invokes the registered hook implementations. Success marks the row
//! `completed`; an error or panic increments `retries` and marks it
//! `failed`, flipping to `dead_letter` once the retry budget is exhausted.
//! The caller of `dispatch` never observes hook exceptions.
//!
//! Two execution modes:
//! - async (default): a small worker pool runs the hooks. Workers never
//!   touch the caller's store handle; they open their own connection to the
//!   index file for the status update.
//! - sync (per-invocation, or when the index is not file-backed): hooks run
//!   inline in the caller's thread, preserving ordering for tests.
//!
//! `drain()` blocks until in-flight work settles, then retries pending and
//! failed rows synchronously until each is `completed` or `dead_letter`.
//! It deliberately needs no scheduler: the WAL is the queue.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use chrono::Utc;
use threadpool::ThreadPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::Result;
use crate::extension::{Extension, ExtensionHost};
use crate::store::Store;

/// Default retry budget before a WAL entry dead-letters.
pub const DEFAULT_MAX_RETRIES: i64 = 3;
/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 2;

struct InFlight {
    count: Mutex<usize>,
    settled: Condvar,
}

pub struct EventBus {
    host: ExtensionHost,
    pool: Option<ThreadPool>,
    /// Path of the index file, for worker-side status updates; `None` for
    /// in-memory stores, which force sync execution.
    db_path: Option<PathBuf>,
    in_flight: Arc<InFlight>,
    max_retries: i64,
}

impl EventBus {
    pub fn new(host: ExtensionHost, db_path: Option<PathBuf>) -> Self {
        let workers = DEFAULT_WORKERS.min(num_cpus::get().max(1));
        EventBus {
            host,
            pool: db_path
                .is_some()
                .then(|| ThreadPool::with_name("verdant-hooks".into(), workers)),
            db_path,
            in_flight: Arc::new(InFlight {
                count: Mutex::new(0),
                settled: Condvar::new(),
            }),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Append a WAL row and run the hook. Must be called after the
    /// originating operation's transaction has committed.
    pub fn dispatch(
        &self,
        store: &Store,
        hook: &str,
        payload: serde_json::Value,
        session_id: Option<&str>,
        sync: bool,
    ) -> Result<()> {
        let entry_id = Uuid::new_v4().to_string();
        store.with_tx(|s| s.wal_append(&entry_id, hook, &payload, session_id, Utc::now()))?;
        debug!(hook, entry = %entry_id, sync, "event enqueued");

        let subscribers = self.host.subscribers(hook);
        match (&self.pool, &self.db_path, sync) {
            (Some(pool), Some(db_path), false) => {
                {
                    let mut count = self.in_flight.count.lock().expect("in-flight poisoned");
                    *count += 1;
                }
                let in_flight = Arc::clone(&self.in_flight);
                let db_path = db_path.clone();
                let hook = hook.to_string();
                let max_retries = self.max_retries;
                pool.execute(move || {
                    let outcome = run_hook(&subscribers, &hook, &payload);
                    if let Err(e) = settle_via_path(&db_path, &entry_id, outcome, max_retries) {
                        warn!(entry = %entry_id, error = %e, "failed to settle WAL entry");
                    }
                    let mut count = in_flight.count.lock().expect("in-flight poisoned");
                    *count -= 1;
                    if *count == 0 {
                        in_flight.settled.notify_all();
                    }
                });
            }
            _ => {
                let outcome = run_hook(&subscribers, hook, &payload);
                self.settle(store, &entry_id, outcome)?;
            }
        }
        Ok(())
    }

    fn settle(&self, store: &Store, entry_id: &str, outcome: std::result::Result<(), String>) -> Result<()> {
        match outcome {
            Ok(()) => store.wal_mark_completed(entry_id, Utc::now()),
            Err(error) => {
                let status = store.wal_mark_failed(entry_id, &error, self.max_retries)?;
                debug!(entry = %entry_id, status, error, "hook attempt failed");
                Ok(())
            }
        }
    }

    /// Block until all in-flight dispatches settle, then synchronously retry
    /// every pending/failed row until it completes or dead-letters. On
    /// return, every event enqueued before the call has reached `completed`
    /// or `dead_letter`.
    pub fn drain(&self, store: &Store) -> Result<DrainStats> {
        {
            let mut count = self.in_flight.count.lock().expect("in-flight poisoned");
            while *count > 0 {
                count = self
                    .in_flight
                    .settled
                    .wait(count)
                    .expect("in-flight poisoned");
            }
        }
        let mut stats = DrainStats::default();
        for _pass in 0..=self.max_retries {
            let unsettled = store.wal_unsettled()?;
            if unsettled.is_empty() {
                break;
            }
            for row in unsettled {
                let subscribers = self.host.subscribers(&row.hook);
                stats.retried += 1;
                match run_hook(&subscribers, &row.hook, &row.payload) {
                    Ok(()) => {
                        store.wal_mark_completed(&row.id, Utc::now())?;
                        stats.completed += 1;
                    }
                    Err(error) => {
                        let status = store.wal_mark_failed(&row.id, &error, self.max_retries)?;
                        if status == "dead_letter" {
                            stats.dead_lettered += 1;
                        }
                    }
                }
            }
        }
        Ok(stats)
    }
}

/// Outcome counts reported by `drain`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub retried: usize,
    pub completed: usize,
    pub dead_lettered: usize,
}

/// Invoke every subscriber; collect failures (including panics) into one
/// error string. No subscribers is a vacuous success.
fn run_hook(
    subscribers: &[Arc<dyn Extension>],
    hook: &str,
    payload: &serde_json::Value,
) -> std::result::Result<(), String> {
    let mut failures = Vec::new();
    for ext in subscribers {
        let attempt = catch_unwind(AssertUnwindSafe(|| ext.invoke(hook, payload)));
        match attempt {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(format!("{}: {e}", ext.name())),
            Err(_) => failures.push(format!("{}: panicked", ext.name())),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

fn settle_via_path(
    db_path: &PathBuf,
    entry_id: &str,
    outcome: std::result::Result<(), String>,
    max_retries: i64,
) -> Result<()> {
    let store = Store::open(db_path)?;
    match outcome {
        Ok(()) => store.wal_mark_completed(entry_id, Utc::now()),
        Err(error) => store.wal_mark_failed(entry_id, &error, max_retries).map(|_| ()),
    }
}
