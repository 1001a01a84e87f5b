//! # Core Engine Module
//!
//! The generic machinery the ingestion engine is built on. Nothing in here
//! knows about trains or signals.
//!
//! ## Core Components:
//!
//! - **`worker`**: the isolated, supervised task that runs one data kind's
//!   fetch logic and answers requests over a `oneshot` responder.
//!
//! - **`orchestrator`**: the recurring, self-correcting fetch cycle for a
//!   global data kind, with watchdog-driven worker recreation.
//!
//! - **`per_server`**: the same cycle walking every active game server in
//!   sequence, emitting per-server events and full-round snapshots.
//!
//! - **`ttl_cache`**: time-bounded LRU map backing the short-lived read caches
//!   and the analyzer state.
//!
//! - **`persist`**: atomic file replacement and bincode snapshot helpers.

/// Isolated fetch worker with crash/stall recovery.
pub mod worker;
/// Recurring fetch cycle for one global data kind.
pub mod orchestrator;
/// Sequential per-server fetch cycle.
pub mod per_server;
/// Time-bounded least-recently-used cache.
pub mod ttl_cache;
/// Durable snapshot helpers.
pub mod persist;

// --- Public API Re-exports ---
pub use orchestrator::{next_delay, FetchOrchestrator, Snapshot, WATCHDOG_TIMEOUT};
pub use per_server::{PerServerOrchestrator, ServerEvent, ServerListFn, ServerMap};
pub use persist::{atomic_write, load_bincode, save_bincode, PersistError};
pub use ttl_cache::{CacheEntry, TtlCache};
pub use worker::{FetchJob, WorkerError, WorkerUnit};
