//! # Rallypoint Core - Match Routing and Fleet Reconciliation
//!
//! The control loops of a matchmade multiplayer backend. Three components
//! read external, eventually-consistent state and keep the backend's routing
//! tables and fleet protection flags honest:
//!
//! * **MatchRouter** - turns matchmaking-succeeded notifications into durable
//!   connection records, optionally rewriting the session endpoint through a
//!   traffic accelerator, and answers client polls for those records.
//! * **PortMappingSynchronizer** - mirrors the accelerator's live
//!   port-mapping set into a local lookup table with paginated retrieval,
//!   bounded-parallel batch writes, retry with backoff, and
//!   write-then-prune replacement.
//! * **IdleReconciler** - releases scale-in protection on compute units that
//!   no longer host an active game session, returning capacity to the
//!   autoscaler.
//!
//! ## Collaborator seams
//!
//! External services sit behind the async traits in [`services`]; durable
//! tables sit behind the traits in [`store`]. Service handles are created
//! once at startup and passed into component constructors. The [`stub`]
//! module ships in-memory implementations of every seam, used both as the
//! local development backend and as the substrate for the test suite.
//!
//! ## Failure model
//!
//! Each component isolates per-unit failures (one ticket, one batch, one
//! compute unit) so siblings always make progress, and only escalates when
//! a whole dependency is unreachable. See the module docs for the exact
//! semantics.

pub use reconcile::{IdleReconciler, ReconcileError, ReconcileReport};
pub use router::{MatchRouter, RouteError, RouteSummary, RouterConfig};
pub use services::{
    AcceleratorService, MatchmakingService, OrchestrationService, PROTECTION_STATUS_MAX_BATCH,
};
pub use store::{ConnectionStore, MappingStore, MemoryConnectionStore, MemoryMappingStore};
pub use sync::{PortMappingSynchronizer, SyncConfig, SyncError, SyncReport};

pub mod reconcile;
pub mod router;
pub mod services;
pub mod store;
pub mod stub;
pub mod sync;
