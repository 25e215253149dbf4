//! Adapter runtime kernel for FIMP device adapters.
//!
//! - **[`Router`]** dispatches inbound bus messages to the first matching
//!   [`Routing`], runs handlers under optional shared locks, and turns
//!   handler errors into `evt.error.report` messages.
//! - **[`TaskManager`]** runs interval [`Task`]s gated by voters.
//! - **[`Adapter`]** owns the thing registry: address allocation,
//!   inclusion and exclusion reporting, persistent thing state.
//! - **[`EventManager`]** is an in-process pub/sub side channel for
//!   lifecycle and connectivity observations.
//! - **[`Edge`]** composes transport, router and tasks into one unit.

pub mod adapter;
pub mod backoff;
pub mod builder;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod router;
pub mod task;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{Adapter, Service, Thing, ThingContext, ThingFactory, ThingState};
pub use backoff::{Backoff, StatefulBackoff};
pub use builder::{Edge, EdgeBuilder};
pub use config::{AdapterConfig, RouterConfig};
pub use discovery::ResourceDescriptor;
pub use error::CoreError;
pub use event::{Event, EventFilter, EventKind, EventManager, EventPayload, EventSubscription};
pub use lifecycle::{AppState, ConnectionState, Lifecycle};
pub use router::{handler_fn, handler_lock, HandlerLock, MessageHandler, Predicate, Router, Routing};
pub use task::{Task, TaskManager, Voter};
