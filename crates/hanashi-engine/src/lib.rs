//! hanashi engine: many conversations, one bus.
//!
//! The [`Engine`] owns a [`hanashi_timeline::Timeline`] per conversation
//! and is what the network layer and the presentation layer talk to.
//!
//! ```text
//!   network ──ingest_remote──┐                  ┌──▶ subscribe(conv, callback)
//!                            ▼                  │      (coalesced invalidations)
//!   user ──submit_local──▶ Engine ──FlowBus────┤
//!              │           │  ▲                 └──▶ signals()
//!              ▼           │  │                        UnresolvedReference
//!        MutationSink      │  restore(SnapshotSource)  ProvisionalExpired
//!                          ▼                           DirectoryUnavailable
//!            get_groups / get_pins / get_thread_count / get_reply_preview
//! ```
//!
//! Local mutations apply immediately and stay provisional until the same
//! event comes back from the network. [`Engine::sweep`] (or the task from
//! [`Engine::spawn_sweeper`]) expires what never resolves and publishes a
//! signal for it.

mod config;
mod engine;
mod error;
pub mod flows;
mod network;
mod provisional;
mod view;

pub use config::EngineConfig;
pub use engine::{ALL_SIGNALS, Engine, RestoreReport};
pub use error::{EngineError, Result};
pub use flows::{EngineSignal, FlowBus, FlowMessage, Subscription, TimelineFlow};
pub use network::{EventStream, MemorySnapshot, MutationSink, NullSink, SnapshotSource};
pub use provisional::ProvisionalTracker;
pub use view::ViewHandle;
