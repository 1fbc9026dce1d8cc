//! A lightweight task-parallel runtime: a work-stealing scheduler with
//! hierarchical place-tree stealing, nested finish-scope termination
//! barriers, an address-keyed isolation primitive, and an actor-style
//! mailbox/selector layer for aggregating messages through an external
//! conveyor transport.
//!
//! The moving pieces, leaves first: [`deque`] (bounded work-stealing
//! deque) and [`place`] (the locality tree workers steal within) back
//! [`worker`] (the pop/steal/execute loop) and [`finish`] (nested
//! termination barriers). [`isolation`] provides deadlock-free
//! multi-address mutual exclusion. [`buffer`], [`conveyor`],
//! [`mailbox`], and [`selector`] build the message-aggregation layer.
//! [`runtime`] ties it all together behind `init`/`finalize` and the
//! free functions re-exported at the crate root.

#[macro_use]
extern crate lazy_static;

// Re-exported so `err_format!`'s `$crate::failure::err_msg` resolves
// without every caller needing its own `failure` dependency.
pub use failure;

#[macro_use]
pub mod errors;

pub mod buffer;
pub mod config;
pub mod conveyor;
pub mod deque;
pub mod finish;
pub mod isolation;
pub mod mailbox;
pub mod place;
pub mod prelude;
pub mod runtime;
pub mod selector;
pub mod stats;
pub mod task;
pub mod unwind;
pub mod worker;

pub use crate::buffer::{BufferPacket, SafeBuffer, DONE_RANK};
pub use crate::config::Config;
pub use crate::conveyor::{Conveyor, LoopbackConveyor};
pub use crate::errors::Result;
pub use crate::finish::FinishScope;
pub use crate::isolation::IsolationMap;
pub use crate::mailbox::Mailbox;
pub use crate::place::{Place, PlaceKind};
pub use crate::runtime::{
    current_worker_id, disable_isolation, disable_isolation_1d, enable_isolation,
    enable_isolation_1d, enable_isolation_2d, end_finish, finish, isolated_execution, num_workers,
    spawn, spawn_async_any, spawn_comm, start_finish, total_async_any_available,
    total_pending_local_asyncs, Runtime,
};
pub use crate::selector::Selector;
pub use crate::worker::WorkerState;
