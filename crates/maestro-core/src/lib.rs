//! # maestro-core
//!
//! Core abstractions for the Maestro deployment orchestrator.
//!
//! This crate provides the foundational types and traits used across all
//! Maestro components:
//!
//! - **Coordination store**: A hierarchical, transactional key/value store
//!   with blocking watches ([`kv::KvStore`]) and an in-memory implementation
//! - **Distributed locks**: TTL-based advisory locks ([`lock::KvLock`])
//! - **Leader election**: Lock-based single-owner election ([`leader`])
//! - **Bounded publisher**: Backpressured parallel writes ([`publish`])
//! - **Identifiers**: Strongly-typed IDs for deployments, tasks and actions
//! - **Error types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `maestro-core` is the **only** crate allowed to define shared primitives.
//! Domain semantics (topologies, tasks, workflows) live in the crates built
//! on top of it.
//!
//! ## Example
//!
//! ```rust
//! use maestro_core::prelude::*;
//!
//! let deployment = DeploymentId::new("my-app").unwrap();
//! let task = TaskId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod kv;
pub mod leader;
pub mod lock;
pub mod observability;
pub mod publish;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use maestro_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{ActionId, DeploymentId, TaskId};
    pub use crate::kv::{KvPair, KvStore, MemoryKvStore, Transaction, TxnOp, MAX_TXN_OPS};
    pub use crate::leader::{LeaderElector, LeadershipResult};
    pub use crate::lock::{KvLock, LockGuard, LockInfo};
    pub use crate::publish::Publisher;
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use id::{ActionId, DeploymentId, TaskId};
pub use kv::{KvPair, KvStore, MemoryKvStore, Transaction, TxnOp, MAX_TXN_OPS};
pub use leader::{LeaderElector, LeadershipResult};
pub use lock::{KvLock, LockGuard, LockInfo};
pub use observability::{init_logging, LogFormat};
pub use publish::Publisher;
