//! # maestro-hostspool
//!
//! Host pool management: a curated set of bare-metal or pre-provisioned
//! hosts that deployments can allocate by label selection.
//!
//! Hosts live in the coordination store under
//! `_maestro/hosts-pool/<location>/<host>/`. Connection updates are
//! serialised per host through a named lock, and a failing connection
//! check moves the host to `Error` while backing up its previous status so
//! recovery can restore it.
//!
//! The actual SSH probe is an infrastructure concern behind the
//! [`ConnectionChecker`] trait; this crate owns the bookkeeping.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod checker;
pub mod error;
pub mod manager;

pub use checker::{AlwaysUpChecker, ConnectionChecker};
pub use error::{Error, Result};
pub use manager::{Connection, ConnectionUpdate, Host, HostStatus, HostsPoolManager};
