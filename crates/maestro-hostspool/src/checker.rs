//! The connection probe seam.
//!
//! The real implementation opens an SSH session and runs a trivial
//! command; it lives with the infrastructure adapters. The pool only needs
//! the verdict.

use async_trait::async_trait;

use crate::manager::Connection;

/// Probes whether a host is reachable with the given connection settings.
#[async_trait]
pub trait ConnectionChecker: Send + Sync {
    /// Returns `Ok(())` when the host accepted the connection, or a
    /// human-readable failure reason.
    async fn check(&self, connection: &Connection) -> std::result::Result<(), String>;
}

/// A checker that accepts every connection. Test and development default.
#[derive(Debug, Default)]
pub struct AlwaysUpChecker;

#[async_trait]
impl ConnectionChecker for AlwaysUpChecker {
    async fn check(&self, _connection: &Connection) -> std::result::Result<(), String> {
        Ok(())
    }
}
