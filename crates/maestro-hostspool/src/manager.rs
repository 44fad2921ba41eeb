//! The host pool manager.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use maestro_core::{KvLock, KvStore, Transaction, TxnOp};

use crate::checker::ConnectionChecker;
use crate::error::{Error, Result};

/// Root prefix for the host pool.
pub const HOSTS_POOL_PREFIX: &str = "_maestro/hosts-pool";

/// Maximum wait for the per-host update lock.
const LOCK_MAX_WAIT: Duration = Duration::from_secs(120);

/// Lock TTL for per-host updates.
const LOCK_TTL: Duration = Duration::from_secs(30);

/// Status of a pooled host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostStatus {
    /// Available for allocation.
    Free,
    /// Allocated to a deployment.
    Allocated,
    /// Unreachable; previous status is backed up for recovery.
    Error,
}

impl HostStatus {
    /// Returns the wire name of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Allocated => "Allocated",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Case-insensitive, matching historical tooling output.
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "allocated" => Ok(Self::Allocated),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidEnumValue {
                kind: "host status",
                value: other.to_string(),
            }),
        }
    }
}

/// SSH connection settings of a pooled host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    /// Hostname or address. Defaults to the pool entry name when empty.
    pub host: String,
    /// SSH user.
    pub user: String,
    /// SSH port (0 means default).
    pub port: u16,
    /// Password, when password authentication is used.
    pub password: String,
    /// Private key, when key authentication is used.
    pub private_key: String,
}

impl Connection {
    /// Returns true if at least one authentication method is set.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.password.is_empty() || !self.private_key.is_empty()
    }
}

/// A partial connection update.
///
/// Empty fields are left unchanged; the literal `-` clears a credential
/// field, subject to the invariant that at least one of password and
/// private key remains set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionUpdate {
    /// New hostname or address.
    pub host: String,
    /// New SSH user.
    pub user: String,
    /// New SSH port (0 leaves the port unchanged).
    pub port: u16,
    /// New password (`-` clears).
    pub password: String,
    /// New private key (`-` clears).
    pub private_key: String,
}

/// A pool entry as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Host name within its location.
    pub hostname: String,
    /// Current status.
    pub status: HostStatus,
    /// Status message (set when the host is in `Error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Labels for allocation filtering.
    pub labels: BTreeMap<String, String>,
}

fn host_prefix(location: &str, hostname: &str) -> String {
    format!("{HOSTS_POOL_PREFIX}/{location}/{hostname}/")
}

fn lock_key(location: &str, hostname: &str) -> String {
    format!("{HOSTS_POOL_PREFIX}/.locks/{location}/{hostname}")
}

/// Manager of one or more host pool locations.
pub struct HostsPoolManager {
    store: Arc<dyn KvStore>,
    checker: Arc<dyn ConnectionChecker>,
}

impl HostsPoolManager {
    /// Creates a manager using the given connection probe.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, checker: Arc<dyn ConnectionChecker>) -> Self {
        Self { store, checker }
    }

    /// Adds a host to a location.
    ///
    /// The host starts `Free`; a failing connection probe immediately
    /// moves it to `Error` (with its previous status backed up) and the
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostAlreadyExists`], [`Error::BadRequest`] on
    /// missing credentials, or [`Error::ConnectionFailure`].
    pub async fn add_host(
        &self,
        location: &str,
        hostname: &str,
        connection: Connection,
        labels: BTreeMap<String, String>,
    ) -> Result<()> {
        validate_names(location, hostname)?;
        if !connection.has_credentials() {
            return Err(Error::bad_request(
                r#"at any time at least one of "password" or "private_key" is required"#,
            ));
        }

        let prefix = host_prefix(location, hostname);
        let mut ops = vec![
            TxnOp::CheckNotExists {
                key: format!("{prefix}status"),
            },
            TxnOp::set(format!("{prefix}status"), HostStatus::Free.as_str()),
        ];
        ops.extend(connection_ops(&prefix, &connection));
        for (key, value) in &labels {
            ops.push(TxnOp::set(format!("{prefix}labels/{key}"), value.clone()));
        }

        let outcome = self.store.txn(ops).await.map_err(maestro_core::Error::from)?;
        if !outcome.is_committed() {
            return Err(Error::HostAlreadyExists {
                location: location.to_string(),
                hostname: hostname.to_string(),
            });
        }

        self.probe_and_record(location, hostname).await
    }

    /// Removes a free host from its location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostNotFree`] unless the host is `Free`.
    pub async fn remove_host(&self, location: &str, hostname: &str) -> Result<()> {
        validate_names(location, hostname)?;
        let status = self.get_host_status(location, hostname).await?;
        if status != HostStatus::Free {
            return Err(Error::HostNotFree {
                hostname: hostname.to_string(),
                status: status.to_string(),
            });
        }
        self.store
            .delete_tree(&host_prefix(location, hostname))
            .await
            .map_err(Error::from)
    }

    /// Lists the hosts of a location.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the store.
    pub async fn list_hosts(&self, location: &str) -> Result<Vec<Host>> {
        let prefix = format!("{HOSTS_POOL_PREFIX}/{location}/");
        let mut hosts = Vec::new();
        for hostname in self.store.child_names(&prefix).await? {
            if hostname.starts_with('.') {
                continue;
            }
            let status = self.get_host_status(location, &hostname).await?;
            let host_prefix = host_prefix(location, &hostname);
            let message = self.store.get_string(&format!("{host_prefix}message")).await?;
            let labels_prefix = format!("{host_prefix}labels/");
            let mut labels = BTreeMap::new();
            for pair in self.store.list(&labels_prefix).await? {
                let key = pair.key[labels_prefix.len()..].to_string();
                let value = String::from_utf8(pair.value.to_vec()).map_err(|e| {
                    maestro_core::Error::serialization(format!("label {key}: {e}"))
                })?;
                labels.insert(key, value);
            }
            hosts.push(Host {
                hostname,
                status,
                message,
                labels,
            });
        }
        Ok(hosts)
    }

    /// Reads a host's status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostNotFound`] when the host is absent.
    pub async fn get_host_status(&self, location: &str, hostname: &str) -> Result<HostStatus> {
        let raw = self
            .store
            .get_string(&format!("{}status", host_prefix(location, hostname)))
            .await?
            .ok_or_else(|| Error::HostNotFound {
                location: location.to_string(),
                hostname: hostname.to_string(),
            })?;
        raw.parse()
    }

    /// Reads a host's connection settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostNotFound`] when the host is absent.
    pub async fn get_host_connection(&self, location: &str, hostname: &str) -> Result<Connection> {
        // Existence check first so absent hosts don't read as empty
        // connections.
        self.get_host_status(location, hostname).await?;

        let prefix = format!("{}connection/", host_prefix(location, hostname));
        let read = |field: &str| {
            let key = format!("{prefix}{field}");
            let store = Arc::clone(&self.store);
            async move { store.get_string(&key).await }
        };

        let mut connection = Connection {
            host: read("host").await?.unwrap_or_default(),
            user: read("user").await?.unwrap_or_default(),
            port: 0,
            password: read("password").await?.unwrap_or_default(),
            private_key: read("private_key").await?.unwrap_or_default(),
        };
        if let Some(raw_port) = read("port").await? {
            connection.port = raw_port.parse().map_err(|_| {
                Error::bad_request(format!(
                    "stored port {raw_port:?} for host {hostname:?} is not a number"
                ))
            })?;
        }
        if connection.host.is_empty() {
            connection.host = hostname.to_string();
        }
        Ok(connection)
    }

    /// Updates a host's connection, serialised per host via a named lock.
    ///
    /// Empty update fields are unchanged; `-` clears a credential field as
    /// long as the other one remains set. The new settings are probed; on
    /// failure the host moves to `Error` with its previous status backed
    /// up, and recovery restores it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] on credential-clearing violations or
    /// [`Error::ConnectionFailure`] when the probe fails.
    pub async fn update_connection(
        &self,
        location: &str,
        hostname: &str,
        mut update: ConnectionUpdate,
    ) -> Result<()> {
        validate_names(location, hostname)?;
        let current = self.get_host_connection(location, hostname).await?;

        if update.private_key == "-" {
            let password_remains = if update.password == "-" {
                false
            } else if update.password.is_empty() {
                !current.password.is_empty()
            } else {
                true
            };
            if !password_remains {
                return Err(Error::bad_request(
                    r#"at any time at least one of "password" or "private_key" is required"#,
                ));
            }
            update.private_key = String::new();
            self.store
                .set(
                    &format!("{}connection/private_key", host_prefix(location, hostname)),
                    Bytes::new(),
                )
                .await?;
        }
        if update.password == "-" {
            let key_remains = if update.private_key.is_empty() {
                !current.private_key.is_empty()
            } else {
                true
            };
            if !key_remains {
                return Err(Error::bad_request(
                    r#"at any time at least one of "password" or "private_key" is required"#,
                ));
            }
            update.password = String::new();
            self.store
                .set(
                    &format!("{}connection/password", host_prefix(location, hostname)),
                    Bytes::new(),
                )
                .await?;
        }

        let prefix = host_prefix(location, hostname);
        let mut txn = Transaction::new();
        if !update.host.is_empty() {
            txn.set(format!("{prefix}connection/host"), update.host.clone());
        }
        if !update.user.is_empty() {
            txn.set(format!("{prefix}connection/user"), update.user.clone());
        }
        if update.port != 0 {
            txn.set(format!("{prefix}connection/port"), update.port.to_string());
        }
        if !update.password.is_empty() {
            txn.set(format!("{prefix}connection/password"), update.password.clone());
        }
        if !update.private_key.is_empty() {
            txn.set(
                format!("{prefix}connection/private_key"),
                update.private_key.clone(),
            );
        }

        let lock = KvLock::new(Arc::clone(&self.store), lock_key(location, hostname));
        let guard = lock
            .acquire_with_operation(LOCK_TTL, LOCK_MAX_WAIT, Some("update".into()))
            .await?;

        let result = async {
            if !txn.is_empty() {
                txn.commit(self.store.as_ref()).await?;
            }
            Ok::<_, Error>(())
        }
        .await;
        guard.release().await?;
        result?;

        self.probe_and_record(location, hostname).await
    }

    /// Probes the host and records the outcome: `Error` (with backup) on
    /// failure, restored status on recovery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailure`] when the probe fails.
    pub async fn probe_and_record(&self, location: &str, hostname: &str) -> Result<()> {
        let status = self.get_host_status(location, hostname).await?;
        let connection = self.get_host_connection(location, hostname).await?;

        match self.checker.check(&connection).await {
            Ok(()) => {
                if status == HostStatus::Error {
                    self.restore_host_status(location, hostname).await?;
                }
                Ok(())
            }
            Err(message) => {
                if status != HostStatus::Error {
                    self.backup_host_status(location, hostname, status).await?;
                    self.set_host_status_with_message(
                        location,
                        hostname,
                        HostStatus::Error,
                        "failed to connect to host",
                    )
                    .await?;
                }
                Err(Error::ConnectionFailure { message })
            }
        }
    }

    /// Allocates a free host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostNotFree`] unless the host is `Free`.
    pub async fn allocate(&self, location: &str, hostname: &str, allocation_id: &str) -> Result<()> {
        let status = self.get_host_status(location, hostname).await?;
        if status != HostStatus::Free {
            return Err(Error::HostNotFree {
                hostname: hostname.to_string(),
                status: status.to_string(),
            });
        }
        let prefix = host_prefix(location, hostname);
        self.store
            .txn(vec![
                TxnOp::set(format!("{prefix}status"), HostStatus::Allocated.as_str()),
                TxnOp::set(format!("{prefix}allocations/{allocation_id}"), ""),
            ])
            .await
            .map_err(maestro_core::Error::from)?;
        Ok(())
    }

    /// Releases an allocated host back to the free pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostNotFound`] when the host is absent.
    pub async fn release(&self, location: &str, hostname: &str, allocation_id: &str) -> Result<()> {
        self.get_host_status(location, hostname).await?;
        let prefix = host_prefix(location, hostname);
        self.store
            .txn(vec![
                TxnOp::Delete {
                    key: format!("{prefix}allocations/{allocation_id}"),
                },
                TxnOp::set(format!("{prefix}status"), HostStatus::Free.as_str()),
            ])
            .await
            .map_err(maestro_core::Error::from)?;
        Ok(())
    }

    async fn set_host_status_with_message(
        &self,
        location: &str,
        hostname: &str,
        status: HostStatus,
        message: &str,
    ) -> Result<()> {
        let prefix = host_prefix(location, hostname);
        self.store
            .txn(vec![
                TxnOp::set(format!("{prefix}status"), status.as_str()),
                TxnOp::set(format!("{prefix}message"), message),
            ])
            .await
            .map_err(maestro_core::Error::from)?;
        Ok(())
    }

    async fn backup_host_status(
        &self,
        location: &str,
        hostname: &str,
        status: HostStatus,
    ) -> Result<()> {
        self.store
            .set(
                &format!("{}status_backup", host_prefix(location, hostname)),
                Bytes::from(status.as_str()),
            )
            .await
            .map_err(Error::from)
    }

    async fn restore_host_status(&self, location: &str, hostname: &str) -> Result<()> {
        let prefix = host_prefix(location, hostname);
        let backed_up = self
            .store
            .get_string(&format!("{prefix}status_backup"))
            .await?
            .map(|raw| raw.parse())
            .transpose()?
            .unwrap_or(HostStatus::Free);
        self.store
            .txn(vec![
                TxnOp::set(format!("{prefix}status"), backed_up.as_str()),
                TxnOp::Delete {
                    key: format!("{prefix}status_backup"),
                },
                TxnOp::Delete {
                    key: format!("{prefix}message"),
                },
            ])
            .await
            .map_err(maestro_core::Error::from)?;
        Ok(())
    }
}

fn validate_names(location: &str, hostname: &str) -> Result<()> {
    if location.is_empty() {
        return Err(Error::bad_request(r#""location" missing"#));
    }
    if hostname.is_empty() {
        return Err(Error::bad_request(r#""hostname" missing"#));
    }
    Ok(())
}

fn connection_ops(prefix: &str, connection: &Connection) -> Vec<TxnOp> {
    let mut ops = Vec::new();
    if !connection.host.is_empty() {
        ops.push(TxnOp::set(format!("{prefix}connection/host"), connection.host.clone()));
    }
    if !connection.user.is_empty() {
        ops.push(TxnOp::set(format!("{prefix}connection/user"), connection.user.clone()));
    }
    if connection.port != 0 {
        ops.push(TxnOp::set(
            format!("{prefix}connection/port"),
            connection.port.to_string(),
        ));
    }
    if !connection.password.is_empty() {
        ops.push(TxnOp::set(
            format!("{prefix}connection/password"),
            connection.password.clone(),
        ));
    }
    if !connection.private_key.is_empty() {
        ops.push(TxnOp::set(
            format!("{prefix}connection/private_key"),
            connection.private_key.clone(),
        ));
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::AlwaysUpChecker;
    use async_trait::async_trait;
    use maestro_core::MemoryKvStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Checker whose verdict can be flipped at runtime.
    struct FlakyChecker {
        down: AtomicBool,
    }

    #[async_trait]
    impl ConnectionChecker for FlakyChecker {
        async fn check(&self, _connection: &Connection) -> std::result::Result<(), String> {
            if self.down.load(Ordering::SeqCst) {
                Err("connection refused".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn connection() -> Connection {
        Connection {
            host: "10.0.0.5".to_string(),
            user: "admin".to_string(),
            port: 22,
            password: String::new(),
            private_key: "-----BEGIN KEY-----".to_string(),
        }
    }

    fn manager_with(checker: Arc<dyn ConnectionChecker>) -> HostsPoolManager {
        HostsPoolManager::new(Arc::new(MemoryKvStore::new()), checker)
    }

    #[test]
    fn host_status_parse_is_case_insensitive() {
        assert_eq!("free".parse::<HostStatus>().unwrap(), HostStatus::Free);
        assert_eq!("Allocated".parse::<HostStatus>().unwrap(), HostStatus::Allocated);
        assert!("busy".parse::<HostStatus>().is_err());
    }

    #[tokio::test]
    async fn add_list_and_remove_host() {
        let manager = manager_with(Arc::new(AlwaysUpChecker));
        let mut labels = BTreeMap::new();
        labels.insert("os".to_string(), "linux".to_string());

        manager
            .add_host("dc1", "host-1", connection(), labels)
            .await
            .unwrap();

        let hosts = manager.list_hosts("dc1").await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "host-1");
        assert_eq!(hosts[0].status, HostStatus::Free);
        assert_eq!(hosts[0].labels["os"], "linux");

        manager.remove_host("dc1", "host-1").await.unwrap();
        assert!(manager.list_hosts("dc1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_host_is_rejected() {
        let manager = manager_with(Arc::new(AlwaysUpChecker));
        manager
            .add_host("dc1", "host-1", connection(), BTreeMap::new())
            .await
            .unwrap();
        let err = manager
            .add_host("dc1", "host-1", connection(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn host_without_credentials_is_rejected() {
        let manager = manager_with(Arc::new(AlwaysUpChecker));
        let err = manager
            .add_host("dc1", "host-1", Connection::default(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn allocation_lifecycle() {
        let manager = manager_with(Arc::new(AlwaysUpChecker));
        manager
            .add_host("dc1", "host-1", connection(), BTreeMap::new())
            .await
            .unwrap();

        manager.allocate("dc1", "host-1", "alloc-1").await.unwrap();
        assert_eq!(
            manager.get_host_status("dc1", "host-1").await.unwrap(),
            HostStatus::Allocated
        );

        // An allocated host cannot be allocated again or removed.
        assert!(matches!(
            manager.allocate("dc1", "host-1", "alloc-2").await,
            Err(Error::HostNotFree { .. })
        ));
        assert!(matches!(
            manager.remove_host("dc1", "host-1").await,
            Err(Error::HostNotFree { .. })
        ));

        manager.release("dc1", "host-1", "alloc-1").await.unwrap();
        assert_eq!(
            manager.get_host_status("dc1", "host-1").await.unwrap(),
            HostStatus::Free
        );
    }

    #[tokio::test]
    async fn connection_update_merges_fields() {
        let manager = manager_with(Arc::new(AlwaysUpChecker));
        manager
            .add_host("dc1", "host-1", connection(), BTreeMap::new())
            .await
            .unwrap();

        manager
            .update_connection(
                "dc1",
                "host-1",
                ConnectionUpdate {
                    user: "operator".to_string(),
                    ..ConnectionUpdate::default()
                },
            )
            .await
            .unwrap();

        let read = manager.get_host_connection("dc1", "host-1").await.unwrap();
        assert_eq!(read.user, "operator");
        // Untouched fields survive.
        assert_eq!(read.host, "10.0.0.5");
        assert_eq!(read.port, 22);
    }

    #[tokio::test]
    async fn clearing_the_last_credential_is_rejected() {
        let manager = manager_with(Arc::new(AlwaysUpChecker));
        manager
            .add_host("dc1", "host-1", connection(), BTreeMap::new())
            .await
            .unwrap();

        // The host only has a private key; clearing it without providing a
        // password must fail.
        let err = manager
            .update_connection(
                "dc1",
                "host-1",
                ConnectionUpdate {
                    private_key: "-".to_string(),
                    ..ConnectionUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        // Swapping key auth for password auth in one update is fine.
        manager
            .update_connection(
                "dc1",
                "host-1",
                ConnectionUpdate {
                    private_key: "-".to_string(),
                    password: "secret".to_string(),
                    ..ConnectionUpdate::default()
                },
            )
            .await
            .unwrap();
        let read = manager.get_host_connection("dc1", "host-1").await.unwrap();
        assert!(read.private_key.is_empty());
        assert_eq!(read.password, "secret");
    }

    #[tokio::test]
    async fn failed_probe_backs_up_status_and_recovery_restores_it() {
        let checker = Arc::new(FlakyChecker {
            down: AtomicBool::new(false),
        });
        let manager = manager_with(Arc::clone(&checker) as Arc<dyn ConnectionChecker>);
        manager
            .add_host("dc1", "host-1", connection(), BTreeMap::new())
            .await
            .unwrap();
        manager.allocate("dc1", "host-1", "alloc-1").await.unwrap();

        // Host goes down: status flips to Error, previous status backed up.
        checker.down.store(true, Ordering::SeqCst);
        let err = manager.probe_and_record("dc1", "host-1").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure { .. }));
        assert_eq!(
            manager.get_host_status("dc1", "host-1").await.unwrap(),
            HostStatus::Error
        );

        // Host comes back: the Allocated status is restored.
        checker.down.store(false, Ordering::SeqCst);
        manager.probe_and_record("dc1", "host-1").await.unwrap();
        assert_eq!(
            manager.get_host_status("dc1", "host-1").await.unwrap(),
            HostStatus::Allocated
        );
    }
}
