//! In-memory simulated deployment.
//!
//! Models exactly the server behaviour a DDL race inspects: collection
//! identity, `config.queryAnalyzers`, host-scoped fail points, the
//! per-namespace DDL lock, and the phases of `analyzeShardKey` and
//! `configureQueryAnalyzer`. Lets the full race matrix run under `cargo test`.
//!
//! Topology differences that matter to the harness:
//! - sharded: commands go to `mongos-0`, execute on `shard0-primary`; dropping
//!   or renaming a collection deletes its `config.queryAnalyzers` document
//! - replica set: everything on `rs0-primary`; the document is left behind

mod analyze;
mod catalog;
mod fail_point;
mod query_analyzer;

use async_trait::async_trait;
use dashmap::DashMap;
use ddl_race_types::{
    CollectionUuid, CommandFailure, CommandKind, CommandSpec, ErrorCode, Namespace, Outcome,
    QueryAnalyzerDoc, Topology,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use crate::connection::{ClientError, Connection, Deployment, FailPointMode};
use catalog::{Catalog, CatalogError};
use fail_point::FailPointRegistry;

/// Router host of the simulated sharded cluster.
pub const SHARDED_ROUTER_HOST: &str = "mongos-0";
/// Shard primary of the simulated sharded cluster.
pub const SHARDED_DATA_HOST: &str = "shard0-primary";
/// Primary of the simulated replica set.
pub const REPLICA_SET_HOST: &str = "rs0-primary";

/// Server parameters of the simulated deployment.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// `analyzeShardKeyNumRanges`: split point ranges for read/write metrics.
    pub analyze_num_ranges: u64,
    /// Distinct samples the split point policy needs per range.
    pub samples_per_split_point: u64,
    /// Documents scanned between yields.
    pub scan_batch_size: usize,
    /// Simulated work per scanned batch.
    pub scan_batch_delay: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            analyze_num_ranges: 10,
            samples_per_split_point: 10,
            scan_batch_size: 8,
            scan_batch_delay: Duration::from_millis(1),
        }
    }
}

/// Journal entry recorded by the simulated deployment, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A command began executing.
    CommandStarted {
        /// Command.
        command: CommandKind,
        /// Target namespace.
        ns: Namespace,
    },
    /// A command continued past a fail point location.
    PhaseResumed {
        /// Target namespace.
        ns: Namespace,
        /// Fail point guarding the phase.
        fail_point: &'static str,
        /// Whether the execution was parked there.
        parked: bool,
    },
    /// A command finished.
    CommandFinished {
        /// Command.
        command: CommandKind,
        /// Target namespace.
        ns: Namespace,
        /// Error code, if it failed.
        code: Option<ErrorCode>,
    },
    /// A collection was renamed.
    Renamed {
        /// Source.
        from: Namespace,
        /// Target.
        to: Namespace,
    },
    /// A collection was dropped.
    Dropped {
        /// Namespace.
        ns: Namespace,
        /// Whether it existed.
        existed: bool,
    },
    /// A collection was created.
    Created {
        /// Namespace.
        ns: Namespace,
        /// New identity.
        uuid: CollectionUuid,
    },
    /// All documents were deleted.
    Emptied {
        /// Namespace.
        ns: Namespace,
        /// Documents removed.
        deleted: u64,
    },
    /// A `config.queryAnalyzers` document was written.
    QueryAnalyzerWritten {
        /// Namespace.
        ns: Namespace,
        /// Identity recorded in the document.
        uuid: CollectionUuid,
    },
    /// A `config.queryAnalyzers` document was deleted.
    QueryAnalyzerRemoved {
        /// Namespace.
        ns: Namespace,
    },
}

/// Why a simulated command stopped early.
pub(crate) enum Abort {
    /// The command fails with an error reply.
    Command(CommandFailure),
    /// The connection fails (host down).
    Client(ClientError),
}

impl From<CommandFailure> for Abort {
    fn from(failure: CommandFailure) -> Self {
        Abort::Command(failure)
    }
}

impl From<ClientError> for Abort {
    fn from(err: ClientError) -> Self {
        Abort::Client(err)
    }
}

pub(crate) type Step<T> = Result<T, Abort>;

/// Shared state of one simulated deployment.
pub(crate) struct SimServer {
    topology: Topology,
    options: SimOptions,
    router_host: &'static str,
    data_host: &'static str,
    catalog: Mutex<Catalog>,
    ddl_locks: DashMap<Namespace, Arc<tokio::sync::Mutex<()>>>,
    fail_points: FailPointRegistry,
    hosts: DashMap<String, watch::Sender<bool>>,
    events: Mutex<Vec<SimEvent>>,
}

impl SimServer {
    fn new(topology: Topology, options: SimOptions) -> Self {
        let (router_host, data_host) = match topology {
            Topology::Sharded => (SHARDED_ROUTER_HOST, SHARDED_DATA_HOST),
            Topology::ReplicaSet => (REPLICA_SET_HOST, REPLICA_SET_HOST),
        };
        let hosts = DashMap::new();
        for host in [router_host, data_host] {
            let (tx, _) = watch::channel(true);
            hosts.entry(host.to_string()).or_insert(tx);
        }
        Self {
            topology,
            options,
            router_host,
            data_host,
            catalog: Mutex::new(Catalog::default()),
            ddl_locks: DashMap::new(),
            fail_points: FailPointRegistry::default(),
            hosts,
            events: Mutex::new(Vec::new()),
        }
    }

    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: SimEvent) {
        tracing::trace!(?event, "sim event");
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn events(&self) -> Vec<SimEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn ddl_lock(&self, ns: &Namespace) -> Arc<tokio::sync::Mutex<()>> {
        self.ddl_locks
            .entry(ns.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    /// Forget the DDL lock of a namespace that no longer holds a collection.
    ///
    /// Must be called while holding that lock: the entry is only removed when
    /// the map and the caller's guard are its sole owners, so no waiter can
    /// end up on a different mutex than a later caller.
    fn prune_ddl_lock(&self, ns: &Namespace) {
        if self.catalog().uuid_of(ns).is_some() {
            return;
        }
        self.ddl_locks
            .remove_if(ns, |_, lock| Arc::strong_count(lock) <= 2);
    }

    fn host_watch(&self, host: &str) -> Result<watch::Receiver<bool>, ClientError> {
        self.hosts
            .get(host)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| ClientError::UnknownHost(host.to_string()))
    }

    fn ensure_up(&self, host: &str) -> Result<(), ClientError> {
        if *self.host_watch(host)?.borrow() {
            Ok(())
        } else {
            Err(ClientError::Unreachable {
                host: host.to_string(),
                reason: "connection refused".into(),
            })
        }
    }

    fn set_host_up(&self, host: &str, up: bool) -> Result<(), ClientError> {
        let tx = self
            .hosts
            .get(host)
            .ok_or_else(|| ClientError::UnknownHost(host.to_string()))?;
        tx.send_replace(up);
        // A process restart forgets its fail points.
        self.fail_points.disable_all_on(host);
        tracing::debug!(host, up, "sim host state changed");
        Ok(())
    }

    /// Resolve a namespace, optionally requiring the identity the command
    /// started with.
    fn resolve(&self, ns: &Namespace, expected: Option<CollectionUuid>) -> Step<CollectionUuid> {
        match (self.catalog().uuid_of(ns), expected) {
            (None, _) => Err(CommandFailure::new(
                ErrorCode::NamespaceNotFound,
                format!("namespace {} does not exist", ns),
            )
            .into()),
            (Some(current), Some(expected)) if current != expected => Err(CommandFailure::new(
                ErrorCode::CollectionUuidMismatch,
                format!(
                    "collection {} has UUID {} but the command started against {}",
                    ns, current, expected
                ),
            )
            .into()),
            (Some(current), _) => Ok(current),
        }
    }

    /// Give concurrent operations a chance to interleave.
    async fn yield_for_work(&self) {
        if self.options.scan_batch_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.options.scan_batch_delay).await;
        }
    }

    /// Park at a fail point on the executing host, if it is enabled.
    async fn pause_at(&self, fail_point: &'static str, ns: &Namespace) -> Step<()> {
        let fp = self.fail_points.get(self.data_host, fail_point);
        let host_up = self.host_watch(self.data_host)?;
        let parked = fp.pause_while_enabled(host_up).await.map_err(|_| {
            ClientError::Unreachable {
                host: self.data_host.to_string(),
                reason: format!("host shut down while paused at {}", fail_point),
            }
        })?;
        if parked {
            tracing::debug!(%ns, fail_point, "resuming after fail point");
        }
        self.record(SimEvent::PhaseResumed {
            ns: ns.clone(),
            fail_point,
            parked,
        });
        self.ensure_up(self.data_host)?;
        Ok(())
    }

    fn finish(
        &self,
        command: CommandKind,
        ns: &Namespace,
        result: Step<Value>,
    ) -> Result<Outcome, ClientError> {
        let outcome = match result {
            Ok(reply) => Outcome::Success(reply),
            Err(Abort::Command(failure)) => Outcome::Failure(failure),
            Err(Abort::Client(err)) => return Err(err),
        };
        self.record(SimEvent::CommandFinished {
            command,
            ns: ns.clone(),
            code: outcome.error_code(),
        });
        Ok(outcome)
    }

    async fn run_command(&self, command: &CommandSpec) -> Result<Outcome, ClientError> {
        let ns = command.namespace();
        self.record(SimEvent::CommandStarted {
            command: command.kind(),
            ns: ns.clone(),
        });
        let result = match command {
            CommandSpec::AnalyzeShardKey { ns, key } => self.analyze_shard_key(ns, key).await,
            CommandSpec::ConfigureQueryAnalyzer {
                ns,
                mode,
                samples_per_second,
            } => {
                self.configure_query_analyzer(ns, *mode, *samples_per_second)
                    .await
            }
        };
        self.finish(command.kind(), ns, result)
    }

    // ========================================================================
    // DDL and CRUD
    // ========================================================================

    /// Whether dropping or renaming a collection also deletes its
    /// `config.queryAnalyzers` document.
    fn drop_cleans_up_query_analyzers(&self) -> bool {
        self.topology == Topology::Sharded
    }

    async fn rename(&self, from: &Namespace, to: &Namespace) -> Result<(), ClientError> {
        if from == to {
            return Err(ClientError::command_failed(
                "renameCollection",
                CommandFailure::new(
                    ErrorCode::IllegalOperation,
                    "cannot rename a collection to itself",
                ),
            ));
        }
        // Lock in a fixed order so two renames cannot deadlock.
        let (first, second) = if from < to { (from, to) } else { (to, from) };
        let _first = self.ddl_lock(first).lock_owned().await;
        let _second = self.ddl_lock(second).lock_owned().await;

        let renamed = {
            let mut catalog = self.catalog();
            let renamed = catalog.rename(from, to);
            if renamed.is_ok() && self.drop_cleans_up_query_analyzers() {
                catalog.remove_query_analyzer(from);
            }
            renamed.map_err(|err| {
                let failure = match err {
                    CatalogError::NamespaceNotFound => CommandFailure::new(
                        ErrorCode::NamespaceNotFound,
                        format!("source namespace {} does not exist", from),
                    ),
                    CatalogError::NamespaceExists => CommandFailure::new(
                        ErrorCode::NamespaceExists,
                        format!("target namespace {} exists", to),
                    ),
                };
                ClientError::command_failed("renameCollection", failure)
            })
        };
        if renamed.is_ok() {
            self.record(SimEvent::Renamed {
                from: from.clone(),
                to: to.clone(),
            });
        }
        self.prune_ddl_lock(from);
        self.prune_ddl_lock(to);
        renamed
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<bool, ClientError> {
        let _ddl = self.ddl_lock(ns).lock_owned().await;
        let existed = {
            let mut catalog = self.catalog();
            let existed = catalog.drop_collection(ns);
            if self.drop_cleans_up_query_analyzers() && catalog.remove_query_analyzer(ns).is_some() {
                self.record(SimEvent::QueryAnalyzerRemoved { ns: ns.clone() });
            }
            existed
        };
        self.record(SimEvent::Dropped {
            ns: ns.clone(),
            existed,
        });
        self.prune_ddl_lock(ns);
        Ok(existed)
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<(), ClientError> {
        let _ddl = self.ddl_lock(ns).lock_owned().await;
        let uuid = self.catalog().create(ns).map_err(|_| {
            ClientError::command_failed(
                "create",
                CommandFailure::new(
                    ErrorCode::NamespaceExists,
                    format!("collection {} already exists", ns),
                ),
            )
        })?;
        self.record(SimEvent::Created {
            ns: ns.clone(),
            uuid,
        });
        Ok(())
    }

    fn delete_all(&self, ns: &Namespace) -> u64 {
        let deleted = self.catalog().delete_all(ns);
        self.record(SimEvent::Emptied {
            ns: ns.clone(),
            deleted,
        });
        deleted
    }
}

/// A simulated deployment of one topology.
///
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct SimDeployment {
    server: Arc<SimServer>,
}

impl std::fmt::Debug for SimDeployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDeployment")
            .field("topology", &self.server.topology)
            .field("options", &self.server.options)
            .finish_non_exhaustive()
    }
}

impl SimDeployment {
    /// Create a deployment with the given topology and server parameters.
    pub fn new(topology: Topology, options: SimOptions) -> Self {
        Self {
            server: Arc::new(SimServer::new(topology, options)),
        }
    }

    /// A single-shard cluster with default parameters.
    pub fn sharded() -> Self {
        Self::new(Topology::Sharded, SimOptions::default())
    }

    /// A replica set with default parameters.
    pub fn replica_set() -> Self {
        Self::new(Topology::ReplicaSet, SimOptions::default())
    }

    /// Router host name.
    pub fn router_host(&self) -> &'static str {
        self.server.router_host
    }

    /// Host that executes commands and owns fail points.
    pub fn data_host(&self) -> &'static str {
        self.server.data_host
    }

    /// Everything that happened so far, in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.server.events()
    }

    /// Simulate a crash: commands fail with [`ClientError::Unreachable`] and
    /// parked executions wake up.
    pub fn kill_host(&self, host: &str) -> Result<(), ClientError> {
        self.server.set_host_up(host, false)
    }

    /// Bring a killed host back with all fail points off.
    pub fn restart_host(&self, host: &str) -> Result<(), ClientError> {
        self.server.set_host_up(host, true)
    }

    fn connection(&self, host: &str) -> SimConnection {
        SimConnection {
            host: host.to_string(),
            server: self.server.clone(),
        }
    }
}

#[async_trait]
impl Deployment for SimDeployment {
    fn topology(&self) -> Topology {
        self.server.topology
    }

    fn router(&self) -> Arc<dyn Connection> {
        Arc::new(self.connection(self.server.router_host))
    }

    fn fail_point_host(&self) -> Arc<dyn Connection> {
        Arc::new(self.connection(self.server.data_host))
    }

    async fn connect(&self, host: &str) -> Result<Arc<dyn Connection>, ClientError> {
        self.server.ensure_up(host)?;
        Ok(Arc::new(self.connection(host)))
    }
}

/// Connection to one host of a [`SimDeployment`].
pub struct SimConnection {
    host: String,
    server: Arc<SimServer>,
}

#[async_trait]
impl Connection for SimConnection {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_command(&self, command: &CommandSpec) -> Result<Outcome, ClientError> {
        self.server.ensure_up(&self.host)?;
        self.server.run_command(command).await
    }

    async fn insert_documents(&self, ns: &Namespace, docs: Vec<Value>) -> Result<u64, ClientError> {
        self.server.ensure_up(&self.host)?;
        Ok(self.server.catalog().insert(ns, docs))
    }

    async fn rename_collection(&self, from: &Namespace, to: &Namespace) -> Result<(), ClientError> {
        self.server.ensure_up(&self.host)?;
        self.server.rename(from, to).await
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<bool, ClientError> {
        self.server.ensure_up(&self.host)?;
        self.server.drop_collection(ns).await
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<(), ClientError> {
        self.server.ensure_up(&self.host)?;
        self.server.create_collection(ns).await
    }

    async fn delete_all(&self, ns: &Namespace) -> Result<u64, ClientError> {
        self.server.ensure_up(&self.host)?;
        Ok(self.server.delete_all(ns))
    }

    async fn collection_uuid(&self, ns: &Namespace) -> Result<Option<CollectionUuid>, ClientError> {
        self.server.ensure_up(&self.host)?;
        Ok(self.server.catalog().uuid_of(ns))
    }

    async fn find_query_analyzer_doc(
        &self,
        ns: &Namespace,
    ) -> Result<Option<QueryAnalyzerDoc>, ClientError> {
        self.server.ensure_up(&self.host)?;
        Ok(self.server.catalog().query_analyzer(ns).cloned())
    }

    async fn configure_fail_point(&self, name: &str, mode: FailPointMode) -> Result<u64, ClientError> {
        self.server.ensure_up(&self.host)?;
        let fp = self.server.fail_points.get(&self.host, name);
        let count = fp.set(mode == FailPointMode::AlwaysOn);
        tracing::debug!(host = %self.host, name, mode = mode.as_str(), count, "configureFailPoint");
        Ok(count)
    }

    async fn wait_for_fail_point(
        &self,
        name: &str,
        times_entered: u64,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.server.ensure_up(&self.host)?;
        let fp = self.server.fail_points.get(&self.host, name);
        if fp.wait_for_times_entered(times_entered, timeout).await {
            Ok(())
        } else {
            Err(ClientError::Timeout(timeout))
        }
    }
}
