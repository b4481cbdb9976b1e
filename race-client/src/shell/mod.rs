//! Live deployment reached through `mongosh` inside a Docker container.
//!
//! Each operation renders a short script (see [`script`]), runs it with
//! `mongosh --quiet --nodb --eval` through the Docker exec API and decodes the
//! relaxed Extended JSON reply it prints. A script that exits non-zero could
//! not talk to its host, and is reported as [`ClientError::Unreachable`].

mod script;

use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use ddl_race_types::{
    CollectionUuid, CommandSpec, ErrorCode, Namespace, Outcome, QueryAnalyzerDoc, Topology,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::{expect_ok, ClientError, Connection, Deployment, FailPointMode};

/// `MaxTimeMSExpired`, returned by `waitForFailPoint` when it gives up.
const MAX_TIME_MS_EXPIRED: i32 = 50;

/// Where the live deployment lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellConfig {
    /// Container that has `mongosh` installed and can reach the hosts.
    pub container: String,
    /// Router (sharded) or primary (replica set) address.
    pub router_host: String,
    /// Shard primary address; fail points go here in a sharded cluster.
    #[serde(default)]
    pub shard_primary_host: Option<String>,
    /// Shape of the deployment.
    pub topology: Topology,
}

/// Output of one `mongosh` invocation.
#[derive(Debug, Clone)]
struct ExecOutput {
    stdout: String,
    stderr: String,
    exit_code: i64,
}

/// Runs scripts in the shell container.
struct ShellRunner {
    docker: Docker,
    container: String,
}

impl ShellRunner {
    async fn exec(&self, script: &str) -> Result<ExecOutput, ClientError> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec![
                "mongosh".to_string(),
                "--quiet".to_string(),
                "--nodb".to_string(),
                "--eval".to_string(),
                script.to_string(),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self.docker.create_exec(&self.container, exec_options).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Run a script against a host and decode its reply.
    async fn eval(&self, host: &str, body: &str) -> Result<Outcome, ClientError> {
        let output = self.exec(&script::render(host, body)).await?;
        if output.exit_code != 0 {
            tracing::debug!(host, exit_code = output.exit_code, stderr = %output.stderr.trim(), "mongosh failed");
            return Err(ClientError::Unreachable {
                host: host.to_string(),
                reason: output
                    .stderr
                    .lines()
                    .rev()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or("mongosh exited with an error")
                    .to_string(),
            });
        }
        let reply = script::parse_reply(&output.stdout)?;
        Ok(Outcome::from_reply(reply)?)
    }
}

/// A live deployment driven through `mongosh`.
#[derive(Clone)]
pub struct ShellDeployment {
    config: ShellConfig,
    runner: Arc<ShellRunner>,
}

impl std::fmt::Debug for ShellDeployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellDeployment")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ShellDeployment {
    /// Connect to the local Docker daemon.
    pub fn new(config: ShellConfig) -> Result<Self, ClientError> {
        let docker = Docker::connect_with_local_defaults()?;
        let runner = Arc::new(ShellRunner {
            docker,
            container: config.container.clone(),
        });
        Ok(Self { config, runner })
    }

    /// The configuration this deployment was created from.
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    fn fail_point_host_name(&self) -> &str {
        match self.config.topology {
            Topology::Sharded => self
                .config
                .shard_primary_host
                .as_deref()
                .unwrap_or(self.config.router_host.as_str()),
            Topology::ReplicaSet => &self.config.router_host,
        }
    }

    fn connection(&self, host: &str) -> ShellConnection {
        ShellConnection {
            host: host.to_string(),
            runner: self.runner.clone(),
        }
    }
}

#[async_trait]
impl Deployment for ShellDeployment {
    fn topology(&self) -> Topology {
        self.config.topology
    }

    fn router(&self) -> Arc<dyn Connection> {
        Arc::new(self.connection(&self.config.router_host))
    }

    fn fail_point_host(&self) -> Arc<dyn Connection> {
        Arc::new(self.connection(self.fail_point_host_name()))
    }

    async fn connect(&self, host: &str) -> Result<Arc<dyn Connection>, ClientError> {
        let conn = self.connection(host);
        let ping = conn.runner.eval(host, &script::ping()).await?;
        expect_ok("ping", ping)?;
        Ok(Arc::new(conn))
    }
}

/// Connection to one host of a [`ShellDeployment`].
pub struct ShellConnection {
    host: String,
    runner: Arc<ShellRunner>,
}

impl ShellConnection {
    async fn eval(&self, body: &str) -> Result<Outcome, ClientError> {
        self.runner.eval(&self.host, body).await
    }

    async fn eval_ok(&self, command: &str, body: &str) -> Result<Value, ClientError> {
        expect_ok(command, self.eval(body).await?)
    }
}

fn count(reply: &Value, field: &str) -> u64 {
    reply.get(field).and_then(Value::as_u64).unwrap_or(0)
}

/// Whether a successful drop removed a collection. Servers that no longer
/// fail on a missing namespace reply `ok: 1` either way, so the script
/// records existence before dropping.
fn drop_existed(reply: &Value) -> bool {
    reply.get("existed").and_then(Value::as_bool).unwrap_or(true)
}

#[async_trait]
impl Connection for ShellConnection {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_command(&self, command: &CommandSpec) -> Result<Outcome, ClientError> {
        tracing::debug!(host = %self.host, %command, "running command");
        self.eval(&script::command(command)).await
    }

    async fn insert_documents(&self, ns: &Namespace, docs: Vec<Value>) -> Result<u64, ClientError> {
        let reply = self.eval_ok("insert", &script::insert(ns, &docs)).await?;
        Ok(count(&reply, "n"))
    }

    async fn rename_collection(&self, from: &Namespace, to: &Namespace) -> Result<(), ClientError> {
        self.eval_ok("renameCollection", &script::rename(from, to))
            .await
            .map(|_| ())
    }

    async fn drop_collection(&self, ns: &Namespace) -> Result<bool, ClientError> {
        match self.eval(&script::drop(ns)).await? {
            Outcome::Failure(failure) if failure.code == ErrorCode::NamespaceNotFound => Ok(false),
            outcome => expect_ok("drop", outcome).map(|reply| drop_existed(&reply)),
        }
    }

    async fn create_collection(&self, ns: &Namespace) -> Result<(), ClientError> {
        self.eval_ok("create", &script::create(ns)).await.map(|_| ())
    }

    async fn delete_all(&self, ns: &Namespace) -> Result<u64, ClientError> {
        let reply = self.eval_ok("delete", &script::delete_all(ns)).await?;
        Ok(count(&reply, "n"))
    }

    async fn collection_uuid(&self, ns: &Namespace) -> Result<Option<CollectionUuid>, ClientError> {
        let reply = self
            .eval_ok("listCollections", &script::collection_uuid(ns))
            .await?;
        match reply.get("uuid") {
            None | Some(Value::Null) => Ok(None),
            Some(uuid) => Ok(Some(CollectionUuid::from_extended_json(uuid)?)),
        }
    }

    async fn find_query_analyzer_doc(
        &self,
        ns: &Namespace,
    ) -> Result<Option<QueryAnalyzerDoc>, ClientError> {
        let reply = self
            .eval_ok("find", &script::find_query_analyzer(ns))
            .await?;
        match reply.get("doc") {
            None | Some(Value::Null) => Ok(None),
            Some(doc) => Ok(Some(QueryAnalyzerDoc::from_extended_json(doc)?)),
        }
    }

    async fn configure_fail_point(&self, name: &str, mode: FailPointMode) -> Result<u64, ClientError> {
        let reply = self
            .eval_ok("configureFailPoint", &script::configure_fail_point(name, mode))
            .await?;
        let count = count(&reply, "count");
        tracing::debug!(host = %self.host, name, mode = mode.as_str(), count, "configureFailPoint");
        Ok(count)
    }

    async fn wait_for_fail_point(
        &self,
        name: &str,
        times_entered: u64,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let max_time_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let body = script::wait_for_fail_point(name, times_entered, max_time_ms);
        match self.eval(&body).await? {
            Outcome::Failure(failure) if failure.code.code() == MAX_TIME_MS_EXPIRED => {
                Err(ClientError::Timeout(timeout))
            }
            outcome => expect_ok("waitForFailPoint", outcome).map(|_| ()),
        }
    }
}
