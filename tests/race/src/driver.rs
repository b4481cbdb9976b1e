//! Scenario matrix driver.
//!
//! Every scenario runs `SETUP → RACE → VALIDATE → CLEANUP`:
//! - SETUP: fresh namespace; seeded for `analyzeShardKey`, created empty for
//!   `configureQueryAnalyzer`
//! - RACE: arm the sync point (if any), launch the command, mutate, release
//! - VALIDATE: allow-list check, the recreate consistency check, and the
//!   follow-up sampling calls for `configureQueryAnalyzer`
//! - CLEANUP: drop the namespace and any rename target
//!
//! One failing scenario never stops the rest of the matrix.

use ddl_race_client::{
    Connection, Deployment, ShellDeployment, KEY_CHARACTERISTICS_FAIL_POINT,
    READ_WRITE_DISTRIBUTION_FAIL_POINT,
};
use ddl_race_types::{
    CommandKind, CommandSpec, MutatingOperation, Namespace, Outcome, ShardKey, Topology,
};
use std::fmt;
use std::sync::Arc;

use crate::config::{ConfigError, HarnessConfig};
use crate::consistency::{ConsistencyChecker, ConsistencyReport};
use crate::error::HarnessError;
use crate::launcher::{Jitter, Launcher};
use crate::mutator::{MutationReport, NamespaceMutator};
use crate::sync_point::SyncPointController;
use crate::validator::{validate, TestCase};
use crate::workload::make_documents;

/// Sampling rate of the racing `configureQueryAnalyzer` call.
pub const RACING_SAMPLES_PER_SECOND: f64 = 1.0;

/// Fail points `analyzeShardKey` can be parked at, in phase order.
pub const ANALYZE_SHARD_KEY_FAIL_POINTS: [&str; 2] = [
    KEY_CHARACTERISTICS_FAIL_POINT,
    READ_WRITE_DISTRIBUTION_FAIL_POINT,
];

/// One cell of the race matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Deployment shape.
    pub topology: Topology,
    /// Command raced.
    pub command: CommandKind,
    /// Mutation raced against it.
    pub operation: MutatingOperation,
    /// Fail point the command is parked at, if any.
    pub fail_point: Option<&'static str>,
}

impl Scenario {
    /// Human-readable label, e.g. `sharded/analyzeShardKey/drop`.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// The allow-list this scenario is checked against.
    pub fn test_case(&self) -> TestCase {
        TestCase::for_pair(self.command, self.operation)
    }

    /// The racing invocation for `ns`.
    pub fn command_spec(&self, ns: &Namespace) -> CommandSpec {
        match self.command {
            CommandKind::AnalyzeShardKey => CommandSpec::analyze_shard_key(ns.clone(), ShardKey::id()),
            CommandKind::ConfigureQueryAnalyzer => {
                CommandSpec::sampling_on(ns.clone(), RACING_SAMPLES_PER_SECOND)
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.topology, self.command, self.operation)?;
        if let Some(fp) = self.fail_point {
            write!(f, "/{}", fp)?;
        }
        Ok(())
    }
}

/// Every scenario for one topology.
///
/// `analyzeShardKey` runs each operation without a fail point and once per
/// fail point; `configureQueryAnalyzer` runs without fail points.
pub fn matrix(topology: Topology) -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    for operation in MutatingOperation::ALL {
        let fail_points = std::iter::once(None).chain(ANALYZE_SHARD_KEY_FAIL_POINTS.map(Some));
        for fail_point in fail_points {
            scenarios.push(Scenario {
                topology,
                command: CommandKind::AnalyzeShardKey,
                operation,
                fail_point,
            });
        }
    }
    for operation in MutatingOperation::ALL {
        scenarios.push(Scenario {
            topology,
            command: CommandKind::ConfigureQueryAnalyzer,
            operation,
            fail_point: None,
        });
    }
    scenarios
}

/// Everything one passing scenario observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// The scenario.
    pub scenario: Scenario,
    /// Namespace it ran against.
    pub ns: Namespace,
    /// Outcome of the racing command.
    pub outcome: Outcome,
    /// What the mutation did.
    pub mutation: MutationReport,
    /// Result of the recreate consistency check, when it applies.
    pub consistency: Option<ConsistencyReport>,
    /// Outcomes of the follow-up sampling calls.
    pub follow_ups: Vec<Outcome>,
}

impl ScenarioReport {
    /// A tolerated anomaly worth reporting, if any.
    pub fn caveat(&self) -> Option<String> {
        self.consistency.as_ref().and_then(ConsistencyReport::caveat)
    }
}

/// Results of a whole matrix run.
#[derive(Debug, Default)]
pub struct MatrixReport {
    /// Labels of scenarios that passed.
    pub passed: Vec<String>,
    /// Passing scenarios with a tolerated anomaly, and the anomaly.
    pub caveats: Vec<(String, String)>,
    /// Scenario failures.
    pub failures: Vec<HarnessError>,
}

impl MatrixReport {
    /// Whether no scenario failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of scenario runs recorded.
    pub fn total(&self) -> usize {
        self.passed.len() + self.failures.len()
    }

    fn record(&mut self, label: String, result: Result<ScenarioReport, HarnessError>) {
        match result {
            Ok(report) => {
                if let Some(caveat) = report.caveat() {
                    self.caveats.push((label.clone(), caveat));
                }
                self.passed.push(label);
            }
            Err(e) => {
                tracing::error!(scenario = %label, error = %e, "scenario failed");
                self.failures.push(e);
            }
        }
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} passed, {} failed, {} caveats",
            self.passed.len(),
            self.failures.len(),
            self.caveats.len()
        )?;
        for (label, caveat) in &self.caveats {
            writeln!(f, "  caveat {}: {}", label, caveat)?;
        }
        for failure in &self.failures {
            writeln!(f, "  FAILED {}", failure)?;
        }
        Ok(())
    }
}

/// Drives race scenarios against one deployment.
pub struct RaceDriver {
    deployment: Arc<dyn Deployment>,
    config: HarnessConfig,
    router: Arc<dyn Connection>,
    launcher: Launcher,
    sync_points: SyncPointController,
    mutator: NamespaceMutator,
    checker: ConsistencyChecker,
}

impl RaceDriver {
    /// Drive scenarios against `deployment`.
    pub fn new(deployment: Arc<dyn Deployment>, config: HarnessConfig) -> Self {
        let (jitter_min, jitter_max) = config.jitter_range();
        let jitter = Jitter::new(jitter_min, jitter_max, config.harness.seed);
        let router = deployment.router();
        Self {
            launcher: Launcher::new(deployment.clone(), jitter, config.await_timeout()),
            sync_points: SyncPointController::new(
                deployment.fail_point_host(),
                config.release_timeout(),
            ),
            mutator: NamespaceMutator::new(router.clone()),
            checker: ConsistencyChecker::new(
                router.clone(),
                deployment.topology(),
                config.consistency.stale_identity_policy,
            ),
            router,
            deployment,
            config,
        }
    }

    /// Drive scenarios against the live deployment in `config`.
    pub fn live(config: HarnessConfig) -> Result<Self, HarnessError> {
        let shell = config.live.clone().ok_or(ConfigError::MissingLive)?;
        let deployment =
            ShellDeployment::new(shell).map_err(|e| HarnessError::client("live setup", e))?;
        Ok(Self::new(Arc::new(deployment), config))
    }

    /// The deployment scenarios run against.
    pub fn deployment(&self) -> &Arc<dyn Deployment> {
        &self.deployment
    }

    /// Run every scenario of the deployment's topology, `iterations` times each.
    pub async fn run_matrix(&self) -> MatrixReport {
        let topology = self.deployment.topology();
        let mut report = MatrixReport::default();
        for scenario in matrix(topology) {
            for iteration in 0..self.config.harness.iterations {
                let label = match self.config.harness.iterations {
                    1 => scenario.label(),
                    _ => format!("{}#{}", scenario, iteration + 1),
                };
                let result = self.run_scenario(&scenario).await;
                report.record(label, result);
            }
        }
        tracing::info!(%topology, passed = report.passed.len(), failed = report.failures.len(), caveats = report.caveats.len(), "matrix finished");
        report
    }

    /// Run one scenario end to end. Cleanup runs whatever the result.
    pub async fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioReport, HarnessError> {
        let label = scenario.label();
        let ns = Namespace::unique("db");
        tracing::info!(scenario = %label, %ns, "scenario starting");

        let mut rename_target = None;
        let result = match self.setup(&label, &ns, scenario.command).await {
            Ok(()) => self.race(scenario, &label, &ns, &mut rename_target).await,
            Err(e) => Err(e),
        };
        self.cleanup(&label, &ns, rename_target.as_ref()).await;

        if result.is_ok() {
            tracing::info!(scenario = %label, "scenario passed");
        }
        result
    }

    async fn setup(&self, label: &str, ns: &Namespace, command: CommandKind) -> Result<(), HarnessError> {
        match command {
            CommandKind::AnalyzeShardKey => {
                let docs = make_documents(self.config.num_docs());
                self.router
                    .insert_documents(ns, docs)
                    .await
                    .map_err(|e| HarnessError::client(label, e))?;
            }
            CommandKind::ConfigureQueryAnalyzer => {
                self.router
                    .create_collection(ns)
                    .await
                    .map_err(|e| HarnessError::client(label, e))?;
            }
        }
        Ok(())
    }

    async fn race(
        &self,
        scenario: &Scenario,
        label: &str,
        ns: &Namespace,
        rename_target: &mut Option<Namespace>,
    ) -> Result<ScenarioReport, HarnessError> {
        let case = scenario.test_case();

        let mut sync_point = match scenario.fail_point {
            Some(point) => Some(self.sync_points.arm(label, point).await?),
            None => None,
        };

        let handle = self.launcher.launch(label, scenario.command_spec(ns));
        let mutation = self.mutator.mutate(label, ns, scenario.operation).await;

        // Released on every path, including a failed mutation.
        let released = match sync_point.as_mut() {
            Some(point) => point.release().await,
            None => Ok(()),
        };
        let mutation = mutation?;
        released?;
        rename_target.clone_from(&mutation.rename_target);

        let outcome = handle.await_outcome().await?;
        validate(label, &outcome, &case)?;

        let mut consistency = None;
        let mut follow_ups = Vec::new();
        if scenario.command == CommandKind::ConfigureQueryAnalyzer {
            if scenario.operation == MutatingOperation::Recreate {
                consistency = Some(self.checker.check_after_recreate(label, ns, &outcome).await?);
            }
            follow_ups = self.follow_ups(label, ns, &case).await?;
        }

        Ok(ScenarioReport {
            scenario: scenario.clone(),
            ns: ns.clone(),
            outcome,
            mutation,
            consistency,
            follow_ups,
        })
    }

    /// Toggle sampling on and off again once the sampler has refreshed.
    async fn follow_ups(
        &self,
        label: &str,
        ns: &Namespace,
        case: &TestCase,
    ) -> Result<Vec<Outcome>, HarnessError> {
        let commands = [
            CommandSpec::sampling_on(ns.clone(), self.config.sampling.follow_up_samples_per_second),
            CommandSpec::sampling_off(ns.clone()),
        ];
        let mut outcomes = Vec::with_capacity(commands.len());
        for command in &commands {
            tokio::time::sleep(self.config.refresh_interval()).await;
            let outcome = self
                .router
                .run_command(command)
                .await
                .map_err(|e| HarnessError::client(label, e))?;
            tracing::debug!(scenario = %label, %command, %outcome, "follow-up call");
            validate(label, &outcome, case)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn cleanup(&self, label: &str, ns: &Namespace, rename_target: Option<&Namespace>) {
        for target in std::iter::once(ns).chain(rename_target) {
            if let Err(e) = self.router.drop_collection(target).await {
                tracing::warn!(scenario = %label, ns = %target, error = %e, "cleanup drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_shape() {
        let scenarios = matrix(Topology::Sharded);
        assert_eq!(scenarios.len(), 4 * 3 + 4);
        let analyze: Vec<_> = scenarios
            .iter()
            .filter(|s| s.command == CommandKind::AnalyzeShardKey)
            .collect();
        assert_eq!(analyze.len(), 12);
        assert_eq!(analyze.iter().filter(|s| s.fail_point.is_none()).count(), 4);
        assert!(scenarios
            .iter()
            .filter(|s| s.command == CommandKind::ConfigureQueryAnalyzer)
            .all(|s| s.fail_point.is_none()));
        assert!(scenarios.iter().all(|s| s.topology == Topology::Sharded));
    }

    #[test]
    fn labels_include_fail_point() {
        let scenario = Scenario {
            topology: Topology::ReplicaSet,
            command: CommandKind::AnalyzeShardKey,
            operation: MutatingOperation::MakeEmpty,
            fail_point: Some(READ_WRITE_DISTRIBUTION_FAIL_POINT),
        };
        assert_eq!(
            scenario.label(),
            "replicaSet/analyzeShardKey/makeEmpty/analyzeShardKeyPauseBeforeCalculatingReadWriteDistributionMetrics"
        );
    }

    #[test]
    fn racing_commands() {
        let ns: Namespace = "db.coll".parse().unwrap();
        let mut scenario = Scenario {
            topology: Topology::Sharded,
            command: CommandKind::ConfigureQueryAnalyzer,
            operation: MutatingOperation::Drop,
            fail_point: None,
        };
        assert_eq!(
            scenario.command_spec(&ns),
            CommandSpec::sampling_on(ns.clone(), 1.0)
        );
        scenario.command = CommandKind::AnalyzeShardKey;
        assert_eq!(
            scenario.command_spec(&ns),
            CommandSpec::analyze_shard_key(ns, ShardKey::id())
        );
    }

    #[test]
    fn report_summary() {
        let mut report = MatrixReport::default();
        report.passed.push("a".into());
        report.caveats.push(("a".into(), "stale".into()));
        report.failures.push(HarnessError::Inconsistency {
            scenario: "b".into(),
            detail: "bad".into(),
        });
        assert!(!report.is_success());
        assert_eq!(report.total(), 2);
        let text = report.to_string();
        assert!(text.starts_with("1 passed, 1 failed, 1 caveats"));
        assert!(text.contains("caveat a: stale"));
        assert!(text.contains("FAILED [b] inconsistent state: bad"));
    }

    #[test]
    fn live_requires_live_section() {
        let result = RaceDriver::live(HarnessConfig::default());
        assert!(matches!(
            result,
            Err(HarnessError::Config(ConfigError::MissingLive))
        ));
    }
}
