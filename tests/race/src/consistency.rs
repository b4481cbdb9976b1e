//! Persisted state checks after a drop+recreate race.
//!
//! A `config.queryAnalyzers` document left behind by the racing
//! `configureQueryAnalyzer` must describe the collection that exists now.
//! Replica sets are known to keep the document of a dropped collection, so
//! a stale identity there is tolerated under [`StaleIdentityPolicy::Lenient`].

use ddl_race_client::Connection;
use ddl_race_types::{CollectionUuid, Namespace, Outcome, Topology};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::HarnessError;

/// How a stale collection identity in a replica set is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaleIdentityPolicy {
    /// Log it and report it as a caveat.
    #[default]
    Lenient,
    /// Fail the scenario.
    Strict,
}

/// What the consistency check found.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsistencyReport {
    /// No configuration document exists.
    NoConfig,
    /// The document carries the current identity.
    Consistent {
        /// Identity of the recreated collection.
        uuid: CollectionUuid,
    },
    /// The document carries an older identity, tolerated by policy.
    StaleTolerated {
        /// Identity recorded in the document.
        recorded: CollectionUuid,
        /// Identity of the collection now.
        current: Option<CollectionUuid>,
    },
}

impl ConsistencyReport {
    /// A caveat worth reporting, if any.
    pub fn caveat(&self) -> Option<String> {
        match self {
            ConsistencyReport::StaleTolerated { recorded, current } => Some(format!(
                "queryAnalyzers document still carries collection UUID {} (current: {})",
                recorded,
                current.map_or_else(|| "none".to_string(), |u| u.to_string())
            )),
            _ => None,
        }
    }
}

/// Reads persisted state and cross-checks it.
#[derive(Clone)]
pub struct ConsistencyChecker {
    conn: Arc<dyn Connection>,
    topology: Topology,
    policy: StaleIdentityPolicy,
}

impl ConsistencyChecker {
    /// Check through `conn` (the router or primary).
    pub fn new(conn: Arc<dyn Connection>, topology: Topology, policy: StaleIdentityPolicy) -> Self {
        Self {
            conn,
            topology,
            policy,
        }
    }

    /// Verify the sampling configuration of `ns` after it was recreated
    /// while `racing` was in flight.
    pub async fn check_after_recreate(
        &self,
        scenario: &str,
        ns: &Namespace,
        racing: &Outcome,
    ) -> Result<ConsistencyReport, HarnessError> {
        let doc = self
            .conn
            .find_query_analyzer_doc(ns)
            .await
            .map_err(|e| HarnessError::client(scenario, e))?;
        let Some(doc) = doc else {
            tracing::debug!(%scenario, %ns, "no queryAnalyzers document");
            return Ok(ConsistencyReport::NoConfig);
        };

        if !racing.is_success() {
            return Err(HarnessError::Inconsistency {
                scenario: scenario.to_string(),
                detail: format!(
                    "queryAnalyzers document for {} exists but the racing command {}",
                    ns, racing
                ),
            });
        }

        let current = self
            .conn
            .collection_uuid(ns)
            .await
            .map_err(|e| HarnessError::client(scenario, e))?;
        if current == Some(doc.coll_uuid) {
            return Ok(ConsistencyReport::Consistent {
                uuid: doc.coll_uuid,
            });
        }

        let tolerated =
            self.topology == Topology::ReplicaSet && self.policy == StaleIdentityPolicy::Lenient;
        if tolerated {
            let report = ConsistencyReport::StaleTolerated {
                recorded: doc.coll_uuid,
                current,
            };
            tracing::warn!(%scenario, %ns, caveat = ?report.caveat(), "stale collection UUID tolerated in replica set");
            return Ok(report);
        }

        Err(HarnessError::Inconsistency {
            scenario: scenario.to_string(),
            detail: format!(
                "queryAnalyzers document for {} carries collection UUID {} but the collection is {}",
                ns,
                doc.coll_uuid,
                current.map_or_else(|| "gone".to_string(), |u| u.to_string())
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_race_client::{Deployment, SimDeployment};
    use ddl_race_types::{CommandSpec, ErrorCode};

    /// Enable sampling, then drop and recreate the collection.
    async fn stale_setup(sim: &SimDeployment) -> (Namespace, Outcome) {
        let router = sim.router();
        let ns = Namespace::unique("consistency");
        router.create_collection(&ns).await.unwrap();
        let outcome = router
            .run_command(&CommandSpec::sampling_on(ns.clone(), 1.0))
            .await
            .unwrap();
        router.drop_collection(&ns).await.unwrap();
        router.create_collection(&ns).await.unwrap();
        (ns, outcome)
    }

    fn checker(sim: &SimDeployment, policy: StaleIdentityPolicy) -> ConsistencyChecker {
        ConsistencyChecker::new(sim.router(), sim.topology(), policy)
    }

    #[test]
    fn policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: StaleIdentityPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"strict\"").unwrap();
        assert_eq!(w.policy, StaleIdentityPolicy::Strict);
        assert_eq!(StaleIdentityPolicy::default(), StaleIdentityPolicy::Lenient);
    }

    #[tokio::test]
    async fn sharded_cleanup_leaves_no_config() {
        let sim = SimDeployment::sharded();
        let (ns, outcome) = stale_setup(&sim).await;
        let report = checker(&sim, StaleIdentityPolicy::Strict)
            .check_after_recreate("s", &ns, &outcome)
            .await
            .unwrap();
        assert_eq!(report, ConsistencyReport::NoConfig);
    }

    #[tokio::test]
    async fn replica_set_stale_uuid_is_a_caveat_when_lenient() {
        let sim = SimDeployment::replica_set();
        let (ns, outcome) = stale_setup(&sim).await;
        let report = checker(&sim, StaleIdentityPolicy::Lenient)
            .check_after_recreate("s", &ns, &outcome)
            .await
            .unwrap();
        assert!(matches!(report, ConsistencyReport::StaleTolerated { .. }));
        assert!(report.caveat().unwrap().contains("still carries"));
    }

    #[tokio::test]
    async fn replica_set_stale_uuid_fails_when_strict() {
        let sim = SimDeployment::replica_set();
        let (ns, outcome) = stale_setup(&sim).await;
        let err = checker(&sim, StaleIdentityPolicy::Strict)
            .check_after_recreate("s", &ns, &outcome)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Inconsistency { .. }));
    }

    #[tokio::test]
    async fn current_uuid_is_consistent() {
        let sim = SimDeployment::sharded();
        let router = sim.router();
        let ns = Namespace::unique("consistency");
        router.create_collection(&ns).await.unwrap();
        let uuid = router.collection_uuid(&ns).await.unwrap().unwrap();
        let outcome = router
            .run_command(&CommandSpec::sampling_on(ns.clone(), 1.0))
            .await
            .unwrap();
        let report = checker(&sim, StaleIdentityPolicy::Strict)
            .check_after_recreate("s", &ns, &outcome)
            .await
            .unwrap();
        assert_eq!(report, ConsistencyReport::Consistent { uuid });
        assert_eq!(report.caveat(), None);
    }

    #[tokio::test]
    async fn document_after_failed_command_is_inconsistent() {
        let sim = SimDeployment::sharded();
        let router = sim.router();
        let ns = Namespace::unique("consistency");
        router.create_collection(&ns).await.unwrap();
        router
            .run_command(&CommandSpec::sampling_on(ns.clone(), 1.0))
            .await
            .unwrap();
        let failed = Outcome::failure(ErrorCode::NamespaceNotFound, "gone");
        let err = checker(&sim, StaleIdentityPolicy::Lenient)
            .check_after_recreate("s", &ns, &failed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exists but the racing command"));
    }
}
