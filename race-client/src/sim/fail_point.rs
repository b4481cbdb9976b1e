//! Host-scoped fail points for the simulated deployment.
//!
//! A fail point is either on or off. Executions that reach an enabled fail
//! point park until it is turned off or their host goes down.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Returned when a parked execution is woken by its host going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HostDown;

/// A single named fail point on one host.
#[derive(Debug)]
pub(crate) struct FailPoint {
    enabled: watch::Sender<bool>,
    times_entered: watch::Sender<u64>,
}

impl FailPoint {
    fn new() -> Self {
        let (enabled, _) = watch::channel(false);
        let (times_entered, _) = watch::channel(0);
        Self {
            enabled,
            times_entered,
        }
    }

    /// Turn the fail point on or off; returns the prior `timesEntered`.
    pub fn set(&self, on: bool) -> u64 {
        self.enabled.send_replace(on);
        *self.times_entered.borrow()
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn times_entered(&self) -> u64 {
        *self.times_entered.borrow()
    }

    /// Park while the fail point is enabled.
    ///
    /// Returns `Ok(true)` if the execution was parked, `Ok(false)` if the
    /// fail point was off when reached.
    pub async fn pause_while_enabled(
        &self,
        mut host_up: watch::Receiver<bool>,
    ) -> Result<bool, HostDown> {
        if !self.is_enabled() {
            return Ok(false);
        }
        self.times_entered.send_modify(|n| *n += 1);

        let mut enabled = self.enabled.subscribe();
        let released = async move { enabled.wait_for(|on| !*on).await.is_ok() };
        let host_lost = async move { host_up.wait_for(|up| !*up).await.is_ok() };

        tokio::select! {
            _ = released => Ok(true),
            true = host_lost => Err(HostDown),
        }
    }

    /// Block until `timesEntered` reaches `target`.
    pub async fn wait_for_times_entered(&self, target: u64, timeout: Duration) -> bool {
        let mut entered = self.times_entered.subscribe();
        let reached = async move { entered.wait_for(|n| *n >= target).await.is_ok() };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }
}

/// All fail points of a deployment, keyed by `(host, name)`.
#[derive(Debug, Default)]
pub(crate) struct FailPointRegistry {
    points: DashMap<(String, String), Arc<FailPoint>>,
}

impl FailPointRegistry {
    /// Get or lazily create a fail point. The returned `Arc` is detached from
    /// the map, so it can be held across awaits.
    pub fn get(&self, host: &str, name: &str) -> Arc<FailPoint> {
        self.points
            .entry((host.to_string(), name.to_string()))
            .or_insert_with(|| Arc::new(FailPoint::new()))
            .value()
            .clone()
    }

    /// Turn off every fail point on a host, waking parked executions.
    pub fn disable_all_on(&self, host: &str) {
        for entry in self.points.iter() {
            if entry.key().0 == host {
                entry.value().set(false);
            }
        }
    }
}
