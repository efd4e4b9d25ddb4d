//! Per-node leader election
//!
//! At most one controller instance may execute and kill task processes for
//! a node at a time. That is enforced with a `coordination.k8s.io/v1` Lease
//! per node: acquire when unheld or expired, renew while holding, step down
//! on conflict. The reconciler only consults [`LeaseHolder::is_leader`];
//! losing the lease mid-task is not detected here; it surfaces later as
//! orphan detection by whichever instance re-acquires leadership.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::PostParams;
use kube::{Api, Client};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Leadership gate consumed by the reconciler.
pub trait LeaseHolder: Send + Sync {
    /// True while this instance holds the node's lease.
    fn is_leader(&self) -> bool;
}

/// Lease-backed leadership for one node.
pub struct LeaseLock {
    api: Api<Lease>,
    lease_name: String,
    identity: String,
    lease_duration_seconds: u32,
    leading: AtomicBool,
}

impl LeaseLock {
    /// Creates the lock for `node_name`, held under `identity`.
    pub fn new(
        client: Client,
        namespace: &str,
        node_name: &str,
        identity: &str,
        lease_duration_seconds: u32,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: format!("neon-node-task-{node_name}"),
            identity: identity.to_string(),
            lease_duration_seconds,
            leading: AtomicBool::new(false),
        }
    }

    /// Runs the acquire/renew loop until the controller shuts down.
    pub async fn run(self: Arc<Self>, retry: Duration) {
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    if !self.leading.swap(true, Ordering::SeqCst) {
                        info!(lease = %self.lease_name, identity = %self.identity, "promoted to leader");
                    }
                }
                Ok(false) => {
                    if self.leading.swap(false, Ordering::SeqCst) {
                        warn!(lease = %self.lease_name, identity = %self.identity, "demoted from leader");
                    }
                }
                Err(e) => {
                    // Unable to renew means unable to prove leadership
                    if self.leading.swap(false, Ordering::SeqCst) {
                        warn!(lease = %self.lease_name, "demoted from leader");
                    }
                    warn!(lease = %self.lease_name, error = %e, "lease update failed");
                }
            }
            tokio::time::sleep(retry).await;
        }
    }

    /// One acquire/renew attempt. `Ok(true)` means we hold the lease now.
    async fn try_acquire(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();
        let Some(mut lease) = self.api.get_opt(&self.lease_name).await? else {
            return self.create_lease(now).await;
        };

        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        if spec.holder_identity.as_deref() == Some(&self.identity) {
            // Renew our own hold
            spec.renew_time = Some(MicroTime(now));
        } else if lease_expired(
            spec.renew_time.as_ref(),
            self.lease_duration_seconds,
            now,
        ) {
            debug!(
                lease = %self.lease_name,
                previous = spec.holder_identity.as_deref().unwrap_or("<none>"),
                "taking over expired lease"
            );
            spec.holder_identity = Some(self.identity.clone());
            spec.acquire_time = Some(MicroTime(now));
            spec.renew_time = Some(MicroTime(now));
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        } else {
            return Ok(false);
        }

        // Replace with the carried resourceVersion so a concurrent claimant
        // loses cleanly with a conflict
        match self
            .api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> Result<bool, kube::Error> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_seconds.try_into().unwrap_or(i32::MAX)),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            // Someone else created it first
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl LeaseHolder for LeaseLock {
    fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }
}

/// A lease with no renew time, or one unrenewed past the lease duration,
/// is up for grabs.
fn lease_expired(
    renew_time: Option<&MicroTime>,
    lease_duration_seconds: u32,
    now: DateTime<Utc>,
) -> bool {
    match renew_time {
        None => true,
        Some(renewed) => {
            now - renewed.0 >= chrono::Duration::seconds(i64::from(lease_duration_seconds))
        }
    }
}

/// Leadership gate that always leads, for tests.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct AlwaysLeader;

#[cfg(test)]
impl LeaseHolder for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}
