use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;
use crate::lock::{Admission, Claim, ClaimToken, LeaseStore, ResourceId};
use crate::scheduler::JobId;
use crate::worker::WorkerId;

const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct LeaseState {
    /// Per-resource queue keyed by job id.
    claims: HashMap<ResourceId, BTreeMap<JobId, Claim>>,
    last_seen: HashMap<WorkerId, Instant>,
    next_nonce: u64,
}

impl LeaseState {
    fn purge_expired(&mut self, resource: ResourceId, now: Instant) {
        if let Some(queue) = self.claims.get_mut(&resource) {
            queue.retain(|_, claim| !claim.is_expired(now));
            if queue.is_empty() {
                self.claims.remove(&resource);
            }
        }
    }

    fn remove_where(&mut self, resource: ResourceId, job_id: JobId, pred: impl Fn(&Claim) -> bool) {
        if let Some(queue) = self.claims.get_mut(&resource) {
            if queue.get(&job_id).is_some_and(pred) {
                queue.remove(&job_id);
            }
            if queue.is_empty() {
                self.claims.remove(&resource);
            }
        }
    }
}

/// In-process [`LeaseStore`]. All workers sharing one instance of it see the
/// same claims; a single mutex makes every operation atomic.
#[derive(Debug)]
pub struct MemoryLeaseStore {
    state: Mutex<LeaseState>,
    worker_timeout: Duration,
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_TIMEOUT)
    }
}

impl MemoryLeaseStore {
    pub fn new(worker_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(LeaseState::default()),
            worker_timeout,
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_claim(
        &self,
        resource: ResourceId,
        job_id: JobId,
        holder: WorkerId,
        ttl: Duration,
    ) -> Result<Option<ClaimToken>> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.purge_expired(resource, now);
        state.last_seen.insert(holder, now);

        let queue = state.claims.entry(resource).or_default();
        if queue.contains_key(&job_id) {
            return Ok(None);
        }
        state.next_nonce += 1;
        let token = ClaimToken {
            resource,
            job_id,
            nonce: state.next_nonce,
        };
        queue.insert(job_id, Claim::new(token, holder, ttl));
        Ok(Some(token))
    }

    async fn claims_for(&self, resource: ResourceId) -> Result<Vec<JobId>> {
        let mut state = self.state.lock().await;
        state.purge_expired(resource, Instant::now());
        Ok(state
            .claims
            .get(&resource)
            .map(|queue| queue.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn try_admit(&self, token: &ClaimToken) -> Result<Admission> {
        let (resource, job_id) = (token.resource, token.job_id);
        let mut state = self.state.lock().await;
        state.purge_expired(resource, Instant::now());

        let Some(queue) = state.claims.get_mut(&resource) else {
            return Ok(Admission::Lost);
        };
        match queue.get(&job_id) {
            Some(claim) if claim.is_held_by(token) => {
                if claim.admitted {
                    return Ok(Admission::Admitted);
                }
            }
            _ => return Ok(Admission::Lost),
        }

        // A lower id that claims late must still wait for the running job.
        if queue.values().any(|claim| claim.admitted) {
            return Ok(Admission::Waiting);
        }
        if queue.keys().next() != Some(&job_id) {
            return Ok(Admission::Waiting);
        }

        if let Some(claim) = queue.get_mut(&job_id) {
            claim.admitted = true;
        }
        Ok(Admission::Admitted)
    }

    async fn release(&self, token: &ClaimToken) -> Result<()> {
        self.state
            .lock()
            .await
            .remove_where(token.resource, token.job_id, |claim| claim.is_held_by(token));
        Ok(())
    }

    async fn revoke(&self, resource: ResourceId, job_id: JobId) -> Result<()> {
        self.state
            .lock()
            .await
            .remove_where(resource, job_id, |_| true);
        Ok(())
    }

    async fn heartbeat(&self, worker: WorkerId) -> Result<()> {
        self.state
            .lock()
            .await
            .last_seen
            .insert(worker, Instant::now());
        Ok(())
    }

    async fn sweep(&self) -> Result<Vec<Claim>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let LeaseState {
            claims, last_seen, ..
        } = &mut *state;

        let alive = |holder: &WorkerId| {
            last_seen
                .get(holder)
                .is_some_and(|seen| now.duration_since(*seen) < self.worker_timeout)
        };

        let mut removed = Vec::new();
        for queue in claims.values_mut() {
            let dead: Vec<JobId> = queue
                .values()
                .filter(|claim| claim.is_expired(now) || !alive(&claim.holder))
                .map(|claim| claim.job_id)
                .collect();
            for job_id in dead {
                if let Some(claim) = queue.remove(&job_id) {
                    removed.push(claim);
                }
            }
        }
        claims.retain(|_, queue| !queue.is_empty());
        last_seen.retain(|_, seen| now.duration_since(*seen) < self.worker_timeout);

        Ok(removed)
    }
}
