//! Status publisher — writes derived status back to the directory.
//!
//! Writes are skipped when the stored status already matches, and are
//! version-guarded so a record changed since it was read is re-read and
//! patched again. A write that still fails is remembered and retried by
//! [`StatusPublisher::flush_pending`]; it never fails the pass that
//! produced it.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use seatgrid_state::{InstanceStatus, LicenseStatus, StateResult, StateStore};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
enum PendingWrite {
    License(LicenseStatus),
    Instance(InstanceStatus),
}

/// Idempotent, retrying status writer.
pub struct StatusPublisher {
    state: StateStore,
    retry: RetryPolicy,
    /// `(kind, key)` → last status that could not be written.
    pending: Mutex<HashMap<(&'static str, String), PendingWrite>>,
}

impl StatusPublisher {
    pub fn new(state: StateStore, retry: RetryPolicy) -> Self {
        Self {
            state,
            retry,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Publish a license status. Returns true if the stored record changed.
    pub async fn publish_license(&self, key: &str, status: &LicenseStatus) -> bool {
        let result = self
            .retry
            .run("license status", || self.write_license(key, status))
            .await;
        self.settle(("license", key.to_string()), result, || {
            PendingWrite::License(status.clone())
        })
    }

    /// Publish an instance status. Returns true if the stored record changed.
    pub async fn publish_instance(&self, key: &str, status: &InstanceStatus) -> bool {
        let result = self
            .retry
            .run("instance status", || self.write_instance(key, status))
            .await;
        self.settle(("instance", key.to_string()), result, || {
            PendingWrite::Instance(status.clone())
        })
    }

    /// Flag a license whose last pass was abandoned.
    ///
    /// Everything else in the status keeps describing the last committed pass.
    pub async fn mark_stale(&self, key: &str) -> bool {
        let current = match self.state.get_license(key) {
            Ok(Some(license)) => license.status,
            Ok(None) => return false,
            Err(e) => {
                warn!(license = %key, error = %e, "could not read license to mark stale");
                return false;
            }
        };
        let status = LicenseStatus {
            stale: true,
            ..current
        };
        self.publish_license(key, &status).await
    }

    /// Retry every write that previously failed. Returns how many succeeded.
    pub async fn flush_pending(&self) -> usize {
        let pending: Vec<_> = {
            let mut guard = self.pending.lock().expect("status pending lock");
            guard.drain().collect()
        };
        if pending.is_empty() {
            return 0;
        }
        debug!(count = pending.len(), "retrying pending status writes");

        let mut flushed = 0;
        for ((_, key), write) in pending {
            let ok = match &write {
                PendingWrite::License(status) => {
                    self.publish_license(&key, status).await;
                    !self.has_pending("license", &key)
                }
                PendingWrite::Instance(status) => {
                    self.publish_instance(&key, status).await;
                    !self.has_pending("instance", &key)
                }
            };
            if ok {
                flushed += 1;
            }
        }
        flushed
    }

    /// Number of writes waiting for a retry.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("status pending lock").len()
    }

    /// Drop any pending write for a deleted record.
    pub fn forget(&self, kind: &'static str, key: &str) {
        self.pending
            .lock()
            .expect("status pending lock")
            .remove(&(kind, key.to_string()));
    }

    fn has_pending(&self, kind: &'static str, key: &str) -> bool {
        self.pending
            .lock()
            .expect("status pending lock")
            .contains_key(&(kind, key.to_string()))
    }

    fn settle<F>(&self, slot: (&'static str, String), result: StateResult<bool>, pending: F) -> bool
    where
        F: FnOnce() -> PendingWrite,
    {
        let mut guard = self.pending.lock().expect("status pending lock");
        match result {
            Ok(changed) => {
                guard.remove(&slot);
                if changed {
                    debug!(kind = slot.0, key = %slot.1, "status published");
                }
                changed
            }
            Err(e) => {
                warn!(kind = slot.0, key = %slot.1, error = %e, "status write failed, will retry");
                guard.insert(slot, pending());
                false
            }
        }
    }

    fn write_license(&self, key: &str, status: &LicenseStatus) -> StateResult<bool> {
        let Some(current) = self.state.get_license(key)? else {
            return Ok(false);
        };
        if current.status == *status {
            return Ok(false);
        }
        self.state
            .patch_license(key, Some(current.resource_version), |license| {
                license.status = status.clone();
            })?;
        Ok(true)
    }

    fn write_instance(&self, key: &str, status: &InstanceStatus) -> StateResult<bool> {
        let Some(current) = self.state.get_instance(key)? else {
            return Ok(false);
        };
        if current.status == *status {
            return Ok(false);
        }
        self.state
            .patch_instance(key, Some(current.resource_version), |instance| {
                instance.status = status.clone();
            })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatgrid_state::{InstanceRecord, LicenseRecord, RouteState};

    fn publisher() -> (StateStore, StatusPublisher) {
        let state = StateStore::open_in_memory().unwrap();
        state.put_license(&LicenseRecord::new("tables", "main", 1)).unwrap();
        state
            .put_instance(&InstanceRecord::new("tables", "alpha", "main", 1))
            .unwrap();
        let publisher = StatusPublisher::new(state.clone(), RetryPolicy::default());
        (state, publisher)
    }

    fn active_status() -> LicenseStatus {
        LicenseStatus {
            active_instance: Some("alpha".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn publishing_same_status_twice_writes_once() {
        let (state, publisher) = publisher();

        assert!(publisher.publish_license("tables/main", &active_status()).await);
        let version = state.get_license("tables/main").unwrap().unwrap().resource_version;

        assert!(!publisher.publish_license("tables/main", &active_status()).await);
        let after = state.get_license("tables/main").unwrap().unwrap();
        assert_eq!(after.resource_version, version);
        assert_eq!(after.status.active_instance.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn status_write_leaves_authoritative_fields_alone() {
        let (state, publisher) = publisher();
        state
            .patch_license("tables/main", None, |l| l.active_instance = Some("alpha".into()))
            .unwrap();

        publisher
            .publish_license("tables/main", &LicenseStatus::default())
            .await;
        let license = state.get_license("tables/main").unwrap().unwrap();
        assert_eq!(license.active_instance.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn instance_status_is_idempotent() {
        let (_state, publisher) = publisher();
        let status = InstanceStatus {
            state: RouteState::Active,
            hostname: Some("alpha.seats.local".into()),
            error: None,
        };
        assert!(publisher.publish_instance("tables/alpha", &status).await);
        assert!(!publisher.publish_instance("tables/alpha", &status).await);
    }

    #[tokio::test]
    async fn missing_record_is_not_an_error() {
        let (_state, publisher) = publisher();
        assert!(!publisher.publish_license("tables/ghost", &active_status()).await);
        assert_eq!(publisher.pending_count(), 0);
    }

    #[tokio::test]
    async fn mark_stale_keeps_previous_status() {
        let (state, publisher) = publisher();
        publisher.publish_license("tables/main", &active_status()).await;

        assert!(publisher.mark_stale("tables/main").await);
        let status = state.get_license("tables/main").unwrap().unwrap().status;
        assert!(status.stale);
        assert_eq!(status.active_instance.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_is_noop() {
        let (_state, publisher) = publisher();
        assert_eq!(publisher.flush_pending().await, 0);
    }
}
