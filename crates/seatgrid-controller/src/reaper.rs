//! Expired-deletion reaper.
//!
//! Deletes instances whose `scheduled_delete_at` has passed. Removal goes
//! through [`remove_instance`], the same path the API uses, so the license
//! is reconciled afterwards like any other deletion.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use seatgrid_state::{epoch_secs, InstanceRecord, StateResult, StateStore};

use crate::driver::{EventQueue, ReconcileEvent};

/// Keys of instances whose scheduled deletion time is at or before `now`.
pub fn expired(instances: &[InstanceRecord], now: u64) -> Vec<String> {
    instances
        .iter()
        .filter(|i| i.scheduled_delete_at.is_some_and(|at| at <= now))
        .map(|i| i.table_key())
        .collect()
}

/// Delete an instance and enqueue the reconciliation for its license.
///
/// Returns the deleted record, or `None` if it did not exist.
pub fn remove_instance(
    state: &StateStore,
    events: &EventQueue,
    instance_key: &str,
) -> StateResult<Option<InstanceRecord>> {
    let Some(existing) = state.get_instance(instance_key)? else {
        return Ok(None);
    };
    if !state.delete_instance(instance_key)? {
        return Ok(None);
    }
    events.send(ReconcileEvent::InstanceDeleted {
        instance: instance_key.to_string(),
        license: existing.license_key(),
    });
    Ok(Some(existing))
}

pub struct Reaper {
    state: StateStore,
    events: EventQueue,
}

impl Reaper {
    pub fn new(state: StateStore, events: EventQueue) -> Self {
        Self { state, events }
    }

    /// Delete every expired instance. Returns the deleted keys.
    pub fn reap_once(&self, now: u64) -> StateResult<Vec<String>> {
        let instances = self.state.list_instances()?;
        let mut reaped = Vec::new();
        for key in expired(&instances, now) {
            if remove_instance(&self.state, &self.events, &key)?.is_some() {
                reaped.push(key);
            }
        }
        Ok(reaped)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "deletion reaper started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reap_once(epoch_secs()) {
                        Ok(reaped) if !reaped.is_empty() => {
                            info!(count = reaped.len(), instances = ?reaped, "reaped expired instances");
                        }
                        Err(e) => warn!(error = %e, "deletion reaper error"),
                        _ => {}
                    }
                }
                _ = shutdown.changed() => {
                    info!("deletion reaper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(name: &str, at: Option<u64>) -> InstanceRecord {
        let mut inst = InstanceRecord::new("tables", name, "main", 1);
        inst.scheduled_delete_at = at;
        inst
    }

    #[test]
    fn expired_selects_only_past_deadlines() {
        let instances = vec![
            scheduled("alpha", Some(100)),
            scheduled("beta", Some(200)),
            scheduled("gamma", None),
        ];
        assert_eq!(expired(&instances, 150), vec!["tables/alpha"]);
        assert_eq!(expired(&instances, 200).len(), 2);
        assert!(expired(&instances, 50).is_empty());
    }

    #[test]
    fn reap_once_deletes_and_enqueues() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_instance(&scheduled("alpha", Some(100))).unwrap();
        state.put_instance(&scheduled("beta", None)).unwrap();
        let (events, mut rx) = EventQueue::channel();

        let reaper = Reaper::new(state.clone(), events);
        assert_eq!(reaper.reap_once(150).unwrap(), vec!["tables/alpha"]);
        assert!(state.get_instance("tables/alpha").unwrap().is_none());
        assert!(state.get_instance("tables/beta").unwrap().is_some());

        assert_eq!(
            rx.try_recv().unwrap(),
            ReconcileEvent::InstanceDeleted {
                instance: "tables/alpha".into(),
                license: Some("tables/main".into()),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removing_missing_instance_is_noop() {
        let state = StateStore::open_in_memory().unwrap();
        let (events, mut rx) = EventQueue::channel();
        assert!(remove_instance(&state, &events, "tables/ghost").unwrap().is_none());
        assert!(rx.try_recv().is_err());
    }
}
