//! Reconciliation driver — turns change events into controller passes.
//!
//! Events arrive on an unbounded channel from the API, the reaper and the
//! session prober. Each event is handled on its own task; passes for the
//! same license serialize on the license slot, passes for different
//! licenses run concurrently. A ticker triggers a full resync.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use seatgrid_probe::{BoxFuture, SessionCallback};
use seatgrid_state::SessionSnapshot;

use crate::controller::Controller;
use crate::error::ControllerError;

/// A change that needs a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    LicenseChanged(String),
    LicenseDeleted(String),
    InstanceChanged(String),
    /// `license` is the reference the deleted record carried.
    InstanceDeleted {
        instance: String,
        license: Option<String>,
    },
    SessionUpdated(String),
    Resync,
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<ReconcileEvent>,
}

impl EventQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReconcileEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: ReconcileEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(event = ?e.0, "reconcile driver stopped, event dropped");
        }
    }

    /// Callback for the session prober that enqueues `SessionUpdated`.
    pub fn session_callback(&self) -> SessionCallback {
        let queue = self.clone();
        Arc::new(move |key: String, _snapshot: SessionSnapshot| -> BoxFuture {
            queue.send(ReconcileEvent::SessionUpdated(key));
            Box::pin(async {})
        })
    }
}

/// Consumes events and runs passes until shut down.
pub struct Driver {
    controller: Arc<Controller>,
    rx: mpsc::UnboundedReceiver<ReconcileEvent>,
    resync_interval: Duration,
}

impl Driver {
    pub fn new(
        controller: Arc<Controller>,
        rx: mpsc::UnboundedReceiver<ReconcileEvent>,
        resync_interval: Duration,
    ) -> Self {
        Self {
            controller,
            rx,
            resync_interval,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resync_secs = self.resync_interval.as_secs(),
            "reconcile driver started"
        );
        let mut tasks = JoinSet::new();
        let mut resync = tokio::time::interval(self.resync_interval);
        // The first tick is immediate; startup hydration already covers it.
        resync.tick().await;

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed");
                        break;
                    };
                    let controller = Arc::clone(&self.controller);
                    tasks.spawn(async move { handle(&controller, event).await });
                }
                _ = resync.tick() => {
                    let controller = Arc::clone(&self.controller);
                    tasks.spawn(async move { handle(&controller, ReconcileEvent::Resync).await });
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "reconcile task panicked");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reconcile driver shutting down");
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "reconcile task panicked");
            }
        }
        self.controller.shutdown().await;
    }
}

/// Run the pass(es) for one event, logging instead of propagating failures.
pub async fn handle(controller: &Controller, event: ReconcileEvent) {
    debug!(?event, "handling reconcile event");
    let result = match &event {
        ReconcileEvent::LicenseChanged(key) | ReconcileEvent::LicenseDeleted(key) => {
            controller.reconcile_license(key).await.map(|_| ())
        }
        ReconcileEvent::InstanceChanged(key) => {
            controller.reconcile_instance(key).await.map(|_| ())
        }
        ReconcileEvent::InstanceDeleted { instance, license } => controller
            .instance_deleted(instance, license.as_deref())
            .await
            .map(|_| ()),
        ReconcileEvent::SessionUpdated(key) => controller.session_updated(key).await.map(|_| ()),
        ReconcileEvent::Resync => {
            let ok = controller.resync_all().await;
            debug!(licenses = ok, "resync complete");
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        Err(e @ (ControllerError::Validation(_) | ControllerError::NotFound(_))) => {
            warn!(?event, error = %e, "event skipped");
        }
        Err(e) => error!(?event, error = %e, "reconcile pass failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use seatgrid_state::{epoch_secs, InstanceRecord, LicenseRecord, RouteState, StateStore};

    fn controller() -> Arc<Controller> {
        let state = StateStore::open_in_memory().unwrap();
        state.put_license(&LicenseRecord::new("tables", "main", 1)).unwrap();
        state
            .put_instance(&InstanceRecord::new("tables", "alpha", "main", 1))
            .unwrap();
        Arc::new(Controller::new(state, ControllerConfig::default()))
    }

    async fn wait_for_routes(controller: &Controller) {
        for _ in 0..100 {
            if controller.routes_for("tables/main").is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("routes never appeared");
    }

    #[tokio::test]
    async fn instance_event_produces_routes() {
        let c = controller();
        handle(&c, ReconcileEvent::InstanceChanged("tables/alpha".into())).await;
        let routes = c.routes_for("tables/main").unwrap();
        assert_eq!(routes.get("alpha").unwrap().state, RouteState::Standby);
    }

    #[tokio::test]
    async fn failing_event_does_not_panic() {
        let c = controller();
        handle(&c, ReconcileEvent::InstanceChanged("tables/ghost".into())).await;
        handle(&c, ReconcileEvent::LicenseDeleted("tables/none".into())).await;
        handle(
            &c,
            ReconcileEvent::InstanceDeleted {
                instance: "tables/ghost".into(),
                license: None,
            },
        )
        .await;
    }

    #[tokio::test]
    async fn driver_processes_queue_until_shutdown() {
        let c = controller();
        let (queue, rx) = EventQueue::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = Driver::new(Arc::clone(&c), rx, Duration::from_secs(3600));
        let handle = tokio::spawn(driver.run(shutdown_rx));

        queue.send(ReconcileEvent::LicenseChanged("tables/main".into()));
        wait_for_routes(&c).await;

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
        // Sending after shutdown only logs.
        queue.send(ReconcileEvent::Resync);
    }

    #[tokio::test]
    async fn session_callback_enqueues_update() {
        let (queue, mut rx) = EventQueue::channel();
        let callback = queue.session_callback();
        callback(
            "tables/alpha".into(),
            SessionSnapshot {
                connected_players: Some(0),
                last_probe_time: Some(epoch_secs()),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(
            rx.recv().await,
            Some(ReconcileEvent::SessionUpdated("tables/alpha".into()))
        );
    }
}
