//! Session prober — one background task per active instance.
//!
//! Each task probes on a fixed interval, folds the outcome into the
//! instance's cached snapshot, writes it to the store, and hands it to
//! the optional callback. Only the instance's own `session` field is ever
//! written.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use seatgrid_state::{epoch_secs, SessionSnapshot, StateError, StateStore};

use crate::checker::{probe_status, ProbeConfig, SessionTracker};

/// Callback invoked with `(instance_key, snapshot)` after every probe.
pub type SessionCallback = Arc<dyn Fn(String, SessionSnapshot) -> BoxFuture + Send + Sync>;

pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

struct MonitorSlot {
    address: String,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages probe loops for every instance currently believed active.
pub struct SessionProber {
    state: StateStore,
    config: ProbeConfig,
    /// instance key → slot.
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
    on_snapshot: Option<SessionCallback>,
}

impl SessionProber {
    pub fn new(state: StateStore, config: ProbeConfig) -> Self {
        Self {
            state,
            config,
            monitors: Arc::new(RwLock::new(HashMap::new())),
            on_snapshot: None,
        }
    }

    /// Set a callback for fresh snapshots.
    pub fn with_callback(mut self, callback: SessionCallback) -> Self {
        self.on_snapshot = Some(callback);
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Start probing an instance at `address` (`host:port`).
    ///
    /// A running monitor for the same instance and address is left alone;
    /// a monitor for a different address is replaced.
    pub async fn start(&self, instance_key: &str, address: &str) {
        let mut monitors = self.monitors.write().await;
        if monitors
            .get(instance_key)
            .is_some_and(|slot| slot.address == address && !slot.handle.is_finished())
        {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let key = instance_key.to_string();
        let target = address.to_string();
        let config = self.config.clone();
        let state = self.state.clone();
        let callback = self.on_snapshot.clone();

        let handle = tokio::spawn(async move {
            run_probe_loop(&key, &target, &config, state, callback, shutdown_rx).await;
        });

        if let Some(old) = monitors.insert(
            instance_key.to_string(),
            MonitorSlot {
                address: address.to_string(),
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(instance = %instance_key, %address, "session probe started");
    }

    /// Stop probing an instance.
    pub async fn stop(&self, instance_key: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(instance_key) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(instance = %instance_key, "session probe stopped");
        }
    }

    /// Stop every monitor (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (key, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(instance = %key, "session probe stopped");
        }
        info!("all session probes stopped");
    }

    /// Keys of instances with a monitor.
    pub async fn active_monitors(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        let mut keys: Vec<String> = monitors.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn is_monitoring(&self, instance_key: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(instance_key)
    }
}

async fn run_probe_loop(
    instance_key: &str,
    address: &str,
    config: &ProbeConfig,
    state: StateStore,
    callback: Option<SessionCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    let initial = match state.get_instance(instance_key) {
        Ok(Some(inst)) => inst.session,
        Ok(None) => {
            debug!(instance = %instance_key, "instance gone before first probe");
            return;
        }
        Err(e) => {
            error!(instance = %instance_key, error = %e, "failed to read cached session");
            SessionSnapshot::default()
        }
    };
    let mut tracker = SessionTracker::new(initial);
    let mut ticker = tokio::time::interval(config.interval);

    debug!(instance = %instance_key, %address, path = %config.path, "probe loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = probe_status(
                    address,
                    &config.path,
                    config.token.as_deref(),
                    config.connect_timeout,
                    config.timeout,
                )
                .await;
                let snapshot = tracker.record(outcome, epoch_secs()).clone();

                match state.update_session(instance_key, snapshot.clone()) {
                    Ok(_) => {}
                    Err(StateError::NotFound(_)) => {
                        debug!(instance = %instance_key, "instance deleted, probe loop exiting");
                        break;
                    }
                    Err(e) => {
                        error!(instance = %instance_key, error = %e, "failed to store session snapshot");
                        continue;
                    }
                }

                if let Some(ref cb) = callback {
                    cb(instance_key.to_string(), snapshot).await;
                }
            }
            _ = shutdown.changed() => {
                debug!(instance = %instance_key, "probe loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::routing::get;
    use axum::Router;
    use seatgrid_state::{InstanceRecord, PLAYERS_UNKNOWN};
    use tokio::sync::mpsc;

    fn fast_config() -> ProbeConfig {
        ProbeConfig {
            interval: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
            timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    async fn status_server(body: &'static str) -> String {
        let app = Router::new().route("/status", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr.to_string()
    }

    fn store_with_instance() -> StateStore {
        let state = StateStore::open_in_memory().unwrap();
        state
            .put_instance(&InstanceRecord::new("tables", "alpha", "main", 1))
            .unwrap();
        state
    }

    async fn wait_for<F>(state: &StateStore, mut done: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        for _ in 0..100 {
            let session = state.get_instance("tables/alpha").unwrap().unwrap().session;
            if done(&session) {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("snapshot never reached expected state");
    }

    #[tokio::test]
    async fn monitor_starts_and_stops() {
        let prober = SessionProber::new(store_with_instance(), fast_config());
        assert!(prober.active_monitors().await.is_empty());

        prober.start("tables/alpha", "127.0.0.1:1").await;
        assert!(prober.is_monitoring("tables/alpha").await);

        prober.stop("tables/alpha").await;
        assert!(!prober.is_monitoring("tables/alpha").await);
    }

    #[tokio::test]
    async fn monitor_stop_all() {
        let state = store_with_instance();
        state
            .put_instance(&InstanceRecord::new("tables", "beta", "main", 2))
            .unwrap();
        let prober = SessionProber::new(state, fast_config());

        prober.start("tables/alpha", "127.0.0.1:1").await;
        prober.start("tables/beta", "127.0.0.1:1").await;
        assert_eq!(prober.active_monitors().await.len(), 2);

        prober.stop_all().await;
        assert!(prober.active_monitors().await.is_empty());
    }

    #[tokio::test]
    async fn restarting_with_new_address_replaces_monitor() {
        let prober = SessionProber::new(store_with_instance(), fast_config());

        prober.start("tables/alpha", "127.0.0.1:1").await;
        prober.start("tables/alpha", "127.0.0.1:2").await;
        assert_eq!(prober.active_monitors().await, vec!["tables/alpha"]);
        prober.stop_all().await;
    }

    #[tokio::test]
    async fn successful_probe_updates_store_and_callback() {
        let addr = status_server(r#"{"activeUsers":4,"active":true}"#).await;
        let state = store_with_instance();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let prober = SessionProber::new(state.clone(), fast_config()).with_callback(Arc::new(
            move |key: String, snapshot: SessionSnapshot| -> BoxFuture {
                let tx = tx.clone();
                Box::pin(async move {
                    let _ = tx.send((key, snapshot));
                })
            },
        ));

        prober.start("tables/alpha", &addr).await;
        let session = wait_for(&state, |s| s.connected_players == Some(4)).await;
        assert_eq!(session.world_active, Some(true));
        assert!(session.last_probe_time.is_some());

        let (key, snapshot) = rx.recv().await.unwrap();
        assert_eq!(key, "tables/alpha");
        assert_eq!(snapshot.connected_players, Some(4));
        prober.stop_all().await;
    }

    #[tokio::test]
    async fn unreachable_instance_gets_sentinel() {
        let state = store_with_instance();
        let prober = SessionProber::new(state.clone(), fast_config());

        prober.start("tables/alpha", "127.0.0.1:1").await;
        let session = wait_for(&state, |s| s.connected_players.is_some()).await;
        assert_eq!(session.connected_players, Some(PLAYERS_UNKNOWN));
        assert_eq!(session.last_probe_time, None);
        assert!(session.last_error.is_some());
        prober.stop_all().await;
    }

    #[tokio::test]
    async fn loop_exits_when_instance_is_deleted() {
        let state = store_with_instance();
        state.delete_instance("tables/alpha").unwrap();
        let prober = SessionProber::new(state, fast_config());

        prober.start("tables/alpha", "127.0.0.1:1").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The slot stays registered until stopped; the task itself is done.
        let monitors = prober.monitors.read().await;
        assert!(monitors["tables/alpha"].handle.is_finished());
    }
}
