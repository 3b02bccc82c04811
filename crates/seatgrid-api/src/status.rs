//! Consumer-facing status query and liveness.
//!
//! `GET /api/status?instance=<name>[&namespace=<ns>]` answers in one of
//! three shapes:
//! - `{"status": "deleted"}` when the instance is not in the directory
//! - `{"error": "..."}` when it has no license reference or the license is gone
//! - the full [`InstanceStatusView`] otherwise

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use seatgrid_state::{object_key, InstanceRecord, LicenseRecord};

use crate::ApiState;

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub instance: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Session and activation view of one instance. Unknown values are null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatusView {
    pub instance_name: String,
    pub license_name: String,
    pub active_instance: Option<String>,
    pub connected_players: Option<i64>,
    pub world_active: Option<bool>,
    pub active_world: Option<String>,
    /// Unix timestamp of the last successful probe.
    pub checked_at: Option<u64>,
    pub scheduled_delete_at: Option<u64>,
}

impl InstanceStatusView {
    pub fn new(instance: &InstanceRecord, license: &LicenseRecord) -> Self {
        let session = &instance.session;
        Self {
            instance_name: instance.name.clone(),
            license_name: license.name.clone(),
            active_instance: license.active_instance.clone(),
            connected_players: session.visible_players(),
            world_active: session.world_active,
            active_world: session.active_world.clone(),
            checked_at: session.last_probe_time,
            scheduled_delete_at: instance.scheduled_delete_at,
        }
    }
}

/// GET /api/status
pub async fn status_query(
    State(state): State<ApiState>,
    Query(params): Query<StatusParams>,
) -> Response {
    let namespace = params
        .namespace
        .unwrap_or_else(|| state.default_namespace.clone());
    let key = object_key(&namespace, &params.instance);

    let instance = match state.store.get_instance(&key) {
        Ok(Some(instance)) => instance,
        Ok(None) => return Json(json!({ "status": "deleted" })).into_response(),
        Err(e) => return lookup_failed(&key, &e.to_string()),
    };

    let Some(license_key) = instance.license_key() else {
        return Json(json!({ "error": "instance has no license reference" })).into_response();
    };

    match state.store.get_license(&license_key) {
        Ok(Some(license)) => Json(InstanceStatusView::new(&instance, &license)).into_response(),
        Ok(None) => Json(json!({ "error": format!("license {license_key} not found") }))
            .into_response(),
        Err(e) => lookup_failed(&key, &e.to_string()),
    }
}

fn lookup_failed(key: &str, error: &str) -> Response {
    warn!(instance = %key, %error, "status query failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": error })),
    )
        .into_response()
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use seatgrid_controller::{Controller, ControllerConfig, EventQueue};
    use seatgrid_state::{epoch_secs, SessionSnapshot, StateStore, PLAYERS_UNKNOWN};

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        store.put_license(&LicenseRecord::new("default", "main", 1)).unwrap();
        store
            .put_instance(&InstanceRecord::new("default", "alpha", "main", 1))
            .unwrap();
        let controller = Arc::new(Controller::new(store, ControllerConfig::default()));
        let (events, _rx) = EventQueue::channel();
        ApiState::new(controller, events)
    }

    fn params(instance: &str) -> Query<StatusParams> {
        Query(StatusParams {
            instance: instance.to_string(),
            namespace: None,
        })
    }

    async fn body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_instance_reports_deleted() {
        let resp = status_query(State(test_state()), params("ghost")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body(resp).await, json!({ "status": "deleted" }));
    }

    #[tokio::test]
    async fn missing_license_reports_error() {
        let state = test_state();
        state
            .store
            .put_instance(&InstanceRecord::new("default", "lost", "gone", 1))
            .unwrap();
        let mut orphan = InstanceRecord::new("default", "orphan", "main", 1);
        orphan.license = None;
        state.store.put_instance(&orphan).unwrap();

        let json = body(status_query(State(state.clone()), params("lost")).await).await;
        assert!(json["error"].as_str().unwrap().contains("not found"));
        let json = body(status_query(State(state), params("orphan")).await).await;
        assert!(json["error"].as_str().unwrap().contains("no license"));
    }

    #[tokio::test]
    async fn never_probed_instance_has_null_session_fields() {
        let json = body(status_query(State(test_state()), params("alpha")).await).await;
        assert_eq!(json["instanceName"], "alpha");
        assert_eq!(json["licenseName"], "main");
        assert!(json["activeInstance"].is_null());
        assert!(json["connectedPlayers"].is_null());
        assert!(json["checkedAt"].is_null());
        assert!(json["scheduledDeleteAt"].is_null());
    }

    #[tokio::test]
    async fn probed_active_instance_reports_session() {
        let state = test_state();
        let now = epoch_secs();
        state
            .store
            .patch_license("default/main", None, |l| l.active_instance = Some("alpha".into()))
            .unwrap();
        state
            .store
            .update_session(
                "default/alpha",
                SessionSnapshot {
                    connected_players: Some(3),
                    world_active: Some(true),
                    active_world: Some("lost-mine".into()),
                    last_probe_time: Some(now),
                    last_error: None,
                },
            )
            .unwrap();

        let json = body(status_query(State(state), params("alpha")).await).await;
        assert_eq!(json["activeInstance"], "alpha");
        assert_eq!(json["connectedPlayers"], 3);
        assert_eq!(json["worldActive"], true);
        assert_eq!(json["activeWorld"], "lost-mine");
        assert_eq!(json["checkedAt"], now);
    }

    #[tokio::test]
    async fn failed_probe_hides_sentinel() {
        let state = test_state();
        state
            .store
            .update_session(
                "default/alpha",
                SessionSnapshot {
                    connected_players: Some(PLAYERS_UNKNOWN),
                    ..Default::default()
                },
            )
            .unwrap();
        let json = body(status_query(State(state), params("alpha")).await).await;
        assert!(json["connectedPlayers"].is_null());
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
