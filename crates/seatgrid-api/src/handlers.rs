//! Management API handlers.
//!
//! Each handler reads/writes via `StateStore`, enqueues the reconciliation
//! event for whatever it changed, and returns a JSON wrapper.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use seatgrid_controller::{remove_instance, ControllerError, ReconcileEvent, SwitchoverOutcome};
use seatgrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn state_error(e: StateError) -> Response {
    match e {
        StateError::Invalid(msg) => error_response(&msg, StatusCode::UNPROCESSABLE_ENTITY),
        StateError::NotFound(key) => error_response(&format!("{key} not found"), StatusCode::NOT_FOUND),
        e @ StateError::Conflict { .. } => error_response(&e.to_string(), StatusCode::CONFLICT),
        e if e.is_transient() => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
        e => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn controller_error(e: ControllerError) -> Response {
    match e {
        ControllerError::NotFound(what) => {
            error_response(&format!("{what} not found"), StatusCode::NOT_FOUND)
        }
        ControllerError::Validation(msg) => error_response(&msg, StatusCode::UNPROCESSABLE_ENTITY),
        ControllerError::Conflict(conflict) => (
            StatusCode::CONFLICT,
            Json(ApiResponse {
                success: false,
                error: Some(conflict.to_string()),
                data: Some(conflict),
            }),
        )
            .into_response(),
        e @ ControllerError::Transient(_) => {
            error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
        }
        e => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Licenses ───────────────────────────────────────────────────

/// License create/update body. Status and the active instance are owned
/// by the controller and cannot be set here.
#[derive(Debug, Deserialize)]
pub struct LicenseRequest {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub default_switchover_mode: Option<SwitchoverMode>,
    #[serde(default)]
    pub gateway: Option<GatewayOverride>,
}

/// GET /api/v1/licenses
pub async fn list_licenses(State(state): State<ApiState>) -> Response {
    match state.store.list_licenses() {
        Ok(licenses) => ApiResponse::ok(licenses).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/licenses/{ns}/{name}
pub async fn get_license(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.store.get_license(&object_key(&ns, &name)) {
        Ok(Some(license)) => ApiResponse::ok(license).into_response(),
        Ok(None) => error_response("license not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/licenses
pub async fn upsert_license(
    State(state): State<ApiState>,
    Json(req): Json<LicenseRequest>,
) -> Response {
    let namespace = req.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let key = object_key(&namespace, &req.name);

    let result = match state.store.get_license(&key) {
        Ok(Some(_)) => state
            .store
            .patch_license(&key, None, |license| {
                if let Some(mode) = req.default_switchover_mode {
                    license.default_switchover_mode = mode;
                }
                license.gateway = req.gateway.clone();
            })
            .map(|license| (StatusCode::OK, license)),
        Ok(None) => {
            let mut license = LicenseRecord::new(&namespace, &req.name, epoch_secs());
            license.default_switchover_mode = req.default_switchover_mode.unwrap_or_default();
            license.gateway = req.gateway.clone();
            state
                .store
                .put_license(&license)
                .map(|license| (StatusCode::CREATED, license))
        }
        Err(e) => Err(e),
    };

    match result {
        Ok((status, license)) => {
            info!(license = %key, "license stored");
            state.events.send(ReconcileEvent::LicenseChanged(key));
            (status, ApiResponse::ok(license)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/licenses/{ns}/{name}
pub async fn delete_license(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    let key = object_key(&ns, &name);
    match state.store.delete_license(&key) {
        Ok(true) => {
            info!(license = %key, "license deleted");
            state.events.send(ReconcileEvent::LicenseDeleted(key));
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("license not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/licenses/{ns}/{name}/routes
pub async fn get_routes(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.controller.routes_for(&object_key(&ns, &name)) {
        Some(routes) => ApiResponse::ok(routes).into_response(),
        None => error_response("no committed routes for license", StatusCode::NOT_FOUND),
    }
}

/// GET /api/v1/hosts/{ns}/{hostname}
///
/// Backend currently serving a public hostname.
pub async fn resolve_host(
    State(state): State<ApiState>,
    Path((ns, hostname)): Path<(String, String)>,
) -> Response {
    match state.controller.route_table().resolve(&ns, &hostname) {
        Some(backend) => ApiResponse::ok(backend).into_response(),
        None => error_response(&format!("no route for {hostname}"), StatusCode::NOT_FOUND),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// Instance create/update body.
#[derive(Debug, Deserialize)]
pub struct InstanceRequest {
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
    pub license: Option<String>,
    #[serde(default)]
    pub switchover_mode: Option<SwitchoverMode>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// GET /api/v1/instances
pub async fn list_instances(State(state): State<ApiState>) -> Response {
    match state.store.list_instances() {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/instances/{ns}/{name}
pub async fn get_instance(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    match state.store.get_instance(&object_key(&ns, &name)) {
        Ok(Some(instance)) => ApiResponse::ok(instance).into_response(),
        Ok(None) => error_response("instance not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/instances
///
/// Moving an instance to another license reconciles the old license too.
pub async fn upsert_instance(
    State(state): State<ApiState>,
    Json(req): Json<InstanceRequest>,
) -> Response {
    let namespace = req.namespace.unwrap_or_else(|| state.default_namespace.clone());
    let key = object_key(&namespace, &req.name);

    let (status, previous_license) = match state.store.get_instance(&key) {
        Ok(Some(existing)) => (StatusCode::OK, existing.license_key()),
        Ok(None) => (StatusCode::CREATED, None),
        Err(e) => return state_error(e),
    };

    let result = if status == StatusCode::CREATED {
        let mut instance = InstanceRecord::new(&namespace, &req.name, "", epoch_secs());
        instance.license = req.license.clone();
        instance.switchover_mode = req.switchover_mode;
        instance.endpoint = req.endpoint.clone();
        state.store.put_instance(&instance)
    } else {
        state.store.patch_instance(&key, None, |instance| {
            instance.license = req.license.clone();
            instance.switchover_mode = req.switchover_mode;
            instance.endpoint = req.endpoint.clone();
        })
    };

    match result {
        Ok(instance) => {
            info!(instance = %key, license = ?instance.license, "instance stored");
            if let Some(old) = previous_license.filter(|old| Some(old) != instance.license_key().as_ref()) {
                state.events.send(ReconcileEvent::LicenseChanged(old));
            }
            state.events.send(ReconcileEvent::InstanceChanged(key));
            (status, ApiResponse::ok(instance)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/instances/{ns}/{name}
pub async fn delete_instance(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    let key = object_key(&ns, &name);
    match remove_instance(&state.store, &state.events, &key) {
        Ok(Some(_)) => {
            info!(instance = %key, "instance deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(None) => error_response("instance not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// POST /api/v1/instances/{ns}/{name}/activate
///
/// 200 when applied, 202 when queued behind the active instance, 409 when
/// the active instance's `block` policy refuses.
pub async fn activate_instance(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    let key = object_key(&ns, &name);
    match state.controller.request_switchover(&key).await {
        Ok(outcome @ SwitchoverOutcome::Applied { .. }) => {
            ApiResponse::ok(outcome).into_response()
        }
        Ok(outcome @ SwitchoverOutcome::Queued { .. }) => {
            (StatusCode::ACCEPTED, ApiResponse::ok(outcome)).into_response()
        }
        Err(e) => controller_error(e),
    }
}

/// Schedule-delete body: unix timestamp after which the instance goes away.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub at: u64,
}

/// POST /api/v1/instances/{ns}/{name}/schedule-delete
pub async fn schedule_delete(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(req): Json<ScheduleRequest>,
) -> Response {
    set_scheduled_delete(&state, &object_key(&ns, &name), Some(req.at))
}

/// DELETE /api/v1/instances/{ns}/{name}/schedule-delete
pub async fn cancel_scheduled_delete(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    set_scheduled_delete(&state, &object_key(&ns, &name), None)
}

fn set_scheduled_delete(state: &ApiState, key: &str, at: Option<u64>) -> Response {
    match state.store.get_instance(key) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("instance not found", StatusCode::NOT_FOUND),
        Err(e) => return state_error(e),
    }
    match state
        .store
        .patch_instance(key, None, |instance| instance.scheduled_delete_at = at)
    {
        Ok(instance) => {
            info!(instance = %key, scheduled_delete_at = ?at, "scheduled deletion updated");
            state.events.send(ReconcileEvent::InstanceChanged(key.to_string()));
            ApiResponse::ok(instance).into_response()
        }
        Err(e) => state_error(e),
    }
}
