//! seatgrid-api — HTTP surface for SeatGrid.
//!
//! Management handlers over the license/instance directory plus the
//! consumer-facing status query used by standby pages. Every mutation
//! enqueues the matching reconciliation event; switchover requests are
//! decided synchronously so the caller learns the outcome.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/licenses` | List licenses |
//! | POST | `/api/v1/licenses` | Create or update a license |
//! | GET | `/api/v1/licenses/{ns}/{name}` | Get a license |
//! | DELETE | `/api/v1/licenses/{ns}/{name}` | Delete a license |
//! | GET | `/api/v1/licenses/{ns}/{name}/routes` | Last committed routes |
//! | GET | `/api/v1/hosts/{ns}/{hostname}` | Backend serving a hostname |
//! | GET | `/api/v1/instances` | List instances |
//! | POST | `/api/v1/instances` | Create or update an instance |
//! | GET | `/api/v1/instances/{ns}/{name}` | Get an instance |
//! | DELETE | `/api/v1/instances/{ns}/{name}` | Delete an instance |
//! | POST | `/api/v1/instances/{ns}/{name}/activate` | Request a switchover |
//! | POST | `/api/v1/instances/{ns}/{name}/schedule-delete` | Schedule deletion |
//! | DELETE | `/api/v1/instances/{ns}/{name}/schedule-delete` | Cancel scheduled deletion |
//! | GET | `/api/status?instance=<name>` | Status query |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod status;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use seatgrid_controller::{Controller, EventQueue};
use seatgrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub controller: Arc<Controller>,
    pub events: EventQueue,
    /// Namespace used when a request does not name one.
    pub default_namespace: String,
}

impl ApiState {
    pub fn new(controller: Arc<Controller>, events: EventQueue) -> Self {
        Self {
            store: controller.state().clone(),
            controller,
            events,
            default_namespace: "default".to_string(),
        }
    }

    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        self.default_namespace = namespace.to_string();
        self
    }
}

/// Build the complete router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/licenses", get(handlers::list_licenses).post(handlers::upsert_license))
        .route(
            "/licenses/{ns}/{name}",
            get(handlers::get_license).delete(handlers::delete_license),
        )
        .route("/licenses/{ns}/{name}/routes", get(handlers::get_routes))
        .route("/hosts/{ns}/{hostname}", get(handlers::resolve_host))
        .route("/instances", get(handlers::list_instances).post(handlers::upsert_instance))
        .route(
            "/instances/{ns}/{name}",
            get(handlers::get_instance).delete(handlers::delete_instance),
        )
        .route("/instances/{ns}/{name}/activate", post(handlers::activate_instance))
        .route(
            "/instances/{ns}/{name}/schedule-delete",
            post(handlers::schedule_delete).delete(handlers::cancel_scheduled_delete),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/api/status", get(status::status_query).with_state(state))
        .route("/healthz", get(status::healthz))
}
