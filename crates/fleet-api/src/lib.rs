//! fleet-api: REST API for the bot fleet controller.
//!
//! # API Routes
//!
//! | Method | Path | Auth | Description |
//! |---|---|---|---|
//! | GET | `/healthz` | none | Liveness |
//! | POST | `/api/v1/pass` | trigger | Run one monitoring pass |
//! | GET | `/api/v1/deployments` | admin | List deployments (`?status=`) |
//! | POST | `/api/v1/deployments` | admin | Provision for an order |
//! | GET | `/api/v1/deployments/{id}` | admin | Get a deployment |
//! | POST | `/api/v1/deployments/{id}/suspend` | admin | Suspend |
//! | POST | `/api/v1/deployments/{id}/unsuspend` | admin | Unsuspend |
//! | POST | `/api/v1/deployments/{id}/terminate` | admin | Terminate |
//! | POST | `/api/v1/deployments/{id}/resources` | admin | Resize to a tier |
//! | POST | `/api/v1/deployments/{id}/release-hold` | admin | Clear operator hold |
//! | GET | `/api/v1/deployments/{id}/status` | admin | Customer status view |
//! | GET | `/api/v1/deployments/{id}/samples` | admin | Recent samples |
//! | GET | `/api/v1/deployments/{id}/events` | admin | Scaling events |
//! | GET | `/api/v1/deployments/{id}/actions` | admin | Action log |

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};

use fleet_core::config::AuthConfig;
use fleet_monitor::ResourceMonitor;
use fleet_pass::PassDriver;
use fleet_provision::Provisioner;
use fleet_state::StateStore;

use crate::auth::{BearerToken, require_bearer};

pub use error::{ApiError, ApiResponse};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub provisioner: Arc<Provisioner>,
    pub monitor: Arc<ResourceMonitor>,
    pub driver: Arc<PassDriver>,
    /// Utilization percentage above which the status view recommends an upgrade.
    pub upgrade_threshold: f64,
}

/// Build the complete API router.
pub fn build_router(state: ApiState, auth: &AuthConfig) -> Router {
    let trigger_routes = Router::new()
        .route("/pass", post(handlers::run_pass))
        .route_layer(from_fn_with_state(
            BearerToken::new(&auth.trigger_token),
            require_bearer,
        ));

    let admin_routes = Router::new()
        .route(
            "/deployments",
            get(handlers::list_deployments).post(handlers::provision),
        )
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/suspend", post(handlers::suspend))
        .route("/deployments/{id}/unsuspend", post(handlers::unsuspend))
        .route("/deployments/{id}/terminate", post(handlers::terminate))
        .route("/deployments/{id}/resources", post(handlers::update_resources))
        .route("/deployments/{id}/release-hold", post(handlers::release_hold))
        .route("/deployments/{id}/status", get(handlers::deployment_status))
        .route("/deployments/{id}/samples", get(handlers::list_samples))
        .route("/deployments/{id}/events", get(handlers::list_events))
        .route("/deployments/{id}/actions", get(handlers::list_actions))
        .route_layer(from_fn_with_state(
            BearerToken::new(&auth.admin_token),
            require_bearer,
        ));

    let api_routes = trigger_routes.merge(admin_routes).with_state(state);

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api_routes)
}
