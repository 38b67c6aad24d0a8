//! loadpilot-api — REST API for the loadpilot controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/requests` | Submit a workload request |
//! | GET | `/api/v1/metrics` | Component and system metrics |
//! | GET | `/api/v1/scaling` | Allocations, decisions, effectiveness |
//! | GET | `/api/v1/alerts` | Active and resolved alerts |
//! | POST | `/api/v1/algorithm` | Override the active algorithm |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use loadpilot_controller::Controller;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(controller: Arc<Controller>) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/requests", post(handlers::submit_request))
        .route("/metrics", get(handlers::get_metrics))
        .route("/scaling", get(handlers::get_scaling_metrics))
        .route("/alerts", get(handlers::list_alerts))
        .route("/algorithm", post(handlers::set_algorithm))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(api_state))
}
