//! REST API handlers.
//!
//! Each handler calls into the shared `Controller` and returns JSON
//! responses.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{debug, info};

use loadpilot_queue::SubmitOutcome;
use loadpilot_state::{Algorithm, RejectReason, WorkloadRequest};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Requests ───────────────────────────────────────────────────

/// POST /api/v1/requests
pub async fn submit_request(
    State(state): State<ApiState>,
    Json(mut request): Json<WorkloadRequest>,
) -> impl IntoResponse {
    request.retry_count = 0;
    let id = request.id.clone();

    match state.controller.submit(request).await {
        SubmitOutcome::Accepted => {
            debug!(request = %id, "request accepted");
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({ "id": id, "status": "accepted" })),
            )
                .into_response()
        }
        SubmitOutcome::Rejected(reason) => {
            let msg = match reason {
                RejectReason::QueueFull => "request queue is full",
                RejectReason::ShuttingDown => "controller is shutting down",
                RejectReason::NoHealthyComponent => "no healthy component",
                RejectReason::DeadlineExceeded => "deadline exceeded",
            };
            error_response(msg, StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /api/v1/metrics
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.get_metrics().await)
}

/// GET /api/v1/scaling
pub async fn get_scaling_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.get_scaling_metrics().await)
}

/// GET /api/v1/alerts
pub async fn list_alerts(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.controller.alerts().await)
}

// ── Algorithm ──────────────────────────────────────────────────

/// Algorithm override body.
#[derive(serde::Deserialize)]
pub struct AlgorithmRequest {
    pub algorithm: Algorithm,
}

/// POST /api/v1/algorithm
pub async fn set_algorithm(
    State(state): State<ApiState>,
    Json(req): Json<AlgorithmRequest>,
) -> impl IntoResponse {
    let switched = state.controller.set_algorithm(req.algorithm).await;
    if switched {
        info!(algorithm = %req.algorithm, "algorithm overridden via API");
    }
    ApiResponse::ok(serde_json::json!({
        "algorithm": req.algorithm,
        "switched": switched,
    }))
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.controller.get_metrics().await;
    let body = loadpilot_metrics::render_prometheus(&report);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use loadpilot_controller::Controller;
    use loadpilot_core::{ComponentConfig, LoadPilotConfig, PolicyConfig};
    use loadpilot_state::{Priority, ResourceVector, WorkloadType};

    use crate::build_router;

    async fn test_state(queue_capacity: usize) -> ApiState {
        let mut config = LoadPilotConfig {
            components: vec![ComponentConfig {
                id: "price-feed".to_string(),
                max_concurrent_tasks: 10,
                max_utilization: ResourceVector::uniform(100.0),
                weight: 1.0,
                priority_multiplier: 1.0,
                policy: PolicyConfig::default(),
            }],
            ..LoadPilotConfig::default()
        };
        config.controller.queue_capacity = queue_capacity;
        let controller = Controller::init(config).await.unwrap();
        ApiState {
            controller: Arc::new(controller),
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request() -> WorkloadRequest {
        WorkloadRequest::new(WorkloadType::PriceUpdate, Priority::High)
    }

    #[tokio::test]
    async fn submit_accepted() {
        let state = test_state(10).await;
        let resp = submit_request(State(state.clone()), Json(request().with_id("r1"))).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let body = body_json(resp).await;
        assert_eq!(body["data"]["id"], "r1");
        assert_eq!(state.controller.processor().queue().len().await, 1);
    }

    #[tokio::test]
    async fn submit_rejected_when_queue_full() {
        let state = test_state(1).await;
        submit_request(State(state.clone()), Json(request())).await;

        let resp = submit_request(State(state), Json(request())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "request queue is full");
    }

    #[tokio::test]
    async fn metrics_lists_components() {
        let state = test_state(10).await;
        let resp = get_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["data"]["components"][0]["component"], "price-feed");
        assert_eq!(body["data"]["system"]["queue_capacity"], 10);
    }

    #[tokio::test]
    async fn scaling_and_alerts_respond() {
        let state = test_state(10).await;
        let resp = get_scaling_metrics(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["components"][0]["component"], "price-feed");

        let resp = list_alerts(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["active"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn algorithm_override() {
        let state = test_state(10).await;
        let resp = set_algorithm(
            State(state.clone()),
            Json(AlgorithmRequest {
                algorithm: Algorithm::LeastConnections,
            }),
        )
        .await
        .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["switched"], true);
        assert_eq!(
            state.controller.balancer().active_algorithm().await,
            Algorithm::LeastConnections
        );
    }

    #[tokio::test]
    async fn router_serves_prometheus() {
        let state = test_state(10).await;
        let router = build_router(state.controller);

        let resp = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("price-feed"));
    }

    #[tokio::test]
    async fn router_accepts_json_submission() {
        let state = test_state(10).await;
        let router = build_router(state.controller.clone());

        let resp = router
            .oneshot(
                Request::post("/api/v1/requests")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"workload_type":"trade_execution","priority":"critical"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(state.controller.processor().queue().len().await, 1);
    }
}
