//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod implementation;
mod opportunity;
mod proposal;
mod report;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, Method},
    routing::{get, post, put},
    Json, Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::{warn, Level};
use uuid::Uuid;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    api_routes().layer(middleware).with_state(state)
}

fn api_routes() -> Router<SharedState> {
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Opportunities
        .route(
            "/api/opportunities",
            post(opportunity::create_opportunity).get(opportunity::list_open_opportunities),
        )

        // Proposal lifecycle
        .route(
            "/api/proposals",
            post(proposal::create_proposal).get(proposal::list_proposals),
        )
        .route("/api/proposals/{id}", get(proposal::get_proposal))
        .route("/api/proposals/{id}/detail", get(proposal::get_proposal_detail))
        .route("/api/proposals/{id}/transition", post(proposal::transition_proposal))
        .route(
            "/api/proposals/{id}/implementation-status",
            put(proposal::update_implementation_status),
        )
        .route("/api/proposals/{id}/vettings", post(proposal::record_vetting))
        .route("/api/proposals/{id}/implementation", post(proposal::start_implementation))

        // Section mapping & sync
        .route("/api/proposals/{id}/section", post(proposal::assign_section))
        .route("/api/proposals/{id}/sync-check", get(proposal::check_can_sync))
        .route("/api/proposals/{id}/sync", post(proposal::mark_synced))
        .route("/api/proposals/{id}/guardrail", get(proposal::guardrail_check))
        .route("/api/sync/ready", get(report::ready_to_sync))

        // Implementations
        .route("/api/implementations/{id}/progress", post(implementation::update_progress))
        .route("/api/implementations/{id}/complete", post(implementation::complete_implementation))
        .route("/api/implementations/{id}/fail", post(implementation::fail_implementation))
        .route("/api/implementations/{id}/validate", post(implementation::validate_implementation))
        .route(
            "/api/implementations/{id}/revalidate",
            post(implementation::revalidate_implementation),
        )

        // Audit & reporting
        .route("/api/audit/guardrail-violations", get(report::guardrail_violations))
        .route("/api/reports/summary", get(report::summary))
        .route("/api/reports/work-queue", get(report::work_queue))
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::ACCEPT];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint. Probes the store with a lookup that cannot match.
async fn health_check(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let store = match state.store.get_proposal(Uuid::nil()).await {
        Ok(_) => "ok",
        Err(e) => {
            warn!(error = %e, "Health check could not reach the store");
            "unavailable"
        }
    };

    Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "store": store,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::state::AppState;
    use crate::store::MemoryGraphStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryGraphStore::new()),
            LifecycleConfig::default(),
        ));
        create_router(state, &Settings::default())
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router, title: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/proposals",
            Some(json!({ "title": title, "description": "Throttle tool calls", "category": "security" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["proposal"]["id"].as_str().unwrap().to_string()
    }

    async fn transition(app: &Router, id: &str, target: &str) -> StatusCode {
        call(
            app,
            Method::POST,
            &format!("/api/proposals/{id}/transition"),
            Some(json!({ "target": target, "reason": "reviewed" })),
        )
        .await
        .0
    }

    #[tokio::test]
    async fn test_health_reports_store() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "ok");
    }

    #[tokio::test]
    async fn test_create_and_list_proposals() {
        let app = app();
        create(&app, "Add rate limiting").await;

        let (status, body) = call(&app, Method::GET, "/api/proposals?status=proposed", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["proposals"][0]["title"], "Add rate limiting");
    }

    #[tokio::test]
    async fn test_unknown_status_is_bad_request() {
        let (status, body) = call(&app(), Method::GET, "/api/proposals?status=done", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_conflict() {
        let app = app();
        let id = create(&app, "Add rate limiting").await;
        assert_eq!(transition(&app, &id, "implemented").await, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_sync_before_validation_is_refused() {
        let app = app();
        let id = create(&app, "Add rate limiting").await;
        assert_eq!(transition(&app, &id, "under_review").await, StatusCode::OK);
        assert_eq!(transition(&app, &id, "approved").await, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/proposals/{id}/sync"),
            Some(json!({ "sectionTitle": "Security Architecture" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "GUARDRAIL_VIOLATION");

        let (_, body) = call(&app, Method::GET, "/api/audit/guardrail-violations", None).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_refused_sync_without_section_leaves_proposal_untouched() {
        let app = app();
        let id = create(&app, "Add rate limiting").await;
        assert_eq!(transition(&app, &id, "under_review").await, StatusCode::OK);
        assert_eq!(transition(&app, &id, "approved").await, StatusCode::OK);

        let uri = format!("/api/proposals/{id}");
        let (_, before) = call(&app, Method::GET, &uri, None).await;
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/api/proposals/{id}/sync"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, after) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(after["proposal"], before["proposal"]);
        assert_eq!(after["proposal"]["targetSection"], Value::Null);
    }

    #[tokio::test]
    async fn test_missing_proposal_is_not_found() {
        let uri = format!("/api/proposals/{}", Uuid::new_v4());
        let (status, _) = call(&app(), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
