//! HTTP API server for the orchestration core.
//!
//! Exposes job submission and inspection, the compute webhook callback, and
//! per-owner server-sent event streams.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::DirigentError;
use crate::ingress::WebhookOutcome;
use crate::job::{JobKind, JobPayload, JobRecord};
use crate::notify::BroadcastHub;
use crate::orchestrator::Orchestrator;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
    hub: Arc<BroadcastHub>,
}

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let hub = Arc::new(BroadcastHub::new());
    let orchestrator = Orchestrator::new(settings, hub.clone())?;

    let report = orchestrator.recover().await?;
    orchestrator.purge_expired_correlations().await?;

    let state = Arc::new(AppState { orchestrator, hub });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/stalled", get(list_stalled))
        .route("/jobs/{id}", get(get_job))
        .route("/webhooks/compute", post(compute_webhook))
        .route("/owners/{owner_id}/events", get(owner_events))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Dirigent API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    if report.requeued > 0 || report.awaiting_webhook > 0 {
        Output::info(&format!(
            "Recovered {} queued jobs, {} transcriptions awaiting webhook",
            report.requeued, report.awaiting_webhook
        ));
    }
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Submit Job", "POST /jobs");
    Output::kv("List Jobs", "GET  /jobs?owner=...");
    Output::kv("Get Job", "GET  /jobs/:id");
    Output::kv("Stalled Jobs", "GET  /jobs/stalled");
    Output::kv("Compute Webhook", "POST /webhooks/compute");
    Output::kv("Owner Events", "GET  /owners/:owner_id/events");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct SubmitJobRequest {
    owner_id: String,
    kind: JobKind,
    /// Media location for transcription, prompt text for LLM kinds.
    input: String,
    /// Owning transcription (summary and chat kinds).
    #[serde(default)]
    parent_id: Option<Uuid>,
    /// Summary variant, e.g. "bullet_points".
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ListJobsQuery {
    owner: String,
}

/// Incoming compute callback: the provider's job id plus a tagged outcome.
#[derive(Deserialize)]
struct WebhookRequest {
    id: String,
    #[serde(flatten)]
    outcome: WebhookOutcome,
}

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
}

#[derive(Serialize)]
struct JobListResponse {
    jobs: Vec<JobRecord>,
    total: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: DirigentError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        DirigentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DirigentError::JobNotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    let payload = JobPayload {
        input: req.input,
        parent_id: req.parent_id,
        variant: req.variant,
        display_name: req.display_name,
    };
    match state
        .orchestrator
        .submit_job(&req.owner_id, req.kind, payload)
        .await
    {
        Ok(job) => (StatusCode::ACCEPTED, Json(job)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.get_job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(DirigentError::JobNotFound(id.to_string())).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    match state.orchestrator.list_jobs(&query.owner).await {
        Ok(jobs) => {
            let total = jobs.len();
            Json(JobListResponse { jobs, total }).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn list_stalled(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.list_stalled().await {
        Ok(jobs) => {
            let total = jobs.len();
            Json(JobListResponse { jobs, total }).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// Compute providers retry on non-2xx, so every event the ingress could
/// classify is acknowledged with 200, including unknown ids and duplicates.
async fn compute_webhook(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WebhookRequest>,
) -> impl IntoResponse {
    match state.orchestrator.on_webhook(&req.id, req.outcome).await {
        Ok(()) => Json(WebhookAck { received: true }).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Server-sent event stream of one owner's job updates.
async fn owner_events(
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.hub.subscribe(&owner_id);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = match serde_json::to_string(&event) {
                        Ok(data) => data,
                        Err(_) => continue,
                    };
                    return Some((Ok(Event::default().event("job").data(data)), rx));
                }
                // Slow consumers drop missed events and keep following.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
