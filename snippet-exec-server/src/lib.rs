use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snippet_exec::{ExecutionRequest, ExecutionResponse, ExecutionService, ServiceConfig};
use std::{any::Any, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

/// Header carrying the caller credential
pub const API_KEY_HEADER: &str = "x-api-key";
pub const AVAILABLE_SLOTS_HEADER: &str = "x-available-slots";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Execution service error: {0}")]
    Service(#[from] snippet_exec::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<ExecutionService>,
}

pub async fn create_app(config: ServiceConfig) -> Result<Router, ServerError> {
    let service = ExecutionService::new(config).await?;
    Ok(router(service))
}

/// Routes around an already built service.
pub fn router(service: ExecutionService) -> Router {
    let state = AppState {
        service: Arc::new(service),
    };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/execute", post(execute))
        .route("/run-php", post(execute))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;
    serve(listener, app).await
}

/// Serves on an already bound listener until ctrl-c.
pub async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::ServerError(e.to_string()))?;
    info!("Starting snippet execution server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(
            AVAILABLE_SLOTS_HEADER,
            state.service.get_available_slots().to_string(),
        )],
        "OK",
    )
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> (StatusCode, Json<ExecutionResponse>) {
    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    // An unreadable body has no code in it; the credential is still checked first.
    let code = match payload {
        Ok(Json(body)) => body.code,
        Err(rejection) => {
            debug!("Unreadable request body: {}", rejection);
            String::new()
        }
    };

    let (response, status) = state
        .service
        .handle(ExecutionRequest::new(code, credential))
        .await;
    (status, Json(response))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };
    error!("Request handler panicked: {}", detail);

    let (response, status) = snippet_exec::internal_error("internal error while executing code");
    (status, Json(response)).into_response()
}
