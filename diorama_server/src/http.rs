//! The HTTP surface: uploads, topology saves, the container log sink, and
//! the WebSocket upgrade. CORS is wide open; the backend serves a local
//! single-tenant UI.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;

use diorama_topology::TopologyLanguage;

use crate::events::outbound;
use crate::{AppState, hub, topology};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/uploadZipFile/{program_name}", post(upload_zip_file))
        .route("/saveNetworkTopology", post(save_network_topology))
        .route("/loggingMessage", post(logging_message))
        .route("/ws", get(ws_upgrade))
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods(cors::Any)
                .allow_headers(cors::Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> &'static str {
    "This is the Diorama backend server."
}

async fn upload_zip_file(
    State(state): State<Arc<AppState>>,
    Path(program_name): Path<String>,
    body: Bytes,
) -> Result<&'static str, StatusCode> {
    state
        .store
        .write_program_zip(&program_name, &body)
        .map_err(|error| {
            tracing::error!("zip upload for `{program_name}` failed: {error:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok("Upload successful")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveTopologyRequest {
    language: TopologyLanguage,
    raw_network_topology: String,
}

async fn save_network_topology(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<SaveTopologyRequest>,
) -> impl IntoResponse {
    match topology::save_topology(&state.store, request.language, &request.raw_network_topology) {
        Ok(Ok(unpacked)) => axum::Json(json!({
            "isValidAndSaved": true,
            "unpackedTopology": unpacked,
        }))
        .into_response(),
        Ok(Err(error)) => axum::Json(json!({
            "isValidAndSaved": false,
            "errorMessage": error.code(),
            "errorData": error.data(),
        }))
        .into_response(),
        Err(error) => {
            tracing::error!("saving topology failed: {error:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Containers post their own structured log lines here; they are fanned out
/// to subscribers verbatim.
async fn logging_message(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> &'static str {
    state.hub.broadcast(outbound::SIMULATION_LOGS, &body);
    "OK"
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| hub::handle_socket(state, socket))
}
