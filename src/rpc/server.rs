//! RPC HTTP server
//!
//! Axum-based HTTP server accepting JSON-RPC requests on `/`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use log::info;
use tower_http::cors::{Any, CorsLayer};

use crate::rpc::methods::{handle_request, JsonRpcRequest, JsonRpcResponse, RpcState};

/// Build the RPC router
pub fn router(state: Arc<RpcState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_rpc))
        .layer(cors)
        .with_state(state)
}

/// Serve JSON-RPC on `addr` until the process ends
pub async fn start_rpc_server(state: Arc<RpcState>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("RPC server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

/// Handle incoming JSON-RPC requests
async fn handle_rpc(
    State(state): State<Arc<RpcState>>,
    Json(request): Json<JsonRpcRequest>,
) -> (StatusCode, Json<JsonRpcResponse>) {
    let response = handle_request(state, request).await;
    (StatusCode::OK, Json(response))
}
