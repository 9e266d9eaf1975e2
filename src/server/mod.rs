//! HTTP read API over a [`ModelManager`]

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::manager::ModelManager;

pub mod routes;

/// Server state
pub struct AppState {
    pub manager: Arc<ModelManager>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stats", get(routes::get_stats))
        .route("/types", get(routes::get_types))
        .route("/nodes/{uuid}", get(routes::get_node))
        .route("/search", get(routes::search))
        .route("/relationships/{uuid}", get(routes::get_relationships))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(port: u16, manager: Arc<ModelManager>) -> anyhow::Result<()> {
    let app = router(Arc::new(AppState { manager }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting server on {}", addr);
    println!("{} Server running at http://{}", crate::ui::Icons::GLOBE, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
