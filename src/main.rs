use std::error::Error;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use dotenvy::dotenv;
use tracing::info;

mod config;
mod error;
mod handlers;
mod llm;
mod utils;

use config::CONFIG;
use handlers::{fusion, ideas, pages};
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let _guards = init_logging();

    info!(
        "Starting FaceWeave server (text model: {}, image model: {})",
        CONFIG.gemini_model, CONFIG.gemini_image_model
    );

    let app = Router::new()
        .route("/", get(pages::index))
        .route("/static/app.js", get(pages::app_js))
        .route("/static/style.css", get(pages::style_css))
        .route("/health", get(pages::health))
        .route("/api/fuse", post(fusion::fuse_images))
        .route("/api/ideas", post(ideas::generate_ideas))
        // Two data-URI images per fusion request; the axum default of 2 MB is far too small.
        .layer(DefaultBodyLimit::max(CONFIG.max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(&CONFIG.bind_address).await?;
    info!("Listening on http://{}", CONFIG.bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
