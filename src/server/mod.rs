//! HTTP + WebSocket surface over a shared [`Workspace`].
//!
//! Every request locks the one workspace, so mutations are applied in
//! arrival order exactly as a single-threaded UI would apply them.

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::DealflowToml;
use crate::workspace::Workspace;

pub mod api;
pub mod ws;

pub use api::{AppState, SharedState};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            cors: false,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(toml: &DealflowToml) -> Self {
        Self {
            host: toml.server.host.clone(),
            port: toml.server.port,
            cors: toml.server.cors,
        }
    }
}

/// Build the full application router: REST API plus `/ws`.
pub fn build_router(state: SharedState, cors: bool) -> Router {
    let app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve `workspace` until Ctrl+C.
pub async fn start_server(config: ServerConfig, workspace: Workspace) -> Result<()> {
    let state = AppState::new(workspace);
    let app = build_router(state, config.cors);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, cors = config.cors, "server listening");
    println!("dealflow running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use crate::workspace::WorkspaceSettings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router(cors: bool) -> Router {
        let workspace = Workspace::open(
            Box::new(MemoryBackend::new()),
            "tester",
            WorkspaceSettings::default(),
        )
        .expect("open workspace");
        build_router(AppState::new(workspace), cors)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/api/stages")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = test_router(false);
        let req = Request::builder()
            .uri("/api/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_layer_when_enabled() {
        let app = test_router(true);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(
            resp.headers()
                .contains_key("access-control-allow-origin")
        );

        let app = test_router(false);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(
            !resp
                .headers()
                .contains_key("access-control-allow-origin")
        );
    }

    #[test]
    fn test_server_config_from_toml() {
        let mut toml = DealflowToml::default();
        toml.server.port = 9000;
        toml.server.cors = true;
        let config = ServerConfig::from_toml(&toml);
        assert_eq!(config.port, 9000);
        assert!(config.cors);
        assert_eq!(config.host, "127.0.0.1");
    }
}
