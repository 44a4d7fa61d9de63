//! API Server - HTTP server for the wizard and migration streams

use axum::{
    http::HeaderValue,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::handlers::{self, AppState};
use crate::clients::ClientFactory;
use crate::config::Config;
use crate::storage::WizardStore;
use crate::throttle::TargetThrottle;
use crate::wizard::SessionRegistry;

/// API Server configuration
pub struct ApiServer {
    state: Arc<AppState>,
    addr: String,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: Config, store: Arc<dyn WizardStore>, clients: Arc<dyn ClientFactory>) -> Self {
        let throttle = Arc::new(TargetThrottle::new(&config.throttle));
        let addr = config.server.listen_addr.clone();
        let state = Arc::new(AppState {
            config,
            registry: SessionRegistry::new(store),
            throttle,
            clients,
        });

        Self { state, addr }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    fn cors(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {}", origin);
                    None
                }
            })
            .collect();

        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            cors.allow_origin(origins)
        }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let wizard_routes = Router::new()
            .route(
                "/:source/:target",
                get(handlers::get_wizard).delete(handlers::reset_wizard),
            )
            .route("/:source/:target/goto/:phase", post(handlers::go_to_phase))
            .route(
                "/:source/:target/phases/:phase/start",
                post(handlers::start_phase),
            )
            .route(
                "/:source/:target/phases/:phase/complete",
                post(handlers::complete_phase),
            )
            .route(
                "/:source/:target/phases/:phase/skip",
                post(handlers::skip_phase),
            )
            .route(
                "/:source/:target/phases/:phase/data",
                patch(handlers::update_phase_data),
            );

        let api_routes = Router::new()
            .route("/health", get(handlers::health))
            .route("/migrate/:entity", post(handlers::migrate))
            .nest("/wizard", wizard_routes);

        Router::new()
            .nest("/api", api_routes)
            .layer(TraceLayer::new_for_http())
            .layer(self.cors())
            .with_state(self.state.clone())
    }

    /// Start the API server on the configured address
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        info!("Starting API server on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{FixedClients, MemorySource, MemoryTarget};
    use crate::storage::MemoryWizardStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn server() -> ApiServer {
        let clients = Arc::new(FixedClients {
            source: Arc::new(MemorySource::new()),
            target: Arc::new(MemoryTarget::new()),
        });
        ApiServer::new(Config::default(), Arc::new(MemoryWizardStore::new()), clients)
    }

    #[tokio::test]
    async fn test_health() {
        let response = server()
            .router()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_phase_is_bad_request() {
        let response = server()
            .router()
            .oneshot(
                Request::post("/api/wizard/shop/hash/goto/9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_bad_request() {
        let body = serde_json::json!({
            "sourceKey": "shop",
            "targetKey": "hash",
            "source": {"url": "http://shop", "consumer_key": "ck", "consumer_secret": "cs"},
            "target": {"store_hash": "hash", "access_token": "t"}
        });
        let response = server()
            .router()
            .oneshot(
                Request::post("/api/migrate/widgets")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
