mod api;
mod auth;
mod config;
mod error;
mod exam;

use std::sync::Arc;
use warp::Filter;

use auth::{JwtVerifier, TokenVerifier};
use config::Config;
use exam::evaluator::evaluator_from_config;
use exam::store::MemoryStore;
use exam::{RoomManager, SessionManager, TickerStore};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = MemoryStore::new();
    if config.server.demo_seed {
        let test_id = store.seed_demo_data().await;
        tracing::info!(test_id = %test_id, "Seeded demo test data");
        match auth::sign_token("demo-user", &config.auth.jwt_secret, 24 * 60 * 60) {
            Ok(token) => tracing::info!(token = %token, "Demo token, valid for 24h"),
            Err(e) => tracing::warn!(error = %e, "Could not mint demo token"),
        }
    }

    let evaluator = evaluator_from_config(&config.evaluator);
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));

    let manager = SessionManager::new(
        Arc::new(store.clone()),
        Arc::new(store),
        evaluator,
        RoomManager::new(),
        TickerStore::new(),
    );

    let routes = api::routes::exam_websocket_route(manager.clone(), verifier.clone())
        .or(api::routes::exam_health_check())
        .or(api::routes::exam_config_endpoint(config.clone()))
        .or(api::routes::start_exam_route(manager.clone(), verifier.clone()))
        .or(api::routes::force_finish_route(manager, verifier));

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Exam session server listening"
    );

    warp::serve(routes).run(config.bind_address()).await;
}
