//! Debate backend entrypoint wiring REST, SSE, scoring and the document store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use debate_back::{
    config::AppConfig,
    dao::store::memory::MemoryStore,
    routes,
    services::scoring::{ScoringService, UnconfiguredScoring},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let scoring = build_scoring(&config)?;
    let app_state = AppState::new(config, scoring);

    start_store(&app_state).await?;
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the scoring backend from `SCORING_API_URL` and friends.
#[cfg(feature = "llm-scoring")]
fn build_scoring(config: &AppConfig) -> anyhow::Result<Arc<dyn ScoringService>> {
    use debate_back::services::scoring_http::{HttpScoringConfig, HttpScoringService};

    match HttpScoringConfig::from_env() {
        Some(settings) => {
            info!(endpoint = %settings.endpoint, model = %settings.model, "using HTTP scoring backend");
            let service = HttpScoringService::new(settings, config.scoring.clone())
                .context("building scoring client")?;
            Ok(Arc::new(service))
        }
        None => {
            warn!("SCORING_API_URL not set; evaluations will fail until it is configured");
            Ok(Arc::new(UnconfiguredScoring))
        }
    }
}

#[cfg(not(feature = "llm-scoring"))]
fn build_scoring(_config: &AppConfig) -> anyhow::Result<Arc<dyn ScoringService>> {
    warn!("built without llm-scoring; evaluations will fail");
    Ok(Arc::new(UnconfiguredScoring))
}

/// Install the store selected by `STORE_BACKEND` (`mongo` by default, or `memory`).
async fn start_store(state: &SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "mongo".into());
    match backend.as_str() {
        "memory" => {
            warn!("using the in-memory store; nothing survives a restart");
            state.install_store(Arc::new(MemoryStore::new())).await;
            Ok(())
        }
        "mongo" => spawn_mongo_supervisor(state),
        other => bail!("unknown STORE_BACKEND `{other}` (expected `mongo` or `memory`)"),
    }
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: &SharedState) -> anyhow::Result<()> {
    use debate_back::{
        dao::{
            storage::StorageError,
            store::{
                DebateStore,
                mongodb::{MongoConfig, MongoDebateStore},
            },
        },
        services::storage_supervisor,
    };

    let connect = || async {
        let config = MongoConfig::from_env().await.map_err(StorageError::from)?;
        let store = MongoDebateStore::connect(config)
            .await
            .map_err(StorageError::from)?;
        Ok::<Arc<dyn DebateStore>, StorageError>(Arc::new(store))
    };
    tokio::spawn(storage_supervisor::run(state.clone(), connect));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_mongo_supervisor(_state: &SharedState) -> anyhow::Result<()> {
    bail!("built without the mongo-store feature; set STORE_BACKEND=memory")
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
