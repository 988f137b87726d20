pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod http;
pub mod metrics;
pub mod persistence;
pub mod registry;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
pub mod version;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::http::HeaderName;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    events::FleetEventBroadcaster,
    metrics::{init_metrics_recorder, record_build_info},
    persistence::{memory::InMemoryFleetRepository, FleetRepositoryRef},
    registry::ConnectionRegistry,
    services::agents::AgentControlPlane,
    session::SessionMap,
    state::{AppState, OperatorAuth},
};

/// Boot the control-plane and serve until interrupted.
pub async fn run() -> Result<()> {
    run_with_shutdown(shutdown_signal()).await
}

pub async fn run_with_shutdown<S>(shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app_config = config::load()?;
    let metrics_handle = init_metrics_recorder();
    record_build_info();

    let repo: FleetRepositoryRef = Arc::new(InMemoryFleetRepository::new());
    let state = build_state(&app_config, repo, metrics_handle)?;

    let router = http::build_router(state.clone()).with_state(state);
    let addr: SocketAddr = format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid listen address: {err}"))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control-plane listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Wire the shared state from configuration and a repository handle.
pub fn build_state(
    app_config: &config::AppConfig,
    repo: FleetRepositoryRef,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<AppState> {
    let operator_tokens: Vec<String> = app_config
        .operator
        .tokens
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if operator_tokens.is_empty() {
        return Err(anyhow::anyhow!(
            "ARMADA_CP__OPERATOR__TOKENS cannot be empty"
        ));
    }
    let operator_header = app_config
        .operator
        .header_name
        .parse::<HeaderName>()
        .map_err(|err| anyhow::anyhow!("invalid operator header name: {err}"))?;

    let registry = ConnectionRegistry::new();
    let sessions = SessionMap::new();
    let events = FleetEventBroadcaster::new(app_config.events.buffer);
    let control = AgentControlPlane::new(
        repo.clone(),
        registry.clone(),
        sessions,
        events.clone(),
    );

    Ok(AppState {
        control,
        repo,
        registry,
        events,
        operator_auth: OperatorAuth {
            tokens: operator_tokens,
            header_name: operator_header,
        },
        enrollment: app_config.enrollment.clone(),
        agent_outbound_buffer: app_config.agent.outbound_buffer,
        metrics_handle,
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
