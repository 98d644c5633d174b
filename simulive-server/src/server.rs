//! Listener setup for the stream server

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::{build_router, AppState};
use crate::assets::CatalogAssetProvider;
use crate::auth::BearerAuthorizer;
use crate::config::ServerConfig;
use crate::metrics::{LogLevel, Metrics, ServerStatus};
use crate::store::InMemoryStore;
use crate::tokens::OpaqueTokenIssuer;

pub type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Events sent from the server to the dashboard
#[derive(Debug)]
pub enum ServerEvent {
    Ready { address: String },
    Failed(String),
}

/// Load the store, asset catalog and auth from `config`
pub fn build_state(config: &ServerConfig, metrics: Arc<RwLock<Metrics>>) -> ServerResult<AppState> {
    let store = match &config.streams_file {
        Some(path) => InMemoryStore::from_json_file(path)?,
        None => InMemoryStore::new(),
    };
    let assets = match &config.assets_file {
        Some(path) => CatalogAssetProvider::from_json_file(path)?,
        None => CatalogAssetProvider::default(),
    };
    let auth = BearerAuthorizer::new(config.admin_token.clone());

    info!("Loaded {} streams, {} assets", store.len(), assets.len());
    if !auth.is_enabled() {
        warn!("No admin token configured, admin endpoints will refuse every request");
    }

    {
        let mut m = metrics.write();
        m.stream_count = store.len();
        m.asset_count = assets.len();
        m.admin_enabled = auth.is_enabled();
        m.log(
            LogLevel::Info,
            format!("Loaded {} streams, {} assets", store.len(), assets.len()),
        );
        if !auth.is_enabled() {
            m.log(LogLevel::Warning, "No admin token: admin endpoints disabled");
        }
    }

    Ok(AppState {
        store: Arc::new(store),
        assets: Arc::new(assets),
        auth: Arc::new(auth),
        tokens: Arc::new(OpaqueTokenIssuer::new(Duration::from_secs(
            config.token_ttl_secs,
        ))),
        metrics,
    })
}

/// Mark the server as failed and pass the error on
fn fail<E: std::fmt::Display>(
    metrics: &RwLock<Metrics>,
    event_tx: &mpsc::UnboundedSender<ServerEvent>,
    e: E,
) -> E {
    error!("Server error: {}", e);
    {
        let mut m = metrics.write();
        m.status = ServerStatus::Error;
        m.log(LogLevel::Error, e.to_string());
    }
    let _ = event_tx.send(ServerEvent::Failed(e.to_string()));
    e
}

/// Run the server with dashboard integration
pub async fn run_with_dashboard(
    config: ServerConfig,
    metrics: Arc<RwLock<Metrics>>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) -> ServerResult<()> {
    info!("Simulive stream server starting...");

    let state = build_state(&config, Arc::clone(&metrics))
        .map_err(|e| fail(&metrics, &event_tx, e))?;

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| fail(&metrics, &event_tx, e))?;
    let address = listener.local_addr()?.to_string();

    info!("Listening on {}", address);
    {
        let mut m = metrics.write();
        m.bind_address = Some(address.clone());
        m.status = ServerStatus::Running;
        m.log(LogLevel::Info, format!("Listening on {}", address));
    }
    let _ = event_tx.send(ServerEvent::Ready { address });

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| fail(&metrics, &event_tx, e))?;
    Ok(())
}

/// Run the server with plain logging (no dashboard)
pub async fn run_with_logging(config: ServerConfig, metrics: Arc<RwLock<Metrics>>) -> ServerResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("simulive_server=info".parse()?)
                .add_directive("simulive_core=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let (tx, _rx) = mpsc::unbounded_channel();
    run_with_dashboard(config, metrics, tx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn test_build_state_without_files() {
        let metrics = Arc::new(RwLock::new(Metrics::new()));
        let state = build_state(&ServerConfig::default(), Arc::clone(&metrics)).unwrap();

        assert!(state.store.list().is_empty());
        let m = metrics.read();
        assert!(!m.admin_enabled);
        assert_eq!(m.stream_count, 0);
        assert!(m.logs.iter().any(|l| l.level == LogLevel::Warning));
    }

    #[test]
    fn test_build_state_missing_streams_file() {
        let metrics = Arc::new(RwLock::new(Metrics::new()));
        let config = ServerConfig {
            streams_file: Some("/nonexistent/streams.json".into()),
            ..ServerConfig::default()
        };
        assert!(build_state(&config, metrics).is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_marks_error() {
        let metrics = Arc::new(RwLock::new(Metrics::new()));
        let config = ServerConfig {
            bind_address: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(run_with_dashboard(config, Arc::clone(&metrics), tx).await.is_err());
        assert_eq!(metrics.read().status, ServerStatus::Error);
        assert!(matches!(rx.recv().await, Some(ServerEvent::Failed(_))));
    }
}
