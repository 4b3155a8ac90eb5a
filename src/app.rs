//! Process-wide wiring (§3, §9 singletons), grounded in the teacher's `server::service`
//! bootstrap: construct storage first, then the in-memory singletons, then the subsystems
//! that depend on them, and hand back everything the binary entry point needs to serve
//! traffic and to shut down cleanly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

use crate::alerting::{run_alert_loop, AlertEngineDeps, AlertStateStore};
use crate::config::{ConfigHandle, SharedConfig};
use crate::dashboard::{self, Broadcaster, DashboardState, SnapshotCache};
use crate::db::{AggregationBuffer, AlertsRepo, MetricsBuffer, QueryService, StorageHandle, TrafficRepo};
use crate::ingestion::{self, AgentRegistry, IngestionState};
use crate::live_state::LiveState;
use crate::notifications::NotificationService;
use crate::traffic::Manager as TrafficManager;

/// Everything the binary needs: the router to serve and the set of background task handles
/// to await/abort on shutdown.
pub struct Application {
    pub router: Router,
    pub query: Arc<QueryService>,
    pub alerts_repo: Arc<AlertsRepo>,
    pub traffic: Arc<TrafficManager>,
    background: Vec<JoinHandle<()>>,
}

impl Application {
    pub async fn bootstrap(config_path: Option<String>, db_path: Option<String>) -> Result<Self, String> {
        let config = crate::config::load_config(config_path.as_deref())?;
        let encryption_passphrase = config.notification_encryption_key.clone();
        let config_file_path = config_path.map(PathBuf::from);
        let config: ConfigHandle = SharedConfig::new(config, config_file_path);

        let resolved_db_path = crate::db::resolve_db_path(db_path.as_deref());
        let storage = StorageHandle::open(&resolved_db_path).map_err(|e| e.to_string())?;

        let live_state = LiveState::new();
        let query = Arc::new(QueryService::new(storage.pool.clone()));
        let alerts_repo = Arc::new(AlertsRepo::new(storage.pool.clone(), storage.writer.clone()));
        let traffic_repo = Arc::new(TrafficRepo::new(storage.pool.clone(), storage.writer.clone()));
        let metrics_buffer = Arc::new(MetricsBuffer::new());
        let aggregation_buffer = Arc::new(AggregationBuffer::new());

        let traffic_manager = TrafficManager::new(config.clone(), live_state.clone(), traffic_repo);
        let notifications = Arc::new(NotificationService::new(config.clone(), &encryption_passphrase));
        let alert_state = AlertStateStore::new();

        let registry = AgentRegistry::new();
        let snapshot = SnapshotCache::new();
        let broadcaster = Broadcaster::new();

        let mut background = Vec::new();

        background.push(tokio::spawn(config.clone().run_debounced_writer()));
        background.push(tokio::spawn(
            metrics_buffer.clone().run_flush_loop(storage.writer.clone()),
        ));
        background.push(tokio::spawn(crate::db::run_retention_sweeper(
            storage.writer.clone(),
            storage.pool.clone(),
        )));
        background.push(tokio::spawn(traffic_manager.clone().run()));
        background.push(tokio::spawn(snapshot.clone().run_refresh_loop(config.clone(), live_state.clone())));
        background.push(tokio::spawn(broadcaster.clone().run_broadcast_loop(snapshot.clone())));
        background.push(tokio::spawn(run_alert_loop(AlertEngineDeps {
            config: config.clone(),
            live_state: live_state.clone(),
            traffic: traffic_manager.clone(),
            state: alert_state,
            alerts_repo: alerts_repo.clone(),
            notifications,
        })));

        let ingestion_state = IngestionState {
            config: config.clone(),
            registry,
            live_state: live_state.clone(),
            metrics_buffer,
            aggregation_buffer,
            writer: storage.writer.clone(),
            query: query.clone(),
        };
        let dashboard_state = DashboardState {
            snapshot,
            broadcaster,
            config: config.clone(),
            live_state: live_state.clone(),
        };

        let router = Router::new()
            .route("/ws/agent", get(ingestion::ws_handler))
            .with_state(ingestion_state)
            .merge(
                Router::new()
                    .route("/ws/dashboard", get(dashboard::ws_handler))
                    .with_state(dashboard_state),
            );

        Ok(Self {
            router,
            query,
            alerts_repo,
            traffic: traffic_manager,
            background,
        })
    }

    pub async fn serve(self, bind_addr: SocketAddr) -> std::io::Result<()> {
        info!(%bind_addr, "vstats hub listening");
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }

    pub fn shutdown(self) {
        for handle in self.background {
            handle.abort();
        }
    }
}
