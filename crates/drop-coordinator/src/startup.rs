use crate::{
    api::routes::{
        check_queue_token, close_purchase_window, complete_purchase, get_drop_state,
        get_inclusion_proof, get_loyalty, get_lottery_proof, get_rollover_balance, health,
        initialize_drop, join_queue, list_drops, promote_backup, register, run_lottery,
        set_rollover_balance, start_purchase,
    },
    config::{DropDefaultsSettings, Settings},
    domain::{
        AdmissionLoop, DropRegistry, DropStore, InMemoryNotifier, LoyaltyStore, ParticipantStore,
        QueueStore, RolloverStore, SchedulerLoop, SchedulerStore,
    },
    infra::{
        db::{DatabasePoolConfig, DbConnection},
        secrets::get_or_create_secret,
    },
};
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request},
    http::HeaderValue,
    middleware::{self, AddExtension, Next},
    response::IntoResponse,
    routing::{get, post},
    serve::Serve,
    Router,
};
use hyper::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use log::{error, info, warn};
use secrecy::ExposeSecret;
use std::{collections::HashMap, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    select,
    sync::RwLock,
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let (app_state, background_tasks, cancellation_token) = build_app(config.clone()).await?;
        let server = build_server(listener, app_state, config.api_settings.origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ = tokio::time::timeout(Duration::from_secs(5), self.background_tasks.wait()).await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub drop_registry: Arc<DropRegistry>,
    pub queue_store: Arc<QueueStore>,
    pub rollover_store: Arc<RolloverStore>,
    pub loyalty_store: Arc<LoyaltyStore>,
    pub notifier: Arc<InMemoryNotifier>,
    pub active_drop_ids: Arc<RwLock<Vec<String>>>,
    pub ip_hash_salt: Arc<Vec<u8>>,
    pub defaults: DropDefaultsSettings,
    pub background_threads: Arc<HashMap<String, JoinHandle<()>>>,
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, TaskTracker, CancellationToken), anyhow::Error> {
    std::fs::create_dir_all(&config.db_settings.data_folder)
        .map_err(|e| anyhow!("Failed to create data folder: {}", e))?;

    let pool_config: DatabasePoolConfig = config.db_settings.clone().into();
    let db = DbConnection::new(&config.db_settings.data_folder, "drops", pool_config)
        .await
        .map_err(|e| anyhow!("Error setting up drops db: {}", e))?;

    let drop_store = Arc::new(DropStore::new(db.clone()));
    let participant_store = Arc::new(ParticipantStore::new(db.clone()));
    let rollover_store = Arc::new(RolloverStore::new(db.clone()));
    let loyalty_store = Arc::new(LoyaltyStore::new(db.clone()));
    let queue_store = Arc::new(QueueStore::new(db.clone()));
    let scheduler_store = Arc::new(SchedulerStore::new(db.clone()));
    let notifier = Arc::new(InMemoryNotifier::new());

    let token_secret = get_or_create_secret(&config.security_settings.token_secret_file, 32)
        .map_err(|e| anyhow!("Failed to load token secret: {}", e))?;
    let ip_hash_salt = get_or_create_secret(&config.security_settings.ip_hash_salt_file, 16)
        .map_err(|e| anyhow!("Failed to load IP hash salt: {}", e))?;

    let drop_registry = Arc::new(DropRegistry::new(
        drop_store.clone(),
        participant_store,
        rollover_store.clone(),
        loyalty_store.clone(),
        queue_store.clone(),
        scheduler_store.clone(),
        notifier.clone(),
        token_secret.expose_secret().as_bytes().to_vec(),
        config.drop_settings.clone(),
    ));

    let active_drop_ids = Arc::new(RwLock::new(
        drop_store
            .list_index()
            .await
            .map_err(|e| anyhow!("Failed to seed active drop list: {}", e))?
            .into_iter()
            .map(|entry| entry.drop_id)
            .collect::<Vec<_>>(),
    ));

    let tracker = TaskTracker::new();
    let cancel_token = CancellationToken::new();
    let mut threads = HashMap::new();

    let scheduler_loop = SchedulerLoop::new(
        scheduler_store,
        drop_registry.clone(),
        Duration::from_secs(config.drop_settings.scheduler_tick_interval_secs),
        cancel_token.clone(),
    );
    let scheduler_task = tracker.spawn(async move {
        match scheduler_loop.watch().await {
            Ok(_) => info!("Successfully shutdown scheduled task drainer"),
            Err(e) => error!("Error in scheduled task drainer: {}", e),
        }
    });
    threads.insert(String::from("scheduler_loop"), scheduler_task);

    let admission_loop = AdmissionLoop::new(
        queue_store.clone(),
        active_drop_ids.clone(),
        config.drop_settings.queue_ready_cap,
        config.drop_settings.queue_token_ttl_secs,
        Duration::from_secs(config.drop_settings.queue_admission_interval_secs),
        cancel_token.clone(),
    );
    let admission_task = tracker.spawn(async move {
        match admission_loop.watch().await {
            Ok(_) => info!("Successfully shutdown admission loop"),
            Err(e) => error!("Error in admission loop: {}", e),
        }
    });
    threads.insert(String::from("admission_loop"), admission_task);

    tracker.close();

    let app_state = AppState {
        drop_registry,
        queue_store,
        rollover_store,
        loyalty_store,
        notifier,
        active_drop_ids,
        ip_hash_salt: Arc::new(ip_hash_salt.expose_secret().as_bytes().to_vec()),
        defaults: config.drop_settings,
        background_threads: Arc::new(threads),
    };

    Ok((app_state, tracker, cancel_token))
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let drop_routes = Router::new()
        .route("/", post(initialize_drop))
        .route("/", get(list_drops))
        .route("/{drop_id}", get(get_drop_state))
        .route("/{drop_id}/register", post(register))
        .route("/{drop_id}/lottery", post(run_lottery))
        .route("/{drop_id}/lottery/proof", get(get_lottery_proof))
        .route("/{drop_id}/lottery/proof/{user_id}", get(get_inclusion_proof))
        .route("/{drop_id}/purchase/start", post(start_purchase))
        .route("/{drop_id}/purchase/complete", post(complete_purchase))
        .route("/{drop_id}/purchase/close", post(close_purchase_window))
        .route("/{drop_id}/backups/promote", post(promote_backup));

    let queue_routes = Router::new()
        .route("/{drop_id}/join", post(join_queue))
        .route("/{drop_id}/{token_id}", get(check_queue_token));

    let rollover_routes = Router::new()
        .route("/{user_id}", get(get_rollover_balance))
        .route("/{user_id}", post(set_rollover_balance));

    let loyalty_routes = Router::new().route("/{user_id}", get(get_loyalty));

    Router::new()
        .route("/api/v1/health_check", get(health))
        .nest("/api/v1/drops", drop_routes)
        .nest("/api/v1/queue", queue_routes)
        .nest("/api/v1/rollover", rollover_routes)
        .nest("/api/v1/loyalty", loyalty_routes)
        .layer(middleware::from_fn(log_request))
        .with_state(Arc::new(app_state))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request", "new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
