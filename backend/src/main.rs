use axum::http::Method;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autoflow_backend::{
    config::Config,
    database, handlers,
    jobs::{JobConfig, JobScheduler},
    services::{LoggingMailer, Mailer, SmtpMailer},
    store::{AutomationStore, PgAutomationStore, RecordStore},
    workflows::{ActionExecutor, HandlerDeps, Worker, WorkflowEngine},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let pg_store = Arc::new(PgAutomationStore::new(db_pool));
    let store: Arc<dyn AutomationStore> = pg_store.clone();
    let records: Arc<dyn RecordStore> = pg_store;

    let mailer: Arc<dyn Mailer> = if config.smtp.is_configured() {
        Arc::new(SmtpMailer::new(&config.smtp)?)
    } else {
        tracing::warn!("SMTP is not configured; send_email actions will only be logged");
        Arc::new(LoggingMailer)
    };

    let deps = HandlerDeps {
        mailer,
        records,
        http: reqwest::Client::new(),
    };
    let executor = Arc::new(ActionExecutor::with_builtin_handlers(
        deps,
        config.worker.max_execution_time(),
    ));

    let shutdown = CancellationToken::new();

    let worker_handle = if config.worker.enabled {
        let worker = Worker::new(store.clone(), executor, config.worker.worker_config());
        let stats = worker.stats();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { worker.run(token).await });
        Some((handle, stats))
    } else {
        tracing::info!("Automation worker disabled");
        None
    };

    let mut scheduler = JobScheduler::new(store.clone(), JobConfig::from(&config.maintenance)).await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        engine: WorkflowEngine::new(store),
        worker_stats: worker_handle.as_ref().map(|(_, stats)| stats.clone()),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = handlers::api_router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }
    if let Some((handle, _)) = worker_handle {
        match handle.await {
            Ok(summary) => tracing::info!(?summary, "Worker drained"),
            Err(e) => tracing::error!("Worker task failed: {}", e),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
