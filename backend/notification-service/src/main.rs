use std::io;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use notification_service::{
    handlers::{self, SharedDirectory, SharedReceipts},
    metrics,
    services::{
        BatchDispatcher, DispatchOrchestrator, DispatchSettings, EligibilityResolver,
        InMemoryDirectory, PgDirectory, RetentionSweeper,
    },
    Config, ConnectionRegistry,
};
use push_gateway::{ApnsConfig, ApnsGateway, DynPushGateway, LoggingGateway};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting notification service");

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {:#}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let (directory, receipts) = init_directory(&config).await?;
    let gateway = init_gateway(&config);

    let registry =
        ConnectionRegistry::with_settings(config.stream.keepalive(), config.stream.bus_capacity);
    let orchestrator = Arc::new(DispatchOrchestrator::new(
        registry.clone(),
        EligibilityResolver::new(directory.clone(), receipts.clone()),
        BatchDispatcher::with_batch_size(gateway.clone(), config.dispatch.batch_size),
        directory.clone(),
        gateway,
        DispatchSettings {
            push_relevance_floor: config.dispatch.push_relevance_floor,
            bulk_pause: config.dispatch.bulk_pause(),
        },
    ));

    let sweeper = RetentionSweeper::new(
        directory.clone(),
        receipts.clone(),
        config.retention.days,
        config.retention.interval(),
    )
    .spawn();

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let app_registry = registry.clone();
    let result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_registry.clone()))
            .app_data(web::Data::new(orchestrator.clone()))
            .app_data(web::Data::new(directory.clone()))
            .app_data(web::Data::new(receipts.clone()))
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::configure)
    })
    .bind(&addr)?
    .run()
    .await;

    // Open streams end before the process exits
    registry.shutdown();
    sweeper.abort();
    tracing::info!("Notification service stopped");

    result
}

async fn init_directory(config: &Config) -> io::Result<(SharedDirectory, SharedReceipts)> {
    let Some(url) = config.database.url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory device directory");
        let memory = Arc::new(InMemoryDirectory::new());
        let directory: SharedDirectory = memory.clone();
        let receipts: SharedReceipts = memory;
        return Ok((directory, receipts));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            io::Error::new(io::ErrorKind::Other, "Database connection failed")
        })?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        io::Error::new(io::ErrorKind::Other, "Database migration failed")
    })?;

    let pg = Arc::new(PgDirectory::new(pool));
    let directory: SharedDirectory = pg.clone();
    let receipts: SharedReceipts = pg;
    Ok((directory, receipts))
}

fn init_gateway(config: &Config) -> DynPushGateway {
    let Some(path) = config.apns.certificate_path.as_deref() else {
        tracing::warn!("APNS_CERTIFICATE_PATH not set; push deliveries are logged, not sent");
        return Arc::new(LoggingGateway);
    };

    let mut apns = ApnsConfig::new(
        path.to_string(),
        config.apns.topic.clone(),
        config.apns.is_production,
    );
    if let Some(passphrase) = &config.apns.certificate_passphrase {
        apns = apns.with_passphrase(passphrase.clone());
    }

    match ApnsGateway::new(&apns) {
        Ok(gateway) => {
            tracing::info!(
                topic = %config.apns.topic,
                production = config.apns.is_production,
                "APNs gateway initialized"
            );
            Arc::new(gateway)
        }
        Err(e) => {
            tracing::error!(
                "Failed to initialize APNs gateway: {}; push deliveries are logged, not sent",
                e
            );
            Arc::new(LoggingGateway)
        }
    }
}
