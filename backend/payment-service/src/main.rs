use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use amqp_broker::ConsumerRunner;
use payment_service::consumers::RequestConsumer;
use payment_service::gateway::SimulatedGateway;
use payment_service::handlers;
use payment_service::services::PaymentService;
use payment_service::Config;
use transactional_outbox::metrics::OutboxMetrics;
use transactional_outbox::{
    AmqpOutboxPublisher, OutboxProcessor, SqlxOutboxRepository, SystemClock,
};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("Starting payment-service v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app.env);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("database connect: {e}")))?;
    tracing::info!("Connected to database");

    let connection = Arc::new(
        amqp_broker::connect(&config.broker)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("broker connect: {e}")))?,
    );

    let amqp_publisher = amqp_broker::AmqpPublisher::new(&connection, &config.broker)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("publisher channel: {e}")))?;

    let outbox_repo = Arc::new(SqlxOutboxRepository::new(pool.clone()));
    let outbox_publisher = Arc::new(AmqpOutboxPublisher::new(
        amqp_publisher,
        config.broker.clone(),
    ));
    let processor = Arc::new(
        OutboxProcessor::new(
            outbox_repo.clone(),
            outbox_publisher,
            SystemClock,
            config.outbox.processor_settings(),
        )
        .with_metrics(OutboxMetrics::new("payment-service")),
    );

    let gateway = Arc::new(SimulatedGateway::new(config.gateway.decline_suffixes.clone()));
    let payment_service = Arc::new(PaymentService::new(pool.clone(), outbox_repo, gateway));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();

    // Outbox publisher loops.
    {
        let processor = processor.clone();
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            processor.run(shutdown).await;
            Ok(())
        });
    }

    // Payment request consumer.
    {
        let runner = ConsumerRunner::new(
            &config.broker,
            &config.broker.payment_request_queue,
            "payment-service-requests",
        );
        let connection = connection.clone();
        let handler = Arc::new(RequestConsumer::new(payment_service.clone()));
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            runner
                .run(&connection, handler, shutdown)
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        });
    }

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("Starting HTTP server at {bind_address}");

    let service_data = web::Data::from(payment_service);
    let pool_data = web::Data::new(pool);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .app_data(pool_data.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/metrics", web::get().to(handlers::serve_metrics))
            .route("/api/v1/health", web::get().to(handlers::health_summary))
            .route("/api/v1/health/ready", web::get().to(handlers::readiness))
            .route("/api/v1/health/live", web::get().to(handlers::liveness))
            .service(
                web::scope("/api/payments")
                    .route(
                        "/transaction/{transaction_id}",
                        web::get().to(handlers::get_by_transaction),
                    )
                    .route("/{payment_id}", web::get().to(handlers::get_payment))
                    .route(
                        "/{payment_id}/refund",
                        web::post().to(handlers::refund_payment),
                    ),
            )
    })
    .bind(&bind_address)?
    .run();

    let server_handle = server.handle();
    tasks.spawn(async move { server.await });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut first_error: Option<io::Error> = None;

    loop {
        tokio::select! {
            result = tasks.join_next() => {
                match result {
                    Some(Ok(Ok(_))) => {
                        tracing::info!("Background task completed");
                    }
                    Some(Ok(Err(e))) => {
                        tracing::error!("Task returned error: {e}");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        let _ = shutdown_tx.send(true);
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("Task join error: {e}");
                        if first_error.is_none() {
                            first_error = Some(io::Error::new(io::ErrorKind::Other, e.to_string()));
                        }
                        let _ = shutdown_tx.send(true);
                        server_handle.stop(true).await;
                        tasks.shutdown().await;
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
                server_handle.stop(true).await;
                tasks.shutdown().await;
                break;
            }
        }
    }

    tracing::info!("payment-service shutting down");

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
