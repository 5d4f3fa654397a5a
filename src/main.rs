use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};

use push_dispatch::http::{router, AppState};
use push_dispatch::onesignal::OneSignalClient;
use push_dispatch::repository::PushRepository;
use push_dispatch::{BrokerConnector, Config, PushConsumer, PushProducer, PushService};

// Workers still running this long after the shutdown signal are abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load()?;

    let conn = Arc::new(
        BrokerConnector::new(&config.amqp_addr)
            .with_reconnect_policy(5, 1000)
            .connect()
            .await?,
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.push_workers as u32 + 5)
        .connect(&config.postgres_url)
        .await?;
    let repo = PushRepository::new(pool);
    repo.ensure_schema().await?;

    let gateway = OneSignalClient::new(&config.onesignal_app_id, &config.onesignal_key);
    let service = Arc::new(PushService::new(
        repo,
        gateway,
        conn.clone(),
        &config.service_name,
    ));
    let producer = Arc::new(PushProducer::new(conn.clone()));

    let consumer = PushConsumer::new(conn.clone(), service.clone(), config.push_workers)
        .with_queues(&config.send_queue, &config.token_queue);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_handle = tokio::spawn(async move {
        if let Err(err) = consumer.consume(shutdown_rx).await {
            error!("Consumer error: {}", err);
        }
    });

    let state = AppState {
        service,
        producer,
        send_queue: config.send_queue.clone(),
    };
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Starting server on port {}", config.port);
    let server_handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(state)).await {
            error!("Server error: {}", err);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, gracefully stopping...");
    let _ = shutdown_tx.send(true);
    let _ = consumer_handle.await;

    // Give in-flight workers time to finish their terminal acks
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    server_handle.abort();
    info!("Shutdown complete");
    Ok(())
}
