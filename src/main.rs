use p1reader::{metering_p1::serial::run_serial_reader, ApiManager, ReaderExit, ReadingHub, CONFIG};
use std::sync::Arc;
use log::{error, info, warn};
use tokio::sync::watch;


#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let default_filter = std::env::var("P1_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone();

    // The hub is shared between the reader (single writer) and the API
    let hub = Arc::new(ReadingHub::with_buffer(config.reader.subscriber_buffer));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reader_hub = hub.clone();
    let reader_config = config.clone();
    let reader = tokio::spawn(async move {
        match run_serial_reader(reader_hub, &reader_config, shutdown_rx).await {
            ReaderExit::Failed(e) => error!("P1 reader stopped, no new readings will arrive: {e}"),
            exit => info!("P1 reader stopped: {exit:?}"),
        }
    });

    /* A dead reader leaves the API running with the last known reading */
    let result = if config.httpd.enabled {
        let api = ApiManager::new(hub, config.httpd.clone());
        api.start_thread().await
    } else {
        warn!("HTTP API disabled, waiting for Ctrl-C");
        tokio::signal::ctrl_c().await
    };

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = reader.await {
        error!("P1 reader task failed: {e}");
    }

    result
}
