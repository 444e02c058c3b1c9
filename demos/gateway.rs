use std::sync::Arc;

use tidings::{DeliveredEvent, DeliveryError, Gateway, GatewayOptions};
use tokio_util::sync::CancellationToken;

async fn print_event(event: Arc<DeliveredEvent>) -> Result<(), DeliveryError> {
    log::info!(
        "[{}] {} from {} in {:?}: {}",
        event.account_id,
        event.id,
        event.author_id,
        event.thread,
        event.payload
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let path = std::env::var("GATEWAY_CONFIG")
        .map_err(|_| {
            println!("No GATEWAY_CONFIG env var or invalid");
            std::process::exit(1);
        })
        .unwrap();

    let options = GatewayOptions::from_json_file(&path).unwrap();
    let gateway = Gateway::new(options, Arc::new(print_event)).unwrap();

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, shutting down");
        }
        shutdown.cancel();
    });

    let summary = gateway.run(cancel).await;

    println!("{:#?}", summary);
}
