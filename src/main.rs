use percept_relay::coordinator::CoordinatorBuilder;
use percept_relay::error::RelayError;
use percept_relay::intake::{self, AppState};
use percept_relay::Configuration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

fn init_logging() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    init_logging();

    let config_path = std::env::args().nth(1);
    let configuration = Configuration::load(config_path.as_deref())?;
    info!(
        addr = configuration.listen_addr(),
        prompt_endpoint = configuration.prompt_hop.endpoint,
        detection_endpoint = configuration.detection_hop.endpoint,
        sinks = configuration.sinks.len(),
        "starting relay"
    );

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(configuration.event_buffer_size);

    let addr = configuration.listen_addr();
    let captures_root = configuration.captures_root.clone();
    let coordinator = Arc::new(CoordinatorBuilder::new(configuration).build());
    let state = AppState {
        event_tx,
        status: coordinator.status(),
        captures_root,
    };

    let coordinator_task = Arc::clone(&coordinator).spawn(event_rx, cancel.clone());
    let server = intake::serve(addr, state, cancel.clone());

    tokio::select! {
        result = server => {
            cancel.cancel();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            cancel.cancel();
        }
    }

    let _ = coordinator_task.await;
    Ok(())
}
