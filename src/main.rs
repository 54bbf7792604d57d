//! Demo: print new camera events until Ctrl-C.
//!
//! Reads `NEST_ID`, `REFRESH_TOKEN`, `API_KEY`, `CLIENT_ID` and optionally
//! `NEST_HOST` from the environment. `RUST_LOG` controls verbosity.

use std::sync::Arc;

use color_eyre::Result;
use nestcam::adapters::ReqwestHttpClient;
use nestcam::{Config, FnObserver, NestClient, StreamItem};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nestcam=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let client = NestClient::from_config(config, Arc::new(ReqwestHttpClient::new()));
    client.init().await?;

    let observer = FnObserver::new(|item: StreamItem| {
        if let Some(event) = item.as_event() {
            println!("{}", event);
        }
    })
    .on_error(|e| tracing::warn!(error = %e, code = e.error_code(), "Event poll failed"));
    client.subscribe_with("event", Arc::new(observer));

    tracing::info!("Watching for events, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    client.shutdown();
    Ok(())
}
