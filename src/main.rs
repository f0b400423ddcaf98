pub mod config;
pub mod identity;
pub mod mqtt;
pub mod tank;

use color_eyre::{eyre::eyre, Result};
use config::Config;
use identity::ClientIdentity;
use mqtt::mqtt_handler::{SessionError, SessionManager, Unresolved};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    let config_path = Config::default_path();
    let config = Config::load_or_create(&config_path).await?;
    info!(
        "Broker {}:{}, topic root '{}'",
        config.broker.host, config.broker.port, config.topics.root
    );

    let identity = ClientIdentity::resolve(&config.identity)?;
    info!("Client id: {}", identity);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let manager = SessionManager::<Unresolved>::create(config, identity, shutdown);
    let manager = match manager.resolve().await {
        Ok(resolved) => resolved,
        Err(SessionError::Shutdown) => {
            info!("Stopped before the broker was resolved");
            return Ok(());
        }
        Err(e) => return Err(eyre!("Broker resolution failed: {}", e)),
    };

    let online = manager.open_session().map_err(|e| {
        error!("{}", e);
        eyre!("Unable to start MQTT session: {}", e)
    })?;
    online.run().await?;

    info!("Oxygen tank simulator stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => {
                warn!("Unable to listen for Ctrl-C: {}", e);
                return;
            }
        }
        shutdown.cancel();
    });
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
