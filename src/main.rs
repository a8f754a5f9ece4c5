use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use presence_relay::tls::{load_tls_paths, TlsPaths};
use presence_relay::{Config, Server, StateStore};

fn load_tls_config(config: &Config) -> Option<TlsPaths> {
    let (cert, key) = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => return None,
    };

    match load_tls_paths(cert, key) {
        Ok(paths) => Some(paths),
        Err(e) => {
            warn!("Failed to load TLS config: {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn exit_on_bind_failure(config: &Config, e: &warp::Error) -> ! {
    error!("Failed to bind to {}: {}", config.bind, e);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = Config::parse();
    info!(
        "Presence stale after {}s, purged after {}s, keeping {} messages",
        config.presence_stale_secs, config.presence_purge_secs, config.message_capacity
    );

    let store = Arc::new(StateStore::new(config.store_settings()));
    let server = Server::new(store, &config);
    let purge_task = server.spawn_purge_task(config.purge_interval());
    let routes = server.routes();

    match load_tls_config(&config) {
        Some(tls) => {
            let bound = warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .try_bind_with_graceful_shutdown(config.bind, shutdown_signal());
            match bound {
                Ok((addr, serving)) => {
                    info!("Relay listening on https://{}", addr);
                    serving.await;
                }
                Err(e) => exit_on_bind_failure(&config, &e),
            }
        }
        None => {
            if config.tls_cert.is_some() {
                warn!("Falling back to plain HTTP");
            }
            match warp::serve(routes).try_bind_with_graceful_shutdown(config.bind, shutdown_signal()) {
                Ok((addr, serving)) => {
                    info!("Relay listening on http://{}", addr);
                    serving.await;
                }
                Err(e) => exit_on_bind_failure(&config, &e),
            }
        }
    }

    purge_task.abort();
    info!("Relay stopped");
}
