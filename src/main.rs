use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::error;
use ssh_mcp_gateway::config::{GatewayConfig, TransportMode};
use ssh_mcp_gateway::keystore::KeyStore;
use ssh_mcp_gateway::pool::Pool;
use ssh_mcp_gateway::server::GatewayServer;
use ssh_mcp_gateway::transport;

#[tokio::main]
async fn main() -> ExitCode {
    let config = GatewayConfig::load();

    let mut builder = env_logger::Builder::from_default_env();
    if config.debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();

    let keystore = match KeyStore::ensure(config.key_dir.clone()) {
        Ok(keystore) => Arc::new(keystore),
        Err(e) => {
            error!("key store unusable: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pool = if config.global {
        Pool::global(keystore.clone())
    } else {
        match config.mode {
            // Only HTTP can carry the sticky-routing header that
            // header-keyed mode is built around.
            TransportMode::Http => Pool::header_keyed(keystore.clone(), Duration::from_secs(5 * 60)),
            // stdio serves exactly one client per process; the session is
            // implicit and bounded by the process lifetime.
            TransportMode::Stdio => Pool::session_id_keyed(keystore.clone()),
        }
    };

    let server = GatewayServer::new(pool.clone(), keystore);

    let result = match config.mode {
        TransportMode::Stdio => transport::stdio::serve(server).await,
        TransportMode::Http => transport::http::serve(server, config.port).await.map_err(anyhow::Error::from),
    };

    pool.close().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("gateway exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
