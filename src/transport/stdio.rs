//! Local stream transport: request/response framed on the process's own
//! stdin/stdout. Exactly one client; the session ID is implicit, so the
//! Pool is expected to be in global or session-id-keyed mode.

use log::info;
use rmcp::ServiceExt;
use rmcp::transport::io::stdio;

use crate::server::GatewayServer;
use crate::transport::shutdown_signal;

pub async fn serve(server: GatewayServer) -> anyhow::Result<()> {
    info!("serving MCP over stdio");
    let running = server.serve(stdio()).await?;
    tokio::select! {
        result = running.waiting() => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, closing stdio transport");
        }
    }
    Ok(())
}
