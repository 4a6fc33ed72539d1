//! Transport bindings for the MCP-facing side of the gateway: a local
//! stdio stream, or a streamable HTTP endpoint at `/mcp`.

pub mod http;
pub mod stdio;

/// Waits for Ctrl-C or, on unix, SIGTERM. Used by both transports to drive
/// graceful shutdown on the same signals a process manager would send.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
