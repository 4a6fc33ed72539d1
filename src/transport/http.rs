//! Streamable HTTP transport: a single `/mcp` endpoint accepting POST
//! tool-calls and supporting server-to-client streaming on the same path.
//!
//! A thin middleware layer reads the sticky-routing header off the
//! incoming request and stashes it in request extensions; `rmcp` forwards
//! those extensions into each call's [`rmcp::service::RequestContext`],
//! where [`crate::server::GatewayServer`] reads it back out.

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use log::info;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use tokio::net::TcpListener;

use crate::error::GatewayError;
use crate::server::{GatewayServer, SESSION_KEY_HEADER, SessionKeyHeader};
use crate::transport::shutdown_signal;

async fn stash_session_key(mut req: Request, next: Next) -> Response {
    if let Some(value) = req.headers().get(SESSION_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        req.extensions_mut().insert(SessionKeyHeader(value.to_string()));
    }
    next.run(req).await
}

pub async fn serve(server: GatewayServer, port: u16) -> Result<(), GatewayError> {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new()
        .nest_service("/mcp", service)
        .layer(middleware::from_fn(stash_session_key));

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(GatewayError::Io)?;
    info!("serving MCP over streamable HTTP on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(GatewayError::Io)?;
    Ok(())
}
