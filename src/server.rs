//! The gateway's `rmcp::ServerHandler`.
//!
//! Thin wrappers only: each `#[tool]` method resolves this request's tenant
//! (§9's rule — an `X-Session-Key` header always wins over the transport's
//! session ID for pooling; the session ID is kept only for logging), fetches
//! that tenant's [`Manager`] from the [`Pool`], and delegates to
//! [`crate::dispatcher`].

use std::sync::Arc;

use log::debug;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, ServerCapabilities, ServerInfo};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::dispatcher::{
    self, ConnectParams, EditParams, InfoParams, ListDirParams, ReadParams, RunParams, SyncParams, TargetParams,
    WriteParams,
};
use crate::keystore::KeyStore;
use crate::pool::Pool;

/// Name of the sticky-routing header used by header-keyed pool mode.
pub const SESSION_KEY_HEADER: &str = "x-session-key";

/// Extension type the HTTP transport layer stashes the header value into;
/// read back out here at tool-call time.
#[derive(Clone, Debug)]
pub struct SessionKeyHeader(pub String);

/// The gateway's MCP server. Stateless beyond the tenant pool and the
/// gateway's own identity — all per-tenant state lives in the `Manager` the
/// pool hands back for a given tenant key.
#[derive(Clone)]
pub struct GatewayServer {
    pool: Arc<Pool>,
    keystore: Arc<KeyStore>,
    tool_router: ToolRouter<Self>,
}

impl GatewayServer {
    pub fn new(pool: Arc<Pool>, keystore: Arc<KeyStore>) -> Self {
        Self {
            pool,
            keystore,
            tool_router: Self::tool_router(),
        }
    }

    /// Resolve this request's tenant key: a sticky header always wins over
    /// the transport-provided session ID, which is retained only for the
    /// debug log line.
    fn tenant_key(&self, context: &RequestContext<RoleServer>) -> String {
        if let Some(header) = context.extensions.get::<SessionKeyHeader>() {
            debug!("tenant key from X-Session-Key header, session id {} used for logging only", context.id);
            return header.0.clone();
        }
        context.id.to_string()
    }
}

#[tool_router]
impl GatewayServer {
    #[tool(description = "Connect to a remote host over SSH and register it under an alias. Returns the alias (useful when auto-generated).")]
    async fn connect(
        &self,
        Parameters(params): Parameters<ConnectParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::connect(&manager, params).await
    }

    #[tool(description = "Disconnect and forget a connected alias.")]
    async fn disconnect(
        &self,
        Parameters(params): Parameters<TargetParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::disconnect(&manager, params).await
    }

    #[tool(description = "Run a shell command on a connected alias and return merged stdout/stderr.")]
    async fn run(
        &self,
        Parameters(params): Parameters<RunParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::run(&manager, params).await
    }

    #[tool(description = "Return the gateway's own public key in OpenSSH authorized-keys format.")]
    async fn identity(&self) -> Result<CallToolResult, McpError> {
        dispatcher::identity(&self.keystore).await
    }

    #[tool(description = "Return the current working directory and sudo prefix for a connected alias.")]
    async fn info(
        &self,
        Parameters(params): Parameters<InfoParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::info(&manager, params).await
    }

    #[tool(description = "Read a remote file's contents over SFTP.")]
    async fn read(
        &self,
        Parameters(params): Parameters<ReadParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::read(&manager, params).await
    }

    #[tool(description = "Write content to a remote file over SFTP, creating or truncating it.")]
    async fn write(
        &self,
        Parameters(params): Parameters<WriteParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::write(&manager, params).await
    }

    #[tool(description = "Replace a substring in a remote file (read-modify-write over SFTP, not atomic against concurrent writers).")]
    async fn edit(
        &self,
        Parameters(params): Parameters<EditParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::edit(&manager, params).await
    }

    #[tool(description = "List a remote directory over SFTP: name, type, size, and permissions per entry.")]
    async fn list_dir(
        &self,
        Parameters(params): Parameters<ListDirParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::list_dir(&manager, params).await
    }

    #[tool(description = "Stream a file from one connected alias to another over SFTP.")]
    async fn sync(
        &self,
        Parameters(params): Parameters<SyncParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let manager = self.pool.get(&self.tenant_key(&context)).await;
        dispatcher::sync(&manager, params).await
    }
}

#[tool_handler]
impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "This gateway fans tool calls out over persistent SSH connections to aliased \
                 remote hosts. Start with `connect` to dial a host; the returned alias (or the \
                 default \"primary\") then selects the target for `run`, `read`, `write`, \
                 `edit`, `list_dir`, and `sync`. `identity` returns the gateway's own public key \
                 for hosts that require it in `authorized_keys`."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
