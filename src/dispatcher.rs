//! The fixed tool registry: `connect`, `disconnect`, `run`, `identity`,
//! `info`, `read`, `write`, `edit`, `list_dir`, `sync`.
//!
//! Each handler resolves its `target` alias, takes exactly one Manager
//! operation, and translates the result into an MCP [`CallToolResult`]. The
//! dispatcher itself is deliberately thin; the invariants live in
//! [`crate::manager::Manager`].

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::connection::Credential;
use crate::error::GatewayError;
use crate::keystore::KeyStore;
use crate::manager::{ConnectRequest, Manager};
use crate::security::SecurityLevel;

fn target_or_primary(target: &Option<String>) -> &str {
    target.as_deref().unwrap_or("primary")
}

fn to_mcp_error(err: GatewayError) -> McpError {
    match err {
        GatewayError::Validation(_) | GatewayError::NoSuchAlias(_) | GatewayError::AliasCollision(_) => {
            McpError::invalid_params(err.to_string(), None)
        }
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn text_result(body: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(body.into())]))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConnectParams {
    /// Alias to register this connection under. Omit to auto-generate
    /// `user@host`, with `-2`, `-3`, ... suffixing on collision.
    pub alias: Option<String>,
    pub user: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Password credential. Mutually exclusive with `private_key_path`.
    pub password: Option<String>,
    /// Private key credential. Mutually exclusive with `password`.
    pub private_key_path: Option<String>,
    pub private_key_passphrase: Option<String>,
    /// Alias of an already-connected host to tunnel through.
    pub via: Option<String>,
    #[serde(default)]
    pub security: SecurityLevel,
}

fn default_port() -> u16 {
    22
}

pub async fn connect(manager: &Manager, params: ConnectParams) -> Result<CallToolResult, McpError> {
    let credential = match (params.password, params.private_key_path) {
        (Some(_), Some(_)) => {
            return Err(McpError::invalid_params(
                "specify at most one of password or private_key_path",
                None,
            ));
        }
        (Some(password), None) => Credential::Password(password),
        (None, Some(path)) => Credential::PrivateKey {
            path: path.into(),
            passphrase: params.private_key_passphrase,
        },
        (None, None) => Credential::SystemIdentity,
    };

    let request = ConnectRequest {
        alias: params.alias,
        user: params.user,
        host: params.host,
        port: params.port,
        credential,
        via: params.via,
        security: params.security,
    };

    let alias = manager.connect(request).await.map_err(to_mcp_error)?;
    text_result(alias)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TargetParams {
    pub target: Option<String>,
}

pub async fn disconnect(manager: &Manager, params: TargetParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    manager.disconnect(&alias).await.map_err(to_mcp_error)?;
    text_result(format!("disconnected '{alias}'"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunParams {
    pub command: String,
    pub target: Option<String>,
}

pub async fn run(manager: &Manager, params: RunParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    let shaped = manager.execute(&alias, &params.command).await.map_err(to_mcp_error)?;
    text_result(shaped)
}

pub async fn identity(keystore: &KeyStore) -> Result<CallToolResult, McpError> {
    text_result(keystore.authorized_keys_line())
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InfoParams {
    pub target: Option<String>,
}

pub async fn info(manager: &Manager, params: InfoParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    let cwd = manager.resolve_path(&alias, ".").await.map_err(to_mcp_error)?;
    let sudo = manager.sudo_prefix(&alias).await.map_err(to_mcp_error)?;
    text_result(format!("alias={alias} cwd={cwd} sudo_prefix={sudo:?}"))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadParams {
    pub path: String,
    pub target: Option<String>,
}

pub async fn read(manager: &Manager, params: ReadParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    let bytes = manager.read_file(&alias, &params.path).await.map_err(to_mcp_error)?;
    text_result(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteParams {
    pub path: String,
    pub content: String,
    pub target: Option<String>,
}

pub async fn write(manager: &Manager, params: WriteParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    manager
        .write_file(&alias, &params.path, params.content.as_bytes())
        .await
        .map_err(to_mcp_error)?;
    text_result(format!("wrote {} bytes to {}", params.content.len(), params.path))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EditParams {
    pub path: String,
    /// Exact substring to replace. The edit is a read-modify-write through
    /// SFTP, not atomic against a concurrent external writer.
    pub find: String,
    pub replace: String,
    pub target: Option<String>,
}

pub async fn edit(manager: &Manager, params: EditParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    let find = params.find.clone();
    let replace = params.replace.clone();
    manager
        .edit_file(&alias, &params.path, move |text| text.replace(&find, &replace))
        .await
        .map_err(to_mcp_error)?;
    text_result(format!("edited {}", params.path))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirParams {
    #[serde(default = "default_list_path")]
    pub path: String,
    pub target: Option<String>,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Serialize)]
struct ListDirRecord {
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    size: u64,
    permissions: String,
}

pub async fn list_dir(manager: &Manager, params: ListDirParams) -> Result<CallToolResult, McpError> {
    let alias = manager
        .resolve_target(target_or_primary(&params.target))
        .await
        .map_err(to_mcp_error)?;
    let entries = manager.list_dir(&alias, &params.path).await.map_err(to_mcp_error)?;
    let records: Vec<ListDirRecord> = entries
        .into_iter()
        .map(|e| ListDirRecord {
            name: e.name,
            kind: if e.is_dir { "dir" } else { "file" },
            size: e.size,
            permissions: e.permissions,
        })
        .collect();
    let body = serde_json::to_string(&records)
        .map_err(|e| McpError::internal_error(format!("failed to encode listing: {e}"), None))?;
    text_result(body)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SyncParams {
    pub source_target: String,
    pub source_path: String,
    pub dest_target: String,
    pub dest_path: String,
}

pub async fn sync(manager: &Manager, params: SyncParams) -> Result<CallToolResult, McpError> {
    let source_alias = manager.resolve_target(&params.source_target).await.map_err(to_mcp_error)?;
    let dest_alias = manager.resolve_target(&params.dest_target).await.map_err(to_mcp_error)?;
    let bytes = manager
        .sync(&source_alias, &params.source_path, &dest_alias, &params.dest_path)
        .await
        .map_err(to_mcp_error)?;
    text_result(format!("synced {bytes} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_or_primary_defaults_when_absent() {
        assert_eq!(target_or_primary(&None), "primary");
    }

    #[test]
    fn target_or_primary_passes_through_explicit_value() {
        assert_eq!(target_or_primary(&Some("alpha".to_string())), "alpha");
    }

    #[test]
    fn validation_errors_carry_their_message() {
        let err = GatewayError::NoSuchAlias("x".to_string());
        let rendered = err.to_string();
        let _ = to_mcp_error(err);
        assert!(rendered.contains("no such alias"));
    }
}
