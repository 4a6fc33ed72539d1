//! One live SSH session to one host.
//!
//! A [`Connection`] opens a fresh exec channel per [`Connection::run`] call
//! rather than keeping an interactive shell open — there is no device
//! prompt to track here, only a plain POSIX shell, so the working directory
//! is carried across calls with the nonce wrapper in [`path`] instead of a
//! state machine.

pub mod path;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use rand::RngCore;
use russh::client::{self, Handle};
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Sig};
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::keystore::KeyStore;
use crate::security::{HostKeyPolicy, SecurityLevel};

/// How a Connection authenticates to its remote host. Exactly one method is
/// ever offered to the transport.
#[derive(Debug, Clone)]
pub enum Credential {
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Fall back to the gateway's own persisted identity.
    SystemIdentity,
}

/// Result of [`Connection::run`].
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub cwd: String,
}

struct ClientHandler {
    policy: HostKeyPolicy,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(self.policy.accepts(key))
    }
}

/// One live SSH session to one host.
pub struct Connection {
    user: String,
    host: String,
    port: u16,
    credential: Credential,
    security: SecurityLevel,
    handle: Handle<ClientHandler>,
    cwd: String,
    sftp: Mutex<Option<Arc<SftpSession>>>,
}

impl Connection {
    /// Open a direct connection to `host:port`.
    pub async fn connect(
        user: String,
        host: String,
        port: u16,
        credential: Credential,
        security: SecurityLevel,
        keystore: &KeyStore,
    ) -> Result<Self, GatewayError> {
        let config = Arc::new(client::Config {
            preferred: security.preferred(),
            ..Default::default()
        });
        let handler = ClientHandler {
            policy: HostKeyPolicy::default(),
        };

        debug!("dialing {user}@{host}:{port}");
        let handle = client::connect(config, (host.as_str(), port), handler).await?;
        Self::finish(user, host, port, credential, security, keystore, handle).await
    }

    /// Open a connection to `host:port` tunnelled through `jump`'s transport
    /// via TCP/IP forwarding, then negotiate a fresh SSH handshake on that
    /// stream.
    pub async fn connect_via(
        jump: &Connection,
        user: String,
        host: String,
        port: u16,
        credential: Credential,
        security: SecurityLevel,
        keystore: &KeyStore,
    ) -> Result<Self, GatewayError> {
        let config = Arc::new(client::Config {
            preferred: security.preferred(),
            ..Default::default()
        });
        let handler = ClientHandler {
            policy: HostKeyPolicy::default(),
        };

        debug!("dialing {user}@{host}:{port} via jump host");
        let tunnel = jump
            .handle
            .channel_open_direct_tcpip(host.as_str(), port as u32, "127.0.0.1", 0)
            .await
            .map_err(|e| GatewayError::JumpHostUnavailable(format!("{e}")))?;

        let handle = client::connect_stream(config, tunnel.into_stream(), handler).await?;
        Self::finish(user, host, port, credential, security, keystore, handle).await
    }

    async fn finish(
        user: String,
        host: String,
        port: u16,
        credential: Credential,
        security: SecurityLevel,
        keystore: &KeyStore,
        mut handle: Handle<ClientHandler>,
    ) -> Result<Self, GatewayError> {
        Self::authenticate(&mut handle, &user, &host, port, &credential, keystore).await?;
        Ok(Self {
            user,
            host,
            port,
            credential,
            security,
            handle,
            cwd: "~".to_string(),
            sftp: Mutex::new(None),
        })
    }

    async fn authenticate(
        handle: &mut Handle<ClientHandler>,
        user: &str,
        host: &str,
        port: u16,
        credential: &Credential,
        keystore: &KeyStore,
    ) -> Result<(), GatewayError> {
        let auth = |reason: String| GatewayError::Authentication {
            user: user.to_string(),
            host: host.to_string(),
            reason,
        };

        let accepted = match credential {
            Credential::Password(password) => handle
                .authenticate_password(user, password)
                .await?
                .success(),
            Credential::PrivateKey { path, passphrase } => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| auth(format!("could not load private key: {e}")))?;
                Self::authenticate_key(handle, user, key).await?
            }
            Credential::SystemIdentity => {
                Self::authenticate_key(handle, user, keystore.private_key().clone()).await?
            }
        };

        if !accepted {
            return Err(auth(format!("{user}@{host}:{port} rejected the offered credential")));
        }
        Ok(())
    }

    async fn authenticate_key(
        handle: &mut Handle<ClientHandler>,
        user: &str,
        key: PrivateKey,
    ) -> Result<bool, GatewayError> {
        let with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        Ok(handle.authenticate_publickey(user, with_alg).await?.success())
    }

    /// Run `cmd` in a fresh remote shell, preset to this Connection's
    /// current working directory, recovering the shell's final CWD
    /// afterward. On `timeout` expiry, sends `SIGKILL` to the remote process
    /// and returns a cancellation error with no partial output.
    pub async fn run(&mut self, cmd: &str, timeout: Duration) -> Result<RunResult, GatewayError> {
        let nonce = fresh_nonce();
        let wrapped = path::wrap_with_cwd_tracking(&self.cwd, cmd, &nonce);

        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, wrapped.as_bytes()).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status: Option<u32> = None;

        let drain = async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
                    Some(ChannelMsg::ExitStatus { exit_status: code }) => exit_status = Some(code),
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => break,
                    Some(_) => {}
                    None => break,
                }
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            let _ = channel.signal(Sig::KILL).await;
            let _ = channel.close().await;
            return Err(GatewayError::Cancelled {
                alias: String::new(),
                reason: format!("command timed out after {timeout:?}"),
            });
        }

        let raw_stdout = String::from_utf8_lossy(&stdout).into_owned();
        let (pre_nonce, new_cwd) = path::split_on_nonce(&raw_stdout, &nonce);
        let stdout = pre_nonce.to_string();
        if !new_cwd.is_empty() {
            self.cwd = new_cwd.clone();
        }

        Ok(RunResult {
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_status.unwrap_or(0) as i32,
            cwd: self.cwd.clone(),
        })
    }

    /// Lazily open and memoize an SFTP subchannel on this Connection's
    /// transport.
    pub async fn sftp(&self) -> Result<Arc<SftpSession>, GatewayError> {
        let mut guard = self.sftp.lock().await;
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let session = Arc::new(SftpSession::new(channel.into_stream()).await?);
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Replace the transport in place, preserving alias-level identity
    /// (user/host/port/credential), CWD, and dropping any stale SFTP
    /// subchannel. Caller must already hold the per-alias lock.
    pub async fn reconnect(
        &mut self,
        keystore: &KeyStore,
        jump: Option<&Connection>,
    ) -> Result<(), GatewayError> {
        *self.sftp.lock().await = None;

        let config = Arc::new(client::Config {
            preferred: self.security.preferred(),
            ..Default::default()
        });
        let handler = ClientHandler {
            policy: HostKeyPolicy::default(),
        };

        let mut handle = match jump {
            Some(jump) => {
                let tunnel = jump
                    .handle
                    .channel_open_direct_tcpip(self.host.as_str(), self.port as u32, "127.0.0.1", 0)
                    .await
                    .map_err(|e| GatewayError::JumpHostUnavailable(format!("{e}")))?;
                client::connect_stream(config, tunnel.into_stream(), handler).await?
            }
            None => client::connect(config, (self.host.as_str(), self.port), handler).await?,
        };

        Self::authenticate(&mut handle, &self.user, &self.host, self.port, &self.credential, keystore).await?;
        self.handle = handle;
        trace!("reconnected {}@{}:{}, cwd preserved as {}", self.user, self.host, self.port, self.cwd);
        Ok(())
    }

    /// Tear down the SFTP subchannel, then the transport itself.
    pub async fn close(&mut self) -> Result<(), GatewayError> {
        *self.sftp.lock().await = None;
        if let Err(e) = self.handle.disconnect(russh::Disconnect::ByApplication, "", "en").await {
            warn!("error disconnecting {}@{}:{}: {e}", self.user, self.host, self.port);
        }
        Ok(())
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Resolve `raw_path` against this Connection's tracked CWD.
    pub fn resolve_path(&self, raw_path: &str) -> String {
        path::resolve(&self.cwd, raw_path)
    }

    /// `"sudo "` if this Connection's username is not `root`, empty
    /// otherwise. Advisory only; does not validate sudoers configuration.
    pub fn sudo_prefix(&self) -> &'static str {
        if self.user == "root" { "" } else { "sudo " }
    }
}

fn fresh_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
