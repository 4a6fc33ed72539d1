//! One tenant's keyed set of live SSH connections.
//!
//! The alias map is the system's principal concurrency primitive: each
//! alias carries its own mutex, so unrelated tool calls against different
//! aliases proceed in parallel while calls against the same alias are
//! strictly serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::RegexSet;
use tokio::sync::{Mutex, RwLock};

use crate::connection::{Connection, Credential, RunResult};
use crate::error::GatewayError;
use crate::keystore::KeyStore;
use crate::security::SecurityLevel;

const MAX_ALIAS_SUFFIX: u32 = 100;
const DEFAULT_OUTPUT_LIMIT: usize = 50 * 1024;
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Signatures that indicate the underlying transport, not the remote
/// command, failed. Matched against an error's `Display` text.
static TRANSPORT_LOSS_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)connection reset",
        r"(?i)broken pipe",
        r"(?i)unexpected eof",
        r"(?i)connection refused",
        r"(?i)connection closed",
        r"(?i)channel closed",
    ])
    .expect("transport loss pattern set is valid")
});

/// True if `text` matches one of the known transport-loss signatures
/// (connection reset, broken pipe, EOF, refused). Used to decide whether a
/// failed `Run` deserves a transparent reconnect-and-retry.
pub(crate) fn transport_loss_signature(text: &str) -> bool {
    TRANSPORT_LOSS_PATTERNS.is_match(text)
}

/// An alias slot: either a handshake in flight (a reservation placeholder)
/// or a live Connection. Encodes the reservation invariant in the type so
/// two concurrent auto-alias requests for the same `user@host` can never
/// both settle on the same name.
enum AliasSlot {
    Reserved,
    Live(Connection),
}

/// One entry of a [`Manager::list_dir`] listing.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub permissions: String,
}

/// Parameters for [`Manager::connect`].
pub struct ConnectRequest {
    pub alias: Option<String>,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub credential: Credential,
    pub via: Option<String>,
    pub security: SecurityLevel,
}

/// One tenant's connection set.
pub struct Manager {
    keystore: Arc<KeyStore>,
    aliases: RwLock<HashMap<String, Arc<Mutex<AliasSlot>>>>,
    primary: RwLock<Option<String>>,
}

impl Manager {
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        Self {
            keystore,
            aliases: RwLock::new(HashMap::new()),
            primary: RwLock::new(None),
        }
    }

    /// Allocate an alias (explicit or auto-generated), reserve it, dial the
    /// host, and record the live Connection. Returns the alias actually
    /// used.
    pub async fn connect(&self, req: ConnectRequest) -> Result<String, GatewayError> {
        let host_key = format!("{}@{}", req.user, req.host);

        if let Some(ref requested) = req.alias {
            if let Some(existing) = self.reconnect_if_same_host(requested, &host_key).await {
                return existing;
            }
        }

        let alias = self.reserve_alias(req.alias.as_deref(), &host_key).await?;

        let result = self.dial(&req).await;
        match result {
            Ok(conn) => {
                self.aliases
                    .write()
                    .await
                    .insert(alias.clone(), Arc::new(Mutex::new(AliasSlot::Live(conn))));
                let mut primary = self.primary.write().await;
                if primary.is_none() {
                    *primary = Some(alias.clone());
                }
                debug!("connected alias '{alias}' ({host_key})");
                Ok(alias)
            }
            Err(err) => {
                self.aliases.write().await.remove(&alias);
                Err(err)
            }
        }
    }

    async fn reconnect_if_same_host(
        &self,
        requested: &str,
        host_key: &str,
    ) -> Option<Result<String, GatewayError>> {
        let slots = self.aliases.read().await;
        let slot = slots.get(requested)?.clone();
        drop(slots);
        let guard = slot.lock().await;
        match &*guard {
            AliasSlot::Live(conn) if format!("{}@{}", conn.user(), conn.host()) == host_key => {
                Some(Ok(requested.to_string()))
            }
            AliasSlot::Live(_) | AliasSlot::Reserved => {
                Some(Err(GatewayError::AliasCollision(requested.to_string())))
            }
        }
    }

    async fn reserve_alias(&self, requested: Option<&str>, host_key: &str) -> Result<String, GatewayError> {
        let mut aliases = self.aliases.write().await;
        match requested {
            Some(name) => {
                if aliases.contains_key(name) {
                    return Err(GatewayError::AliasCollision(name.to_string()));
                }
                aliases.insert(name.to_string(), Arc::new(Mutex::new(AliasSlot::Reserved)));
                Ok(name.to_string())
            }
            None => {
                if !aliases.contains_key(host_key) {
                    aliases.insert(host_key.to_string(), Arc::new(Mutex::new(AliasSlot::Reserved)));
                    return Ok(host_key.to_string());
                }
                for suffix in 2..MAX_ALIAS_SUFFIX {
                    let candidate = format!("{host_key}-{suffix}");
                    if !aliases.contains_key(&candidate) {
                        aliases.insert(candidate.clone(), Arc::new(Mutex::new(AliasSlot::Reserved)));
                        return Ok(candidate);
                    }
                }
                Err(GatewayError::AliasSpaceExhausted(host_key.to_string()))
            }
        }
    }

    async fn dial(&self, req: &ConnectRequest) -> Result<Connection, GatewayError> {
        match &req.via {
            None => {
                Connection::connect(
                    req.user.clone(),
                    req.host.clone(),
                    req.port,
                    req.credential.clone(),
                    req.security,
                    &self.keystore,
                )
                .await
            }
            Some(via) => {
                let slot = self
                    .aliases
                    .read()
                    .await
                    .get(via)
                    .cloned()
                    .ok_or_else(|| GatewayError::JumpHostUnavailable(via.clone()))?;
                let guard = slot.lock().await;
                match &*guard {
                    AliasSlot::Live(jump) => {
                        Connection::connect_via(
                            jump,
                            req.user.clone(),
                            req.host.clone(),
                            req.port,
                            req.credential.clone(),
                            req.security,
                            &self.keystore,
                        )
                        .await
                    }
                    AliasSlot::Reserved => Err(GatewayError::JumpHostUnavailable(via.clone())),
                }
            }
        }
    }

    /// Resolve `target` ("" or "primary" means the current primary alias)
    /// to a concrete alias name, failing if it names nothing live.
    pub async fn resolve_target(&self, target: &str) -> Result<String, GatewayError> {
        if target.is_empty() || target == "primary" {
            return self
                .primary
                .read()
                .await
                .clone()
                .ok_or_else(|| GatewayError::NoSuchAlias("primary".to_string()));
        }
        if self.aliases.read().await.contains_key(target) {
            Ok(target.to_string())
        } else {
            Err(GatewayError::NoSuchAlias(target.to_string()))
        }
    }

    /// Run `cmd` against `alias`, taking its per-alias lock for the
    /// duration. Transparently reconnects and retries exactly once on a
    /// transport-loss signature.
    pub async fn run(&self, alias: &str, cmd: &str) -> Result<RunResult, GatewayError> {
        self.run_with_timeout(alias, cmd, DEFAULT_RUN_TIMEOUT).await
    }

    pub async fn run_with_timeout(
        &self,
        alias: &str,
        cmd: &str,
        timeout: Duration,
    ) -> Result<RunResult, GatewayError> {
        let slot = self.alias_slot(alias).await?;
        let mut guard = slot.lock().await;
        let conn = self.live_connection_mut(&mut guard, alias)?;

        match conn.run(cmd, timeout).await {
            Ok(result) => Ok(result),
            Err(err) if err.looks_like_transport_loss() => {
                warn!("transport lost on alias '{alias}', reconnecting: {err}");
                conn.reconnect(&self.keystore, None).await?;
                conn.run(cmd, timeout).await
            }
            Err(err) => Err(err),
        }
    }

    /// The "execute" convenience: runs `cmd`, merges stdout/stderr, appends
    /// an exit-code marker on non-zero exit, and truncates long output.
    pub async fn execute(&self, alias: &str, cmd: &str) -> Result<String, GatewayError> {
        let result = self.run(alias, cmd).await?;
        Ok(shape_output(&result, DEFAULT_OUTPUT_LIMIT))
    }

    /// Disconnect and drop `alias`. If it was primary, promotes another
    /// live alias (or clears primary if none remain).
    pub async fn disconnect(&self, alias: &str) -> Result<(), GatewayError> {
        let slot = self
            .aliases
            .write()
            .await
            .remove(alias)
            .ok_or_else(|| GatewayError::NoSuchAlias(alias.to_string()))?;

        {
            let mut guard = slot.lock().await;
            if let AliasSlot::Live(conn) = &mut *guard {
                conn.close().await?;
            }
        }

        let mut primary = self.primary.write().await;
        if primary.as_deref() == Some(alias) {
            *primary = self.first_live_alias().await;
        }
        Ok(())
    }

    /// First alias (in map iteration order) whose slot is live, skipping
    /// reservation placeholders still mid-handshake. The primary, when set,
    /// must always name a live entry.
    async fn first_live_alias(&self) -> Option<String> {
        let aliases = self.aliases.read().await;
        for (name, slot) in aliases.iter() {
            if let AliasSlot::Live(_) = &*slot.lock().await {
                return Some(name.clone());
            }
        }
        None
    }

    /// Resolve a relative path against `alias`'s tracked CWD.
    pub async fn resolve_path(&self, alias: &str, raw_path: &str) -> Result<String, GatewayError> {
        let slot = self.alias_slot(alias).await?;
        let mut guard = slot.lock().await;
        let conn = self.live_connection_mut(&mut guard, alias)?;
        Ok(conn.resolve_path(raw_path))
    }

    /// `"sudo "` or `""`, per the target alias's username.
    pub async fn sudo_prefix(&self, alias: &str) -> Result<&'static str, GatewayError> {
        let slot = self.alias_slot(alias).await?;
        let mut guard = slot.lock().await;
        let conn = self.live_connection_mut(&mut guard, alias)?;
        Ok(conn.sudo_prefix())
    }

    /// Read a remote file's full contents over SFTP, resolving `raw_path`
    /// against the alias's tracked CWD.
    pub async fn read_file(&self, alias: &str, raw_path: &str) -> Result<Vec<u8>, GatewayError> {
        let slot = self.alias_slot(alias).await?;
        let mut guard = slot.lock().await;
        let conn = self.live_connection_mut(&mut guard, alias)?;
        let path = conn.resolve_path(raw_path);
        let sftp = conn.sftp().await?;
        let mut file = sftp.open(&path).await?;
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut buf).await?;
        Ok(buf)
    }

    /// Write `content` to a remote file over SFTP, truncating/creating it,
    /// resolving `raw_path` against the alias's tracked CWD.
    pub async fn write_file(&self, alias: &str, raw_path: &str, content: &[u8]) -> Result<(), GatewayError> {
        let slot = self.alias_slot(alias).await?;
        let mut guard = slot.lock().await;
        let conn = self.live_connection_mut(&mut guard, alias)?;
        let path = conn.resolve_path(raw_path);
        let sftp = conn.sftp().await?;
        let mut file = sftp.create(&path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, content).await?;
        Ok(())
    }

    /// List a remote directory over SFTP. Returns `(name, is_dir, size,
    /// permissions)` tuples; the dispatcher formats these into the tool's
    /// response records.
    pub async fn list_dir(&self, alias: &str, raw_path: &str) -> Result<Vec<DirEntryInfo>, GatewayError> {
        let slot = self.alias_slot(alias).await?;
        let mut guard = slot.lock().await;
        let conn = self.live_connection_mut(&mut guard, alias)?;
        let path = conn.resolve_path(raw_path);
        let sftp = conn.sftp().await?;
        let entries = sftp.read_dir(&path).await?;

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let child = format!("{}/{}", path.trim_end_matches('/'), name);
            let attrs = sftp.metadata(&child).await?;
            out.push(DirEntryInfo {
                name,
                is_dir: attrs.is_dir(),
                size: attrs.size.unwrap_or(0),
                permissions: attrs.permissions.map(|mode| format!("{mode:o}")).unwrap_or_default(),
            });
        }
        Ok(out)
    }

    /// Read-modify-write a remote file through SFTP. Not atomic against a
    /// concurrent external writer; acceptable for the intended agent-driven
    /// workflow (see DESIGN.md).
    pub async fn edit_file<F>(&self, alias: &str, raw_path: &str, edit: F) -> Result<(), GatewayError>
    where
        F: FnOnce(String) -> String,
    {
        let content = self.read_file(alias, raw_path).await?;
        let text = String::from_utf8_lossy(&content).into_owned();
        let edited = edit(text);
        self.write_file(alias, raw_path, edited.as_bytes()).await
    }

    /// Stream a file from `source_path` on `source_alias` to `dest_path` on
    /// `dest_alias`, both via SFTP. The only operation that holds two
    /// per-alias locks at once; they are always acquired in alias-name
    /// order, never argument order, so two `sync` calls naming the same
    /// pair of aliases in opposite order can never deadlock.
    pub async fn sync(
        &self,
        source_alias: &str,
        source_path: &str,
        dest_alias: &str,
        dest_path: &str,
    ) -> Result<u64, GatewayError> {
        let source_slot = self.alias_slot(source_alias).await?;

        if source_alias == dest_alias {
            let mut guard = source_slot.lock().await;
            let conn = self.live_connection_mut(&mut guard, source_alias)?;
            let source_full = conn.resolve_path(source_path);
            let dest_full = conn.resolve_path(dest_path);
            let sftp = conn.sftp().await?;
            let mut reader = sftp.open(&source_full).await?;
            let mut writer = sftp.create(&dest_full).await?;
            return Ok(tokio::io::copy(&mut reader, &mut writer).await?);
        }

        let dest_slot = self.alias_slot(dest_alias).await?;
        let (first, _) = Self::sync_lock_order(source_alias, dest_alias);

        if first == source_alias {
            let mut source_guard = source_slot.lock().await;
            let mut dest_guard = dest_slot.lock().await;
            let source_conn = self.live_connection_mut(&mut source_guard, source_alias)?;
            let source_full = source_conn.resolve_path(source_path);
            let source_sftp = source_conn.sftp().await?;
            let dest_conn = self.live_connection_mut(&mut dest_guard, dest_alias)?;
            let dest_full = dest_conn.resolve_path(dest_path);
            let dest_sftp = dest_conn.sftp().await?;
            let mut reader = source_sftp.open(&source_full).await?;
            let mut writer = dest_sftp.create(&dest_full).await?;
            Ok(tokio::io::copy(&mut reader, &mut writer).await?)
        } else {
            let mut dest_guard = dest_slot.lock().await;
            let mut source_guard = source_slot.lock().await;
            let dest_conn = self.live_connection_mut(&mut dest_guard, dest_alias)?;
            let dest_full = dest_conn.resolve_path(dest_path);
            let dest_sftp = dest_conn.sftp().await?;
            let source_conn = self.live_connection_mut(&mut source_guard, source_alias)?;
            let source_full = source_conn.resolve_path(source_path);
            let source_sftp = source_conn.sftp().await?;
            let mut reader = source_sftp.open(&source_full).await?;
            let mut writer = dest_sftp.create(&dest_full).await?;
            Ok(tokio::io::copy(&mut reader, &mut writer).await?)
        }
    }

    /// Lock order for `sync`'s two aliases: alphabetic by alias name, so any
    /// two concurrent `sync` calls naming the same pair of aliases in
    /// either order never deadlock.
    pub fn sync_lock_order<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        if a <= b { (a, b) } else { (b, a) }
    }

    async fn alias_slot(&self, alias: &str) -> Result<Arc<Mutex<AliasSlot>>, GatewayError> {
        self.aliases
            .read()
            .await
            .get(alias)
            .cloned()
            .ok_or_else(|| GatewayError::NoSuchAlias(alias.to_string()))
    }

    fn live_connection_mut<'g>(
        &self,
        guard: &'g mut tokio::sync::MutexGuard<'_, AliasSlot>,
        alias: &str,
    ) -> Result<&'g mut Connection, GatewayError> {
        match &mut **guard {
            AliasSlot::Live(conn) => Ok(conn),
            AliasSlot::Reserved => Err(GatewayError::NoSuchAlias(alias.to_string())),
        }
    }

    /// Tear down every live connection. Idempotent: a second call simply
    /// finds an empty map.
    pub async fn close(&self) {
        let mut aliases = self.aliases.write().await;
        for (alias, slot) in aliases.drain() {
            let mut guard = slot.lock().await;
            if let AliasSlot::Live(conn) = &mut *guard {
                if let Err(e) = conn.close().await {
                    warn!("error closing alias '{alias}' during manager shutdown: {e}");
                }
            }
        }
        *self.primary.write().await = None;
    }
}

/// Merge stdout/stderr, append an exit-code marker on non-zero exit,
/// substitute a placeholder when both streams are empty, and truncate at
/// `limit` bytes with a visible marker.
pub(crate) fn shape_output(result: &RunResult, limit: usize) -> String {
    let mut out = String::new();
    out.push_str(&result.stdout);
    if !result.stderr.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&result.stderr);
    }
    if out.is_empty() {
        out.push_str("(No output)");
    }
    if result.exit_code != 0 {
        out.push_str(&format!("\n[Exit Code: {}]", result.exit_code));
    }
    if out.len() > limit {
        out.truncate(limit);
        out.push_str("\n... (truncated)");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_transport_loss_signatures() {
        assert!(transport_loss_signature("Connection reset by peer"));
        assert!(transport_loss_signature("ssh error: broken pipe"));
        assert!(transport_loss_signature("unexpected EOF"));
        assert!(transport_loss_signature("connection refused"));
    }

    #[test]
    fn does_not_flag_unrelated_errors() {
        assert!(!transport_loss_signature("authentication failed for root@host: denied"));
        assert!(!transport_loss_signature("no such alias: foo"));
    }

    #[test]
    fn sync_lock_order_is_alphabetic_regardless_of_call_order() {
        assert_eq!(Manager::sync_lock_order("b", "a"), ("a", "b"));
        assert_eq!(Manager::sync_lock_order("a", "b"), ("a", "b"));
    }

    #[test]
    fn shape_output_merges_and_marks_nonzero_exit() {
        let result = RunResult {
            stdout: "out".to_string(),
            stderr: "warn".to_string(),
            exit_code: 2,
            cwd: "/".to_string(),
        };
        let shaped = shape_output(&result, 1024);
        assert_eq!(shaped, "out\nwarn\n[Exit Code: 2]");
    }

    #[test]
    fn shape_output_substitutes_placeholder_for_empty_streams() {
        let result = RunResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            cwd: "/".to_string(),
        };
        assert_eq!(shape_output(&result, 1024), "(No output)");
    }

    #[test]
    fn shape_output_truncates_past_limit() {
        let result = RunResult {
            stdout: "x".repeat(100),
            stderr: String::new(),
            exit_code: 0,
            cwd: "/".to_string(),
        };
        let shaped = shape_output(&result, 10);
        assert!(shaped.ends_with("... (truncated)"));
        assert!(shaped.len() < 100);
    }

    fn test_manager() -> Manager {
        let dir = std::env::temp_dir().join(format!(
            "ssh-mcp-gateway-manager-test-{}-{}",
            std::process::id(),
            rand_suffix()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        Manager::new(Arc::new(KeyStore::ensure(Some(dir)).expect("keystore")))
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[tokio::test]
    async fn concurrent_auto_alias_reservations_never_collide() {
        // Mirrors `connect`'s real contract: a reservation is held for the
        // whole dial and only released on failure, never immediately. Every
        // task keeps its alias live until all 50 have reserved, so the
        // suffix allocator (`-2` .. `-99`) is actually exercised under
        // contention instead of repeatedly handing back the bare host key.
        let manager = Arc::new(test_manager());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let manager = manager.clone();
            handles.push(tokio::spawn(
                async move { manager.reserve_alias(None, "root@example.com").await.unwrap() },
            ));
        }

        let mut aliases = Vec::with_capacity(50);
        for handle in handles {
            aliases.push(handle.await.unwrap());
        }

        let mut seen = std::collections::HashSet::new();
        for alias in &aliases {
            assert!(seen.insert(alias.clone()), "alias '{alias}' was handed out twice");
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn explicit_alias_collision_is_rejected() {
        let manager = test_manager();
        manager.reserve_alias(Some("db"), "root@example.com").await.unwrap();
        let err = manager.reserve_alias(Some("db"), "root@other.com").await.unwrap_err();
        assert!(matches!(err, GatewayError::AliasCollision(_)));
    }
}
