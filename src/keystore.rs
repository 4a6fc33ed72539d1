//! Gateway's own Ed25519 identity, used as the credential of last resort.
//!
//! One keypair is generated the first time the gateway runs in a given key
//! directory and reused on every later run. The private key never leaves
//! this process; the public half is printed so an operator can add it to a
//! remote host's `authorized_keys`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, PrivateKey, PublicKey};

use crate::error::GatewayError;

const PRIVATE_KEY_FILE: &str = "id_ed25519";
const PUBLIC_KEY_FILE: &str = "id_ed25519.pub";
const KEY_COMMENT: &str = "ssh-mcp-gateway";

/// Holds the gateway's persisted identity.
pub struct KeyStore {
    dir: PathBuf,
    private_key: PrivateKey,
}

impl KeyStore {
    /// Resolve the key directory (explicit override, or a platform config
    /// directory, falling back to a development path under the working
    /// directory when neither is writable), then load or generate the
    /// Ed25519 identity that lives there.
    pub fn ensure(dir_override: Option<PathBuf>) -> Result<Self, GatewayError> {
        let dir = match dir_override {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(GatewayError::Configuration(format!(
                        "key directory {} does not exist",
                        dir.display()
                    )));
                }
                dir
            }
            None => Self::default_key_dir()?,
        };
        Self::probe_writable(&dir)?;

        let private_path = dir.join(PRIVATE_KEY_FILE);
        let private_key = if private_path.exists() {
            let pem = fs::read_to_string(&private_path)?;
            let key = PrivateKey::from_openssh(&pem)
                .map_err(|e| GatewayError::Configuration(format!("corrupt identity key: {e}")))?;
            debug!("loaded existing gateway identity from {}", private_path.display());
            key
        } else {
            let key = Self::generate_and_persist(&dir)?;
            info!("generated new gateway identity in {}", dir.display());
            key
        };

        Ok(Self { dir, private_key })
    }

    fn default_key_dir() -> Result<PathBuf, GatewayError> {
        if let Some(config_dir) = dirs::config_dir() {
            let candidate = config_dir.join("ssh-mcp-gateway");
            if candidate.is_dir() && Self::probe_writable(&candidate).is_ok() {
                return Ok(candidate);
            }
        }
        // Development fallback: the platform config dir is unavailable or
        // hasn't been provisioned (common in minimal containers). This is
        // the one path this gateway creates on its own, owner-only.
        let fallback = PathBuf::from(".ssh-mcp-gateway");
        fs::create_dir_all(&fallback)?;
        fs::set_permissions(&fallback, std::fs::Permissions::from_mode(0o700))?;
        Ok(fallback)
    }

    /// Writability can't be trusted from permission bits alone (ACLs,
    /// read-only bind mounts, SELinux); write a probe file and delete it.
    fn probe_writable(dir: &Path) -> Result<(), GatewayError> {
        let probe = dir.join(".write-probe");
        fs::write(&probe, b"ok").map_err(|e| {
            GatewayError::Configuration(format!("key directory {} not writable: {e}", dir.display()))
        })?;
        let _ = fs::remove_file(&probe);
        Ok(())
    }

    fn generate_and_persist(dir: &Path) -> Result<PrivateKey, GatewayError> {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;

        let private_pem = key
            .to_openssh(russh::keys::ssh_key::LineEnding::LF)
            .map_err(|e| GatewayError::Configuration(format!("failed to serialize identity: {e}")))?;
        let private_path = dir.join(PRIVATE_KEY_FILE);
        fs::write(&private_path, private_pem.as_bytes())?;
        fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o600))?;

        let authorized_line = Self::authorized_keys_line_for(&key.public_key());
        let public_path = dir.join(PUBLIC_KEY_FILE);
        fs::write(&public_path, authorized_line.as_bytes())?;
        fs::set_permissions(&public_path, std::fs::Permissions::from_mode(0o644))?;

        Ok(key)
    }

    fn authorized_keys_line_for(public: &PublicKey) -> String {
        let encoded = public.to_openssh().unwrap_or_default();
        format!("{encoded} {KEY_COMMENT}\n")
    }

    /// The private key, for use as an authentication credential.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// The OpenSSH `authorized_keys` line for this identity's public half.
    pub fn authorized_keys_line(&self) -> String {
        Self::authorized_keys_line_for(&self.private_key.public_key())
    }

    /// Directory this identity is persisted under.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_identity() {
        let tmp = std::env::temp_dir().join(format!("ssh-mcp-gateway-keystore-test-{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let first = KeyStore::ensure(Some(tmp.clone())).expect("generate identity");
        let fingerprint_a = first.private_key().public_key().to_openssh().unwrap();

        let second = KeyStore::ensure(Some(tmp.clone())).expect("reload identity");
        let fingerprint_b = second.private_key().public_key().to_openssh().unwrap();

        assert_eq!(fingerprint_a, fingerprint_b);

        let private_path = tmp.join(PRIVATE_KEY_FILE);
        let mode = fs::metadata(&private_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn authorized_keys_line_carries_comment() {
        let tmp = std::env::temp_dir().join(format!("ssh-mcp-gateway-keystore-test-line-{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let store = KeyStore::ensure(Some(tmp.clone())).expect("generate identity");
        assert!(store.authorized_keys_line().ends_with(&format!("{KEY_COMMENT}\n")));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_fails_when_explicit_directory_is_missing() {
        let tmp = std::env::temp_dir().join(format!("ssh-mcp-gateway-keystore-test-missing-{}", std::process::id()));
        let _ = fs::remove_dir_all(&tmp);

        let err = KeyStore::ensure(Some(tmp.clone())).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }
}
