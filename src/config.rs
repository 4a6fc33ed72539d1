//! SSH algorithm policy tables and process-wide gateway configuration.
//!
//! The algorithm tables mirror a typical `russh` client's `Preferred` sets,
//! grouped into three named profiles (secure, balanced, legacy-compatible)
//! so [`crate::security::SecurityLevel`] can pick one without the caller
//! needing to know individual algorithm names.

use clap::Parser;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};

/// Modern-only key exchange algorithms.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Modern key exchange plus widely-supported Diffie-Hellman group exchange.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA256,
];

/// Every key exchange algorithm `russh` knows, including legacy SHA-1 and
/// fixed-group Diffie-Hellman, for maximum compatibility with older hosts.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
];

/// AEAD-only cipher suite.
pub const SECURE_CIPHERS: &[cipher::Name] =
    &[cipher::AES_256_GCM, cipher::CHACHA20_POLY1305, cipher::AES_128_CTR, cipher::AES_256_CTR];

/// AEAD plus CTR-mode ciphers.
pub const BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_128_CBC,
];

/// All ciphers `russh` supports, including legacy CBC-mode, for devices that
/// offer nothing newer.
pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

/// Modern host key / public key algorithms only.
pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

/// Modern plus plain RSA host key algorithms.
pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// Every host key algorithm `russh` knows.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa { hash: None },
];

/// MAC algorithms usable across all three profiles; ETM variants are
/// preferred but the legacy profile still offers the plain HMAC fallback.
pub const SECURE_MAC_ALGORITHMS: &[mac::Name] =
    &[mac::HMAC_SHA256_ETM, mac::HMAC_SHA512_ETM];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

/// Compression is never preferred; offered last so a host that insists on
/// it still negotiates successfully.
pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] =
    &[compression::NONE, compression::ZLIB];

/// Transport mode for the MCP-facing side of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Request/response framed on stdin/stdout. Exactly one client.
    Stdio,
    /// Streamable HTTP POST endpoint at `/mcp`.
    Http,
}

/// Process-wide configuration, resolved command-line flag > environment
/// variable > built-in default (the precedence `clap`'s `env` attribute
/// gives for free: an explicit flag always wins over the environment).
#[derive(Debug, Clone, Parser)]
#[command(name = "ssh-mcp-gateway", about = "MCP gateway over persistent SSH connections")]
pub struct GatewayConfig {
    /// Transport mode: `stdio` or `http`.
    #[arg(long = "mode", env = "SSH_MCP_MODE", default_value = "http")]
    pub mode: TransportMode,

    /// TCP port to bind in `http` mode.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Verbose log formatting and `debug`-level output.
    #[arg(long, env = "SSH_MCP_DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Use a single shared Manager for every request (Session Pool mode 1).
    /// Disables the idle reaper.
    #[arg(long = "global", env = "SSH_MCP_GLOBAL", default_value_t = false)]
    pub global: bool,

    /// Directory holding the persisted Ed25519 identity (private/public key
    /// pair). Defaults to a platform config directory.
    #[arg(long, env = "SSH_MCP_KEY_DIR")]
    pub key_dir: Option<std::path::PathBuf>,
}

impl GatewayConfig {
    /// Parse from `std::env::args`, falling back to env vars and defaults
    /// per field as declared above.
    pub fn load() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_overrides_env_and_default() {
        // SAFETY: test runs single-threaded per-test-binary default; no
        // other test in this module mutates PORT concurrently.
        unsafe {
            std::env::set_var("PORT", "9999");
        }
        let cfg = GatewayConfig::parse_from(["gw", "--port", "8080"]);
        assert_eq!(cfg.port, 8080);
        unsafe {
            std::env::remove_var("PORT");
        }
    }

    #[test]
    fn env_overrides_default_when_no_flag() {
        unsafe {
            std::env::set_var("SSH_MCP_DEBUG", "true");
        }
        let cfg = GatewayConfig::parse_from(["gw"]);
        assert!(cfg.debug);
        unsafe {
            std::env::remove_var("SSH_MCP_DEBUG");
        }
    }

    #[test]
    fn default_mode_is_http() {
        let cfg = GatewayConfig::parse_from(["gw"]);
        assert_eq!(cfg.mode, TransportMode::Http);
        assert_eq!(cfg.port, 8000);
        assert!(!cfg.global);
    }
}
