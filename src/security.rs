//! SSH algorithm selection profiles.

use std::borrow::Cow;

use rmcp::schemars::JsonSchema;
use russh::Preferred;
use russh::keys::PublicKey;
use serde::{Deserialize, Serialize};

use crate::config;

/// Security level used for SSH algorithm negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    Secure,
    /// Good security with broader compatibility.
    Balanced,
    /// Maximum compatibility with legacy SSH servers.
    LegacyCompatible,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        Self::Secure
    }
}

/// Host key verification policy.
///
/// The design's non-goals exclude host-key pinning/TOFU (see DESIGN.md); the
/// gateway accepts any host key, but the policy is still its own type so a
/// future trust-on-first-use implementation has a clean seam to land in.
#[derive(Debug, Clone, Default)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents.
    #[default]
    AcceptAny,
}

impl HostKeyPolicy {
    pub(crate) fn accepts(&self, _key: &PublicKey) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
        }
    }
}

impl SecurityLevel {
    pub(crate) fn preferred(&self) -> Preferred<'static> {
        match self {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(config::SECURE_KEX_ORDER),
                key: Cow::Borrowed(config::SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(config::SECURE_CIPHERS),
                mac: Cow::Borrowed(config::SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(config::BALANCED_KEX_ORDER),
                key: Cow::Borrowed(config::BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(config::BALANCED_CIPHERS),
                mac: Cow::Borrowed(config::BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::LegacyCompatible => Preferred {
                kex: Cow::Borrowed(config::LEGACY_KEX_ORDER),
                key: Cow::Borrowed(config::LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(config::LEGACY_CIPHERS),
                mac: Cow::Borrowed(config::LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::{cipher, kex, mac};

    #[test]
    fn secure_profile_excludes_legacy_sha1_kex() {
        let preferred = SecurityLevel::Secure.preferred();
        assert!(preferred.kex.iter().all(|alg| *alg != kex::DH_G1_SHA1));
    }

    #[test]
    fn legacy_profile_keeps_broad_compatibility_algorithms() {
        let preferred = SecurityLevel::LegacyCompatible.preferred();
        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.mac.contains(&mac::HMAC_SHA1));
    }

    #[test]
    fn all_profiles_offer_an_aead_cipher() {
        for level in [
            SecurityLevel::Secure,
            SecurityLevel::Balanced,
            SecurityLevel::LegacyCompatible,
        ] {
            let preferred = level.preferred();
            assert!(preferred.cipher.contains(&cipher::AES_256_GCM));
        }
    }
}
