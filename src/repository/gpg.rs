// src/repository/gpg.rs

//! OpenPGP verification of repository metadata
//!
//! Each repository has its own keyring directory holding one binary
//! certificate per imported key (`<fingerprint>.pgp`). A detached
//! signature is accepted if any signing-capable key in that keyring
//! verifies it. Verification uses sequoia-openpgp (pure Rust).

use crate::error::{Error, Result};
use openpgp::cert::CertParser;
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::SerializeInto;
use sequoia_openpgp as openpgp;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const KEY_EXTENSION: &str = "pgp";

/// Signature verification and key import
pub trait SignatureVerifier: Send + Sync {
    /// Import every certificate in `key_data` into `keyring`
    ///
    /// Returns the fingerprints imported. `source` is only used for
    /// messages.
    fn import_key(&self, keyring: &Path, key_data: &[u8], source: &str) -> Result<Vec<String>>;

    /// Verify a detached signature over `data`
    fn verify_detached(&self, keyring: &Path, data: &[u8], signature: &[u8]) -> Result<()>;

    /// True if the keyring holds at least one key
    fn has_keys(&self, keyring: &Path) -> bool;
}

/// Keyring-per-directory verifier backed by sequoia
pub struct GpgKeyring {
    policy: StandardPolicy<'static>,
}

impl GpgKeyring {
    pub fn new() -> Self {
        Self {
            policy: StandardPolicy::new(),
        }
    }

    fn load_certs(&self, keyring: &Path) -> Result<Vec<openpgp::Cert>> {
        let entries = match fs::read_dir(keyring) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut certs = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != KEY_EXTENSION) {
                continue;
            }
            let data = fs::read(&path)?;
            let cert = openpgp::Cert::from_bytes(&data).map_err(|e| {
                Error::Signature(format!("Damaged key {}: {e}", path.display()))
            })?;
            certs.push(cert);
        }
        Ok(certs)
    }
}

impl Default for GpgKeyring {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for GpgKeyring {
    fn import_key(&self, keyring: &Path, key_data: &[u8], source: &str) -> Result<Vec<String>> {
        let parser = CertParser::from_bytes(key_data)
            .map_err(|e| Error::KeyImport(format!("Cannot parse key from {source}: {e}")))?;

        fs::create_dir_all(keyring).map_err(|e| {
            Error::Filesystem(format!("Cannot create keyring {}: {e}", keyring.display()))
        })?;

        let mut imported = Vec::new();
        for cert in parser {
            let cert =
                cert.map_err(|e| Error::KeyImport(format!("Invalid key in {source}: {e}")))?;
            let fingerprint = cert.fingerprint().to_hex();
            let encoded = cert
                .to_vec()
                .map_err(|e| Error::KeyImport(format!("Cannot serialize key {fingerprint}: {e}")))?;

            let path = keyring.join(format!("{fingerprint}.{KEY_EXTENSION}"));
            fs::write(&path, encoded)
                .map_err(|e| Error::Filesystem(format!("Cannot write {}: {e}", path.display())))?;

            info!("Imported key {} from {}", fingerprint, source);
            imported.push(fingerprint);
        }

        if imported.is_empty() {
            return Err(Error::KeyImport(format!("No keys found in {source}")));
        }
        Ok(imported)
    }

    fn verify_detached(&self, keyring: &Path, data: &[u8], signature: &[u8]) -> Result<()> {
        let certs = self.load_certs(keyring)?;
        if certs.is_empty() {
            return Err(Error::Signature(format!(
                "No keys imported in {}",
                keyring.display()
            )));
        }

        let pile = openpgp::PacketPile::from_bytes(signature)
            .map_err(|e| Error::Signature(format!("Cannot parse signature: {e}")))?;

        for packet in pile.descendants() {
            let openpgp::Packet::Signature(sig) = packet else {
                continue;
            };
            for cert in &certs {
                for key in cert.keys().with_policy(&self.policy, None).for_signing() {
                    if sig.verify_message(key.key(), data).is_ok() {
                        debug!("Signature verified with key {}", key.fingerprint());
                        return Ok(());
                    }
                }
            }
        }

        Err(Error::Signature(
            "No imported key verifies the signature".to_string(),
        ))
    }

    fn has_keys(&self, keyring: &Path) -> bool {
        fs::read_dir(keyring).is_ok_and(|mut entries| {
            entries.any(|e| {
                e.is_ok_and(|e| e.path().extension().is_some_and(|ext| ext == KEY_EXTENSION))
            })
        })
    }
}
