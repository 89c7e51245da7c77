//! Device identity and secret derivation.
//!
//! Every installation carries one stable opaque identifier, persisted in
//! the most secure backend available. If that backend is unavailable the
//! engine falls back to a session-scoped identifier: the failure is logged
//! and never surfaced to the caller, so a broken keystore degrades the
//! install to session-local state instead of crashing it.

use std::sync::{Arc, OnceLock};

use hkdf::Hkdf;
use secrecy::SecretBox;
use sha2::Sha256;

use crate::defaults::KEY_DEVICE_ID;
use crate::store::StorageBackend;
use crate::types::DeviceId;

/// Domain-separation label for the device secret derivation.
const SECRET_INFO: &[u8] = b"pointskit:device-secret:v1";
const SECRET_SALT: &[u8] = b"pointskit:hkdf-salt:v1";

/// Produces and persists the per-installation device identity.
pub struct DeviceIdentity {
    backend: Arc<dyn StorageBackend>,
    cached: OnceLock<DeviceId>,
}

impl DeviceIdentity {
    /// Creates an identity source backed by the given (most secure) backend.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cached: OnceLock::new(),
        }
    }

    /// Returns the stable device id, creating and persisting one on first
    /// call. Never fails: when the backend is unavailable a session-scoped
    /// fallback id is derived and the failure is logged.
    pub fn get_or_create(&self) -> DeviceId {
        self.cached
            .get_or_init(|| self.load_or_create())
            .clone()
    }

    fn load_or_create(&self) -> DeviceId {
        match self.backend.read(KEY_DEVICE_ID) {
            Ok(Some(id)) if !id.is_empty() => DeviceId::new(id),
            Ok(_) => {
                let id = DeviceId::generate();
                if let Err(err) = self.backend.write(KEY_DEVICE_ID, id.as_str()) {
                    log::warn!(
                        "failed to persist device id on backend '{}': {err}; \
                         falling back to a session id",
                        self.backend.name()
                    );
                    return DeviceId::ephemeral();
                }
                log::info!("created new device id on backend '{}'", self.backend.name());
                id
            }
            Err(err) => {
                log::warn!(
                    "backend '{}' unavailable while reading device id: {err}; \
                     falling back to a session id",
                    self.backend.name()
                );
                DeviceId::ephemeral()
            }
        }
    }

    /// Derives the 32-byte device secret that seeds the obfuscation codec.
    ///
    /// HKDF-SHA256 over the device id with fixed salt and info labels, so
    /// the same install always derives the same secret.
    #[must_use]
    pub fn device_secret(device_id: &DeviceId) -> SecretBox<[u8; 32]> {
        let hk = Hkdf::<Sha256>::new(Some(SECRET_SALT), device_id.as_ref());
        let mut okm = [0u8; 32];
        hk.expand(SECRET_INFO, &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        SecretBox::new(Box::new(okm))
    }
}
