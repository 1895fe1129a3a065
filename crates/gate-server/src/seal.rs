/// Seals ticket secrets at rest with AES-256-GCM under a server master key.
/// The ticket id is bound as associated data, so a sealed blob moved onto another ticket
/// fails to open. The master key is saved to disk so sealed secrets survive restarts.
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use gatepass_sdk::TicketSecret;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GateError, Result};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// hex
    pub nonce: String,
    /// hex, includes the GCM tag
    pub ciphertext: String,
}

pub struct Sealer {
    cipher: Aes256Gcm,
}

impl Sealer {
    pub fn new_or_load(key_path: Option<&Path>) -> Result<Self> {
        let Some(key_path) = key_path else {
            warn!("SEAL_KEY_PATH not set, using an ephemeral sealing key");
            return Ok(Self::generate());
        };

        if key_path.exists() {
            let sealer = Self::load_from_file(key_path)?;
            info!("Loaded sealing key from {}", key_path.display());
            return Ok(sealer);
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GateError::Crypto(format!("Failed to create key dir: {}", e)))?;
        }
        std::fs::write(key_path, hex::encode(key))
            .map_err(|e| GateError::Crypto(format!("Failed to write sealing key: {}", e)))?;
        info!("Generated sealing key at {}", key_path.display());

        Self::from_key(&key)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GateError::Crypto(format!("Failed to read sealing key: {}", e)))?;
        let key = hex::decode(raw.trim())
            .map_err(|e| GateError::Crypto(format!("Invalid sealing key encoding: {}", e)))?;
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(GateError::Crypto(format!(
                "Sealing key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| GateError::Crypto("Failed to create cipher".into()))?;
        Ok(Self { cipher })
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    pub fn seal(&self, ticket_id: Uuid, secret: &TicketSecret) -> Result<SealedSecret> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: secret.as_bytes(),
                    aad: ticket_id.as_bytes(),
                },
            )
            .map_err(|_| GateError::Crypto("Sealing failed".into()))?;

        Ok(SealedSecret {
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
        })
    }

    pub fn open(&self, ticket_id: Uuid, sealed: &SealedSecret) -> Result<TicketSecret> {
        let nonce_bytes = hex::decode(&sealed.nonce)
            .map_err(|_| GateError::Crypto("Invalid sealed nonce".into()))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(GateError::Crypto("Sealed nonce must be 12 bytes".into()));
        }
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|_| GateError::Crypto("Invalid sealed ciphertext".into()))?;

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: ticket_id.as_bytes(),
                },
            )
            .map_err(|_| GateError::Crypto("Unsealing failed - wrong key or ticket".into()))?;

        Ok(TicketSecret::from_slice(&plaintext)?)
    }
}
