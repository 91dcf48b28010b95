//! History-entry sealing: XChaCha20-Poly1305 under a per-session key.
//!
//! Pages that set `encryptHistory` have their persisted entries sealed so
//! back/forward state for sensitive pages is unreadable once the session
//! key is gone. `clearHistory` rotates the key, which is an O(1)
//! invalidation of every previously sealed entry.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use passage_error::{PassageError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

/// Size of a session key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Seals and opens history entries under a rotating session key.
pub struct EntrySealer {
    key: [u8; KEY_SIZE],
    rng: StdRng,
}

impl std::fmt::Debug for EntrySealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntrySealer").finish_non_exhaustive()
    }
}

impl EntrySealer {
    /// A sealer with a key and nonce stream drawn from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// A deterministic sealer for tests.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let mut key = [0u8; KEY_SIZE];
        rng.fill(&mut key[..]);
        Self { key, rng }
    }

    /// Seal `plaintext`, returning the fresh nonce and the ciphertext
    /// (which carries the Poly1305 tag).
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut nonce = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce[..]);
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| PassageError::HistorySealed {
                detail: "encryption failed".to_owned(),
            })?;
        Ok((nonce.to_vec(), ciphertext))
    }

    /// Open a sealed entry. Fails when the key has rotated since sealing
    /// or the payload was tampered with.
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(PassageError::HistorySealed {
                detail: format!("nonce must be {NONCE_SIZE} bytes, got {}", nonce.len()),
            });
        }
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| PassageError::HistorySealed {
                detail: "key rotated or payload tampered".to_owned(),
            })
    }

    /// Replace the session key, invalidating everything sealed before.
    pub fn rotate(&mut self) {
        self.rng.fill(&mut self.key[..]);
    }
}

impl Default for EntrySealer {
    fn default() -> Self {
        Self::new()
    }
}
