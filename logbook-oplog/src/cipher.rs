//! Encryption at rest for book blobs.
//!
//! Books are symmetrically encrypted before persistence with
//! ChaCha20-Poly1305. The cipher key is derived from the author's private key
//! with a domain-separation tag, so the same key that signs logs also locks
//! the book at rest; no second secret needs managing.
//!
//! Blob layout: `MAGIC(4) | VERSION(2) | NONCE(12) | CIPHERTEXT || TAG(16)`.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use logbook_base::SecretKey;

use crate::error::{Error, Result};

const MAGIC: [u8; 4] = *b"OLOG";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const KEY_CONTEXT: &str = "logbook 2024-06-03 book at-rest encryption";

fn cipher_for(secret: &SecretKey) -> ChaCha20Poly1305 {
    let key = blake3::derive_key(KEY_CONTEXT, &secret.to_bytes());
    ChaCha20Poly1305::new(Key::from_slice(&key))
}

/// Seal the plaintext into a book blob.
pub(crate) fn seal(secret: &SecretKey, plaintext: &[u8]) -> Vec<u8> {
    let cipher = cipher_for(secret);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext).expect("encryption failed");

    let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Open a book blob created by [`seal`] and return the plaintext.
///
/// Layout violations surface as [`Error::DecodeFailed`]; an authentication
/// failure (wrong key, tampered blob) as [`Error::DecryptFailed`].
pub(crate) fn open(secret: &SecretKey, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
        return Err(Error::DecodeFailed("book blob too short"));
    }
    if blob[..4] != MAGIC {
        return Err(Error::DecodeFailed("not a book blob"));
    }
    let version = u16::from_le_bytes(blob[4..6].try_into().expect("length checked"));
    if version != VERSION {
        return Err(Error::DecodeFailed("unknown book blob version"));
    }
    let nonce = Nonce::from_slice(&blob[HEADER_LEN..HEADER_LEN + NONCE_LEN]);
    let cipher = cipher_for(secret);
    cipher
        .decrypt(nonce, &blob[HEADER_LEN + NONCE_LEN..])
        .map_err(|_| Error::DecryptFailed)
}
