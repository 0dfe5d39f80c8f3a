//! The sealed-channel primitive: AES-256-CBC keyed from an ECDH shared
//! secret and a per-request nonce.
//!
//! Key schedule: `digest = SHA-512(nonce_le8 || shared_secret)`, cipher
//! key = digest[0..32], IV = digest[32..48]. Both sides derive the same
//! schedule from the nonce carried next to the payload, so sealing is
//! deterministic for a given (pair, nonce).
//!
//! There is no authentication tag. A tampered payload surfaces as a
//! padding error or decodes to garbage, and callers must validate
//! whatever they parse out of it.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha512};

use crate::keys::{PrivateKey, PublicKey};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size. Sealed payloads are always a nonzero multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Error type for sealed-channel operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid ciphertext length {0}, want a nonzero multiple of 16")]
    InvalidCiphertextLength(usize),
    #[error("bad padding")]
    Padding,
    #[error("invalid key")]
    InvalidKey,
}

fn derive_key_iv(local: &PrivateKey, peer: &PublicKey, nonce: u64) -> ([u8; 32], [u8; 16]) {
    let secret = local.shared_secret(peer);

    let mut hasher = Sha512::new();
    hasher.update(nonce.to_le_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&digest[..32]);
    iv.copy_from_slice(&digest[32..48]);
    (key, iv)
}

/// Seal `plaintext` for `peer` under the given request nonce.
///
/// Deterministic: the same keys, nonce and plaintext always produce the
/// same bytes, so callers must mint a fresh nonce per request. PKCS7
/// pads up to the next block, so the output is never empty.
pub fn seal(plaintext: &[u8], local: &PrivateKey, peer: &PublicKey, nonce: u64) -> Vec<u8> {
    let (key, iv) = derive_key_iv(local, peer, nonce);
    Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Open a sealed payload with the same nonce the sealer used.
pub fn unseal(
    ciphertext: &[u8],
    local: &PrivateKey,
    peer: &PublicKey,
    nonce: u64,
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
    }

    let (key, iv) = derive_key_iv(local, peer, nonce);
    Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Padding)
}
