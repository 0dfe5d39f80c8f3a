//! secp256k1 key pairs and ECDH shared secrets.
//!
//! A fresh pair is minted per login attempt; only the public half
//! travels, hex-encoded in SEC1 compressed form. The shared secret is
//! SHA-512 over the ECDH x coordinate, which is what the authenticator
//! derives for the same pair, so both key schedules line up.

use std::fmt;
use std::str::FromStr;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey as K256PublicKey, SecretKey as K256SecretKey};
use rand_core::OsRng;
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::sealed::CryptoError;

/// 64-byte ECDH-derived secret. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 64]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// A secp256k1 private key.
#[derive(Clone)]
pub struct PrivateKey(K256SecretKey);

impl PrivateKey {
    /// Mint a fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self(K256SecretKey::random(&mut OsRng))
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        K256SecretKey::from_bytes(bytes.into())
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    /// ECDH against `peer`, then SHA-512 over the shared point's
    /// x coordinate.
    pub fn shared_secret(&self, peer: &PublicKey) -> SharedSecret {
        let point = k256::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), peer.0.as_affine());
        let digest = Sha512::digest(point.raw_secret_bytes());
        let mut out = [0u8; 64];
        out.copy_from_slice(&digest);
        SharedSecret(out)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        f.write_str("PrivateKey(..)")
    }
}

/// A secp256k1 public key, SEC1 compressed (33 bytes) on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(K256PublicKey);

impl PublicKey {
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        K256PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidKey)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidKey)?;
        Self::from_sec1_bytes(&bytes)
    }
}
