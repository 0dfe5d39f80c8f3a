#![forbid(unsafe_code)]

pub mod keys;
pub mod sealed;

pub use keys::{PrivateKey, PublicKey, SharedSecret};
pub use sealed::{seal, unseal, CryptoError};

#[cfg(test)]
mod proptests;
