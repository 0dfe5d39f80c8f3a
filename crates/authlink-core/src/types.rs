//! Shared protocol types: chain identity, signer authorization, the
//! callback payload shape, and the results of the two flows.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use authlink_crypto::{PrivateKey, PublicKey};

use crate::request::EncodedRequest;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("invalid permission level: {0}")]
    InvalidPermissionLevel(String),
}

// ============================================================================
// Chain identity
// ============================================================================

/// 32-byte chain id, carried as lowercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId([u8; 32]);

impl ChainId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|_| TypeError::InvalidChainId(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidChainId(s.to_string()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self)
    }
}

impl FromStr for ChainId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A chain the application talks to: the 32-byte id plus the short name
/// authenticator URLs use to select it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainDefinition {
    pub id: ChainId,
    pub name: String,
}

impl ChainDefinition {
    pub fn new(id: ChainId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// ============================================================================
// Signer authorization
// ============================================================================

/// An account plus the permission it signs with, `actor@permission`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

impl PermissionLevel {
    pub fn new(actor: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            permission: permission.into(),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.permission)
    }
}

impl FromStr for PermissionLevel {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (actor, permission) = s
            .split_once('@')
            .ok_or_else(|| TypeError::InvalidPermissionLevel(s.to_string()))?;
        if actor.is_empty() || permission.is_empty() {
            return Err(TypeError::InvalidPermissionLevel(s.to_string()));
        }
        Ok(Self {
            actor: actor.to_string(),
            permission: permission.to_string(),
        })
    }
}

impl Serialize for PermissionLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PermissionLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Callback payload
// ============================================================================

/// The JSON body an authenticator delivers on the response channel.
///
/// Every field is optional on the wire; the flows validate the subset
/// they need. Numbered signature slots (`sig0`, `sig1`, ...) land in
/// `extra` and are collected by [`CallbackPayload::signatures`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Chain id the authenticator acted on, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Signer account name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa: Option<String>,
    /// Signer permission name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp: Option<String>,
    /// Public link key issued for this session, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_key: Option<String>,
    /// First (or only) signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    /// Serialized transaction, when the authenticator echoes it back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    /// Reference block num used for TAPOS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rbn: Option<String>,
    /// Reference block id used for TAPOS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Transaction expiration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ex: Option<String>,
    /// The request this payload answers, re-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<String>,
    /// Callback URL the authenticator resolved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    /// Everything else, including `sig0`..`sigN` overflow slots.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CallbackPayload {
    /// All signatures in order: `sig` first, then the numbered slots
    /// sorted numerically. No shape filtering here.
    pub fn signatures(&self) -> Vec<String> {
        let mut signatures = Vec::new();
        if let Some(sig) = &self.sig {
            signatures.push(sig.clone());
        }
        let mut numbered: Vec<(usize, String)> = self
            .extra
            .iter()
            .filter_map(|(key, value)| {
                let index = key.strip_prefix("sig")?.parse::<usize>().ok()?;
                let sig = value.as_str()?;
                Some((index, sig.to_string()))
            })
            .collect();
        numbered.sort_by_key(|(index, _)| *index);
        signatures.extend(numbered.into_iter().map(|(_, sig)| sig));
        signatures
    }
}

/// Shape check for chain-format signature strings.
pub fn is_signature_shaped(s: &str) -> bool {
    match s.strip_prefix("SIG_") {
        Some(rest) => !rest.is_empty(),
        None => false,
    }
}

// ============================================================================
// Session state and flow results
// ============================================================================

/// Key material bridging login to sign. Written when login validates a
/// response, overwritten by a later login.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// Private half of the ephemeral request key minted at login.
    pub request_key: PrivateKey,
    /// Public link key the authenticator issued for this session.
    pub link_key: PublicKey,
}

/// Proof that the authenticator signed the identity request itself.
#[derive(Debug, Clone)]
pub struct IdentityProof {
    pub signature: String,
    /// The request that was signed, as it went out.
    pub signed_request: EncodedRequest,
}

/// Outcome of a successful login exchange.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub chain: ChainId,
    pub permission: PermissionLevel,
    /// Present when the authenticator countersigned the request.
    pub identity_proof: Option<IdentityProof>,
}

/// A transaction already resolved against chain state, ready to be
/// re-encoded into a signing request. Resolution itself is the
/// caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTransaction {
    pub signer: PermissionLevel,
    pub transaction: serde_json::Value,
}

/// Outcome of a successful sign exchange.
#[derive(Debug, Clone)]
pub struct SignResult {
    /// At least one chain-format signature.
    pub signatures: Vec<String>,
    /// The transaction the signatures cover, echoed back to the caller.
    pub resolved: ResolvedTransaction,
}
