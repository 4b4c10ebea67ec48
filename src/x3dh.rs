//! X3DH (Extended Triple Diffie-Hellman) key agreement and prekey material.
//!
//! ## Protocol Flow
//!
//! 1. **Responder (Bob)** publishes a [`PublicPreKeysBundle`]:
//!    - Identity key (long-term X25519 key)
//!    - Signing key (Ed25519 key derived from the same identity private key)
//!    - Signed prekey with its signature
//!    - A batch of one-time prekeys
//!
//! 2. **Initiator (Alice)** fetches a [`PreKeyBundle`] and computes:
//!    - DH1 = `DH(IK_A, SPK_B)`
//!    - DH2 = `DH(EK_A, IK_B)`
//!    - DH3 = `DH(EK_A, SPK_B)`
//!    - DH4 = `DH(EK_A, OPK_B)` [if OPK available]
//!    - secret = `0xFF^32 || DH1 || DH2 || DH3 || [DH4]`
//!
//! 3. **Responder (Bob)** mirrors the pairing with his private keys and
//!    arrives at the same secret.
//!
//! The raw secret is not hashed here. It is the input key material of
//! [`RatchetRootKey::create_chain_from`](crate::kdf::RatchetRootKey::create_chain_from).

use crate::constants::{KEY_LENGTH, ONE_TIME_PRE_KEYS_LIMIT, ONE_TIME_PRE_KEYS_MIN_COUNT, X3DH_PADDING};
use crate::error::Result;
use crate::keys::{
    IdentityKeyPair, IdentityKeyPublic, KeyPair, PublicKey, SigningKeyPublic, base64_bytes,
};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw X3DH output: padding followed by three or four DH outputs.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct X3dhSecret(Vec<u8>);

impl X3dhSecret {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for X3dhSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X3dhSecret([REDACTED])")
    }
}

/// Shared secret as computed by the session initiator.
///
/// # Arguments
/// * `our_identity` - Alice's identity key pair
/// * `our_base_key` - Alice's ephemeral (base) key pair
/// * `their_identity` - Bob's identity key
/// * `their_signed_pre_key` - Bob's signed prekey
/// * `their_one_time_pre_key` - Bob's one-time prekey, if the bundle had one
///
/// # Errors
/// Returns [`Error::KeyAgreementFailed`](crate::Error::KeyAgreementFailed)
/// if any agreement is non-contributory.
pub fn calculate_initiator_secret(
    our_identity: &IdentityKeyPair,
    our_base_key: &KeyPair,
    their_identity: &IdentityKeyPublic,
    their_signed_pre_key: &PublicKey,
    their_one_time_pre_key: Option<&PublicKey>,
) -> Result<X3dhSecret> {
    let mut secret = X3dhSecret(Vec::with_capacity(KEY_LENGTH * 5));
    secret.0.extend_from_slice(&X3DH_PADDING);

    let dh1 = our_identity
        .private_key
        .calculate_key_agreement(their_signed_pre_key)?;
    let dh2 = our_base_key
        .private_key
        .calculate_key_agreement(their_identity.public_key())?;
    let dh3 = our_base_key
        .private_key
        .calculate_key_agreement(their_signed_pre_key)?;
    secret.0.extend_from_slice(dh1.as_bytes());
    secret.0.extend_from_slice(dh2.as_bytes());
    secret.0.extend_from_slice(dh3.as_bytes());

    if let Some(one_time_pre_key) = their_one_time_pre_key {
        let dh4 = our_base_key
            .private_key
            .calculate_key_agreement(one_time_pre_key)?;
        secret.0.extend_from_slice(dh4.as_bytes());
    }

    Ok(secret)
}

/// Shared secret as computed by the session responder.
///
/// Mirrors [`calculate_initiator_secret`]: each agreement uses Bob's private
/// half against the public half Alice used for the same position.
pub fn calculate_responder_secret(
    our_identity: &IdentityKeyPair,
    our_signed_pre_key: &KeyPair,
    our_one_time_pre_key: Option<&KeyPair>,
    their_identity: &IdentityKeyPublic,
    their_base_key: &PublicKey,
) -> Result<X3dhSecret> {
    let mut secret = X3dhSecret(Vec::with_capacity(KEY_LENGTH * 5));
    secret.0.extend_from_slice(&X3DH_PADDING);

    let dh1 = our_signed_pre_key
        .private_key
        .calculate_key_agreement(their_identity.public_key())?;
    let dh2 = our_identity
        .private_key
        .calculate_key_agreement(their_base_key)?;
    let dh3 = our_signed_pre_key
        .private_key
        .calculate_key_agreement(their_base_key)?;
    secret.0.extend_from_slice(dh1.as_bytes());
    secret.0.extend_from_slice(dh2.as_bytes());
    secret.0.extend_from_slice(dh3.as_bytes());

    if let Some(one_time_pre_key) = our_one_time_pre_key {
        let dh4 = one_time_pre_key
            .private_key
            .calculate_key_agreement(their_base_key)?;
        secret.0.extend_from_slice(dh4.as_bytes());
    }

    Ok(secret)
}

pub(crate) fn random_uuid<R: CryptoRngCore>(rng: &mut R) -> Uuid {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Single-use prekey kept by its owner until a session consumes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPair {
    pub id: Uuid,
    pub key_pair: KeyPair,
}

impl OneTimePreKeyPair {
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self {
            id: random_uuid(rng),
            key_pair: KeyPair::generate(rng),
        }
    }

    /// Generates up to [`ONE_TIME_PRE_KEYS_LIMIT`] one-time prekeys.
    pub fn generate_batch<R: CryptoRngCore>(rng: &mut R, count: usize) -> Vec<Self> {
        (0..count.min(ONE_TIME_PRE_KEYS_LIMIT))
            .map(|_| Self::generate(rng))
            .collect()
    }

    #[must_use]
    pub fn public(&self) -> OneTimePreKeyPublic {
        OneTimePreKeyPublic {
            id: self.id,
            public_key: self.key_pair.public_key,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    #[serde(rename = "client_key_id")]
    pub id: Uuid,
    #[serde(rename = "key")]
    pub public_key: PublicKey,
}

/// Medium-term prekey signed by the owner's identity key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyPair {
    pub id: Uuid,
    pub created_at: SystemTime,
    pub key_pair: KeyPair,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

impl SignedPreKeyPair {
    /// Generates a prekey and signs its public bytes with `identity`.
    pub fn generate<R: CryptoRngCore>(rng: &mut R, identity: &IdentityKeyPair) -> Self {
        let key_pair = KeyPair::generate(rng);
        let signature = identity.private_key.sign(key_pair.public_key.as_bytes());
        Self {
            id: random_uuid(rng),
            created_at: SystemTime::now(),
            key_pair,
            signature: signature.to_vec(),
        }
    }

    #[must_use]
    pub fn public(&self) -> SignedPreKeyPublic {
        SignedPreKeyPublic {
            id: self.id,
            public_key: self.key_pair.public_key,
            signature: self.signature.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    #[serde(rename = "client_key_id")]
    pub id: Uuid,
    #[serde(rename = "key")]
    pub public_key: PublicKey,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// Prekey bundle fetched by an initiator to start a session with one device.
///
/// Contains an identity key, a signed prekey with signature, and optionally
/// a one-time prekey. The signature proves possession of the identity key
/// and binds it to the signed prekey.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    pub identity_key: IdentityKeyPublic,
    pub signing_key: SigningKeyPublic,
    #[serde(rename = "user_id")]
    pub registration_id: Uuid,
    pub device_id: Uuid,
    pub signed_pre_key: SignedPreKeyPublic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key: Option<OneTimePreKeyPublic>,
}

impl PreKeyBundle {
    /// Verifies the signed prekey signature under the bundle's signing key.
    ///
    /// # Returns
    /// - `Ok(())` if signature is valid
    /// - `Err(Error::InvalidSignature)` if verification fails
    pub fn verify_signature(&self) -> Result<()> {
        self.signing_key.verify_signature(
            &self.signed_pre_key.signature,
            self.signed_pre_key.public_key.as_bytes(),
        )
    }
}

/// Keys a device publishes so that others can start sessions with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPreKeysBundle {
    pub identity_key: IdentityKeyPublic,
    pub signing_key: SigningKeyPublic,
    pub signed_pre_key: SignedPreKeyPublic,
    #[serde(default)]
    pub one_time_pre_keys: Vec<OneTimePreKeyPublic>,
}

impl PublicPreKeysBundle {
    #[must_use]
    pub fn new(
        identity: &IdentityKeyPair,
        signed_pre_key: &SignedPreKeyPair,
        one_time_pre_keys: &[OneTimePreKeyPair],
    ) -> Self {
        Self {
            identity_key: identity.identity_key(),
            signing_key: identity.signing_key(),
            signed_pre_key: signed_pre_key.public(),
            one_time_pre_keys: one_time_pre_keys.iter().map(OneTimePreKeyPair::public).collect(),
        }
    }

    /// Whether `remaining` published one-time prekeys call for a new batch.
    #[must_use]
    pub fn needs_replenishment(remaining: usize) -> bool {
        remaining < ONE_TIME_PRE_KEYS_MIN_COUNT
    }
}
