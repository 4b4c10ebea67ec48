//! Curve25519 key types with length validation and memory hygiene.
//!
//! A single 32 byte private key serves both as an X25519 agreement scalar and
//! as an Ed25519 signing seed. [`PrivateKey::public_key`] returns the agreement
//! half and [`PrivateKey::signing_public_key`] the signing half.

use crate::{
    constants::{KEY_LENGTH, SIGNATURE_LENGTH},
    crypto,
    error::{Error, Result},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const CURVE25519_TYPE: &str = "curve25519";

/// Curve25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LENGTH]);

impl PublicKey {
    /// Size in bytes
    pub const SIZE: usize = KEY_LENGTH;

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self(key_array(bytes)?))
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey([REDACTED])")
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        Self(*X25519PublicKey::from(secret).as_bytes())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        KeyRepr::encode(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = KeyRepr::deserialize(deserializer)?.decode::<D::Error>()?;
        Ok(Self(*bytes))
    }
}

/// Curve25519 private key with automatic zeroization
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; KEY_LENGTH]);

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng).to_bytes())
    }

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(Self(key_array(bytes)?))
    }

    /// Raw key bytes, for persistence by a store.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Public key suitable for X25519 agreement
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&StaticSecret::from(self.0))
    }

    /// Public key suitable for Ed25519 verification
    #[must_use]
    pub fn signing_public_key(&self) -> PublicKey {
        PublicKey(crypto::signing_public_key(&self.0))
    }

    /// Perform X25519 key agreement.
    ///
    /// # Errors
    /// Returns [`Error::KeyAgreementFailed`] when the peer key is a low-order
    /// point and the shared secret would be all zeroes.
    pub fn calculate_key_agreement(&self, their_key: &PublicKey) -> Result<DhOutput> {
        let shared = StaticSecret::from(self.0).diffie_hellman(&their_key.to_x25519());
        if !shared.was_contributory() {
            return Err(Error::KeyAgreementFailed);
        }
        Ok(DhOutput(*shared.as_bytes()))
    }

    /// Sign a message with the Ed25519 key derived from this seed
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        crypto::sign(&self.0, message)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

impl Serialize for PrivateKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        KeyRepr::encode(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = KeyRepr::deserialize(deserializer)?.decode::<D::Error>()?;
        Ok(Self(*bytes))
    }
}

/// Output of Diffie-Hellman operation (32 bytes)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_LENGTH]);

impl DhOutput {
    /// Returns a byte slice of the Diffie-Hellman operation output
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Matching public and private Curve25519 keys.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh random key pair
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self::from_private_key(PrivateKey::generate(rng))
    }

    /// Build a key pair by deriving the agreement public key.
    #[must_use]
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            private_key,
        }
    }
}

/// Long-term identity: one private key with its agreement and signing publics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
    pub signing_public_key: PublicKey,
}

impl IdentityKeyPair {
    /// Generate a new identity key pair
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self::from_private_key(PrivateKey::generate(rng))
    }

    #[must_use]
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        Self {
            public_key: private_key.public_key(),
            signing_public_key: private_key.signing_public_key(),
            private_key,
        }
    }

    /// Get the public identity key
    #[must_use]
    pub fn identity_key(&self) -> IdentityKeyPublic {
        IdentityKeyPublic::new(self.public_key)
    }

    /// Get the public signing key
    #[must_use]
    pub fn signing_key(&self) -> SigningKeyPublic {
        SigningKeyPublic::new(self.signing_public_key)
    }
}

/// Public identity key used in key agreement and bound into every MAC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKeyPublic {
    #[serde(rename = "key")]
    public_key: PublicKey,
}

impl IdentityKeyPublic {
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        self.public_key.as_bytes()
    }
}

/// Public Ed25519 key that signs prekeys on behalf of an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningKeyPublic {
    #[serde(rename = "key")]
    public_key: PublicKey,
}

impl SigningKeyPublic {
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Verify a signature made by the matching identity private key
    ///
    /// # Errors
    /// Returns [`Error::InvalidSignature`] if verification fails.
    pub fn verify_signature(&self, signature: &[u8], message: &[u8]) -> Result<()> {
        crypto::verify_signature(self.public_key.as_bytes(), message, signature)
    }
}

fn key_array(bytes: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    bytes.try_into().map_err(|_| Error::InvalidKeyDataLength {
        expected: KEY_LENGTH,
        actual: bytes.len(),
    })
}

/// JSON shape of a key: `{"type": "curve25519", "data": "<base64>"}`.
#[derive(Serialize, Deserialize)]
struct KeyRepr {
    #[serde(rename = "type")]
    key_type: String,
    data: String,
}

impl KeyRepr {
    fn encode(bytes: &[u8; KEY_LENGTH]) -> Self {
        Self {
            key_type: CURVE25519_TYPE.to_owned(),
            data: BASE64.encode(bytes),
        }
    }

    fn decode<E: de::Error>(self) -> std::result::Result<Zeroizing<[u8; KEY_LENGTH]>, E> {
        if self.key_type != CURVE25519_TYPE {
            return Err(E::custom(Error::InvalidKeyType));
        }
        let data = Zeroizing::new(BASE64.decode(&self.data).map_err(E::custom)?);
        let bytes = key_array(&data).map_err(E::custom)?;
        Ok(Zeroizing::new(bytes))
    }
}

/// Serde adapter for raw bytes carried as base64 strings.
pub(crate) mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_public_key_length_validation() {
        assert!(PublicKey::from_slice(&[1u8; 32]).is_ok());
        assert_eq!(
            PublicKey::from_slice(&[1u8; 31]),
            Err(Error::InvalidKeyDataLength {
                expected: 32,
                actual: 31
            })
        );
        assert!(PrivateKey::from_slice(&[0u8; 33]).is_err());
        assert!(PrivateKey::from_slice(&[]).is_err());
    }

    #[test]
    fn test_key_agreement_is_symmetric() {
        let alice = KeyPair::generate(&mut OsRng);
        let bob = KeyPair::generate(&mut OsRng);

        let ab = alice.private_key.calculate_key_agreement(&bob.public_key).unwrap();
        let ba = bob.private_key.calculate_key_agreement(&alice.public_key).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_low_order_point_is_rejected() {
        let ours = PrivateKey::generate(&mut OsRng);
        let identity_point = PublicKey::from_bytes([0u8; 32]);

        let result = ours.calculate_key_agreement(&identity_point);
        assert_eq!(result.unwrap_err(), Error::KeyAgreementFailed);
    }

    #[test]
    fn test_identity_signing_key_verifies_own_signature() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let signature = identity.private_key.sign(b"prekey");

        assert!(identity.signing_key().verify_signature(&signature, b"prekey").is_ok());

        let other = IdentityKeyPair::generate(&mut OsRng);
        assert_eq!(
            other.signing_key().verify_signature(&signature, b"prekey"),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn test_agreement_and_signing_publics_differ() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        assert_ne!(identity.public_key, identity.signing_public_key);
    }

    #[test]
    fn test_public_key_json_shape() {
        let key = PublicKey::from_bytes([5u8; 32]);
        let json = serde_json::to_value(key).unwrap();

        assert_eq!(json["type"], "curve25519");
        assert_eq!(json["data"], BASE64.encode([5u8; 32]));

        let decoded: PublicKey = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_key_json_rejects_wrong_type_and_length() {
        let wrong_type = serde_json::json!({ "type": "p256", "data": BASE64.encode([5u8; 32]) });
        assert!(serde_json::from_value::<PublicKey>(wrong_type).is_err());

        let short = serde_json::json!({ "type": "curve25519", "data": BASE64.encode([5u8; 16]) });
        assert!(serde_json::from_value::<PrivateKey>(short).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let key = PrivateKey::from_bytes([9u8; 32]);
        assert_eq!(format!("{key:?}"), "PrivateKey([REDACTED])");
    }
}
