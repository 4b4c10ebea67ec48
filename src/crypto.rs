//! Cryptographic primitives used by the ratchet and the message layer.
//!
//! This is the only module that talks to the symmetric primitive crates.
//! Everything above it works with the functions here: HKDF-SHA256,
//! HMAC-SHA256, AES-256-CBC with PKCS7 padding and Ed25519 signatures.

use crate::constants::{CIPHER_KEY_LENGTH, IV_LENGTH, KEY_LENGTH, SIGNATURE_LENGTH};
use crate::error::{Error, Result};

use aes::Aes256;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEncryptor = cbc::Encryptor<Aes256>;
type Aes256CbcDecryptor = cbc::Decryptor<Aes256>;

/// Size of an HMAC-SHA256 output.
pub const HMAC_SHA256_LENGTH: usize = 32;

/// HKDF-SHA256 extract-and-expand into an `N` byte array.
///
/// A missing salt is treated as a zero-filled salt of hash length, which is
/// what RFC 5869 prescribes.
///
/// # Errors
/// Returns [`Error::CryptoError`] if `N` exceeds the HKDF output limit.
pub fn hkdf_sha256<const N: usize>(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; N];
    hkdf.expand(info, &mut okm).map_err(|_| Error::CryptoError)?;
    Ok(okm)
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_SHA256_LENGTH]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::CryptoError)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time equality for MAC comparison.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Encrypts `plaintext` with AES-256-CBC and PKCS7 padding.
///
/// # Arguments
/// * `key` - 32 byte cipher key
/// * `iv` - 16 byte initialisation vector
/// * `plaintext` - data to encrypt, may be empty
///
/// # Errors
/// Returns [`Error::InvalidKeyDataLength`] when the key or IV has the wrong size.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_cipher_parameters(key, iv)?;
    let encryptor =
        Aes256CbcEncryptor::new_from_slices(key, iv).map_err(|_| Error::CryptoError)?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypts AES-256-CBC ciphertext and strips PKCS7 padding.
///
/// # Errors
/// Returns [`Error::DecryptionFailed`] when the ciphertext is not block
/// aligned or the padding is invalid.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_cipher_parameters(key, iv)?;
    let decryptor =
        Aes256CbcDecryptor::new_from_slices(key, iv).map_err(|_| Error::CryptoError)?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

fn check_cipher_parameters(key: &[u8], iv: &[u8]) -> Result<()> {
    if key.len() != CIPHER_KEY_LENGTH {
        return Err(Error::InvalidKeyDataLength {
            expected: CIPHER_KEY_LENGTH,
            actual: key.len(),
        });
    }
    if iv.len() != IV_LENGTH {
        return Err(Error::InvalidKeyDataLength {
            expected: IV_LENGTH,
            actual: iv.len(),
        });
    }
    Ok(())
}

/// Ed25519 signing public key for a 32 byte seed.
#[must_use]
pub fn signing_public_key(seed: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    SigningKey::from_bytes(seed).verifying_key().to_bytes()
}

/// Signs `message` with the Ed25519 key derived from `seed`.
#[must_use]
pub fn sign(seed: &[u8; KEY_LENGTH], message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
    SigningKey::from_bytes(seed).sign(message).to_bytes()
}

/// Verify an Ed25519 signature
///
/// # Errors
/// Returns [`Error::InvalidSignature`] if the public key does not decode,
/// the signature is not 64 bytes, or verification fails.
pub fn verify_signature(public_key: &[u8; KEY_LENGTH], message: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)?;
    let signature = Signature::from_slice(signature)?;
    verifying_key.verify(message, &signature)?;
    Ok(())
}
