//! Root, chain and message key derivation for the Double Ratchet.
//!
//! Every function here is pure: the same input always derives the same keys.
//!
//! ```text
//! X3DH secret ──HKDF("DXText")──▶ root key ──┐
//!                                            ├─ HKDF(salt = root, "DXRatchet") on each DH step
//!                          chain key ◀───────┘
//!                              │
//!          HMAC(0x02) ◀────────┼────────▶ HMAC(0x01) ──HKDF("DXMessageKeys")──▶ cipher | mac | iv
//!               │
//!          next chain key
//! ```

use crate::constants::{
    CHAIN_KEY_SEED, CIPHER_KEY_LENGTH, IV_LENGTH, KEY_LENGTH, MAC_KEY_LENGTH, MESSAGE_KEY_SEED,
    MESSAGE_KEYS_INFO, RATCHET_INFO, TEXT_INFO,
};
use crate::crypto::{hkdf_sha256, hmac_sha256};
use crate::error::{Error, Result};
use crate::keys::{PrivateKey, PublicKey};
use crate::x3dh::X3dhSecret;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const ROOT_AND_CHAIN_LENGTH: usize = KEY_LENGTH * 2;
const MESSAGE_KEYS_LENGTH: usize = CIPHER_KEY_LENGTH + MAC_KEY_LENGTH + IV_LENGTH;

/// Root key of the DH ratchet.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct RatchetRootKey {
    key: [u8; KEY_LENGTH],
}

impl RatchetRootKey {
    #[must_use]
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derives the first root and chain keys from an X3DH secret.
    pub fn create_chain_from(secret: &X3dhSecret) -> Result<(RatchetRootKey, RatchetChainKey)> {
        let okm = Zeroizing::new(hkdf_sha256::<ROOT_AND_CHAIN_LENGTH>(
            secret.as_bytes(),
            None,
            TEXT_INFO,
        )?);
        Ok(split_root_and_chain(&okm))
    }

    /// One DH ratchet step: agree with the peer's ratchet key and mix the
    /// result into this root key.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &PrivateKey,
    ) -> Result<(RatchetRootKey, RatchetChainKey)> {
        let shared = our_ratchet_key.calculate_key_agreement(their_ratchet_key)?;
        let okm = Zeroizing::new(hkdf_sha256::<ROOT_AND_CHAIN_LENGTH>(
            shared.as_bytes(),
            Some(self.key.as_slice()),
            RATCHET_INFO,
        )?);
        Ok(split_root_and_chain(&okm))
    }
}

impl std::fmt::Debug for RatchetRootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RatchetRootKey([REDACTED])")
    }
}

fn split_root_and_chain(okm: &[u8; ROOT_AND_CHAIN_LENGTH]) -> (RatchetRootKey, RatchetChainKey) {
    let mut root = [0u8; KEY_LENGTH];
    let mut chain = [0u8; KEY_LENGTH];
    root.copy_from_slice(&okm[..KEY_LENGTH]);
    chain.copy_from_slice(&okm[KEY_LENGTH..]);
    (
        RatchetRootKey { key: root },
        RatchetChainKey { key: chain, index: 0 },
    )
}

/// Symmetric chain key and the message index it will produce next.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct RatchetChainKey {
    key: [u8; KEY_LENGTH],
    index: u32,
}

impl RatchetChainKey {
    #[must_use]
    pub fn new(key: [u8; KEY_LENGTH], index: u32) -> Self {
        Self { key, index }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Message keys for the current index.
    pub fn message_keys(&self) -> Result<RatchetMessageKeys> {
        let material = Zeroizing::new(hmac_sha256(&self.key, &[MESSAGE_KEY_SEED.as_slice()])?);
        let okm = Zeroizing::new(hkdf_sha256::<MESSAGE_KEYS_LENGTH>(
            material.as_slice(),
            None,
            MESSAGE_KEYS_INFO,
        )?);

        let mut keys = RatchetMessageKeys {
            cipher_key: [0u8; CIPHER_KEY_LENGTH],
            mac_key: [0u8; MAC_KEY_LENGTH],
            iv: [0u8; IV_LENGTH],
            index: self.index,
        };
        keys.cipher_key.copy_from_slice(&okm[..CIPHER_KEY_LENGTH]);
        keys.mac_key
            .copy_from_slice(&okm[CIPHER_KEY_LENGTH..CIPHER_KEY_LENGTH + MAC_KEY_LENGTH]);
        keys.iv.copy_from_slice(&okm[CIPHER_KEY_LENGTH + MAC_KEY_LENGTH..]);
        Ok(keys)
    }

    /// The chain key one step further along.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if the index would overflow.
    pub fn next_chain_key(&self) -> Result<RatchetChainKey> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(Error::Internal("chain index overflow"))?;
        let key = hmac_sha256(&self.key, &[CHAIN_KEY_SEED.as_slice()])?;
        Ok(RatchetChainKey { key, index })
    }
}

impl std::fmt::Debug for RatchetChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetChainKey")
            .field("key", &"[REDACTED]")
            .field("index", &self.index)
            .finish()
    }
}

/// One-time keys protecting a single message.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct RatchetMessageKeys {
    cipher_key: [u8; CIPHER_KEY_LENGTH],
    mac_key: [u8; MAC_KEY_LENGTH],
    iv: [u8; IV_LENGTH],
    index: u32,
}

impl RatchetMessageKeys {
    #[must_use]
    pub fn cipher_key(&self) -> &[u8; CIPHER_KEY_LENGTH] {
        &self.cipher_key
    }

    #[must_use]
    pub fn mac_key(&self) -> &[u8; MAC_KEY_LENGTH] {
        &self.mac_key
    }

    #[must_use]
    pub fn iv(&self) -> &[u8; IV_LENGTH] {
        &self.iv
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for RatchetMessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetMessageKeys")
            .field("index", &self.index)
            .finish()
    }
}
