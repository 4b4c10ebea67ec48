//! Sending and receiving halves of the symmetric ratchet.

use crate::constants::MESSAGE_KEY_MAXIMUM;
use crate::kdf::{RatchetChainKey, RatchetMessageKeys};
use crate::keys::{KeyPair, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Our current ratchet key pair and the chain it drives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderChain {
    pub(crate) ratchet_key_pair: KeyPair,
    pub(crate) chain_key: RatchetChainKey,
}

impl SenderChain {
    #[must_use]
    pub fn new(ratchet_key_pair: KeyPair, chain_key: RatchetChainKey) -> Self {
        Self {
            ratchet_key_pair,
            chain_key,
        }
    }

    #[must_use]
    pub fn ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key_pair.public_key
    }

    #[must_use]
    pub fn chain_key(&self) -> &RatchetChainKey {
        &self.chain_key
    }
}

/// Chain for one peer ratchet key, with keys for messages not yet received.
///
/// Skipped keys are kept oldest first and capped at [`MESSAGE_KEY_MAXIMUM`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverChain {
    pub(crate) ratchet_key: PublicKey,
    pub(crate) chain_key: RatchetChainKey,
    message_keys: VecDeque<RatchetMessageKeys>,
}

impl ReceiverChain {
    #[must_use]
    pub fn new(ratchet_key: PublicKey, chain_key: RatchetChainKey) -> Self {
        Self {
            ratchet_key,
            chain_key,
            message_keys: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key
    }

    #[must_use]
    pub fn chain_key(&self) -> &RatchetChainKey {
        &self.chain_key
    }

    /// Number of cached skipped message keys.
    #[must_use]
    pub fn skipped_key_count(&self) -> usize {
        self.message_keys.len()
    }

    /// Caches keys for a skipped message, dropping the oldest when full.
    pub(crate) fn push_message_keys(&mut self, keys: RatchetMessageKeys) {
        self.message_keys.push_back(keys);
        while self.message_keys.len() > MESSAGE_KEY_MAXIMUM {
            self.message_keys.pop_front();
        }
    }

    /// Removes and returns the cached keys for `index`, if present.
    pub(crate) fn take_message_keys(&mut self, index: u32) -> Option<RatchetMessageKeys> {
        let position = self.message_keys.iter().position(|keys| keys.index() == index)?;
        self.message_keys.remove(position)
    }

    #[must_use]
    pub fn has_message_keys(&self, index: u32) -> bool {
        self.message_keys.iter().any(|keys| keys.index() == index)
    }
}
