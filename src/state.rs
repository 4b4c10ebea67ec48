//! The Double Ratchet state machine for one session instance.
//!
//! A [`SessionState`] has no explicit mode. Whether it still announces
//! itself with prekey messages depends on [`PendingPreKey`]. Whether an
//! incoming message triggers a DH ratchet step depends on whether its
//! ratchet key matches one of the receiver chains.
//!
//! Decryption works on a copy of the state and commits only on success.
//! Any failure leaves the state exactly as it was.

use crate::chain::{ReceiverChain, SenderChain};
use crate::constants::{CURRENT_VERSION, FUTURE_MESSAGES_LIMIT, MAX_RECEIVER_CHAINS};
use crate::crypto::{aes_cbc_decrypt, aes_cbc_encrypt};
use crate::error::{Error, Result};
use crate::kdf::{RatchetMessageKeys, RatchetRootKey};
use crate::keys::{IdentityKeyPair, IdentityKeyPublic, KeyPair, PublicKey};
use crate::message::{MessageContainer, PreKeySecureMessage, SecureMessage};
use crate::x3dh::{calculate_initiator_secret, calculate_responder_secret};

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};
use uuid::Uuid;

/// Which of the peer's prekeys an unacknowledged session was built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub one_time_pre_key_id: Option<Uuid>,
    pub signed_pre_key_id: Uuid,
    pub base_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    version: u8,
    our_identity: IdentityKeyPublic,
    their_identity: IdentityKeyPublic,
    root_key: RatchetRootKey,
    previous_counter: u32,
    sender_chain: SenderChain,
    receiver_chains: VecDeque<ReceiverChain>,
    pending_pre_key: Option<PendingPreKey>,
    local_registration_id: Option<Uuid>,
    remote_registration_id: Option<Uuid>,
    alice_base_key: PublicKey,
    archived: bool,
}

impl SessionState {
    /// State for the party that processed a prekey bundle.
    ///
    /// The peer's signed prekey doubles as their first ratchet key, so the
    /// state starts with one receiver chain for it and a sender chain that
    /// has already taken one DH ratchet step.
    pub fn initiate<R: CryptoRngCore>(
        rng: &mut R,
        our_identity: &IdentityKeyPair,
        our_base_key: &KeyPair,
        their_identity: IdentityKeyPublic,
        their_signed_pre_key: PublicKey,
        their_one_time_pre_key: Option<PublicKey>,
    ) -> Result<Self> {
        let secret = calculate_initiator_secret(
            our_identity,
            our_base_key,
            &their_identity,
            &their_signed_pre_key,
            their_one_time_pre_key.as_ref(),
        )?;
        let (root_key, chain_key) = RatchetRootKey::create_chain_from(&secret)?;

        let sending_ratchet_key = KeyPair::generate(rng);
        let (sending_root_key, sending_chain_key) =
            root_key.create_chain(&their_signed_pre_key, &sending_ratchet_key.private_key)?;

        Ok(Self {
            version: CURRENT_VERSION,
            our_identity: our_identity.identity_key(),
            their_identity,
            root_key: sending_root_key,
            previous_counter: 0,
            sender_chain: SenderChain::new(sending_ratchet_key, sending_chain_key),
            receiver_chains: VecDeque::from([ReceiverChain::new(their_signed_pre_key, chain_key)]),
            pending_pre_key: None,
            local_registration_id: None,
            remote_registration_id: None,
            alice_base_key: our_base_key.public_key,
            archived: false,
        })
    }

    /// State for the party that received a prekey message.
    ///
    /// Our signed prekey is the initial sending ratchet key.
    pub fn respond(
        our_identity: &IdentityKeyPair,
        our_signed_pre_key: &KeyPair,
        our_one_time_pre_key: Option<&KeyPair>,
        their_identity: IdentityKeyPublic,
        their_base_key: PublicKey,
    ) -> Result<Self> {
        let secret = calculate_responder_secret(
            our_identity,
            our_signed_pre_key,
            our_one_time_pre_key,
            &their_identity,
            &their_base_key,
        )?;
        let (root_key, chain_key) = RatchetRootKey::create_chain_from(&secret)?;

        Ok(Self {
            version: CURRENT_VERSION,
            our_identity: our_identity.identity_key(),
            their_identity,
            root_key,
            previous_counter: 0,
            sender_chain: SenderChain::new(our_signed_pre_key.clone(), chain_key),
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id: None,
            remote_registration_id: None,
            alice_base_key: their_base_key,
            archived: false,
        })
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn our_identity(&self) -> &IdentityKeyPublic {
        &self.our_identity
    }

    #[must_use]
    pub fn their_identity(&self) -> &IdentityKeyPublic {
        &self.their_identity
    }

    /// Base key of whoever initiated this state; identifies it together
    /// with [`version`](Self::version).
    #[must_use]
    pub fn alice_base_key(&self) -> &PublicKey {
        &self.alice_base_key
    }

    #[must_use]
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    #[must_use]
    pub fn sender_chain(&self) -> &SenderChain {
        &self.sender_chain
    }

    /// Index the next outgoing message will carry.
    #[must_use]
    pub fn sender_chain_index(&self) -> u32 {
        self.sender_chain.chain_key.index()
    }

    #[must_use]
    pub fn receiver_chains(&self) -> &VecDeque<ReceiverChain> {
        &self.receiver_chains
    }

    #[must_use]
    pub fn receiver_chain(&self, ratchet_key: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|chain| chain.ratchet_key() == ratchet_key)
    }

    fn receiver_chain_mut(&mut self, ratchet_key: &PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|chain| chain.ratchet_key() == ratchet_key)
    }

    #[must_use]
    pub fn pending_pre_key(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub(crate) fn set_pending_pre_key(&mut self, pending_pre_key: PendingPreKey) {
        self.pending_pre_key = Some(pending_pre_key);
    }

    #[must_use]
    pub fn local_registration_id(&self) -> Option<Uuid> {
        self.local_registration_id
    }

    pub(crate) fn set_local_registration_id(&mut self, id: Uuid) {
        self.local_registration_id = Some(id);
    }

    #[must_use]
    pub fn remote_registration_id(&self) -> Option<Uuid> {
        self.remote_registration_id
    }

    pub(crate) fn set_remote_registration_id(&mut self, id: Option<Uuid>) {
        self.remote_registration_id = id;
    }

    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub(crate) fn set_archived(&mut self, archived: bool) {
        self.archived = archived;
    }

    /// Encrypts `plaintext` under the current sending chain and advances it.
    ///
    /// While a [`PendingPreKey`] is set the result is a prekey message, so
    /// the peer can build its side of the session from it.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<MessageContainer> {
        let chain_key = &self.sender_chain.chain_key;
        let next_chain_key = chain_key.next_chain_key()?;
        let message_keys = chain_key.message_keys()?;

        let ciphertext = aes_cbc_encrypt(message_keys.cipher_key(), message_keys.iv(), plaintext)?;
        let message = SecureMessage::new(
            self.version,
            message_keys.mac_key(),
            self.sender_chain.ratchet_key_pair.public_key,
            chain_key.index(),
            self.previous_counter,
            ciphertext,
            &self.our_identity,
            &self.their_identity,
        )?;

        let container = match &self.pending_pre_key {
            Some(pending) => MessageContainer::PreKeySecureMessage(PreKeySecureMessage::new(
                self.version,
                self.local_registration_id,
                pending.one_time_pre_key_id,
                pending.signed_pre_key_id,
                pending.base_key,
                self.our_identity,
                message,
            )?),
            None => MessageContainer::SecureMessage(message),
        };

        self.sender_chain.chain_key = next_chain_key;
        Ok(container)
    }

    /// Decrypts `message`, committing ratchet progress only on success.
    pub fn decrypt_message<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &SecureMessage,
    ) -> Result<Vec<u8>> {
        let mut working = self.clone();
        let plaintext = working.decrypt_in_place(rng, message)?;
        *self = working;
        Ok(plaintext)
    }

    fn decrypt_in_place<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &SecureMessage,
    ) -> Result<Vec<u8>> {
        let message_version = message.message_version();
        if message_version < self.version {
            return Err(Error::LegacyCiphertextVersion(message_version));
        }
        if message_version > self.version {
            return Err(Error::UnrecognizedMessageVersion(message_version));
        }

        let their_ratchet_key = *message.sender_ratchet_key();
        self.get_or_create_receiver_chain(rng, &their_ratchet_key)?;
        let message_keys = self.get_or_create_message_keys(&their_ratchet_key, message.counter())?;

        if !message.verify_mac(&self.their_identity, &self.our_identity, message_keys.mac_key())? {
            return Err(Error::MessageVerificationFailed);
        }

        let plaintext = aes_cbc_decrypt(
            message_keys.cipher_key(),
            message_keys.iv(),
            message.ciphertext(),
        )?;

        self.pending_pre_key = None;
        Ok(plaintext)
    }

    /// Ensures a receiver chain exists for `their_ratchet_key`, taking a DH
    /// ratchet step when the key is new.
    fn get_or_create_receiver_chain<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        their_ratchet_key: &PublicKey,
    ) -> Result<()> {
        if self.receiver_chain(their_ratchet_key).is_some() {
            return Ok(());
        }

        debug!(
            receiver_chains = self.receiver_chains.len(),
            "new peer ratchet key, stepping DH ratchet"
        );

        let (receiver_root_key, receiver_chain_key) = self
            .root_key
            .create_chain(their_ratchet_key, &self.sender_chain.ratchet_key_pair.private_key)?;

        let our_new_ratchet_key = KeyPair::generate(rng);
        let (sender_root_key, sender_chain_key) =
            receiver_root_key.create_chain(their_ratchet_key, &our_new_ratchet_key.private_key)?;

        self.root_key = sender_root_key;
        self.add_receiver_chain(ReceiverChain::new(*their_ratchet_key, receiver_chain_key));
        self.previous_counter = self.sender_chain.chain_key.index().saturating_sub(1);
        self.sender_chain = SenderChain::new(our_new_ratchet_key, sender_chain_key);

        Ok(())
    }

    fn add_receiver_chain(&mut self, chain: ReceiverChain) {
        self.receiver_chains.push_back(chain);
        while self.receiver_chains.len() > MAX_RECEIVER_CHAINS {
            self.receiver_chains.pop_front();
        }
    }

    /// Message keys for `counter` on the chain of `their_ratchet_key`.
    ///
    /// Counters behind the chain come from the skipped-key cache and are
    /// removed from it. Counters ahead of it advance the chain and cache the
    /// keys in between.
    fn get_or_create_message_keys(
        &mut self,
        their_ratchet_key: &PublicKey,
        counter: u32,
    ) -> Result<RatchetMessageKeys> {
        let chain = self
            .receiver_chain_mut(their_ratchet_key)
            .ok_or(Error::Internal("receiver chain missing after ratchet step"))?;
        let chain_index = chain.chain_key.index();

        if counter < chain_index {
            return chain
                .take_message_keys(counter)
                .ok_or(Error::DuplicatedMessage { index: counter });
        }

        if counter - chain_index > FUTURE_MESSAGES_LIMIT {
            return Err(Error::FutureMessageLimitExceeded {
                index: chain_index,
                counter,
            });
        }

        if counter > chain_index {
            trace!(from = chain_index, to = counter, "caching skipped message keys");
        }

        let mut chain_key = chain.chain_key.clone();
        while chain_key.index() < counter {
            chain.push_message_keys(chain_key.message_keys()?);
            chain_key = chain_key.next_chain_key()?;
        }

        let message_keys = chain_key.message_keys()?;
        chain.chain_key = chain_key.next_chain_key()?;
        Ok(message_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn state_pair() -> (SessionState, SessionState) {
        let alice_identity = IdentityKeyPair::generate(&mut OsRng);
        let bob_identity = IdentityKeyPair::generate(&mut OsRng);
        let bob_signed_pre_key = KeyPair::generate(&mut OsRng);
        let alice_base_key = KeyPair::generate(&mut OsRng);

        let alice = SessionState::initiate(
            &mut OsRng,
            &alice_identity,
            &alice_base_key,
            bob_identity.identity_key(),
            bob_signed_pre_key.public_key,
            None,
        )
        .unwrap();
        let bob = SessionState::respond(
            &bob_identity,
            &bob_signed_pre_key,
            None,
            alice_identity.identity_key(),
            alice_base_key.public_key,
        )
        .unwrap();

        (alice, bob)
    }

    fn secure(container: MessageContainer) -> SecureMessage {
        match container {
            MessageContainer::SecureMessage(message) => message,
            MessageContainer::PreKeySecureMessage(message) => message.message().clone(),
        }
    }

    #[test]
    fn test_round_trip_both_directions() {
        let (mut alice, mut bob) = state_pair();

        let to_bob = secure(alice.encrypt(b"hi bob").unwrap());
        assert_eq!(bob.decrypt_message(&mut OsRng, &to_bob).unwrap(), b"hi bob");

        let to_alice = secure(bob.encrypt(b"hi alice").unwrap());
        assert_eq!(alice.decrypt_message(&mut OsRng, &to_alice).unwrap(), b"hi alice");

        let empty = secure(alice.encrypt(b"").unwrap());
        assert!(bob.decrypt_message(&mut OsRng, &empty).unwrap().is_empty());
    }

    #[test]
    fn test_responder_can_send_first() {
        let (mut alice, mut bob) = state_pair();

        let to_alice = secure(bob.encrypt(b"early").unwrap());
        assert_eq!(alice.decrypt_message(&mut OsRng, &to_alice).unwrap(), b"early");
    }

    #[test]
    fn test_sender_index_counts_encrypts() {
        let (mut alice, _) = state_pair();
        for _ in 0..7 {
            alice.encrypt(b"x").unwrap();
        }
        assert_eq!(alice.sender_chain_index(), 7);
    }

    #[test]
    fn test_out_of_order_and_duplicate() {
        let (mut alice, mut bob) = state_pair();
        let messages: Vec<_> = (0..5u8)
            .map(|i| secure(alice.encrypt(&[i]).unwrap()))
            .collect();

        for i in (0..5u8).rev() {
            let plaintext = bob.decrypt_message(&mut OsRng, &messages[usize::from(i)]).unwrap();
            assert_eq!(plaintext, [i]);
        }

        let replay = bob.decrypt_message(&mut OsRng, &messages[2]);
        assert_eq!(replay.unwrap_err(), Error::DuplicatedMessage { index: 2 });
    }

    #[test]
    fn test_skipped_keys_are_cached_and_consumed() {
        let (mut alice, mut bob) = state_pair();
        let messages: Vec<_> = (0..4u8)
            .map(|i| secure(alice.encrypt(&[i]).unwrap()))
            .collect();
        let ratchet_key = *messages[0].sender_ratchet_key();

        bob.decrypt_message(&mut OsRng, &messages[3]).unwrap();
        assert_eq!(bob.receiver_chain(&ratchet_key).unwrap().skipped_key_count(), 3);

        bob.decrypt_message(&mut OsRng, &messages[1]).unwrap();
        assert_eq!(bob.receiver_chain(&ratchet_key).unwrap().skipped_key_count(), 2);
    }

    #[test]
    fn test_future_limit_leaves_state_untouched() {
        let (mut alice, mut bob) = state_pair();

        let first = secure(alice.encrypt(b"first").unwrap());
        bob.decrypt_message(&mut OsRng, &first).unwrap();

        for _ in 0..FUTURE_MESSAGES_LIMIT {
            alice.encrypt(b"skipped").unwrap();
        }
        let too_far = secure(alice.encrypt(b"too far").unwrap());
        assert_eq!(too_far.counter(), FUTURE_MESSAGES_LIMIT + 1);

        let before = bob.clone();
        let result = bob.decrypt_message(&mut OsRng, &too_far);
        assert_eq!(
            result.unwrap_err(),
            Error::FutureMessageLimitExceeded {
                index: 1,
                counter: FUTURE_MESSAGES_LIMIT + 1
            }
        );
        assert_eq!(bob, before);
    }

    #[test]
    fn test_jump_at_exact_limit_is_accepted() {
        let (mut alice, mut bob) = state_pair();

        for _ in 0..FUTURE_MESSAGES_LIMIT {
            alice.encrypt(b"skipped").unwrap();
        }
        let at_limit = secure(alice.encrypt(b"at limit").unwrap());
        assert_eq!(at_limit.counter(), FUTURE_MESSAGES_LIMIT);

        assert_eq!(bob.decrypt_message(&mut OsRng, &at_limit).unwrap(), b"at limit");
    }

    #[test]
    fn test_tampered_message_fails_without_mutation() {
        let (mut alice, mut bob) = state_pair();
        let message = secure(alice.encrypt(b"payload").unwrap());

        let mut bytes = message.serialized().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = SecureMessage::from_bytes(&bytes).unwrap();

        let before = bob.clone();
        assert_eq!(
            bob.decrypt_message(&mut OsRng, &tampered).unwrap_err(),
            Error::MessageVerificationFailed
        );
        assert_eq!(bob, before);

        assert_eq!(bob.decrypt_message(&mut OsRng, &message).unwrap(), b"payload");
    }

    #[test]
    fn test_receiver_chains_are_bounded() {
        let (mut alice, mut bob) = state_pair();
        let mut first_ratchet_key = None;

        for round in 0..=MAX_RECEIVER_CHAINS {
            let to_bob = secure(alice.encrypt(b"ping").unwrap());
            first_ratchet_key.get_or_insert(*to_bob.sender_ratchet_key());
            bob.decrypt_message(&mut OsRng, &to_bob).unwrap();
            assert_eq!(bob.receiver_chains().len(), (round + 1).min(MAX_RECEIVER_CHAINS));

            let to_alice = secure(bob.encrypt(b"pong").unwrap());
            alice.decrypt_message(&mut OsRng, &to_alice).unwrap();
        }

        let first = first_ratchet_key.unwrap();
        assert!(bob.receiver_chain(&first).is_none());
    }

    #[test]
    fn test_previous_counter_tracks_last_sending_chain() {
        let (mut alice, mut bob) = state_pair();

        for _ in 0..3 {
            let message = secure(alice.encrypt(b"a").unwrap());
            bob.decrypt_message(&mut OsRng, &message).unwrap();
        }

        let reply = secure(bob.encrypt(b"b").unwrap());
        alice.decrypt_message(&mut OsRng, &reply).unwrap();

        assert_eq!(alice.previous_counter(), 2);
        let next = secure(alice.encrypt(b"c").unwrap());
        assert_eq!(next.previous_counter(), 2);
        assert_eq!(next.counter(), 0);
    }

    #[test]
    fn test_pending_prekey_wraps_until_reply() {
        let (mut alice, mut bob) = state_pair();
        alice.set_pending_pre_key(PendingPreKey {
            one_time_pre_key_id: None,
            signed_pre_key_id: Uuid::from_u128(1),
            base_key: *alice.alice_base_key(),
        });

        let first = alice.encrypt(b"one").unwrap();
        assert!(first.is_pre_key_message());
        bob.decrypt_message(&mut OsRng, &secure(first)).unwrap();

        let reply = secure(bob.encrypt(b"two").unwrap());
        alice.decrypt_message(&mut OsRng, &reply).unwrap();

        assert!(alice.pending_pre_key().is_none());
        assert!(!alice.encrypt(b"three").unwrap().is_pre_key_message());
    }

    #[test]
    fn test_state_survives_json_persistence() {
        let (mut alice, mut bob) = state_pair();
        let message = secure(alice.encrypt(b"persisted").unwrap());

        let json = serde_json::to_string(&bob).unwrap();
        let mut restored: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, bob);

        assert_eq!(restored.decrypt_message(&mut OsRng, &message).unwrap(), b"persisted");
        assert_eq!(bob.decrypt_message(&mut OsRng, &message).unwrap(), b"persisted");
    }
}
