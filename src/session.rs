//! Session orchestration: X3DH setup, state archive and decrypt fallback.
//!
//! A [`Session`] holds the current [`SessionState`] for one remote address
//! plus up to [`ARCHIVED_STATES_MAX_LENGTH`] previous ones. Previous states
//! stay around because a peer may still be sending on a state we already
//! replaced, e.g. after both sides initiated at the same time.
//!
//! Every store-backed entry point takes the address's session lock from the
//! [`SessionStore`] for its whole load, mutate and persist cycle.

use crate::constants::ARCHIVED_STATES_MAX_LENGTH;
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};
use crate::message::{MessageContainer, PreKeySecureMessage, SecureMessage};
use crate::state::{PendingPreKey, SessionState};
use crate::storage::{
    Direction, IdentityKeyStore, PreKeyStore, ProtocolAddress, SessionStore, SignedPreKeyStore,
};
use crate::x3dh::PreKeyBundle;

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    state: SessionState,
    /// Most recently archived first.
    previous_states: VecDeque<SessionState>,
}

impl Session {
    #[must_use]
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            previous_states: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn previous_states(&self) -> &VecDeque<SessionState> {
        &self.previous_states
    }

    /// Whether the current state is still active, i.e. not archived.
    #[must_use]
    pub fn has_current_state(&self) -> bool {
        !self.state.is_archived()
    }

    /// Whether any state, current or archived, was set up from `base_key`.
    #[must_use]
    pub fn has_state(&self, base_key: &PublicKey, version: u8) -> bool {
        std::iter::once(&self.state)
            .chain(&self.previous_states)
            .any(|state| state.alice_base_key() == base_key && state.version() == version)
    }

    /// Moves the current state to the front of the archive.
    ///
    /// The oldest archived state is dropped once the archive is full. Does
    /// nothing if the current state is already archived.
    pub fn archive_current_state(&mut self) {
        if self.state.is_archived() {
            return;
        }
        if self.previous_states.len() >= ARCHIVED_STATES_MAX_LENGTH {
            self.previous_states.pop_back();
        }
        self.state.set_archived(true);
        self.previous_states.push_front(self.state.clone());
        debug!(archived = self.previous_states.len(), "archived current session state");
    }

    /// Archives the current state and makes `state` current.
    pub fn promote_state(&mut self, mut state: SessionState) {
        self.archive_current_state();
        state.set_archived(false);
        self.state = state;
    }

    /// Builds an initiator session from a peer's prekey bundle and stores it.
    ///
    /// An existing session for `address` keeps its old state in the archive.
    /// Messages sent on the new state are prekey messages until the peer
    /// replies.
    ///
    /// # Errors
    /// - [`Error::UntrustedIdentity`] if the bundle's identity is not trusted
    /// - [`Error::InvalidSignature`] if the signed prekey signature is bad
    pub fn process_pre_key_bundle<R, S, I>(
        rng: &mut R,
        bundle: &PreKeyBundle,
        address: &ProtocolAddress,
        session_store: &mut S,
        identity_store: &mut I,
    ) -> Result<Self>
    where
        R: CryptoRngCore,
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
    {
        let lock = session_store.session_lock(address);
        let _guard = lock.lock();

        let their_identity = bundle.identity_key;
        if !identity_store.is_trusted_identity(address, &their_identity, Direction::Sending)? {
            warn!(%address, "refusing prekey bundle from untrusted identity");
            return Err(Error::UntrustedIdentity);
        }
        bundle.verify_signature()?;

        let our_identity = identity_store.identity_key_pair()?;
        let our_base_key = KeyPair::generate(rng);
        let their_one_time_pre_key = bundle.one_time_pre_key;

        let mut state = SessionState::initiate(
            rng,
            &our_identity,
            &our_base_key,
            their_identity,
            bundle.signed_pre_key.public_key,
            their_one_time_pre_key.map(|pre_key| pre_key.public_key),
        )?;
        state.set_pending_pre_key(PendingPreKey {
            one_time_pre_key_id: their_one_time_pre_key.map(|pre_key| pre_key.id),
            signed_pre_key_id: bundle.signed_pre_key.id,
            base_key: our_base_key.public_key,
        });
        state.set_local_registration_id(identity_store.local_registration_id()?);
        state.set_remote_registration_id(Some(bundle.registration_id));

        identity_store.save_identity(address, &their_identity)?;

        let session = match session_store.load_session(address)? {
            Some(mut session) => {
                session.promote_state(state);
                session
            }
            None => Self::new(state),
        };
        session_store.store_session(address, &session)?;

        debug!(
            %address,
            one_time_pre_key = their_one_time_pre_key.is_some(),
            "processed prekey bundle"
        );
        Ok(session)
    }

    /// Builds the responder side of a session from a prekey message and
    /// stores it.
    ///
    /// If a state for the message's base key already exists the stored
    /// session is returned untouched.
    ///
    /// # Errors
    /// - [`Error::UntrustedIdentity`] if the sender's identity is not trusted
    /// - [`Error::InvalidKeyIdentifier`] if a referenced prekey is unknown
    pub fn process_pre_key_message<S, I, P, SP>(
        message: &PreKeySecureMessage,
        address: &ProtocolAddress,
        session_store: &mut S,
        identity_store: &mut I,
        pre_key_store: &P,
        signed_pre_key_store: &SP,
    ) -> Result<Self>
    where
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
        P: PreKeyStore + ?Sized,
        SP: SignedPreKeyStore + ?Sized,
    {
        let lock = session_store.session_lock(address);
        let _guard = lock.lock();

        let (session, created) = Self::build_pre_key_session(
            message,
            address,
            &*session_store,
            &*identity_store,
            pre_key_store,
            signed_pre_key_store,
        )?;
        if created {
            identity_store.save_identity(address, message.identity_key())?;
            session_store.store_session(address, &session)?;
        }
        Ok(session)
    }

    /// Derives the session a prekey message would set up without storing
    /// anything. The flag is false when an existing state already matches
    /// the message's base key.
    fn build_pre_key_session<S, I, P, SP>(
        message: &PreKeySecureMessage,
        address: &ProtocolAddress,
        session_store: &S,
        identity_store: &I,
        pre_key_store: &P,
        signed_pre_key_store: &SP,
    ) -> Result<(Self, bool)>
    where
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
        P: PreKeyStore + ?Sized,
        SP: SignedPreKeyStore + ?Sized,
    {
        let their_identity = *message.identity_key();
        if !identity_store.is_trusted_identity(address, &their_identity, Direction::Receiving)? {
            warn!(%address, "refusing prekey message from untrusted identity");
            return Err(Error::UntrustedIdentity);
        }

        let existing = session_store.load_session(address)?;
        if let Some(session) = existing
            .as_ref()
            .filter(|session| session.has_state(message.base_key(), message.message_version()))
        {
            debug!(%address, "prekey message matches an existing state");
            return Ok((session.clone(), false));
        }

        let our_signed_pre_key = signed_pre_key_store.load_signed_pre_key(message.signed_pre_key_id())?;
        let our_one_time_pre_key = message
            .one_time_pre_key_id()
            .map(|id| pre_key_store.load_pre_key(id))
            .transpose()?;
        let our_identity = identity_store.identity_key_pair()?;

        let mut state = SessionState::respond(
            &our_identity,
            &our_signed_pre_key.key_pair,
            our_one_time_pre_key.as_ref().map(|pre_key| &pre_key.key_pair),
            their_identity,
            *message.base_key(),
        )?;
        state.set_local_registration_id(identity_store.local_registration_id()?);
        state.set_remote_registration_id(message.registration_id());

        let session = match existing {
            Some(mut session) => {
                session.promote_state(state);
                session
            }
            None => Self::new(state),
        };

        debug!(%address, "processed prekey message");
        Ok((session, true))
    }

    /// Encrypts `plaintext` with the current state and stores the session.
    ///
    /// The chain advances even if storing fails. Retry the store, never the
    /// encryption, or the peer will see a gap.
    pub fn encrypt<S>(
        &mut self,
        plaintext: &[u8],
        address: &ProtocolAddress,
        session_store: &mut S,
    ) -> Result<MessageContainer>
    where
        S: SessionStore + ?Sized,
    {
        let lock = session_store.session_lock(address);
        let _guard = lock.lock();

        let container = self.state.encrypt(plaintext)?;
        session_store.store_session(address, self)?;
        Ok(container)
    }

    /// Loads the session for `address`, encrypts `plaintext` and stores it.
    ///
    /// # Errors
    /// - [`Error::SessionNotFound`] if there is no session for `address`
    /// - [`Error::UntrustedIdentity`] if the peer identity is no longer trusted
    pub fn encrypt_for<S, I>(
        address: &ProtocolAddress,
        plaintext: &[u8],
        session_store: &mut S,
        identity_store: &I,
    ) -> Result<MessageContainer>
    where
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
    {
        let lock = session_store.session_lock(address);
        let _guard = lock.lock();

        let mut session = session_store
            .load_session(address)?
            .ok_or(Error::SessionNotFound)?;

        let their_identity = session.state.their_identity();
        if !identity_store.is_trusted_identity(address, their_identity, Direction::Sending)? {
            warn!(%address, "refusing to encrypt for untrusted identity");
            return Err(Error::UntrustedIdentity);
        }

        session.encrypt(plaintext, address, session_store)
    }

    /// Decrypts a message from `address`, setting up a session first if it
    /// is a prekey message.
    ///
    /// An empty plaintext is a valid result. A prekey message whose payload
    /// fails to decrypt stores nothing, neither the new state nor the sender
    /// identity.
    ///
    /// # Errors
    /// - [`Error::SessionNotFound`] for a secure message with no session
    /// - [`Error::DuplicatedMessage`] if the message was already decrypted
    /// - [`Error::InvalidMessage`] if no state could decrypt the message
    pub fn decrypt<R, S, I, P, SP>(
        rng: &mut R,
        message: &MessageContainer,
        address: &ProtocolAddress,
        session_store: &mut S,
        identity_store: &mut I,
        pre_key_store: &mut P,
        signed_pre_key_store: &SP,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRngCore,
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
        P: PreKeyStore + ?Sized,
        SP: SignedPreKeyStore + ?Sized,
    {
        let lock = session_store.session_lock(address);
        let _guard = lock.lock();

        match message {
            MessageContainer::SecureMessage(message) => {
                Self::decrypt_secure_message(rng, message, address, session_store, &*identity_store)
            }
            MessageContainer::PreKeySecureMessage(message) => Self::decrypt_pre_key_message(
                rng,
                message,
                address,
                session_store,
                identity_store,
                pre_key_store,
                signed_pre_key_store,
            ),
        }
    }

    fn decrypt_pre_key_message<R, S, I, P, SP>(
        rng: &mut R,
        message: &PreKeySecureMessage,
        address: &ProtocolAddress,
        session_store: &mut S,
        identity_store: &mut I,
        pre_key_store: &mut P,
        signed_pre_key_store: &SP,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRngCore,
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
        P: PreKeyStore + ?Sized,
        SP: SignedPreKeyStore + ?Sized,
    {
        let (mut session, created) = Self::build_pre_key_session(
            message,
            address,
            &*session_store,
            &*identity_store,
            &*pre_key_store,
            signed_pre_key_store,
        )?;
        let plaintext = session.decrypt_message(rng, message.message())?;

        if created {
            identity_store.save_identity(address, message.identity_key())?;
        }
        session_store.store_session(address, &session)?;

        if let Some(id) = message.one_time_pre_key_id() {
            if let Err(error) = pre_key_store.remove_pre_key(id) {
                warn!(%address, %id, %error, "could not remove used one-time prekey");
            }
        }

        Ok(plaintext)
    }

    fn decrypt_secure_message<R, S, I>(
        rng: &mut R,
        message: &SecureMessage,
        address: &ProtocolAddress,
        session_store: &mut S,
        identity_store: &I,
    ) -> Result<Vec<u8>>
    where
        R: CryptoRngCore,
        S: SessionStore + ?Sized,
        I: IdentityKeyStore + ?Sized,
    {
        let mut session = session_store
            .load_session(address)?
            .ok_or(Error::SessionNotFound)?;

        let their_identity = session.state.their_identity();
        if !identity_store.is_trusted_identity(address, their_identity, Direction::Receiving)? {
            warn!(%address, "refusing message from untrusted identity");
            return Err(Error::UntrustedIdentity);
        }

        let plaintext = session.decrypt_message(rng, message)?;
        session_store.store_session(address, &session)?;
        Ok(plaintext)
    }

    /// Tries the current state, then each archived state from newest to
    /// oldest. The archived state that decrypts is promoted.
    ///
    /// A duplicate is reported at once and no archived state is tried.
    pub fn decrypt_message<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        message: &SecureMessage,
    ) -> Result<Vec<u8>> {
        match self.state.decrypt_message(rng, message) {
            Ok(plaintext) => return Ok(plaintext),
            Err(error) if error.is_duplicate() => return Err(error),
            Err(error) => {
                debug!(
                    %error,
                    previous_states = self.previous_states.len(),
                    "current state failed to decrypt, trying previous states"
                );
            }
        }

        for index in 0..self.previous_states.len() {
            match self.previous_states[index].decrypt_message(rng, message) {
                Ok(plaintext) => {
                    if let Some(state) = self.previous_states.remove(index) {
                        debug!(index, "promoting previous state that decrypted");
                        self.promote_state(state);
                    }
                    return Ok(plaintext);
                }
                Err(error) if error.is_duplicate() => return Err(error),
                Err(_) => {}
            }
        }

        warn!(counter = message.counter(), "no session state could decrypt message");
        Err(Error::InvalidMessage)
    }
}
