//! Storage abstractions for identities, prekeys and sessions.
//!
//! The session engine only talks to these traits. The in-memory backends
//! are cheaply cloneable handles over shared `Arc<Mutex<_>>` maps, suitable
//! for tests and for applications that persist elsewhere.

use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, IdentityKeyPublic};
use crate::lock::{SessionLock, SessionLockRegistry};
use crate::session::Session;
use crate::x3dh::{OneTimePreKeyPair, SignedPreKeyPair};

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One device of one user; the key for sessions, identities and locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolAddress {
    pub user_id: Uuid,
    pub device_id: Uuid,
}

impl ProtocolAddress {
    #[must_use]
    pub fn new(user_id: Uuid, device_id: Uuid) -> Self {
        Self { user_id, device_id }
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.user_id, self.device_id)
    }
}

/// Whether an identity is checked before sending to it or after receiving
/// from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Our own identity plus the identities we have seen for remote addresses.
pub trait IdentityKeyStore: Send + Sync {
    /// Our long-term identity key pair.
    fn identity_key_pair(&self) -> Result<IdentityKeyPair>;

    /// Our registration id, sent along with prekey messages.
    fn local_registration_id(&self) -> Result<Uuid>;

    /// Records `identity` for `address`.
    ///
    /// Returns `true` if it replaced a different identity.
    fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKeyPublic) -> Result<bool>;

    /// Whether `identity` may be used for `address` in `direction`.
    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKeyPublic,
        direction: Direction,
    ) -> Result<bool>;

    fn identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKeyPublic>>;
}

/// Storage backend for our one-time prekeys.
///
/// A one-time prekey is removed once a session has been built from it.
pub trait PreKeyStore: Send + Sync {
    /// Loads a one-time prekey.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKeyIdentifier`] if no prekey has this id.
    fn load_pre_key(&self, id: Uuid) -> Result<OneTimePreKeyPair>;

    /// Stores a one-time prekey, replacing any with the same id.
    fn store_pre_key(&mut self, pre_key: OneTimePreKeyPair) -> Result<()>;

    /// # Errors
    /// Returns [`Error::InvalidKeyIdentifier`] if no prekey has this id.
    fn remove_pre_key(&mut self, id: Uuid) -> Result<()>;

    fn remove_all_pre_keys(&mut self) -> Result<()>;

    /// Number of one-time prekeys left, for replenishment decisions.
    fn pre_key_count(&self) -> Result<usize>;
}

/// Storage backend for our signed prekeys.
pub trait SignedPreKeyStore: Send + Sync {
    /// # Errors
    /// Returns [`Error::InvalidKeyIdentifier`] if no signed prekey has this id.
    fn load_signed_pre_key(&self, id: Uuid) -> Result<SignedPreKeyPair>;

    fn store_signed_pre_key(&mut self, signed_pre_key: SignedPreKeyPair) -> Result<()>;

    /// # Errors
    /// Returns [`Error::InvalidKeyIdentifier`] if no signed prekey has this id.
    fn remove_signed_pre_key(&mut self, id: Uuid) -> Result<()>;

    fn remove_all_signed_pre_keys(&mut self) -> Result<()>;
}

/// Storage backend for sessions, one per remote address.
///
/// Implementations also hand out the per-address [`SessionLock`] that
/// serializes work on a session.
pub trait SessionStore: Send + Sync {
    fn session_lock(&self, address: &ProtocolAddress) -> SessionLock;

    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<Session>>;

    /// Loads the sessions for all `addresses`, in order.
    ///
    /// # Errors
    /// Returns [`Error::SessionNotFound`] if any address has no session.
    fn load_existing_sessions(&self, addresses: &[ProtocolAddress]) -> Result<Vec<Session>> {
        addresses
            .iter()
            .map(|address| self.load_session(address)?.ok_or(Error::SessionNotFound))
            .collect()
    }

    fn store_session(&mut self, address: &ProtocolAddress, session: &Session) -> Result<()>;
}

/// In-memory identity store with trust on first use.
///
/// The first identity seen for an address is pinned. A different identity
/// for that address is untrusted in both directions until it is saved.
#[derive(Clone)]
pub struct InMemoryIdentityKeyStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: Uuid,
    known_identities: Arc<Mutex<HashMap<ProtocolAddress, IdentityKeyPublic>>>,
}

impl InMemoryIdentityKeyStore {
    #[must_use]
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: Uuid) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            known_identities: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a store with a fresh identity and a random registration id.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let identity_key_pair = IdentityKeyPair::generate(rng);
        let registration_id = crate::x3dh::random_uuid(rng);
        Self::new(identity_key_pair, registration_id)
    }
}

impl fmt::Debug for InMemoryIdentityKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryIdentityKeyStore")
            .field("identity_key", &self.identity_key_pair.identity_key())
            .field("registration_id", &self.registration_id)
            .finish_non_exhaustive()
    }
}

impl IdentityKeyStore for InMemoryIdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity_key_pair.clone())
    }

    fn local_registration_id(&self) -> Result<Uuid> {
        Ok(self.registration_id)
    }

    fn save_identity(&mut self, address: &ProtocolAddress, identity: &IdentityKeyPublic) -> Result<bool> {
        let mut known = self
            .known_identities
            .lock()
            .map_err(|_| Error::StorageError)?;
        let previous = known.insert(*address, *identity);
        Ok(previous.is_some_and(|previous| previous != *identity))
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKeyPublic,
        _direction: Direction,
    ) -> Result<bool> {
        let known = self
            .known_identities
            .lock()
            .map_err(|_| Error::StorageError)?;
        Ok(known.get(address).map_or(true, |stored| stored == identity))
    }

    fn identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKeyPublic>> {
        let known = self
            .known_identities
            .lock()
            .map_err(|_| Error::StorageError)?;
        Ok(known.get(address).copied())
    }
}

/// Thread-safe in-memory one-time prekey storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPreKeyStore {
    pre_keys: Arc<Mutex<HashMap<Uuid, OneTimePreKeyPair>>>,
}

impl InMemoryPreKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-inserts a batch of freshly generated prekeys.
    ///
    /// # Errors
    /// Returns error if the internal mutex is poisoned.
    pub fn populate(&mut self, pre_keys: Vec<OneTimePreKeyPair>) -> Result<()> {
        let mut store = self.pre_keys.lock().map_err(|_| Error::StorageError)?;
        for pre_key in pre_keys {
            store.insert(pre_key.id, pre_key);
        }
        Ok(())
    }
}

impl PreKeyStore for InMemoryPreKeyStore {
    fn load_pre_key(&self, id: Uuid) -> Result<OneTimePreKeyPair> {
        let store = self.pre_keys.lock().map_err(|_| Error::StorageError)?;
        store.get(&id).cloned().ok_or(Error::InvalidKeyIdentifier(id))
    }

    fn store_pre_key(&mut self, pre_key: OneTimePreKeyPair) -> Result<()> {
        let mut store = self.pre_keys.lock().map_err(|_| Error::StorageError)?;
        store.insert(pre_key.id, pre_key);
        Ok(())
    }

    fn remove_pre_key(&mut self, id: Uuid) -> Result<()> {
        let mut store = self.pre_keys.lock().map_err(|_| Error::StorageError)?;
        store
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::InvalidKeyIdentifier(id))
    }

    fn remove_all_pre_keys(&mut self) -> Result<()> {
        let mut store = self.pre_keys.lock().map_err(|_| Error::StorageError)?;
        store.clear();
        Ok(())
    }

    fn pre_key_count(&self) -> Result<usize> {
        let store = self.pre_keys.lock().map_err(|_| Error::StorageError)?;
        Ok(store.len())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySignedPreKeyStore {
    signed_pre_keys: Arc<Mutex<HashMap<Uuid, SignedPreKeyPair>>>,
}

impl InMemorySignedPreKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignedPreKeyStore for InMemorySignedPreKeyStore {
    fn load_signed_pre_key(&self, id: Uuid) -> Result<SignedPreKeyPair> {
        let store = self
            .signed_pre_keys
            .lock()
            .map_err(|_| Error::StorageError)?;
        store.get(&id).cloned().ok_or(Error::InvalidKeyIdentifier(id))
    }

    fn store_signed_pre_key(&mut self, signed_pre_key: SignedPreKeyPair) -> Result<()> {
        let mut store = self
            .signed_pre_keys
            .lock()
            .map_err(|_| Error::StorageError)?;
        store.insert(signed_pre_key.id, signed_pre_key);
        Ok(())
    }

    fn remove_signed_pre_key(&mut self, id: Uuid) -> Result<()> {
        let mut store = self
            .signed_pre_keys
            .lock()
            .map_err(|_| Error::StorageError)?;
        store
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::InvalidKeyIdentifier(id))
    }

    fn remove_all_signed_pre_keys(&mut self) -> Result<()> {
        let mut store = self
            .signed_pre_keys
            .lock()
            .map_err(|_| Error::StorageError)?;
        store.clear();
        Ok(())
    }
}

/// In-memory session storage with its own lock registry.
///
/// Clones share both the sessions and the locks, so every handle agrees on
/// which thread currently owns an address.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<ProtocolAddress, Session>>>,
    locks: Arc<SessionLockRegistry>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of addresses with a stored session.
    ///
    /// # Errors
    /// Returns error if the internal mutex is poisoned.
    pub fn session_count(&self) -> Result<usize> {
        let sessions = self.sessions.lock().map_err(|_| Error::StorageError)?;
        Ok(sessions.len())
    }
}

impl SessionStore for InMemorySessionStore {
    fn session_lock(&self, address: &ProtocolAddress) -> SessionLock {
        self.locks.lock_for(address)
    }

    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<Session>> {
        let sessions = self.sessions.lock().map_err(|_| Error::StorageError)?;
        Ok(sessions.get(address).cloned())
    }

    fn store_session(&mut self, address: &ProtocolAddress, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().map_err(|_| Error::StorageError)?;
        sessions.insert(*address, session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use rand_core::OsRng;

    fn address(n: u128) -> ProtocolAddress {
        ProtocolAddress::new(Uuid::from_u128(n), Uuid::from_u128(n + 1))
    }

    #[test]
    fn test_address_display() {
        let address = ProtocolAddress::new(Uuid::from_u128(1), Uuid::from_u128(2));
        assert_eq!(
            address.to_string(),
            "00000000-0000-0000-0000-000000000001.00000000-0000-0000-0000-000000000002"
        );
    }

    #[test]
    fn test_identity_trust_on_first_use() {
        let mut store = InMemoryIdentityKeyStore::generate(&mut OsRng);
        let bob = address(1);
        let first = IdentityKeyPair::generate(&mut OsRng).identity_key();
        let second = IdentityKeyPair::generate(&mut OsRng).identity_key();

        assert!(store.is_trusted_identity(&bob, &first, Direction::Sending).unwrap());
        assert!(!store.save_identity(&bob, &first).unwrap());
        assert!(store.is_trusted_identity(&bob, &first, Direction::Receiving).unwrap());
        assert!(!store.is_trusted_identity(&bob, &second, Direction::Sending).unwrap());
        assert!(!store.is_trusted_identity(&bob, &second, Direction::Receiving).unwrap());

        assert!(store.save_identity(&bob, &second).unwrap());
        assert_eq!(store.identity(&bob).unwrap(), Some(second));
        assert_eq!(store.identity(&address(9)).unwrap(), None);
    }

    #[test]
    fn test_identity_store_clones_share_state() {
        let mut store = InMemoryIdentityKeyStore::generate(&mut OsRng);
        let handle = store.clone();
        let identity = IdentityKeyPair::generate(&mut OsRng).identity_key();

        store.save_identity(&address(1), &identity).unwrap();
        assert_eq!(handle.identity(&address(1)).unwrap(), Some(identity));
        assert_eq!(
            handle.local_registration_id().unwrap(),
            store.local_registration_id().unwrap()
        );
    }

    #[test]
    fn test_pre_key_store() {
        let mut store = InMemoryPreKeyStore::new();
        let batch = OneTimePreKeyPair::generate_batch(&mut OsRng, 3);
        let first = batch[0].clone();
        store.populate(batch).unwrap();
        assert_eq!(store.pre_key_count().unwrap(), 3);

        assert_eq!(store.load_pre_key(first.id).unwrap(), first);
        store.remove_pre_key(first.id).unwrap();
        assert_eq!(store.load_pre_key(first.id), Err(Error::InvalidKeyIdentifier(first.id)));
        assert_eq!(store.remove_pre_key(first.id), Err(Error::InvalidKeyIdentifier(first.id)));

        store.store_pre_key(first.clone()).unwrap();
        assert_eq!(store.pre_key_count().unwrap(), 3);

        store.remove_all_pre_keys().unwrap();
        assert_eq!(store.pre_key_count().unwrap(), 0);
    }

    #[test]
    fn test_signed_pre_key_store() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let mut store = InMemorySignedPreKeyStore::new();
        let signed_pre_key = SignedPreKeyPair::generate(&mut OsRng, &identity);
        let id = signed_pre_key.id;

        store.store_signed_pre_key(signed_pre_key.clone()).unwrap();
        assert_eq!(store.load_signed_pre_key(id).unwrap(), signed_pre_key);

        store.remove_signed_pre_key(id).unwrap();
        assert_eq!(store.load_signed_pre_key(id), Err(Error::InvalidKeyIdentifier(id)));

        store.store_signed_pre_key(signed_pre_key).unwrap();
        store.remove_all_signed_pre_keys().unwrap();
        assert!(store.load_signed_pre_key(id).is_err());
    }

    #[test]
    fn test_load_existing_sessions_requires_all() {
        let mut store = InMemorySessionStore::new();
        let alice_identity = IdentityKeyPair::generate(&mut OsRng);
        let bob_identity = IdentityKeyPair::generate(&mut OsRng);
        let bob_signed_pre_key = KeyPair::generate(&mut OsRng);

        let state = crate::state::SessionState::respond(
            &bob_identity,
            &bob_signed_pre_key,
            None,
            alice_identity.identity_key(),
            KeyPair::generate(&mut OsRng).public_key,
        )
        .unwrap();
        let session = Session::new(state);

        store.store_session(&address(1), &session).unwrap();
        store.store_session(&address(3), &session).unwrap();
        assert_eq!(store.session_count().unwrap(), 2);

        let loaded = store.load_existing_sessions(&[address(1), address(3)]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], session);

        assert_eq!(
            store.load_existing_sessions(&[address(1), address(5)]),
            Err(Error::SessionNotFound)
        );
    }

    #[test]
    fn test_session_store_clones_share_locks() {
        let store = InMemorySessionStore::new();
        let handle = store.clone();

        let lock = store.session_lock(&address(1));
        let _guard = lock.lock();
        // Reentrant on this thread through another handle
        let same = handle.session_lock(&address(1));
        let _again = same.lock();
    }
}
