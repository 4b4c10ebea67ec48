//! X3DH key agreement and Double Ratchet session engine for asynchronous
//! end-to-end encrypted messaging.
//!
//! A device publishes an identity key, a signed prekey and a batch of
//! one-time prekeys. A peer that fetches this bundle can start a session and
//! send immediately, without the device being online. From then on every
//! message is encrypted under a fresh key from the Double Ratchet.
//!
//! # Security Properties
//!
//! ## Forward Secrecy
//! Message keys are derived from a one-way chain and deleted after use, so a
//! later compromise does not reveal earlier messages.
//!
//! ## Post-Compromise Security
//! Each change of speaker performs a Diffie-Hellman ratchet step with fresh
//! key pairs. An attacker who copied session state loses access once both
//! sides have sent again.
//!
//! ## Out-of-Order Delivery
//! Keys for skipped messages are cached per receiving chain, so messages can
//! arrive in any order within [`MESSAGE_KEY_MAXIMUM`] keys and
//! [`FUTURE_MESSAGES_LIMIT`] steps ahead. A message whose key was already
//! used is rejected as a duplicate.
//!
//! # Primitives
//!
//! - X25519 for key agreement, Ed25519 for signed prekeys
//! - HKDF-SHA256 with the `DXText`, `DXRatchet` and `DXMessageKeys` info strings
//! - AES-256-CBC with PKCS7 padding
//! - HMAC-SHA256 truncated to [`MAC_LENGTH`] bytes
//!
//! # Protocol Flow
//!
//! ```rust
//! use ratchet_session::{
//!     IdentityKeyStore, InMemoryIdentityKeyStore, InMemoryPreKeyStore,
//!     InMemorySessionStore, InMemorySignedPreKeyStore, OneTimePreKeyPair, PreKeyBundle,
//!     PreKeyStore, ProtocolAddress, Session, SignedPreKeyPair, SignedPreKeyStore,
//! };
//! use rand_core::OsRng;
//! use uuid::Uuid;
//!
//! let alice_address = ProtocolAddress::new(Uuid::from_u128(1), Uuid::from_u128(2));
//! let bob_address = ProtocolAddress::new(Uuid::from_u128(3), Uuid::from_u128(4));
//!
//! // Bob generates and publishes his prekeys
//! let mut bob_identity_store = InMemoryIdentityKeyStore::generate(&mut OsRng);
//! let bob_identity = bob_identity_store.identity_key_pair().unwrap();
//! let signed_pre_key = SignedPreKeyPair::generate(&mut OsRng, &bob_identity);
//! let one_time_pre_key = OneTimePreKeyPair::generate(&mut OsRng);
//!
//! let mut bob_signed_pre_keys = InMemorySignedPreKeyStore::new();
//! bob_signed_pre_keys.store_signed_pre_key(signed_pre_key.clone()).unwrap();
//! let mut bob_pre_keys = InMemoryPreKeyStore::new();
//! bob_pre_keys.store_pre_key(one_time_pre_key.clone()).unwrap();
//!
//! let bundle = PreKeyBundle {
//!     identity_key: bob_identity.identity_key(),
//!     signing_key: bob_identity.signing_key(),
//!     registration_id: bob_identity_store.local_registration_id().unwrap(),
//!     device_id: bob_address.device_id,
//!     signed_pre_key: signed_pre_key.public(),
//!     one_time_pre_key: Some(one_time_pre_key.public()),
//! };
//!
//! // Alice starts a session from the bundle and sends right away
//! let mut alice_identity_store = InMemoryIdentityKeyStore::generate(&mut OsRng);
//! let mut alice_sessions = InMemorySessionStore::new();
//! Session::process_pre_key_bundle(
//!     &mut OsRng,
//!     &bundle,
//!     &bob_address,
//!     &mut alice_sessions,
//!     &mut alice_identity_store,
//! )
//! .unwrap();
//! let message =
//!     Session::encrypt_for(&bob_address, b"Hello Bob!", &mut alice_sessions, &alice_identity_store)
//!         .unwrap();
//! assert!(message.is_pre_key_message());
//!
//! // Bob decrypts, which also sets up his side of the session
//! let mut bob_sessions = InMemorySessionStore::new();
//! let plaintext = Session::decrypt(
//!     &mut OsRng,
//!     &message,
//!     &alice_address,
//!     &mut bob_sessions,
//!     &mut bob_identity_store,
//!     &mut bob_pre_keys,
//!     &bob_signed_pre_keys,
//! )
//! .unwrap();
//! assert_eq!(plaintext, b"Hello Bob!");
//! ```
//!
//! # Modules
//!
//! - [`x3dh`]: prekey material and the X3DH shared secret
//! - [`kdf`]: root, chain and message key derivation
//! - [`state`]: the Double Ratchet state machine
//! - [`session`]: session setup, archive and decrypt fallback
//! - [`message`]: wire formats and the JSON message container
//! - [`storage`]: store traits and in-memory backends
//! - [`lock`]: per-address reentrant session locks
//! - [`crypto`]: HKDF, HMAC, AES-CBC and Ed25519 wrappers
//! - [`keys`]: key types with automatic zeroization
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_fields_in_debug,
    clippy::module_name_repetitions
)]

pub mod chain;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod lock;
pub mod message;
pub mod session;
pub mod state;
pub mod storage;
pub mod x3dh;

pub use constants::{
    ARCHIVED_STATES_MAX_LENGTH, CIPHER_KEY_LENGTH, CURRENT_VERSION, FUTURE_MESSAGES_LIMIT,
    IV_LENGTH, KEY_LENGTH, MAC_KEY_LENGTH, MAC_LENGTH, MAX_RECEIVER_CHAINS, MESSAGE_KEY_MAXIMUM,
    ONE_TIME_PRE_KEYS_LIMIT, ONE_TIME_PRE_KEYS_MIN_COUNT,
};
pub use error::{Error, Result};
pub use keys::{IdentityKeyPair, IdentityKeyPublic, KeyPair, PrivateKey, PublicKey, SigningKeyPublic};
pub use lock::{SessionLock, SessionLockRegistry};
pub use message::{MessageContainer, PreKeySecureMessage, SecureMessage};
pub use session::Session;
pub use state::{PendingPreKey, SessionState};
pub use storage::{
    Direction, IdentityKeyStore, InMemoryIdentityKeyStore, InMemoryPreKeyStore,
    InMemorySessionStore, InMemorySignedPreKeyStore, PreKeyStore, ProtocolAddress, SessionStore,
    SignedPreKeyStore,
};
pub use x3dh::{
    OneTimePreKeyPair, OneTimePreKeyPublic, PreKeyBundle, PublicPreKeysBundle, SignedPreKeyPair,
    SignedPreKeyPublic,
};
