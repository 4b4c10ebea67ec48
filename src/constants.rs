//! Protocol parameters shared by every layer of the session engine.
//!
//! These values are part of the wire contract. Changing any of them breaks
//! interoperability with peers that use the defaults.

/// Length of a Curve25519 public or private key.
pub const KEY_LENGTH: usize = 32;

/// Length of the key used for the message MAC.
pub const MAC_KEY_LENGTH: usize = 32;

/// Length of the AES-256 message key.
pub const CIPHER_KEY_LENGTH: usize = 32;

/// Length of the AES-CBC initialisation vector.
pub const IV_LENGTH: usize = 16;

/// Length of the truncated HMAC-SHA256 appended to every secure message.
pub const MAC_LENGTH: usize = 8;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// Version of the ciphertext message layout produced by this crate.
pub const CURRENT_VERSION: u8 = 1;

/// Maximum number of superseded session states kept per session.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// Maximum number of skipped message keys cached per receiver chain.
pub const MESSAGE_KEY_MAXIMUM: usize = 2000;

/// Maximum number of receiver chains kept per session state.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// How far ahead of a receiver chain a message counter may jump.
pub const FUTURE_MESSAGES_LIMIT: u32 = 2000;

/// Upper bound on one-time prekeys generated in one batch.
pub const ONE_TIME_PRE_KEYS_LIMIT: usize = 100;

/// Once fewer one-time prekeys than this remain published, a new batch is due.
pub const ONE_TIME_PRE_KEYS_MIN_COUNT: usize = 35;

/// 32 bytes of `0xFF` prepended to the X3DH agreement outputs.
pub(crate) const X3DH_PADDING: [u8; KEY_LENGTH] = [0xFF; KEY_LENGTH];

pub(crate) const TEXT_INFO: &[u8] = b"DXText";
pub(crate) const RATCHET_INFO: &[u8] = b"DXRatchet";
pub(crate) const MESSAGE_KEYS_INFO: &[u8] = b"DXMessageKeys";

pub(crate) const MESSAGE_KEY_SEED: [u8; 1] = [0x01];
pub(crate) const CHAIN_KEY_SEED: [u8; 1] = [0x02];
