//! Wire formats for ratchet messages.
//!
//! ```text
//! SecureMessage       = version(1) || protobuf(ratchet_key, counter, previous_counter, ciphertext) || mac(8)
//! PreKeySecureMessage = version(1) || protobuf(signed_pre_key_id, base_key, identity_key, message,
//!                                              registration_id, one_time_pre_key_id)
//! version             = (message_version & 0xF) << 4 | CURRENT_VERSION
//! ```
//!
//! Both are carried in a [`MessageContainer`], whose JSON form is either
//! `{"secureMessage": "<base64>"}` or `{"preKeySecureMessage": "<base64>"}`.

use crate::constants::{CURRENT_VERSION, MAC_KEY_LENGTH, MAC_LENGTH};
use crate::crypto::{constant_time_eq, hmac_sha256};
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPublic, PublicKey};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use prost::Message as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, PartialEq, prost::Message)]
struct SecureMessageProto {
    #[prost(bytes = "vec", tag = "1")]
    ratchet_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    counter: u32,
    #[prost(uint32, tag = "3")]
    previous_counter: u32,
    #[prost(bytes = "vec", tag = "4")]
    ciphertext: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PreKeySecureMessageProto {
    #[prost(string, tag = "1")]
    signed_pre_key_id: String,
    #[prost(bytes = "vec", tag = "2")]
    base_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    message: Vec<u8>,
    #[prost(string, tag = "5")]
    registration_id: String,
    #[prost(string, tag = "6")]
    one_time_pre_key_id: String,
}

fn version_byte(message_version: u8) -> u8 {
    ((message_version & 0x0F) << 4) | CURRENT_VERSION
}

/// Reads the message version from the leading byte and rejects anything this
/// crate cannot process.
fn check_version_byte(byte: u8) -> Result<u8> {
    let message_version = byte >> 4;
    if message_version < CURRENT_VERSION {
        return Err(Error::LegacyCiphertextVersion(message_version));
    }
    if message_version > CURRENT_VERSION {
        return Err(Error::UnrecognizedMessageVersion(message_version));
    }
    if byte & 0x0F != CURRENT_VERSION {
        return Err(Error::UnrecognizedMessageVersion(byte & 0x0F));
    }
    Ok(message_version)
}

fn uuid_string(id: Uuid) -> String {
    id.hyphenated()
        .encode_upper(&mut Uuid::encode_buffer())
        .to_owned()
}

fn optional_uuid(value: &str) -> Option<Uuid> {
    if value.is_empty() {
        return None;
    }
    Uuid::parse_str(value).ok()
}

/// A ratchet message authenticated with a truncated HMAC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecureMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SecureMessage {
    /// Builds and authenticates a message.
    ///
    /// The MAC covers both identities followed by every serialized byte
    /// except the MAC itself.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        message_version: u8,
        mac_key: &[u8],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &IdentityKeyPublic,
        receiver_identity: &IdentityKeyPublic,
    ) -> Result<Self> {
        let proto = SecureMessageProto {
            ratchet_key: sender_ratchet_key.as_bytes().to_vec(),
            counter,
            previous_counter,
            ciphertext,
        };

        let mut serialized = Vec::with_capacity(1 + proto.encoded_len() + MAC_LENGTH);
        serialized.push(version_byte(message_version));
        proto.encode(&mut serialized).map_err(|_| Error::SerializationError)?;

        let mac = compute_mac(sender_identity, receiver_identity, mac_key, &serialized)?;
        serialized.extend_from_slice(&mac);

        Ok(Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext: proto.ciphertext,
            serialized,
        })
    }

    /// Parses a serialized message. The MAC is not checked here.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MAC_LENGTH + 1 {
            return Err(Error::MalformedMessage("secure message is too short"));
        }
        let message_version = check_version_byte(data[0])?;

        let mac_start = data.len() - MAC_LENGTH;
        let proto = SecureMessageProto::decode(&data[1..mac_start])?;

        Ok(Self {
            message_version,
            sender_ratchet_key: PublicKey::from_slice(&proto.ratchet_key)?,
            counter: proto.counter,
            previous_counter: proto.previous_counter,
            ciphertext: proto.ciphertext,
            serialized: data.to_vec(),
        })
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    #[must_use]
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    #[must_use]
    pub fn mac(&self) -> &[u8] {
        &self.serialized[self.serialized.len() - MAC_LENGTH..]
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Recomputes the MAC with our keys and compares it in constant time.
    pub(crate) fn verify_mac(
        &self,
        sender_identity: &IdentityKeyPublic,
        receiver_identity: &IdentityKeyPublic,
        mac_key: &[u8],
    ) -> Result<bool> {
        let mac_start = self.serialized.len() - MAC_LENGTH;
        let ours = compute_mac(
            sender_identity,
            receiver_identity,
            mac_key,
            &self.serialized[..mac_start],
        )?;
        Ok(constant_time_eq(&ours, &self.serialized[mac_start..]))
    }
}

fn compute_mac(
    sender_identity: &IdentityKeyPublic,
    receiver_identity: &IdentityKeyPublic,
    mac_key: &[u8],
    message: &[u8],
) -> Result<[u8; MAC_LENGTH]> {
    if mac_key.len() != MAC_KEY_LENGTH {
        return Err(Error::InvalidKeyDataLength {
            expected: MAC_KEY_LENGTH,
            actual: mac_key.len(),
        });
    }
    let full = hmac_sha256(
        mac_key,
        &[
            sender_identity.as_bytes().as_slice(),
            receiver_identity.as_bytes().as_slice(),
            message,
        ],
    )?;

    let mut mac = [0u8; MAC_LENGTH];
    mac.copy_from_slice(&full[..MAC_LENGTH]);
    Ok(mac)
}

/// First message(s) of a session: a [`SecureMessage`] plus what the
/// responder needs to run X3DH on its side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeySecureMessage {
    message_version: u8,
    registration_id: Option<Uuid>,
    one_time_pre_key_id: Option<Uuid>,
    signed_pre_key_id: Uuid,
    base_key: PublicKey,
    identity_key: IdentityKeyPublic,
    message: SecureMessage,
    serialized: Vec<u8>,
}

impl PreKeySecureMessage {
    pub(crate) fn new(
        message_version: u8,
        registration_id: Option<Uuid>,
        one_time_pre_key_id: Option<Uuid>,
        signed_pre_key_id: Uuid,
        base_key: PublicKey,
        identity_key: IdentityKeyPublic,
        message: SecureMessage,
    ) -> Result<Self> {
        let proto = PreKeySecureMessageProto {
            signed_pre_key_id: uuid_string(signed_pre_key_id),
            base_key: base_key.as_bytes().to_vec(),
            identity_key: identity_key.as_bytes().to_vec(),
            message: message.serialized().to_vec(),
            registration_id: registration_id.map(uuid_string).unwrap_or_default(),
            one_time_pre_key_id: one_time_pre_key_id.map(uuid_string).unwrap_or_default(),
        };

        let mut serialized = Vec::with_capacity(1 + proto.encoded_len());
        serialized.push(version_byte(message_version));
        proto.encode(&mut serialized).map_err(|_| Error::SerializationError)?;

        Ok(Self {
            message_version,
            registration_id,
            one_time_pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (&first, body) = data
            .split_first()
            .ok_or(Error::MalformedMessage("prekey message is empty"))?;
        let message_version = check_version_byte(first)?;

        let proto = PreKeySecureMessageProto::decode(body)?;
        let signed_pre_key_id = Uuid::parse_str(&proto.signed_pre_key_id)
            .map_err(|_| Error::MalformedMessage("invalid signed prekey id"))?;

        Ok(Self {
            message_version,
            registration_id: optional_uuid(&proto.registration_id),
            one_time_pre_key_id: optional_uuid(&proto.one_time_pre_key_id),
            signed_pre_key_id,
            base_key: PublicKey::from_slice(&proto.base_key)?,
            identity_key: IdentityKeyPublic::new(PublicKey::from_slice(&proto.identity_key)?),
            message: SecureMessage::from_bytes(&proto.message)?,
            serialized: data.to_vec(),
        })
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn registration_id(&self) -> Option<Uuid> {
        self.registration_id
    }

    #[must_use]
    pub fn one_time_pre_key_id(&self) -> Option<Uuid> {
        self.one_time_pre_key_id
    }

    #[must_use]
    pub fn signed_pre_key_id(&self) -> Uuid {
        self.signed_pre_key_id
    }

    #[must_use]
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    #[must_use]
    pub fn identity_key(&self) -> &IdentityKeyPublic {
        &self.identity_key
    }

    #[must_use]
    pub fn message(&self) -> &SecureMessage {
        &self.message
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Envelope handed to the transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContainerRepr", into = "ContainerRepr")]
pub enum MessageContainer {
    SecureMessage(SecureMessage),
    PreKeySecureMessage(PreKeySecureMessage),
}

impl MessageContainer {
    /// Serialized bytes of the wrapped message.
    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        match self {
            Self::SecureMessage(message) => message.serialized(),
            Self::PreKeySecureMessage(message) => message.serialized(),
        }
    }

    #[must_use]
    pub fn is_pre_key_message(&self) -> bool {
        matches!(self, Self::PreKeySecureMessage(_))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::SerializationError)
    }

    /// Parses the JSON envelope. Payload errors keep their own kind, e.g.
    /// [`Error::LegacyCiphertextVersion`], instead of collapsing into
    /// [`Error::DeserializationError`].
    pub fn from_json(json: &str) -> Result<Self> {
        let repr: ContainerRepr = serde_json::from_str(json)?;
        Self::try_from(repr)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ContainerRepr {
    SecureMessage(String),
    PreKeySecureMessage(String),
}

impl From<MessageContainer> for ContainerRepr {
    fn from(container: MessageContainer) -> Self {
        match container {
            MessageContainer::SecureMessage(message) => {
                Self::SecureMessage(BASE64.encode(message.serialized()))
            }
            MessageContainer::PreKeySecureMessage(message) => {
                Self::PreKeySecureMessage(BASE64.encode(message.serialized()))
            }
        }
    }
}

impl TryFrom<ContainerRepr> for MessageContainer {
    type Error = Error;

    fn try_from(repr: ContainerRepr) -> Result<Self> {
        match repr {
            ContainerRepr::SecureMessage(encoded) => Ok(Self::SecureMessage(
                SecureMessage::from_bytes(&BASE64.decode(encoded)?)?,
            )),
            ContainerRepr::PreKeySecureMessage(encoded) => Ok(Self::PreKeySecureMessage(
                PreKeySecureMessage::from_bytes(&BASE64.decode(encoded)?)?,
            )),
        }
    }
}
