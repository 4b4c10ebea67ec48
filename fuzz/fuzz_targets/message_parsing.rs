//! Fuzz target for secure and prekey message parsing
//!
//! Tests that arbitrary wire data doesn't cause panics and that anything
//! accepted keeps its exact bytes

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::{PreKeySecureMessage, SecureMessage, CURRENT_VERSION};

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = SecureMessage::from_bytes(data) {
        assert_eq!(message.serialized(), data);
        assert_eq!(message.message_version(), CURRENT_VERSION);
        assert_eq!(message.mac(), &data[data.len() - 8..]);
    }

    if let Ok(message) = PreKeySecureMessage::from_bytes(data) {
        assert_eq!(message.serialized(), data);

        // The embedded message must itself be a valid secure message
        let inner = SecureMessage::from_bytes(message.message().serialized());
        assert!(inner.is_ok());
    }
});
