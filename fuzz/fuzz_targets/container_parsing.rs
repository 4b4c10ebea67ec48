//! Fuzz target for the JSON message container
//!
//! Arbitrary JSON must either decode to exactly one message kind or fail
//! cleanly

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::MessageContainer;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(container) = MessageContainer::from_json(json) {
        // Re-encoding and decoding again yields the same message
        let encoded = container.to_json().expect("encoding a decoded container");
        let again = MessageContainer::from_json(&encoded).expect("decoding our own encoding");
        assert_eq!(container, again);
    }
});
