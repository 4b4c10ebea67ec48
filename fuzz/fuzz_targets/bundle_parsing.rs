#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::{PreKeyBundle, PublicKey, PublicPreKeysBundle};

fuzz_target!(|data: &[u8]| {
    if data.len() >= 32 {
        let _ = PublicKey::from_slice(&data[..32]);
    }

    // Bundles arrive as JSON from a server; verification must never panic
    if let Ok(bundle) = serde_json::from_slice::<PreKeyBundle>(data) {
        let _ = bundle.verify_signature();
    }

    let _ = serde_json::from_slice::<PublicPreKeysBundle>(data);
});
