//! Fuzz target for AES-256-CBC encryption/decryption with corrupted inputs
//!
//! Ensures decryption failures don't cause panics

#![no_main]

use libfuzzer_sys::fuzz_target;
use ratchet_session::crypto::{aes_cbc_decrypt, aes_cbc_encrypt};
use ratchet_session::{CIPHER_KEY_LENGTH, IV_LENGTH};

fuzz_target!(|data: &[u8]| {
    if data.len() < CIPHER_KEY_LENGTH + IV_LENGTH {
        return;
    }

    let key = &data[..CIPHER_KEY_LENGTH];
    let iv = &data[CIPHER_KEY_LENGTH..CIPHER_KEY_LENGTH + IV_LENGTH];
    let plaintext = &data[CIPHER_KEY_LENGTH + IV_LENGTH..];

    let ciphertext = aes_cbc_encrypt(key, iv, plaintext).expect("valid key and iv");
    assert_eq!(ciphertext.len() % 16, 0);
    assert!(ciphertext.len() > plaintext.len());

    let decrypted = aes_cbc_decrypt(key, iv, &ciphertext).expect("decryption should succeed");
    assert_eq!(decrypted, plaintext);

    // Arbitrary bytes as ciphertext fail or succeed, but never panic
    let _ = aes_cbc_decrypt(key, iv, plaintext);

    let truncated = &ciphertext[..ciphertext.len() - 1];
    assert!(aes_cbc_decrypt(key, iv, truncated).is_err());
});
