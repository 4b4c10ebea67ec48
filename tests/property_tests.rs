//! Property-based tests for the session engine
//!
//! Uses proptest to verify protocol invariants across random inputs

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_core::OsRng;
use ratchet_session::kdf::RatchetChainKey;
use ratchet_session::x3dh::{calculate_initiator_secret, calculate_responder_secret};
use ratchet_session::{
    IdentityKeyPair, KeyPair, MessageContainer, SecureMessage, SessionState,
};

fn state_pair<R: rand_core::CryptoRngCore>(rng: &mut R) -> (SessionState, SessionState) {
    let alice_identity = IdentityKeyPair::generate(rng);
    let bob_identity = IdentityKeyPair::generate(rng);
    let bob_signed_pre_key = KeyPair::generate(rng);
    let alice_base_key = KeyPair::generate(rng);

    let alice = SessionState::initiate(
        rng,
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

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_x3dh_always_produces_same_secret(seed in any::<u64>(), with_one_time in any::<bool>()) {
        let mut rng = StdRng::seed_from_u64(seed);

        let alice_identity = IdentityKeyPair::generate(&mut rng);
        let bob_identity = IdentityKeyPair::generate(&mut rng);
        let alice_base_key = KeyPair::generate(&mut rng);
        let bob_signed_pre_key = KeyPair::generate(&mut rng);
        let bob_one_time_pre_key = KeyPair::generate(&mut rng);
        let one_time = with_one_time.then_some(&bob_one_time_pre_key);

        let alice_secret = calculate_initiator_secret(
            &alice_identity,
            &alice_base_key,
            &bob_identity.identity_key(),
            &bob_signed_pre_key.public_key,
            one_time.map(|pair| &pair.public_key),
        ).unwrap();
        let bob_secret = calculate_responder_secret(
            &bob_identity,
            &bob_signed_pre_key,
            one_time,
            &alice_identity.identity_key(),
            &alice_base_key.public_key,
        ).unwrap();

        prop_assert_eq!(alice_secret.as_bytes(), bob_secret.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip(
        message in prop::collection::vec(any::<u8>(), 0..1000)
    ) {
        let (mut alice, mut bob) = state_pair(&mut OsRng);

        let encrypted = secure(alice.encrypt(&message).unwrap());
        let decrypted = bob.decrypt_message(&mut OsRng, &encrypted).unwrap();
        prop_assert_eq!(&decrypted, &message);

        let reply = secure(bob.encrypt(&message).unwrap());
        prop_assert_eq!(alice.decrypt_message(&mut OsRng, &reply).unwrap(), message);
    }

    #[test]
    fn test_sender_index_counts_encryptions(count in 0u32..50) {
        let (mut alice, _) = state_pair(&mut OsRng);
        for _ in 0..count {
            alice.encrypt(b"tick").unwrap();
        }
        prop_assert_eq!(alice.sender_chain_index(), count);
    }

    #[test]
    fn test_any_delivery_order_decrypts(order in Just((0..12u8).collect::<Vec<_>>()).prop_shuffle()) {
        let (mut alice, mut bob) = state_pair(&mut OsRng);
        let messages: Vec<_> = (0..12u8)
            .map(|i| secure(alice.encrypt(&[i]).unwrap()))
            .collect();

        for i in order {
            let plaintext = bob.decrypt_message(&mut OsRng, &messages[usize::from(i)]).unwrap();
            prop_assert_eq!(plaintext, vec![i]);
        }
    }

    #[test]
    fn test_chain_key_derivation_is_pure(key in any::<[u8; 32]>(), index in 0u32..1_000_000) {
        let a = RatchetChainKey::new(key, index);
        let b = RatchetChainKey::new(key, index);

        prop_assert_eq!(a.message_keys().unwrap(), b.message_keys().unwrap());
        prop_assert_eq!(a.next_chain_key().unwrap(), b.next_chain_key().unwrap());
        prop_assert_eq!(a.next_chain_key().unwrap().index(), index + 1);
    }

    #[test]
    fn test_random_bytes_never_panic_parsers(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = SecureMessage::from_bytes(&data);
        let _ = ratchet_session::PreKeySecureMessage::from_bytes(&data);
    }
}
