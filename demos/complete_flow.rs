//! Complete example of session setup and message exchange
//!
//! Two devices with in-memory stores: Bob publishes prekeys, Alice starts a
//! session from his bundle, and both exchange messages through the JSON
//! container a transport would carry. Set `RUST_LOG=debug` to see the
//! ratchet steps.

use rand_core::OsRng;
use ratchet_session::{
    IdentityKeyStore, InMemoryIdentityKeyStore, InMemoryPreKeyStore, InMemorySessionStore,
    InMemorySignedPreKeyStore, MessageContainer, OneTimePreKeyPair, PreKeyBundle, PreKeyStore,
    ProtocolAddress, PublicPreKeysBundle, Result, Session, SessionStore, SignedPreKeyPair,
    SignedPreKeyStore,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

struct Device {
    address: ProtocolAddress,
    identity_store: InMemoryIdentityKeyStore,
    pre_key_store: InMemoryPreKeyStore,
    signed_pre_key_store: InMemorySignedPreKeyStore,
    session_store: InMemorySessionStore,
}

impl Device {
    fn new(user: u128, device: u128) -> Self {
        Self {
            address: ProtocolAddress::new(Uuid::from_u128(user), Uuid::from_u128(device)),
            identity_store: InMemoryIdentityKeyStore::generate(&mut OsRng),
            pre_key_store: InMemoryPreKeyStore::new(),
            signed_pre_key_store: InMemorySignedPreKeyStore::new(),
            session_store: InMemorySessionStore::new(),
        }
    }

    fn send(&mut self, to: &ProtocolAddress, text: &str) -> Result<String> {
        let message = Session::encrypt_for(to, text.as_bytes(), &mut self.session_store, &self.identity_store)?;
        println!(
            "   {} → {}: {:?} ({} bytes, {})",
            short(&self.address),
            short(to),
            text,
            message.serialized().len(),
            if message.is_pre_key_message() {
                "prekey message"
            } else {
                "secure message"
            }
        );
        message.to_json()
    }

    fn receive(&mut self, from: &ProtocolAddress, json: &str) -> Result<String> {
        let message = MessageContainer::from_json(json)?;
        let plaintext = Session::decrypt(
            &mut OsRng,
            &message,
            from,
            &mut self.session_store,
            &mut self.identity_store,
            &mut self.pre_key_store,
            &self.signed_pre_key_store,
        )?;
        let text = String::from_utf8_lossy(&plaintext).into_owned();
        println!("   {} received: {:?}", short(&self.address), text);
        Ok(text)
    }
}

fn short(address: &ProtocolAddress) -> String {
    address.user_id.simple().to_string()[28..].to_owned()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Ratchet Session Complete Example ===\n");

    println!("1. Creating devices...");
    let mut alice = Device::new(1, 11);
    let mut bob = Device::new(2, 21);
    println!("   ✓ Alice is {}", alice.address);
    println!("   ✓ Bob is {}\n", bob.address);

    println!("2. Bob generates and publishes prekeys...");
    let bob_identity = bob.identity_store.identity_key_pair()?;
    let signed_pre_key = SignedPreKeyPair::generate(&mut OsRng, &bob_identity);
    let one_time_pre_keys = OneTimePreKeyPair::generate_batch(&mut OsRng, 50);
    bob.signed_pre_key_store
        .store_signed_pre_key(signed_pre_key.clone())?;
    bob.pre_key_store.populate(one_time_pre_keys.clone())?;

    let published = PublicPreKeysBundle::new(&bob_identity, &signed_pre_key, &one_time_pre_keys);
    println!(
        "   ✓ Published {} one-time prekeys (replenish below {})\n",
        published.one_time_pre_keys.len(),
        ratchet_session::ONE_TIME_PRE_KEYS_MIN_COUNT
    );

    println!("3. Alice fetches a bundle for Bob and starts a session...");
    let bundle = PreKeyBundle {
        identity_key: published.identity_key,
        signing_key: published.signing_key,
        registration_id: bob.identity_store.local_registration_id()?,
        device_id: bob.address.device_id,
        signed_pre_key: published.signed_pre_key.clone(),
        one_time_pre_key: published.one_time_pre_keys.first().copied(),
    };
    Session::process_pre_key_bundle(
        &mut OsRng,
        &bundle,
        &bob.address,
        &mut alice.session_store,
        &mut alice.identity_store,
    )?;
    println!("   ✓ Signed prekey verified, session stored\n");

    println!("4. Exchanging messages...\n");
    let json = alice.send(&bob.address, "Hello Bob! This is Alice.")?;
    bob.receive(&alice.address, &json)?;
    println!(
        "   Bob has {} one-time prekeys left\n",
        bob.pre_key_store.pre_key_count()?
    );

    let json = bob.send(&alice.address, "Hi Alice! Got your message.")?;
    alice.receive(&bob.address, &json)?;
    println!();

    println!("5. Out-of-order delivery...\n");
    let first = alice.send(&bob.address, "first")?;
    let second = alice.send(&bob.address, "second")?;
    let third = alice.send(&bob.address, "third")?;
    bob.receive(&alice.address, &third)?;
    bob.receive(&alice.address, &first)?;
    bob.receive(&alice.address, &second)?;
    println!();

    println!("6. Replaying a message...");
    match bob.receive(&alice.address, &second) {
        Err(error) => println!("   ✓ Rejected: {error}\n"),
        Ok(_) => println!("   ✗ Replay was accepted\n"),
    }

    println!("7. Session state...");
    if let Some(session) = bob.session_store.load_session(&alice.address)? {
        println!("   - Current state active: {}", session.has_current_state());
        println!("   - Archived states: {}", session.previous_states().len());
        println!(
            "   - Receiver chains: {}",
            session.state().receiver_chains().len()
        );
    }

    println!("\n=== Example completed successfully ===");
    Ok(())
}
