use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand_core::OsRng;
use ratchet_session::x3dh::{calculate_initiator_secret, calculate_responder_secret};
use ratchet_session::{
    IdentityKeyPair, KeyPair, OneTimePreKeyPair, PreKeyBundle, SessionState, SignedPreKeyPair,
};
use uuid::Uuid;

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generation");

    group.bench_function("identity_keypair", |b| {
        b.iter(|| black_box(IdentityKeyPair::generate(&mut OsRng)));
    });

    group.bench_function("signed_pre_key", |b| {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        b.iter(|| black_box(SignedPreKeyPair::generate(&mut OsRng, &identity)));
    });

    group.finish();
}

fn bench_x3dh_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("x3dh_handshake");

    let alice_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_signed_pre_key = KeyPair::generate(&mut OsRng);
    let bob_one_time_pre_key = KeyPair::generate(&mut OsRng);
    let alice_base_key = KeyPair::generate(&mut OsRng);

    group.bench_function("initiator_secret", |b| {
        b.iter(|| {
            black_box(
                calculate_initiator_secret(
                    &alice_identity,
                    &alice_base_key,
                    &bob_identity.identity_key(),
                    &bob_signed_pre_key.public_key,
                    Some(&bob_one_time_pre_key.public_key),
                )
                .unwrap(),
            )
        });
    });

    group.bench_function("responder_secret", |b| {
        b.iter(|| {
            black_box(
                calculate_responder_secret(
                    &bob_identity,
                    &bob_signed_pre_key,
                    Some(&bob_one_time_pre_key),
                    &alice_identity.identity_key(),
                    &alice_base_key.public_key,
                )
                .unwrap(),
            )
        });
    });

    group.bench_function("initiate_state", |b| {
        b.iter(|| {
            black_box(
                SessionState::initiate(
                    &mut OsRng,
                    &alice_identity,
                    &alice_base_key,
                    bob_identity.identity_key(),
                    bob_signed_pre_key.public_key,
                    Some(bob_one_time_pre_key.public_key),
                )
                .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_verification");

    let identity = IdentityKeyPair::generate(&mut OsRng);
    let signed_pre_key = SignedPreKeyPair::generate(&mut OsRng, &identity);
    let bundle = PreKeyBundle {
        identity_key: identity.identity_key(),
        signing_key: identity.signing_key(),
        registration_id: Uuid::from_u128(1),
        device_id: Uuid::from_u128(2),
        signed_pre_key: signed_pre_key.public(),
        one_time_pre_key: None,
    };

    group.bench_function("verify_bundle_signature", |b| {
        b.iter(|| black_box(bundle.verify_signature().unwrap()));
    });

    group.finish();
}

fn bench_one_time_pre_key_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_time_pre_key_generation");

    for count in [10, 35, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(OneTimePreKeyPair::generate_batch(&mut OsRng, count)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_x3dh_handshake,
    bench_signature_verification,
    bench_one_time_pre_key_batches
);

criterion_main!(benches);
