use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use enclave_mail::attestation::signer::AttestationSigner;
use enclave_mail::crypto::hpke::KeyPair;
use enclave_mail::mail::open_envelope;
use enclave_mail::{AttestationRecord, Mailbox, Measurement, OutboundMail, SecurityMode};

fn bench_mail(c: &mut Criterion) {
    let client = KeyPair::generate();
    let node = KeyPair::generate();

    let mut group = c.benchmark_group("mail");
    for size in [16usize, 1024, 16 * 1024] {
        let body = Bytes::from(vec![0x42u8; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("encrypt_{size}"), |b| {
            b.iter(|| {
                let mail = OutboundMail::create(
                    body.clone(),
                    "bench-topic",
                    7,
                    node.public_bytes(),
                    &client,
                )
                .encrypt()
                .unwrap();
                black_box(mail);
            })
        });

        let sealed =
            OutboundMail::create(body.clone(), "bench-topic", 7, node.public_bytes(), &client)
                .encrypt()
                .unwrap();

        group.bench_function(format!("open_{size}"), |b| {
            b.iter(|| {
                let plain = open_envelope(sealed.as_bytes(), &node, None).unwrap();
                black_box(plain);
            })
        });

        group.bench_function(format!("mailbox_decrypt_{size}"), |b| {
            b.iter_batched(
                || Mailbox::new(node.clone()),
                |mut mailbox| black_box(mailbox.decrypt(sealed.as_bytes()).unwrap()),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_attestation(c: &mut Criterion) {
    let signer = AttestationSigner::generate();
    let record = signer.attest(
        [9u8; 32],
        Measurement([0xAA; 32]),
        1,
        SecurityMode::Simulation,
    );
    let raw = record.serialize();

    c.bench_function("attestation/deserialize_and_verify", |b| {
        b.iter(|| black_box(AttestationRecord::deserialize(&raw).unwrap()))
    });
}

criterion_group!(benches, bench_mail, bench_attestation);
criterion_main!(benches);
