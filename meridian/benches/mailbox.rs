//! Throughput of the per-process mailbox under local push/selective-receive
//! traffic, with and without intervening non-matching envelopes.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use meridian::process::mailbox::Mailbox;

fn push_then_receive(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("mailbox_push_then_receive_matching", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let mailbox = Mailbox::new();
                mailbox.push_local(7i32);
                mailbox
            },
            |mailbox| async move {
                mailbox.receive().with::<i32, _, _>(|v| async move { std::hint::black_box(v); }).run().await.unwrap();
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("mailbox_push_then_receive_past_non_matching", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let mailbox = Mailbox::new();
                for i in 0..16 {
                    mailbox.push_local(format!("noise-{i}"));
                }
                mailbox.push_local(7i32);
                mailbox
            },
            |mailbox| async move {
                mailbox.receive().with::<i32, _, _>(|v| async move { std::hint::black_box(v); }).run().await.unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn fan_in(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("mailbox_fan_in_100_producers", |b| {
        b.to_async(&rt).iter_batched(
            || std::sync::Arc::new(Mailbox::new()),
            |mailbox| async move {
                let mut handles = Vec::new();
                for i in 0..100 {
                    let mailbox = mailbox.clone();
                    handles.push(tokio::spawn(async move {
                        mailbox.push_local(i);
                    }));
                }
                for h in handles {
                    h.await.unwrap();
                }
                for _ in 0..100 {
                    mailbox.receive().with::<i32, _, _>(|v| async move { std::hint::black_box(v); }).run().await.unwrap();
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, push_then_receive, fan_in);
criterion_main!(benches);
