//! Benchmarks for the dispatch hot paths.
//!
//! Benchmarks cover:
//! - Task ring add/pop cycles
//! - Pool sizing from queue length
//! - Device queue publish/subscribe throughput
//! - Message marshalling

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use push_dispatch::config::PoolConfig;
use push_dispatch::core::{
    ApnsMessage, DeviceQueue, Env, Message, ProviderError, PushProvider, PushResponse, TaskQueue,
    TASK_QUEUE_MAX_WAITING,
};
use rand::Rng;

// ============================================================================
// Helpers
// ============================================================================

struct NoopProvider;

#[async_trait]
impl PushProvider for NoopProvider {
    async fn push(&self, _payload: &[u8], _device: &str) -> Result<PushResponse, ProviderError> {
        Ok(PushResponse::accepted(None))
    }
}

fn build_queue() -> TaskQueue {
    let factory = || -> Result<Box<dyn PushProvider>, ProviderError> { Ok(Box::new(NoopProvider)) };
    let env = Env::new("bench", PoolConfig::default(), factory);
    TaskQueue::new(Arc::new(env)).unwrap()
}

fn tokens(n: usize) -> Vec<String> {
    let mut rng = rand::rng();
    (0..n).map(|_| format!("{:032x}", rng.random::<u128>())).collect()
}

// ============================================================================
// Ring Benchmarks
// ============================================================================

fn bench_ring_add_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_add_pop");
    let queue = build_queue();
    let message = ApnsMessage::alert("bench");
    let devices = Arc::new(DeviceQueue::from_devices(tokens(1), 4));

    for batch in [1usize, 10, TASK_QUEUE_MAX_WAITING - 1] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                for _ in 0..batch {
                    black_box(queue.add(Arc::clone(&devices), message.clone()).unwrap());
                }
                for _ in 0..batch {
                    queue.pop().unwrap();
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Sizing Benchmarks
// ============================================================================

fn bench_sizing_ladder(c: &mut Criterion) {
    let template = PoolConfig::default();
    c.bench_function("sizing_ladder", |b| {
        b.iter(|| {
            for len in [5usize, 50, 500, 5_000, 50_000] {
                black_box(template.sized_for(black_box(len)));
            }
        });
    });
}

// ============================================================================
// Device Queue Benchmarks
// ============================================================================

fn bench_device_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_fan_out");
    let devices = tokens(10_000);

    for subscribers in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(devices.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                b.iter(|| {
                    let queue = Arc::new(DeviceQueue::from_devices(devices.clone(), 500));
                    let consumers: Vec<_> = (0..subscribers)
                        .map(|_| {
                            let queue = Arc::clone(&queue);
                            thread::spawn(move || {
                                let mut n = 0usize;
                                while queue.subscribe().is_some() {
                                    n += 1;
                                }
                                n
                            })
                        })
                        .collect();
                    queue.publish().unwrap();
                    let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
                    black_box(total);
                });
            },
        );
    }
    group.finish();
}

fn bench_marshal(c: &mut Criterion) {
    let message = ApnsMessage::alert("Your order has shipped")
        .with_badge(1)
        .with_sound("default")
        .with_custom("order_id", serde_json::Value::from(123_456));
    c.bench_function("apns_message_marshal", |b| {
        b.iter(|| black_box(message.marshal().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_ring_add_pop,
    bench_sizing_ladder,
    bench_device_fan_out,
    bench_marshal
);
criterion_main!(benches);
