use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tubeyard_queue::{
    job::{ClientID, Priority},
    Broker, BrokerConfig, ReserveOutcome,
};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn fill(broker: &Broker, tubes: &[String], num: usize, varying_pri: bool) {
    for i in 0..num {
        let priority = if varying_pri { (i % 4000) + 1000 } else { 1024 };
        broker.put(&tubes[i % tubes.len()], Priority::from(priority as u32), Duration::ZERO, Duration::from_secs(60), Bytes::from_static(b"bench"))
            .await
            .unwrap();
    }
}

async fn drain(broker: &Broker, tubes: &[String]) -> usize {
    let client = ClientID::from(1);
    let closing = CancellationToken::new();
    let mut count = 0;
    while let ReserveOutcome::Reserved(job) = broker.reserve(client, tubes, Some(Duration::ZERO), &closing).await.unwrap() {
        broker.delete(client, job.id()).await.unwrap();
        count += 1;
    }
    count
}

fn tube_names(num: usize) -> Vec<String> {
    (0..num).map(|i| format!("tube-{}", i)).collect()
}

fn benchmarks(c: &mut Criterion) {
    let num_jobs = 10_000;
    let rt = runtime();

    let mut group = c.benchmark_group("broker::put");
    group.sample_size(20);
    group.bench_function("pri-s", |b| b.iter(|| rt.block_on(async {
        let broker = Broker::new(BrokerConfig::default());
        fill(&broker, &tube_names(1), black_box(num_jobs), false).await;
    })));
    group.bench_function("pri-d", |b| b.iter(|| rt.block_on(async {
        let broker = Broker::new(BrokerConfig::default());
        fill(&broker, &tube_names(1), black_box(num_jobs), true).await;
    })));
    group.finish();

    let mut group = c.benchmark_group("broker::reserve_delete");
    group.sample_size(20);
    for num_tubes in [1, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("pri-d", num_tubes), num_tubes, |b, &num_tubes| {
            b.iter(|| rt.block_on(async {
                let broker = Broker::new(BrokerConfig::default());
                let tubes = tube_names(num_tubes);
                fill(&broker, &tubes, num_jobs, true).await;
                assert_eq!(drain(&broker, &tubes).await, num_jobs);
            }))
        });
    }
    group.finish();
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
