use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use slotbook::config::Config;
use slotbook::engine::{Engine, EngineError};
use slotbook::model::{Ms, Owner, Span};
use slotbook::observability;
use slotbook::store::InMemoryStore;

const HOUR: i64 = 3_600_000; // 1 hour in ms

/// Far enough ahead that the wall clock never catches up during a run.
const BASE: Ms = 4_102_444_800_000; // 2100-01-01

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn engine(config: &Config, durable: bool) -> Arc<Engine> {
    let store = if durable {
        let config = Config {
            data_dir: std::env::temp_dir().join(format!("slotbook_bench_{}", Ulid::new())),
            ..config.clone()
        };
        InMemoryStore::open(&config).expect("open store")
    } else {
        InMemoryStore::new()
    };
    Arc::new(Engine::with_system_clock(Arc::new(store)))
}

fn hour_slot(i: i64) -> Span {
    Span::new(BASE + i * HOUR, BASE + (i + 1) * HOUR)
}

async fn phase1_sequential(config: &Config, durable: bool) {
    let engine = engine(config, durable);
    let owner = Owner::new(Ulid::new());

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_booking(&owner, &[hour_slot(i as i64)])
            .await
            .expect("disjoint create");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_disjoint(config: &Config) {
    let engine = engine(config, false);
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let owner = Owner::new(Ulid::new());
            let booking = engine
                .create_booking(&owner, &[hour_slot(i * n_per_task)])
                .await
                .expect("first slot");
            for j in 1..n_per_task {
                engine
                    .add_slot(&owner, booking.id, hour_slot(i * n_per_task + j))
                    .await
                    .expect("disjoint add");
            }
        }));
    }

    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} slots = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended(config: &Config) {
    let engine = engine(config, false);
    let n_tasks = 50;
    let rounds = 40;

    let start = Instant::now();
    let mut won = 0;
    let mut conflicts = 0;

    for round in 0..rounds {
        // Every task in a round wants the same hour.
        let handles: Vec<_> = (0..n_tasks)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let owner = Owner::new(Ulid::new());
                    engine.create_booking(&owner, &[hour_slot(round)]).await
                })
            })
            .collect();
        for h in handles {
            match h.await.expect("task panicked") {
                Ok(_) => won += 1,
                Err(EngineError::SystemConflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected rejection: {e}"),
            }
        }
    }

    assert_eq!(won, rounds, "exactly one winner per contested hour");
    println!(
        "  {rounds} rounds x {n_tasks} tasks: {won} won, {conflicts} conflicts in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

async fn phase4_read_under_load(config: &Config) {
    let engine = engine(config, false);
    let reader = Owner::new(Ulid::new());
    for i in 0..100 {
        engine
            .create_booking(&reader, &[hour_slot(i)])
            .await
            .expect("seed");
    }

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let owner = Owner::new(Ulid::new());
            for i in 0..2000 {
                let _ = engine.create_booking(&owner, &[hour_slot(1000 + i)]).await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(2000);
    while !writer.is_finished() {
        let t = Instant::now();
        let listed = engine.list_bookings(&reader).await.expect("list");
        latencies.push(t.elapsed());
        assert_eq!(listed.len(), 100);
        tokio::task::yield_now().await;
    }
    writer.await.expect("writer panicked");
    print_latency("read latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    observability::init(config.metrics_port).expect("metrics exporter");
    println!("=== slotbook stress benchmark ===\n");

    println!("[phase 1a] sequential create, in memory");
    phase1_sequential(&config, false).await;

    println!("\n[phase 1b] sequential create, with WAL");
    phase1_sequential(&config, true).await;

    println!("\n[phase 2] concurrent disjoint writers");
    phase2_concurrent_disjoint(&config).await;

    println!("\n[phase 3] contended range");
    phase3_contended(&config).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&config).await;

    println!("\n=== benchmark complete ===");
}
