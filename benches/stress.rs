use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime, TimeDelta};

use tablebook::clock::SystemClock;
use tablebook::engine::{AdmissionPolicy, Engine};
use tablebook::model::{LocalizedText, NewRestaurant, RestaurantFilter, RestaurantId, User};
use tablebook::notify::NotifyHub;

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

fn guest(id: u64) -> User {
    User {
        id,
        name: format!("bench{id}"),
        email: format!("bench{id}@example.com"),
        is_admin: false,
    }
}

/// Far enough ahead that every slot is in the future, close enough to be
/// inside the booking horizon.
fn bench_date(offset_days: i64) -> NaiveDate {
    chrono::Local::now().date_naive() + TimeDelta::days(7 + offset_days % 300)
}

fn slot(i: usize) -> NaiveTime {
    // 12:00..23:45 in quarter hours
    let minutes = 12 * 60 + (i % 48) as u32 * 15;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or_default()
}

async fn setup(engine: &Engine) -> Vec<RestaurantId> {
    let capacities = [2, 2, 4, 4, 8, 8, 16, 16, 40, 40];
    let mut ids = Vec::new();
    for (i, &capacity) in capacities.iter().enumerate() {
        let r = engine
            .create_restaurant(NewRestaurant {
                name: LocalizedText::new(format!("bench restaurant {i}")),
                area: LocalizedText::new(if i % 2 == 0 { "Olaya" } else { "Hittin" }),
                cuisine: LocalizedText::new("Mixed"),
                opens_at: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default(),
                closes_at: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default(),
                capacity,
            })
            .await
            .expect("create restaurant");
        ids.push(r.id);
    }
    println!("  created {} restaurants", ids.len());
    ids
}

async fn phase1_sequential(engine: &Engine, rid: RestaurantId) {
    let n = 2000;
    let user = guest(1);
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_booking(Some(&user), rid, bench_date((i / 48) as i64), slot(i), 2)
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contended(engine: Arc<Engine>, rids: &[RestaurantId]) {
    let n_tasks = 32;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let rid = rids[task % rids.len()];
        handles.push(tokio::spawn(async move {
            let user = guest(100 + task as u64);
            let (mut ok, mut full) = (0u32, 0u32);
            for j in 0..n_per_task {
                // Every task hammers the same handful of slots
                match engine
                    .create_booking(Some(&user), rid, bench_date(1000 + (j % 4) as i64), slot(j % 4), 1)
                    .await
                {
                    Ok(_) => ok += 1,
                    Err(_) => full += 1,
                }
            }
            (ok, full)
        }));
    }

    let (mut ok, mut full) = (0, 0);
    for h in handles {
        let (o, f) = h.await.expect("task panicked");
        ok += o;
        full += f;
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} requests = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!("  admitted {ok}, rejected {full}");
}

async fn phase3_read_under_load(engine: Arc<Engine>, rids: &[RestaurantId]) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        let rid = rids[w % rids.len()];
        writers.push(tokio::spawn(async move {
            let user = guest(500 + w as u64);
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine
                    .create_booking(Some(&user), rid, bench_date(2000 + (i / 48) as i64), slot(i), 1)
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 8;
    let reads_per_reader = 500;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        let rid = rids[r % rids.len()];
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                if i % 2 == 0 {
                    let _ = engine.day_availability(rid, bench_date(2000), 15).await;
                } else {
                    let _ = engine.list_restaurants(&RestaurantFilter::default()).await;
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("read latency", &mut all);
}

async fn phase4_compaction(engine: &Engine) {
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_wal().await.expect("compaction");
    println!(
        "  compacted {appends} appends in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join("tablebook_bench");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create bench dir");

    println!("=== tablebook stress benchmark ===");
    println!("wal: {}\n", dir.join("bookings.wal").display());

    let engine = Arc::new(
        Engine::new(
            dir.join("bookings.wal"),
            AdmissionPolicy::ConfirmImmediately,
            Arc::new(SystemClock),
            Arc::new(NotifyHub::new()),
        )
        .expect("open engine"),
    );

    println!("[setup]");
    let rids = setup(&engine).await;

    println!("\n[phase 1] sequential write throughput");
    phase1_sequential(&engine, rids[9]).await;

    println!("\n[phase 2] contended admission");
    phase2_contended(engine.clone(), &rids).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(engine.clone(), &rids).await;

    println!("\n[phase 4] WAL compaction");
    phase4_compaction(&engine).await;

    println!("\n=== benchmark complete ===");
}
