//! Simulated timer drift.
//!
//! Runs N timer sessions against one shared in-memory record on a paused
//! tokio clock and reports how far the clients and the record drift apart,
//! how many store writes were made and how many transitions landed.
//!
//! ```bash
//! timer_drift 8 90
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use studyhall_core::{
    InMemoryTimerStore, TimerConfig, TimerHandle, TimerRecord, TimerSnapshot, TimerStore,
};

const ROOM: &str = "drift";
const FOCUS_MINUTES: u32 = 25;
const BREAK_MINUTES: u32 = 5;
const SAMPLE_EVERY: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let clients: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);
    let minutes: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(90);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(simulate(clients.max(1), minutes))
}

#[derive(Debug, Default)]
struct DriftStats {
    samples: u64,
    max_client_spread: u32,
    max_record_gap: u32,
    mode_disagreements: u64,
}

impl DriftStats {
    fn sample(&mut self, snapshots: &[TimerSnapshot], record: &TimerRecord) {
        self.samples += 1;

        let lo = snapshots.iter().map(|s| s.remaining_seconds).min().unwrap_or(0);
        let hi = snapshots.iter().map(|s| s.remaining_seconds).max().unwrap_or(0);
        self.max_client_spread = self.max_client_spread.max(hi - lo);

        let record_seconds = record.remaining_minutes * 60;
        for snapshot in snapshots {
            self.max_record_gap = self
                .max_record_gap
                .max(record_seconds.abs_diff(snapshot.remaining_seconds));
        }

        if snapshots.windows(2).any(|w| w[0].mode != w[1].mode) {
            self.mode_disagreements += 1;
        }
    }
}

async fn simulate(clients: usize, minutes: u64) -> Result<()> {
    let store = Arc::new(InMemoryTimerStore::new());
    store.insert(
        ROOM,
        TimerRecord::new(ROOM, FOCUS_MINUTES, BREAK_MINUTES).with_paused(false),
    );

    // Stagger joins across the first second so clients tick out of phase.
    let mut handles = Vec::with_capacity(clients);
    let stagger = Duration::from_millis(1000 / clients as u64);
    for _ in 0..clients {
        tokio::time::sleep(stagger).await;
        let shared: Arc<dyn TimerStore> = store.clone();
        handles.push(TimerHandle::spawn(ROOM, shared, TimerConfig::default()).await?);
    }

    let mut stats = DriftStats::default();
    let total = Duration::from_secs(minutes * 60);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::sleep(SAMPLE_EVERY).await;
        elapsed += SAMPLE_EVERY;

        let snapshots: Vec<TimerSnapshot> = handles.iter().map(TimerHandle::snapshot).collect();
        let record = store
            .get(ROOM)
            .context("Timer record disappeared during simulation")?;
        stats.sample(&snapshots, &record);
    }

    let record = store
        .get(ROOM)
        .context("Timer record disappeared during simulation")?;
    let period = u64::from(FOCUS_MINUTES + BREAK_MINUTES);
    let expected_cycles =
        2 * (minutes / period) + u64::from(minutes % period >= u64::from(FOCUS_MINUTES));

    println!("Timer drift simulation");
    println!("  clients:                 {:>8}", clients);
    println!("  simulated minutes:       {:>8}", minutes);
    println!("  store reads:             {:>8}", store.read_count());
    println!("  store writes:            {:>8}", store.write_count());
    println!("  transitions applied:     {:>8}", record.cycle);
    println!("  transitions expected:    {:>8}", expected_cycles);
    println!("  max client spread:       {:>7}s", stats.max_client_spread);
    println!("  max client/record gap:   {:>7}s", stats.max_record_gap);
    println!(
        "  mode disagreements:      {:>8} of {} samples",
        stats.mode_disagreements, stats.samples
    );

    for handle in handles {
        handle.shutdown().await?;
    }
    Ok(())
}
