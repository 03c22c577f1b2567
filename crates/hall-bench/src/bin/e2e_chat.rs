//! End-to-end chat throughput benchmark.
//!
//! Connects N clients to one room of a running server and measures how many
//! relayed chat frames they receive per second.
//!
//! ```bash
//! studyhall &
//! e2e_chat 16 ws://127.0.0.1:8080/ws
//! ```

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use studyhall_protocol::{decode_server, encode_client, ClientMessage, ServerMessage};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM: &str = "bench";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Study Hall end-to-end chat benchmark");
    println!("  server:  {}", url);
    println!("  clients: {}", num_clients);
    println!("  warmup {}s, measurement {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::with_capacity(num_clients);
    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, received, barrier).await {
                eprintln!("Client {} error: {:#}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients joined room {:?}", num_clients, ROOM);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);

    let per_sec = total as f64 / elapsed.as_secs_f64();
    println!();
    println!("Results");
    println!("  duration:        {:>10.2}s", elapsed.as_secs_f64());
    println!("  frames received: {:>10}", total);
    println!("  throughput:      {:>10.0} frames/s", per_sec);
    println!(
        "  per client:      {:>10.0} frames/s",
        per_sec / num_clients.max(1) as f64
    );

    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn run_client(
    client_id: usize,
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<()> {
    let (ws, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    let (mut sender, mut receiver) = ws.split();

    let user_id = format!("bench-{}", client_id);
    let join = encode_client(&ClientMessage::join(&user_id, ROOM))?;
    sender.send(Message::Text(join)).await?;

    // Wait for our own room_state before counting anything.
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if let ServerMessage::RoomState { .. } = decode_server(&text)? {
                    break;
                }
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => bail!("Connection closed before join completed"),
        }
    }

    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Text(text) = message {
                if let Ok(ServerMessage::Chat { .. }) = decode_server(&text) {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let chat = Message::Text(encode_client(&ClientMessage::chat(
        &user_id,
        ROOM,
        "focus time",
    ))?);
    while sender.send(chat.clone()).await.is_ok() {
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
