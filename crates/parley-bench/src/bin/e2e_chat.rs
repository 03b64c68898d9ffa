//! End-to-end group chat load test for Parley.
//!
//! Connects N clients to a running server, logs each one in, and has every
//! client send group messages as fast as it can while counting deliveries.

use futures_util::{SinkExt, StreamExt};
use parley_protocol::{codec, ClientEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const SERVER_URL: &str = "ws://127.0.0.1:3002/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Parley end-to-end group chat benchmark");
    println!("Server: {} (start it with: cargo run --release)", url);
    println!();

    run_chat_benchmark(num_clients, url).await;
}

async fn run_chat_benchmark(num_clients: usize, url: String) {
    println!("Clients: {}", num_clients);
    println!("Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);

    let delivered = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            spawn_client(
                client_id,
                url.clone(),
                Arc::clone(&delivered),
                Arc::clone(&barrier),
            )
        })
        .collect();

    barrier.wait().await;
    println!("All {} clients started", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    delivered.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = delivered.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Duration:    {:>12.2}s", elapsed.as_secs_f64());
    println!("Delivered:   {:>12}", total);
    println!("Throughput:  {:>12.0} msg/s", per_sec);
    println!("Per client:  {:>12.0} msg/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

/// Start one client. It waits on `barrier` whether or not it managed to
/// log in, then floods the server until aborted.
fn spawn_client(
    client_id: usize,
    url: String,
    delivered: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let session = join(client_id, &url).await;
        barrier.wait().await;
        match session {
            Ok((ws, name)) => flood(ws, name, delivered).await,
            Err(e) => eprintln!("Client {} error: {}", client_id, e),
        }
    })
}

/// Connect and log in as `bench-<client_id>`.
async fn join(client_id: usize, url: &str) -> Result<(WsStream, String), BoxError> {
    let (mut ws, _) = connect_async(url).await?;

    // `connected` handshake
    ws.next().await;

    let name = format!("bench-{}", client_id);
    let login = codec::encode_json(&ClientEvent::login(name.clone()))?;
    ws.send(Message::Text(login)).await?;

    Ok((ws, name))
}

/// Send group messages until the socket fails, counting deliveries.
async fn flood(ws: WsStream, name: String, delivered: Arc<AtomicU64>) {
    let message = match codec::encode_json(&ClientEvent::group_message("x".repeat(64), name)) {
        Ok(message) => Message::Text(message),
        Err(e) => {
            eprintln!("Encode error: {}", e);
            return;
        }
    };

    let (mut sender, mut receiver) = ws.split();

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if text.starts_with(r#"{"event":"group-message""#) {
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
}
