//! tether Counter Demo
//!
//! One background hub and three replicas (popup, options, content script)
//! share a counter. The counter is persisted to a directory, so running
//! the demo again continues where the last run stopped.
//!
//! Usage: `counter-demo [STATE_DIR] [CLICKS]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use tether_core::{ContextKind, MemoryStore, Mutation, State, StateContainer, SyncOptions};
use tether_persist::FileStorage;
use tether_runtime::{init_logging, Hub, LogFormat, Replica, ReplicaHandle};
use tether_transport::memory_transport;

const COUNTER: &str = "COUNTER";

/// Every context builds the same store, as the extension's shared module does
fn create_store() -> Arc<MemoryStore> {
    MemoryStore::builder()
        .field("counter", json!(0))
        .mutation(COUNTER, |state, _| {
            let next = state.get("counter").and_then(Value::as_i64).unwrap_or(0) + 1;
            state.insert("counter".into(), json!(next));
        })
        .build()
}

fn counter(store: &MemoryStore) -> i64 {
    store.get("counter").and_then(|v| v.as_i64()).unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let state_dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("tether-counter-demo"));
    let clicks: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(3);

    let options = SyncOptions::from_json_str(r#"{"persist": ["counter"], "debug": false}"#)?;
    init_logging(options.log_level, LogFormat::Pretty);

    println!("=== tether Counter Demo ===\n");

    // 1. Background context: the hub
    println!("1. Starting background hub (state in {})...", state_dir.display());
    let (connector, listener) = memory_transport();
    let background = create_store();
    background.subscribe(Arc::new(|mutation: &Mutation, state: &State| {
        if mutation.kind == COUNTER {
            tracing::info!(counter = ?state.get("counter"), "background saw counter");
        }
    }));
    let hub = Hub::builder(Arc::clone(&background))
        .options(options.clone())
        .storage(Arc::new(FileStorage::new(&state_dir)))
        .spawn(listener)?;
    hub.restored().await;
    println!("   Restored counter: {}", counter(&background));

    // 2. The other contexts connect as replicas
    println!("\n2. Opening popup, options page and content script...");
    let contexts = [
        ("popup", ContextKind::Popup),
        ("options", ContextKind::Options),
        ("content-script", ContextKind::ContentScript),
    ];
    let mut replicas: Vec<(&str, Arc<MemoryStore>, ReplicaHandle)> = Vec::new();
    for (label, kind) in contexts {
        let store = create_store();
        let handle = Replica::builder(Arc::clone(&store), kind)
            .options(options.clone())
            .spawn(connector.clone());
        handle.wait_initialized().await?;
        println!("   {:<15} {} counter={}", label, handle.channel_name(), counter(&store));
        replicas.push((label, store, handle));
    }

    // 3. Click the counter in every context
    println!("\n3. Clicking the counter {} time(s) in every context...", clicks);
    for _ in 0..clicks {
        for (_, store, _) in &replicas {
            store.commit(Mutation::new(COUNTER));
        }
        background.commit(Mutation::new(COUNTER));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 4. Everyone agrees
    println!("\n4. Final counters:");
    println!("   {:<15} {}", "background", counter(&background));
    for (label, store, _) in &replicas {
        println!("   {:<15} {}", label, counter(store));
    }

    hub.flush().await?;
    for (_, _, handle) in replicas {
        handle.shutdown().await;
    }
    hub.shutdown().await;

    println!("\n=== Demo Complete ===");
    Ok(())
}
