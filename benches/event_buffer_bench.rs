//! Benchmark to measure the cost of appending events to the per-agent
//! event buffer under the striped per-agent lock.
//!
//! Run with: cargo run --release --bin event_buffer_bench

use std::sync::Arc;
use std::time::Instant;

use taskmesh::broadcaster::BroadcasterRegistry;
use taskmesh::event::AgentEvent;
use taskmesh_store::memory::InMemoryStore;

#[tokio::main]
async fn main() {
    let store = Arc::new(InMemoryStore::new());
    let registry = BroadcasterRegistry::new(store, 500);
    let agent_id = "bench-agent";

    let iterations = 20_000;

    println!("Event Buffer Append Benchmark");
    println!("=============================\n");
    println!("Buffer cap: 500, iterations: {iterations}\n");

    let start = Instant::now();
    for i in 0..iterations {
        registry
            .notify(agent_id, AgentEvent::Message { text: format!("event {i}") })
            .await
            .expect("append should succeed");
    }
    let elapsed = start.elapsed();

    println!("Total time: {elapsed:?}");
    println!("Per append: {:.2}µs", elapsed.as_micros() as f64 / iterations as f64);
}
