//! # Example: Supervise a small cluster
//!
//! Starts two workers of a managed program, talks to one of them, scales the
//! cluster, crashes a worker on purpose and waits for Ctrl-C.
//!
//! ```text
//! cargo build --bin procvisor-fixture
//! RUST_LOG=info cargo run --example supervise --features logging -- target/debug/procvisor-fixture
//! ```

use std::sync::Arc;
use std::time::Duration;

use procvisor::{Config, LogWriter, ProcessSpec, Subscribe, Supervisor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let script = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "target/debug/procvisor-fixture".to_string());

    let cfg = Config {
        grace: Duration::from_secs(5),
        ..Config::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = Supervisor::builder(cfg).with_subscribers(subs).build();

    let mut online = sup.subscribe("cluster:online");
    let web = sup
        .start_process(ProcessSpec::new(script).with_name("web").with_instances(2))
        .await?;
    let id = web.id.as_str();
    online.recv().await;

    let session = sup.connect_to_process(id).await?;
    let reply = session.request("custom:hello", None).await?;
    println!("[demo] worker {} says {reply}", session.pid());

    let scaled = sup.set_cluster_workers(id, 3).await?;
    println!("[demo] {} workers online", scaled.workers.len());

    // crash one worker; the supervisor respawns it
    session.request("custom:euthanise", None).await?;
    online.recv().await;

    let path = sup.dump_processes().await?;
    println!("[demo] process list saved to {}", path.display());

    println!("[demo] press Ctrl-C to stop");
    sup.run_until_signal().await?;
    Ok(())
}
