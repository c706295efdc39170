use std::time::Duration;

use nlbench::{Ipc, Listener};

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    // The control channel lives on the well-known path of the benchmark unit.
    let mut listener = Listener::new(Ipc::new());
    if let Err(e) = listener.bind_well_known().await {
        tracing::error!(err = %e, "failed to open the control channel");
        std::process::exit(1);
    }
    println!("Listening on {:?}", listener.local_addr().unwrap());

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let stats = listener.generator().stats();
                println!(
                    "clients: {} | requests: {} ({} rejected) | delivered: {} | lost: {} | timers: {}",
                    listener.stats().active_clients(),
                    stats.requests(),
                    stats.rejected(),
                    stats.delivered(),
                    stats.lost(),
                    listener.generator().pending_timers(),
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    listener.shutdown();
}
