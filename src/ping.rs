use std::time::Duration;

use crate::hub::registry::ConnectionRegistry;

/// §5 / original `ping_clients.go`: a control ping every 30 seconds.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Deadline the writer task allows for each ping write (§4.10).
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs forever, enqueueing a bare control ping to every live connection on
/// each tick. A failed write is the writer task's concern (it tears the
/// connection down through the same path as a read failure) — this sweep
/// only fires the pings.
pub async fn run(registry: ConnectionRegistry) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    // The first tick fires immediately; skip it so we don't ping brand-new
    // connections before they've had a chance to do anything.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        sweep_once(&registry).await;
    }
}

pub async fn sweep_once(registry: &ConnectionRegistry) {
    let snapshot = registry.snapshot().await;
    for handles in snapshot.values() {
        for handle in handles {
            registry.send_ping(handle);
        }
    }
}
