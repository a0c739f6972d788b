//! Startup dependency polling.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

/// Block until `address` accepts a TCP connection.
///
/// Each attempt is bounded by `interval` and attempts start `interval`
/// apart. There is no attempt limit; callers that need to give up race this
/// against something else. Returns the number of attempts made.
pub async fn wait_for_dependency(address: &str, interval: Duration) -> u64 {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let started = Instant::now();

        let reason = match timeout(interval, TcpStream::connect(address)).await {
            Ok(Ok(_)) => {
                tracing::info!(address, attempt, "Dependency is accepting connections");
                return attempt;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "connect timed out".to_string(),
        };

        tracing::warn!(
            address,
            attempt,
            reason = %reason,
            retry_in_ms = interval.as_millis() as u64,
            "DependencyUnready"
        );
        sleep(interval.saturating_sub(started.elapsed())).await;
    }
}
