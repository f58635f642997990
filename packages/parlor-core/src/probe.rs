//! TCP reachability probing.
//!
//! Used to detect soundbar boot completion (the device accepts TCP a while
//! after power-on) and television wake completion. Probes never error; an
//! endpoint that refuses, times out, or cannot be parsed is simply not
//! reachable.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

/// Probes whether a TCP endpoint accepts connections within the bound.
pub async fn probe_tcp(addr: &str, bound: Duration) -> bool {
    match timeout(bound, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            log::trace!("[Probe] {addr} refused: {e}");
            false
        }
        Err(_elapsed) => {
            log::trace!("[Probe] {addr} timed out after {bound:?}");
            false
        }
    }
}

/// Polls a TCP endpoint at a fixed interval until it becomes reachable or
/// the attempt bound is exhausted.
///
/// Waits `interval` before each probe - callers invoke this right after
/// powering a device on, when an immediate probe cannot succeed. Returns the
/// 1-based attempt number on success, `None` on exhaustion.
pub async fn await_tcp(
    addr: &str,
    interval: Duration,
    attempts: u32,
    probe_bound: Duration,
) -> Option<u32> {
    for attempt in 1..=attempts {
        tokio::time::sleep(interval).await;
        if probe_tcp(addr, probe_bound).await {
            log::debug!("[Probe] {addr} reachable on attempt {attempt}/{attempts}");
            return Some(attempt);
        }
    }
    log::warn!("[Probe] {addr} still unreachable after {attempts} attempts");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn probe_succeeds_against_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(probe_tcp(&addr, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn probe_fails_against_closed_port() {
        // Bind then drop to get a port that is known to be closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(!probe_tcp(&addr, Duration::from_secs(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn await_tcp_gives_up_after_the_attempt_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = tokio::time::Instant::now();
        let result = await_tcp(&addr, Duration::from_secs(2), 5, Duration::from_secs(2)).await;
        assert_eq!(result, None);
        // Five interval sleeps; the refused connects themselves are instant.
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn await_tcp_reports_the_successful_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let result = await_tcp(&addr, Duration::from_secs(2), 5, Duration::from_secs(2)).await;
        assert_eq!(result, Some(1));
    }
}
