//! Request/response exchange with one balance.
//!
//! Both operating modes share [`exchange`]: discard stale input, send the
//! output command, then read lines until one carries a sign prefix or the
//! deadline passes.
//!
//! - **Measure** ([`measure`]) uses a transport the acquisition loop already
//!   holds, with a 2 second deadline.
//! - **Probe** ([`probe`]) opens a fresh transport, uses a 0.5 second
//!   deadline and closes the transport whatever happens.
//!
//! Neither mode returns an error: transport failures become
//! `Reading::Error` so one misbehaving balance never disturbs the others.

use crate::reading::{is_reading_line, parse_reading, Reading};
use crate::transport::{PortManager, Transport};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Overall deadline for one measurement exchange.
pub const MEASURE_TIMEOUT: Duration = Duration::from_secs(2);

/// Overall deadline for a probe exchange.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Send `command` and wait up to `deadline` for a sign-prefixed reply.
pub async fn exchange(transport: &mut Transport, command: &str, deadline: Duration) -> Reading {
    let start = Instant::now();
    transport.discard_input().await;

    if let Err(e) = transport.send(command).await {
        warn!(port = %transport.identifier(), error = %e, "Command write failed");
        return Reading::Error(e.to_string());
    }

    loop {
        let remaining = deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            debug!(port = %transport.identifier(), "No reading before deadline");
            return Reading::Unavailable;
        }

        match transport.read_line(remaining).await {
            Ok(Some(line)) if is_reading_line(&line) => return parse_reading(&line),
            Ok(Some(line)) => {
                debug!(port = %transport.identifier(), line = %line, "Ignoring non-reading line");
            }
            Ok(None) => return Reading::Unavailable,
            Err(e) => {
                warn!(port = %transport.identifier(), error = %e, "Read failed");
                return Reading::Error(e.to_string());
            }
        }
    }
}

/// Take one tick's reading over an already-open transport.
pub async fn measure(transport: &mut Transport, command: &str, timeout: Duration) -> Reading {
    exchange(transport, command, timeout).await
}

/// One-off check of `identifier` on a short-lived transport.
///
/// Fails with `Reading::Error` if the identifier is held by a running
/// acquisition loop, since ports are exclusive.
pub async fn probe(ports: &PortManager, identifier: &str, command: &str, timeout: Duration) -> Reading {
    let mut transport = match ports.open(identifier).await {
        Ok(t) => t,
        Err(e) => {
            debug!(port = identifier, error = %e, "Probe could not open port");
            return Reading::Error(e.to_string());
        }
    };

    let reading = exchange(&mut transport, command, timeout).await;
    transport.close().await;
    reading
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BalanceBehavior, SimulatedConnector};
    use std::sync::Arc;

    fn ports() -> (SimulatedConnector, PortManager) {
        let connector = SimulatedConnector::new()
            .with_balance("ok", BalanceBehavior::Weighing(250.75))
            .with_balance("negative", BalanceBehavior::Weighing(-1.5))
            .with_balance("silent", BalanceBehavior::Silent)
            .with_balance("garbled", BalanceBehavior::Garbled("ES".into()))
            .with_balance("unplugged", BalanceBehavior::Unplugged)
            .with_balance(
                "streaming",
                BalanceBehavior::Streaming {
                    grams: 1.0,
                    period: Duration::from_millis(10),
                },
            );
        let manager = PortManager::new(Arc::new(connector.clone()));
        (connector, manager)
    }

    #[tokio::test]
    async fn measure_returns_parsed_weight() {
        let (_, ports) = ports();
        let mut transport = ports.open("ok").await.unwrap();
        assert_eq!(
            measure(&mut transport, "O8", MEASURE_TIMEOUT).await,
            Reading::Numeric(250.75)
        );
        let mut transport = ports.open("negative").await.unwrap();
        assert_eq!(
            measure(&mut transport, "S", MEASURE_TIMEOUT).await,
            Reading::Numeric(-1.5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_is_unavailable_within_deadline() {
        let (_, ports) = ports();
        let mut transport = ports.open("silent").await.unwrap();

        let start = Instant::now();
        let reading = measure(&mut transport, "O8", MEASURE_TIMEOUT).await;
        assert_eq!(reading, Reading::Unavailable);
        assert!(start.elapsed() <= MEASURE_TIMEOUT + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn continuously_printing_device_does_not_hold_the_tick() {
        let (_, ports) = ports();
        let mut transport = ports.open("streaming").await.unwrap();

        for _ in 0..3 {
            let start = Instant::now();
            let reading = tokio::time::timeout(
                Duration::from_secs(30),
                measure(&mut transport, "O8", MEASURE_TIMEOUT),
            )
            .await
            .expect("measurement must finish within its deadline");
            assert_eq!(reading, Reading::Numeric(1.0));
            assert!(start.elapsed() <= MEASURE_TIMEOUT);

            // Let the balance print well past the duplex buffer between ticks.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_reading_lines_are_skipped_until_deadline() {
        let (_, ports) = ports();
        let mut transport = ports.open("garbled").await.unwrap();
        assert_eq!(
            measure(&mut transport, "O8", MEASURE_TIMEOUT).await,
            Reading::Unavailable
        );
    }

    #[tokio::test]
    async fn write_failure_becomes_error_reading() {
        let (_, ports) = ports();
        let mut transport = ports.open("unplugged").await.unwrap();
        let reading = measure(&mut transport, "O8", MEASURE_TIMEOUT).await;
        assert!(matches!(reading, Reading::Error(_)));
    }

    #[tokio::test]
    async fn probe_uses_a_fresh_transport_and_releases_it() {
        let (connector, ports) = ports();

        assert_eq!(
            probe(&ports, "ok", "O8", PROBE_TIMEOUT).await,
            Reading::Numeric(250.75)
        );
        assert_eq!(
            probe(&ports, "ok", "O8", PROBE_TIMEOUT).await,
            Reading::Numeric(250.75)
        );
        assert_eq!(connector.connections("ok"), 2);
        assert!(!ports.is_open("ok"));
    }

    #[tokio::test]
    async fn probe_of_held_port_is_rejected() {
        let (connector, ports) = ports();
        let _held = ports.open("ok").await.unwrap();

        let reading = probe(&ports, "ok", "O8", PROBE_TIMEOUT).await;
        assert!(matches!(reading, Reading::Error(_)));
        assert_eq!(connector.connections("ok"), 1);
    }

    #[tokio::test]
    async fn probe_of_missing_device_is_error() {
        let (_, ports) = ports();
        let reading = probe(&ports, "nowhere", "O8", PROBE_TIMEOUT).await;
        assert_eq!(reading.preview(), "No Balance Detected");
    }
}
