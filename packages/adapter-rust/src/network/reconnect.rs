//! Reconnect supervisor: reruns a session according to its `ReconnectPolicy`.

use super::session::{Session, SessionError, SessionExit};
use super::transport::Connector;

/// Runs `session` until shutdown, or until the reconnect policy gives up.
///
/// The attempt counter restarts every time a connection reaches `Listening`,
/// so a long-lived connection that drops gets the full retry budget again.
///
/// # Errors
///
/// The last `SessionError` when the policy refuses another attempt after a
/// failed connect.
pub async fn run_with_reconnect<C: Connector>(
    session: &mut Session,
    connector: &C,
) -> Result<SessionExit, SessionError> {
    let policy = session.config().reconnect.clone();
    let mut shutdown_rx = session.handle().shutdown_receiver();
    let mut attempt: u32 = 0;

    loop {
        let outcome = session.run(connector).await;
        match &outcome {
            Ok(SessionExit::Shutdown) => return outcome,
            Ok(exit) => {
                attempt = 0;
                tracing::warn!(reason = ?exit, "connection lost");
            }
            Err(e) => {
                tracing::warn!(error = %e, kind = %e.kind(), attempt, "connection attempt failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let Some(delay) = policy.delay_for(attempt) else {
            tracing::info!(attempt, "reconnect policy exhausted; giving up");
            return outcome;
        };
        tracing::info!(delay_ms = delay.as_millis(), attempt, "reconnecting");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(SessionExit::Shutdown);
                }
            }
        }
    }
}
