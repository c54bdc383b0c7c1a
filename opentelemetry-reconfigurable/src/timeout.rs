//! Bounded waits for blocking shutdown work.
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Runs `work` on a dedicated thread and waits at most `timeout` for it.
///
/// On expiry this returns [`OTelSdkError::Timeout`] and abandons the thread:
/// whatever the work was doing keeps running in the background, but the
/// caller is released.
pub(crate) fn run_with_timeout<F>(name: &str, timeout: Duration, work: F) -> OTelSdkResult
where
    F: FnOnce() -> OTelSdkResult + Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name(format!("OpenTelemetry.Reconfigurable.{name}"))
        .spawn(move || {
            // The receiver is gone once the caller timed out.
            let _ = sender.send(work());
        })
        .map_err(|err| {
            OTelSdkError::InternalFailure(format!("failed to spawn {name} thread: {err}"))
        })?;

    receiver.recv_timeout(timeout).map_err(|err| match err {
        RecvTimeoutError::Timeout => OTelSdkError::Timeout(timeout),
        RecvTimeoutError::Disconnected => {
            OTelSdkError::InternalFailure(format!("{name} thread exited without a result"))
        }
    })?
}
