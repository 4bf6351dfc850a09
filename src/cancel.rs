use crate::error::MeasureError;
use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

/// Fails with [`MeasureError::Cancelled`] if the token has already fired.
pub fn check(token: &CancellationToken) -> Result<(), MeasureError> {
    if token.is_cancelled() {
        Err(MeasureError::Cancelled)
    } else {
        Ok(())
    }
}

/// Drives `fut` to completion unless the token fires first.
pub async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output, MeasureError> {
    check(token)?;
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MeasureError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Pause between iterations; wakes early on cancellation.
pub async fn sleep_or_cancel(
    token: &CancellationToken,
    pause: Duration,
) -> Result<(), MeasureError> {
    until_cancelled(token, tokio::time::sleep(pause)).await
}
