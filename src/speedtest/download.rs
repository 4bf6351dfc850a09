use super::mb_per_sec;
use crate::cancel::{self, until_cancelled, CancellationToken};
use crate::clock::{Stopwatch, Throttle};
use crate::error::MeasureError;
use crate::report::{format_speed, report_outcome, ReportSink};
use crate::settings::Settings;
use futures::StreamExt;
use reqwest::Client;
use std::convert::Infallible;
use tracing::{debug, info, warn};

pub const STATUS: &str = "Testing download speed...";

/// Downloads `settings.download_url` over and over until cancelled or a
/// transfer fails. Always ends with exactly one final report.
pub async fn run<R>(client: &Client, settings: &Settings, token: &CancellationToken, sink: &R)
where
    R: ReportSink + ?Sized,
{
    info!(url = %settings.download_url, "download test started");
    sink.report(STATUS, &format_speed(0.0));

    let err = match download_forever(client, settings, token, sink).await {
        Ok(never) => match never {},
        Err(err) => err,
    };
    if !err.is_cancelled() {
        warn!(error = %err, "download test failed");
    }
    info!("download test finished");
    report_outcome(sink, &err);
}

async fn download_forever<R>(
    client: &Client,
    settings: &Settings,
    token: &CancellationToken,
    sink: &R,
) -> Result<Infallible, MeasureError>
where
    R: ReportSink + ?Sized,
{
    loop {
        cancel::check(token)?;
        let bytes = download_once(client, settings, token, sink).await?;
        debug!(bytes, "download pass complete");
        cancel::sleep_or_cancel(token, settings.download_pause).await?;
    }
}

/// One full GET, reporting running throughput as the body arrives.
async fn download_once<R>(
    client: &Client,
    settings: &Settings,
    token: &CancellationToken,
    sink: &R,
) -> Result<u64, MeasureError>
where
    R: ReportSink + ?Sized,
{
    let clock = Stopwatch::start();
    let mut throttle = Throttle::new(settings.download_update_interval);

    let response = until_cancelled(token, client.get(&settings.download_url).send()).await??;
    let status = response.status();
    if !status.is_success() {
        return Err(MeasureError::Transfer(format!(
            "Failed to start download (HTTP {status})"
        )));
    }
    if response.content_length() == Some(0) {
        return Err(MeasureError::Transfer(
            "Failed to start download (empty body)".to_string(),
        ));
    }

    let mut body = response.bytes_stream();
    let mut received: u64 = 0;
    while let Some(chunk) = until_cancelled(token, body.next()).await? {
        received += chunk?.len() as u64;

        if throttle.ready() {
            let speed = mb_per_sec(received, clock.elapsed_secs());
            sink.report(STATUS, &format_speed(speed));
        }
    }
    cancel::check(token)?;

    Ok(received)
}
