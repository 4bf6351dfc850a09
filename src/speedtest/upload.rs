use super::mb_per_sec;
use crate::cancel::{self, until_cancelled, CancellationToken};
use crate::clock::Stopwatch;
use crate::error::MeasureError;
use crate::report::{format_speed, report_outcome, ReportSink};
use crate::settings::{Settings, UploadStrategy};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, Response};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const STATUS: &str = "Testing upload speed...";
pub const GENERATING: &str = "Generating data...";
pub const UPLOADING: &str = "Uploading data...";

const OCTET_STREAM: &str = "application/octet-stream";

/// Fixed-size source of random bytes, produced one chunk at a time.
///
/// Stops early, yielding `None`, once the token is cancelled. Every byte
/// handed out is added to a shared counter so progress can be read from
/// another task while the request body is in flight.
pub struct RandomPayload {
    remaining: usize,
    chunk_size: usize,
    rng: StdRng,
    generated: Arc<AtomicU64>,
    token: CancellationToken,
}

impl RandomPayload {
    pub fn new(total: usize, chunk_size: usize, token: CancellationToken) -> Self {
        Self {
            remaining: total,
            chunk_size: chunk_size.max(1),
            rng: StdRng::from_entropy(),
            generated: Arc::new(AtomicU64::new(0)),
            token,
        }
    }

    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generated)
    }
}

impl Iterator for RandomPayload {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.remaining == 0 || self.token.is_cancelled() {
            return None;
        }
        let len = self.remaining.min(self.chunk_size);
        let mut chunk = vec![0u8; len];
        self.rng.fill_bytes(&mut chunk);
        self.remaining -= len;
        self.generated.fetch_add(len as u64, Ordering::Relaxed);
        Some(chunk)
    }
}

/// Uploads a random payload to `settings.upload_url` over and over until
/// cancelled or a transfer fails. Always ends with exactly one final report.
pub async fn run<R>(client: &Client, settings: &Settings, token: &CancellationToken, sink: &R)
where
    R: ReportSink + ?Sized,
{
    info!(
        url = %settings.upload_url,
        strategy = ?settings.upload_strategy,
        "upload test started"
    );
    sink.report(STATUS, &format_speed(0.0));

    let outcome = match settings.upload_strategy {
        UploadStrategy::Streaming => upload_streaming(client, settings, token, sink).await,
        UploadStrategy::Buffered => upload_buffered(client, settings, token, sink).await,
    };
    let err = match outcome {
        Ok(never) => match never {},
        Err(err) => err,
    };
    if !err.is_cancelled() {
        warn!(error = %err, "upload test failed");
    }
    info!("upload test finished");
    report_outcome(sink, &err);
}

async fn upload_streaming<R>(
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
        let payload = RandomPayload::new(
            settings.upload_size_bytes,
            settings.upload_chunk_bytes,
            token.clone(),
        );
        let generated = payload.counter();
        let body = Body::wrap_stream(futures::stream::iter(
            payload.map(Ok::<_, std::io::Error>),
        ));

        let clock = Stopwatch::start();
        let request = client
            .post(&settings.upload_url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send();
        tokio::pin!(request);

        let period = settings.upload_update_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let response = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(MeasureError::Cancelled),
                response = &mut request => break response?,
                _ = ticker.tick() => report_progress(sink, &generated, &clock),
            }
        };
        finish(response, token).await?;
        debug!(bytes = generated.load(Ordering::Relaxed), "streaming upload pass complete");

        cancel::sleep_or_cancel(token, settings.upload_pause()).await?;
    }
}

/// Rate of a streaming pass so far: bytes handed to the request body over
/// the time since the pass started.
fn report_progress<R>(sink: &R, generated: &AtomicU64, clock: &Stopwatch)
where
    R: ReportSink + ?Sized,
{
    let sent = generated.load(Ordering::Relaxed);
    sink.report(STATUS, &format_speed(mb_per_sec(sent, clock.elapsed_secs())));
}

async fn upload_buffered<R>(
    client: &Client,
    settings: &Settings,
    token: &CancellationToken,
    sink: &R,
) -> Result<Infallible, MeasureError>
where
    R: ReportSink + ?Sized,
{
    let mut metric = format_speed(0.0);
    loop {
        cancel::check(token)?;
        sink.report(GENERATING, &metric);
        let payload = generate(settings, token).await?;
        let size = payload.len() as u64;

        sink.report(UPLOADING, &metric);
        let clock = Stopwatch::start();
        let request = client
            .post(&settings.upload_url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(payload)
            .send();
        let response = until_cancelled(token, request).await??;
        let transfer_secs = clock.elapsed_secs();
        finish(response, token).await?;

        metric = format_speed(mb_per_sec(size, transfer_secs));
        debug!(bytes = size, secs = transfer_secs, "buffered upload pass complete");
        sink.report(STATUS, &metric);

        cancel::sleep_or_cancel(token, settings.upload_pause()).await?;
    }
}

/// Builds the whole payload off the async workers.
async fn generate(settings: &Settings, token: &CancellationToken) -> Result<Vec<u8>, MeasureError> {
    let total = settings.upload_size_bytes;
    let payload = RandomPayload::new(total, settings.upload_chunk_bytes, token.clone());
    let buffer = tokio::task::spawn_blocking(move || {
        let mut buffer = Vec::with_capacity(total);
        for chunk in payload {
            buffer.extend_from_slice(&chunk);
        }
        buffer
    })
    .await
    .map_err(|e| MeasureError::Generator(e.to_string()))?;
    // A cancelled generator stops short; never upload a partial payload.
    cancel::check(token)?;
    Ok(buffer)
}

async fn finish(response: Response, token: &CancellationToken) -> Result<(), MeasureError> {
    let status = response.status();
    if !status.is_success() {
        return Err(MeasureError::Transfer(format!("Upload failed (HTTP {status})")));
    }
    until_cancelled(token, response.bytes()).await??;
    cancel::check(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::testing::Recorder;
    use crate::report::StatusUpdate;
    use crate::speedtest::test_server::{Reply, TestServer};
    use std::time::Duration;

    fn settings_for(url: String, strategy: UploadStrategy) -> Settings {
        Settings {
            upload_url: url,
            upload_strategy: strategy,
            upload_size_bytes: 256 * 1024,
            upload_chunk_bytes: 16 * 1024,
            upload_update_interval: Duration::from_millis(5),
            streaming_upload_pause: Duration::from_millis(10),
            buffered_upload_pause: Duration::from_millis(20),
            ..Settings::default()
        }
    }

    fn spawn_loop(
        settings: Settings,
        token: CancellationToken,
        sink: Arc<Recorder>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let client = settings.http_client().unwrap();
            run(&client, &settings, &token, sink.as_ref()).await;
        })
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_payload_chunking() {
        let payload = RandomPayload::new(100, 30, CancellationToken::new());
        let counter = payload.counter();
        let sizes: Vec<usize> = payload.map(|c| c.len()).collect();
        assert_eq!(sizes, vec![30, 30, 30, 10]);
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_default_payload_is_eighty_chunks() {
        let settings = Settings::default();
        let payload = RandomPayload::new(
            settings.upload_size_bytes,
            settings.upload_chunk_bytes,
            CancellationToken::new(),
        );
        let chunks: Vec<Vec<u8>> = payload.collect();
        assert_eq!(chunks.len(), 80);
        assert!(chunks.iter().all(|c| c.len() == 65_536));
        assert_ne!(chunks[0], chunks[1]);
    }

    #[test]
    fn test_payload_stops_on_cancel() {
        let token = CancellationToken::new();
        let mut payload = RandomPayload::new(1000, 100, token.clone());
        assert!(payload.next().is_some());
        assert!(payload.next().is_some());
        token.cancel();
        assert!(payload.next().is_none());
        assert_eq!(payload.counter().load(Ordering::Relaxed), 200);
    }

    #[tokio::test]
    async fn test_streaming_repeats_until_cancelled() {
        let server = TestServer::start(Reply {
            body_len: 2,
            ..Reply::default()
        })
        .await;
        let settings = settings_for(server.url(), UploadStrategy::Streaming);
        let payload_len = settings.upload_size_bytes as u64;
        let sink = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let handle = spawn_loop(settings, token.clone(), sink.clone());

        wait_for(|| server.requests() >= 2).await;
        token.cancel();
        handle.await.unwrap();

        // The first pass completed before the second request arrived.
        assert!(server.received() >= payload_len);
        let updates = sink.updates();
        assert_eq!(updates[0], StatusUpdate::new(STATUS, "0.00 MB/s"));
        assert!(updates[1..updates.len() - 1].iter().all(|u| u.status == STATUS));
        assert_eq!(sink.last(), Some(StatusUpdate::new("Test cancelled", "--")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_rate_counts_generated_bytes() {
        let sink = Recorder::default();
        let generated = AtomicU64::new(0);
        let clock = Stopwatch::start();

        tokio::time::advance(Duration::from_millis(500)).await;
        generated.store(1024 * 1024, Ordering::Relaxed);
        report_progress(&sink, &generated, &clock);

        tokio::time::advance(Duration::from_millis(500)).await;
        generated.store(5 * 1024 * 1024, Ordering::Relaxed);
        report_progress(&sink, &generated, &clock);

        assert_eq!(
            sink.updates(),
            vec![
                StatusUpdate::new(STATUS, "2.00 MB/s"),
                StatusUpdate::new(STATUS, "5.00 MB/s"),
            ]
        );
    }

    #[tokio::test]
    async fn test_streaming_cancelled_mid_request_ends_cancelled() {
        let server = TestServer::start(Reply {
            body_len: 2,
            respond_after: Duration::from_secs(30),
            ..Reply::default()
        })
        .await;
        let sink = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let handle = spawn_loop(
            settings_for(server.url(), UploadStrategy::Streaming),
            token.clone(),
            sink.clone(),
        );

        wait_for(|| server.requests() == 1 && sink.updates().len() >= 3).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("upload did not stop")
            .unwrap();

        let updates = sink.updates();
        let (last, progress) = updates.split_last().unwrap();
        assert_eq!(*last, StatusUpdate::new("Test cancelled", "--"));
        assert!(progress.iter().all(|u| u.status == STATUS));
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_buffered_reports_after_each_transfer() {
        let server = TestServer::start(Reply {
            body_len: 2,
            ..Reply::default()
        })
        .await;
        let sink = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        let handle = spawn_loop(
            settings_for(server.url(), UploadStrategy::Buffered),
            token.clone(),
            sink.clone(),
        );

        wait_for(|| sink.updates().len() >= 5).await;
        token.cancel();
        handle.await.unwrap();

        let updates = sink.updates();
        assert_eq!(updates[0], StatusUpdate::new(STATUS, "0.00 MB/s"));
        assert_eq!(updates[1], StatusUpdate::new(GENERATING, "0.00 MB/s"));
        assert_eq!(updates[2], StatusUpdate::new(UPLOADING, "0.00 MB/s"));
        assert_eq!(updates[3].status, STATUS);
        assert!(updates[3].metric.ends_with(" MB/s"));
        // The last result stays on screen while the next payload is built.
        assert_eq!(updates[4], StatusUpdate::new(GENERATING, updates[3].metric.clone()));
        assert!(server.received() >= 256 * 1024);
        assert_eq!(sink.last(), Some(StatusUpdate::new("Test cancelled", "--")));
    }

    #[tokio::test]
    async fn test_server_error_ends_loop() {
        for strategy in [UploadStrategy::Streaming, UploadStrategy::Buffered] {
            let server = TestServer::start(Reply {
                status: 500,
                ..Reply::default()
            })
            .await;
            let sink = Arc::new(Recorder::default());
            let handle = spawn_loop(
                settings_for(server.url(), strategy),
                CancellationToken::new(),
                sink.clone(),
            );
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("loop should end on its own")
                .unwrap();

            assert_eq!(
                sink.last(),
                Some(StatusUpdate::new(
                    "Error: Upload failed (HTTP 500 Internal Server Error)",
                    "--"
                )),
                "{strategy:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_cancel_before_first_upload() {
        let server = TestServer::start(Reply::default()).await;
        let sink = Arc::new(Recorder::default());
        let token = CancellationToken::new();
        token.cancel();
        spawn_loop(
            settings_for(server.url(), UploadStrategy::Buffered),
            token,
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(
            sink.updates(),
            vec![
                StatusUpdate::new(STATUS, "0.00 MB/s"),
                StatusUpdate::new("Test cancelled", "--"),
            ]
        );
        assert_eq!(server.requests(), 0);
    }
}
