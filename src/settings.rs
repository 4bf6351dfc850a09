use std::time::Duration;

pub const DEFAULT_DOWNLOAD_URL: &str = "http://speedtest.tele2.net/100MB.zip";
pub const DEFAULT_UPLOAD_URL: &str = "https://httpbin.org/post";
pub const DEFAULT_PING_HOST: &str = "8.8.8.8";

/// How the upload loop produces and sends its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStrategy {
    /// Random chunks are generated while the request body is being sent.
    #[default]
    Streaming,
    /// The whole payload is generated first and only the POST is timed.
    Buffered,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub download_url: String,
    pub download_update_interval: Duration,
    pub download_pause: Duration,

    pub upload_url: String,
    pub upload_strategy: UploadStrategy,
    pub upload_size_bytes: usize,
    pub upload_chunk_bytes: usize,
    pub upload_update_interval: Duration,
    pub streaming_upload_pause: Duration,
    pub buffered_upload_pause: Duration,

    pub ping_program: String,
    pub ping_host: String,
    pub ping_interval: Duration,
    pub ping_window: usize,

    pub connect_timeout: Duration,
    /// How long a new run waits for the one it replaced to unwind.
    pub handoff_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            download_update_interval: Duration::from_millis(200),
            download_pause: Duration::from_millis(100),

            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            upload_strategy: UploadStrategy::default(),
            upload_size_bytes: 5 * 1024 * 1024,
            upload_chunk_bytes: 64 * 1024,
            upload_update_interval: Duration::from_millis(50),
            streaming_upload_pause: Duration::from_millis(100),
            buffered_upload_pause: Duration::from_millis(2000),

            ping_program: "ping".to_string(),
            ping_host: DEFAULT_PING_HOST.to_string(),
            ping_interval: Duration::from_millis(500),
            ping_window: 10,

            connect_timeout: Duration::from_secs(10),
            handoff_grace: Duration::from_secs(2),
        }
    }
}

impl Settings {
    pub fn upload_pause(&self) -> Duration {
        match self.upload_strategy {
            UploadStrategy::Streaming => self.streaming_upload_pause,
            UploadStrategy::Buffered => self.buffered_upload_pause,
        }
    }

    /// Arguments for the probe: one reply line per interval, forever.
    pub fn ping_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            format_interval(self.ping_interval),
            self.ping_host.clone(),
        ]
    }

    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
    }
}

fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{secs}")
    }
}
