mod app;
mod ui;

use anyhow::{Context, Result};
use app::{poll_event, App, AppAction};
use clap::{Parser, ValueEnum};
use crossterm::event::Event;
use ratatui::DefaultTerminal;
use speedmon::report::{ChannelSink, Update};
use speedmon::settings::{DEFAULT_DOWNLOAD_URL, DEFAULT_PING_HOST, DEFAULT_UPLOAD_URL};
use speedmon::{Controller, Settings, UploadStrategy};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use ui::draw_ui;

#[derive(Parser, Debug)]
#[command(name = "speedmon", version, about = "Continuous download, upload and latency monitor")]
struct Cli {
    /// Large file fetched repeatedly by the download test
    #[arg(long, default_value = DEFAULT_DOWNLOAD_URL)]
    download_url: String,

    /// Endpoint that accepts the upload test's POSTs
    #[arg(long, default_value = DEFAULT_UPLOAD_URL)]
    upload_url: String,

    /// How upload payloads are produced
    #[arg(long, value_enum, default_value_t = UploadMode::Streaming)]
    upload_mode: UploadMode,

    /// Host probed by the ping test
    #[arg(long, default_value = DEFAULT_PING_HOST)]
    ping_host: String,

    /// Interval between pings in ms
    #[arg(long = "ping-interval-ms", default_value_t = 500)]
    ping_interval_ms: u64,

    /// Probe executable; must accept `-i <secs> <host>`
    #[arg(long, default_value = "ping")]
    ping_program: String,

    /// Write logs to this file (filter with RUST_LOG)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UploadMode {
    Streaming,
    Buffered,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            download_url: self.download_url.clone(),
            upload_url: self.upload_url.clone(),
            upload_strategy: match self.upload_mode {
                UploadMode::Streaming => UploadStrategy::Streaming,
                UploadMode::Buffered => UploadStrategy::Buffered,
            },
            ping_host: self.ping_host.clone(),
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            ping_program: self.ping_program.clone(),
            ..Settings::default()
        }
    }
}

// The terminal belongs to the UI, so logs only go to a file.
fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("speedmon=info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.log_file {
        init_logging(path)?;
    }

    let (sink, updates) = ChannelSink::new();
    let controller = Controller::new(cli.settings(), Arc::new(sink))?;

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, &controller, updates).await;

    ratatui::restore();
    result
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    controller: &Controller,
    mut updates: mpsc::UnboundedReceiver<Update>,
) -> Result<()> {
    let mut app = App::new(controller.settings());

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        // Handle measurement updates
        while let Ok(update) = updates.try_recv() {
            app.apply(update);
        }

        // Handle input
        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::Start(kind) => controller.start(kind),
                    AppAction::Stop => controller.stop(),
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
